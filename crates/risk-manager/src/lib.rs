//! Risk Manager
//!
//! Kill switch, rolling-window risk accounting, and config tamper detection.

pub mod accountant;
pub mod circuit_breaker;
pub mod integrity;
pub mod ledger;
pub mod status;

pub use accountant::{AccountSnapshot, Breach, RiskAccountant, StrategySnapshot};
pub use circuit_breaker::{BreakerStatus, CircuitBreaker, OverrideOutcome, TradeErrorRecord, Transition};
pub use integrity::ConfigIntegrityMonitor;
pub use ledger::{GlobalLedger, PnlSample, RollingWindow, StrategyLedger, TradeStats};
pub use status::GuardStatus;
