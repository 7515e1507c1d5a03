//! Guard Core Library
//!
//! Shared types, configuration, and error handling for the trading safety core.

pub mod clock;
pub mod config;
pub mod error;
pub mod escalation;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use error::{Error, Result};
pub use escalation::{EscalationSink, MemorySink};
pub use types::{event_kinds, NotificationEvent, Tier};
