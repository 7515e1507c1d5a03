//! Alpha Guard: risk controls for multi-strategy trading bots
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the internal crates. For actual functionality, use them directly:
//!
//! - `guard-core`: Tier, configuration, clock, escalation seam
//! - `notifier`: Telegram/email/Slack fan-out with PANIC log fallback
//! - `risk-manager`: Kill switch, risk accountant, config tamper monitor
//! - `guard-daemon`: Control loop and status endpoint binary

// Re-export for benchmarks and integration tests
pub use guard_core as core;
pub use notifier;
pub use risk_manager as risk;
