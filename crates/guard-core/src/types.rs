//! Core types shared by the breaker, the accountant, and the notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Well-known notification event kinds.
pub mod event_kinds {
    pub const KILL_SWITCH: &str = "kill_switch";
    pub const RISK: &str = "risk";
    pub const CONFIG_TAMPER: &str = "config_tamper";
}

/// Risk posture of the kill switch, ordered by ascending severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Tier {
    /// Normal operation.
    Running = 0,
    /// No new trades until an operator intervenes.
    Pause = 1,
    /// Trading allowed at half the usual size limits.
    ReduceRisk = 2,
    /// Positions should be unwound; no new trades.
    Liquidate = 3,
    /// Everything stops.
    Halt = 4,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Running,
        Tier::Pause,
        Tier::ReduceRisk,
        Tier::Liquidate,
        Tier::Halt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Running => "running",
            Tier::Pause => "pause",
            Tier::ReduceRisk => "reduce_risk",
            Tier::Liquidate => "liquidate",
            Tier::Halt => "halt",
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Whether new trades may be opened at this tier.
    pub fn permits_trading(self) -> bool {
        matches!(self, Tier::Running | Tier::ReduceRisk)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == normalized)
            .ok_or_else(|| Error::InvalidTier(s.to_string()))
    }
}

/// An escalation message on its way to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    /// Free-form tag, e.g. `kill_switch`, `risk`, `config_tamper`.
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Text sent to chat channels: `[KIND] message`.
    pub fn headline(&self) -> String {
        format!("[{}] {}", self.kind.to_uppercase(), self.message)
    }

    /// Single line for the local PANIC record. Embedded newlines are flattened.
    pub fn panic_line(&self) -> String {
        let message = self.message.replace(['\r', '\n'], " ");
        format!(
            "{} {}: {}",
            self.timestamp.to_rfc3339(),
            self.kind.to_uppercase(),
            message
        )
    }
}
