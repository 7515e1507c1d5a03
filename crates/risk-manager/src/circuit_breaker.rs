//! Multi-tier kill switch gating every trade.
//!
//! Tier only moves up on its own. Moving down takes a confirmed manual override.
//! Transitions are decided under the state lock and announced after it is
//! released, so a slow notification channel never stalls permission checks.

use chrono::{DateTime, Utc};
use guard_core::config::KillSwitchConfig;
use guard_core::{event_kinds, Clock, EscalationSink, SystemClock, Tier};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const HISTORY_CAP: usize = 50;

/// A recorded trade error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeErrorRecord {
    pub at: DateTime<Utc>,
    pub reason: String,
    /// Cumulative error count after this error.
    pub count: u32,
}

/// A tier change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: Tier,
    pub to: Tier,
    pub reason: String,
    pub source: String,
    pub at: DateTime<Utc>,
}

impl Transition {
    fn message(&self) -> String {
        if self.to > self.from {
            format!("Escalated to {}: {}", self.to, self.reason)
        } else {
            format!(
                "De-escalated from {} to {} by {}: {}",
                self.from, self.to, self.source, self.reason
            )
        }
    }
}

/// Result of a manual override request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OverrideOutcome {
    Applied { from: Tier, to: Tier },
    /// Already at the requested tier.
    Unchanged,
    /// Unconfirmed HALT, or unconfirmed de-escalation.
    Rejected,
}

/// Read-only view of the breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub tier: Tier,
    pub enabled: bool,
    pub trading_allowed: bool,
    pub error_count: u32,
    pub disconnect_count: u32,
    pub recent_errors: Vec<TradeErrorRecord>,
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Default)]
struct BreakerState {
    /// Monotonic for the process lifetime; never reset on tier change.
    error_count: u32,
    disconnect_count: u32,
    recent_errors: VecDeque<TradeErrorRecord>,
    transitions: VecDeque<Transition>,
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T) {
    if queue.len() == HISTORY_CAP {
        queue.pop_front();
    }
    queue.push_back(item);
}

/// Process-wide kill switch. Construct once and share via `Arc`.
pub struct CircuitBreaker {
    config: KillSwitchConfig,
    /// Fast path for permission checks; written only under `state`.
    tier: AtomicU8,
    enabled: AtomicBool,
    state: Mutex<BreakerState>,
    notifier: Arc<dyn EscalationSink>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: KillSwitchConfig, notifier: Arc<dyn EscalationSink>) -> Self {
        Self::with_clock(config, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: KillSwitchConfig,
        notifier: Arc<dyn EscalationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            tier: AtomicU8::new(Tier::Running.as_u8()),
            state: Mutex::new(BreakerState::default()),
            notifier,
            clock,
        }
    }

    /// Current tier. An unreadable value reads as HALT.
    pub fn tier(&self) -> Tier {
        Tier::from_u8(self.tier.load(Ordering::SeqCst)).unwrap_or(Tier::Halt)
    }

    /// Operator toggle, independent of tier.
    pub fn kill_switch_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// True only in RUNNING or REDUCE_RISK with the operator toggle on.
    pub fn is_trading_allowed(&self) -> bool {
        self.kill_switch_enabled() && self.tier().permits_trading()
    }

    /// Whether workers should keep running at all.
    pub fn is_enabled(&self) -> bool {
        self.kill_switch_enabled() && self.tier() < Tier::Halt
    }

    pub fn set_enabled(&self, enabled: bool, source: &str) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            warn!(enabled, source = %source, "Kill switch toggle changed");
        }
    }

    /// Count a failed trade. PAUSE at the threshold, HALT at twice the threshold.
    pub async fn record_trade_error(&self, reason: &str) -> Tier {
        let transition = {
            let mut state = self.state.lock().await;
            state.error_count = state.error_count.saturating_add(1);
            let count = state.error_count;
            push_bounded(
                &mut state.recent_errors,
                TradeErrorRecord {
                    at: self.clock.now(),
                    reason: reason.to_string(),
                    count,
                },
            );

            let threshold = self.config.max_errors.max(1);
            let target = if count >= threshold.saturating_mul(2) {
                Some(Tier::Halt)
            } else if count >= threshold {
                Some(Tier::Pause)
            } else {
                None
            };
            warn!(count, threshold, reason = %reason, "Trade error recorded");

            target.and_then(|t| self.escalate_locked(&mut state, t, reason, "trade_error"))
        };
        self.announce(transition).await
    }

    /// Connectivity loss: PAUSE on the first, HALT on any further disconnect.
    pub async fn record_api_disconnect(&self, reason: &str) -> Tier {
        let transition = {
            let mut state = self.state.lock().await;
            state.disconnect_count = state.disconnect_count.saturating_add(1);

            let target = if state.disconnect_count == 1 && self.tier() < Tier::Pause {
                Tier::Pause
            } else {
                Tier::Halt
            };
            warn!(
                disconnects = state.disconnect_count,
                reason = %reason,
                "API disconnect recorded"
            );

            self.escalate_locked(&mut state, target, reason, "api_disconnect")
        };
        self.announce(transition).await
    }

    /// Unconditional HALT. No-op only when already halted.
    pub async fn record_risk_breach(&self, reason: &str) -> Tier {
        let transition = {
            let mut state = self.state.lock().await;
            self.escalate_locked(&mut state, Tier::Halt, reason, "risk_breach")
        };
        self.announce(transition).await
    }

    /// Operator-requested tier change.
    ///
    /// Escalation is applied as requested. De-escalation needs `confirmed`.
    /// HALT without `confirmed` is always refused and reported to operators.
    pub async fn manual_override(
        &self,
        target: Tier,
        reason: &str,
        confirmed: bool,
        source: &str,
    ) -> OverrideOutcome {
        if target == Tier::Halt && !confirmed {
            warn!(source = %source, reason = %reason, "HALT override requested without confirmation");
            self.notifier
                .escalate_event(
                    event_kinds::KILL_SWITCH,
                    &format!("HALT override attempted without confirmation by {source}: {reason}"),
                )
                .await;
            return OverrideOutcome::Rejected;
        }

        let (outcome, transition) = {
            let mut state = self.state.lock().await;
            let current = self.tier();

            if target > current {
                let transition = self.escalate_locked(&mut state, target, reason, source);
                (OverrideOutcome::Applied { from: current, to: target }, transition)
            } else if target < current {
                if !confirmed {
                    warn!(
                        current = %current,
                        requested = %target,
                        source = %source,
                        "De-escalation requested without confirmation"
                    );
                    return OverrideOutcome::Rejected;
                }
                let transition = self.apply_locked(&mut state, current, target, reason, source);
                info!(from = %current, to = %target, source = %source, "Confirmed de-escalation");
                (OverrideOutcome::Applied { from: current, to: target }, Some(transition))
            } else {
                (OverrideOutcome::Unchanged, None)
            }
        };

        self.announce(transition).await;
        outcome
    }

    /// Forward a non-tier alert (e.g. a strategy being disabled) to operators.
    pub async fn notify_operators(&self, kind: &str, message: &str) {
        self.notifier.escalate_event(kind, message).await;
    }

    pub async fn status(&self) -> BreakerStatus {
        let state = self.state.lock().await;
        BreakerStatus {
            tier: self.tier(),
            enabled: self.kill_switch_enabled(),
            trading_allowed: self.is_trading_allowed(),
            error_count: state.error_count,
            disconnect_count: state.disconnect_count,
            recent_errors: state.recent_errors.iter().cloned().collect(),
            transitions: state.transitions.iter().cloned().collect(),
        }
    }

    pub fn config(&self) -> &KillSwitchConfig {
        &self.config
    }

    // Private methods

    /// Move up to `target` if it is above the current tier.
    fn escalate_locked(
        &self,
        state: &mut BreakerState,
        target: Tier,
        reason: &str,
        source: &str,
    ) -> Option<Transition> {
        let current = self.tier();
        if target <= current {
            return None;
        }
        let transition = self.apply_locked(state, current, target, reason, source);
        error!(
            from = %current,
            to = %target,
            reason = %reason,
            source = %source,
            error_count = state.error_count,
            "Kill switch ESCALATED"
        );
        Some(transition)
    }

    fn apply_locked(
        &self,
        state: &mut BreakerState,
        from: Tier,
        to: Tier,
        reason: &str,
        source: &str,
    ) -> Transition {
        self.tier.store(to.as_u8(), Ordering::SeqCst);
        let transition = Transition {
            from,
            to,
            reason: reason.to_string(),
            source: source.to_string(),
            at: self.clock.now(),
        };
        push_bounded(&mut state.transitions, transition.clone());
        transition
    }

    /// One notification per transition. Must be called without the state lock.
    async fn announce(&self, transition: Option<Transition>) -> Tier {
        if let Some(transition) = transition {
            self.notifier
                .escalate_event(event_kinds::KILL_SWITCH, &transition.message())
                .await;
        }
        self.tier()
    }
}
