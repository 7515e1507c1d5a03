//! Periodic integrity checks and trade-size scaling.

use guard_core::event_kinds;
use risk_manager::{ConfigIntegrityMonitor, RiskAccountant};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Breaker reached HALT or the operator toggle was turned off.
    Disabled,
    Shutdown,
}

pub struct ControlLoop {
    accountant: Arc<RiskAccountant>,
    monitor: ConfigIntegrityMonitor,
    interval: Duration,
}

impl ControlLoop {
    pub fn new(accountant: Arc<RiskAccountant>, monitor: ConfigIntegrityMonitor, interval: Duration) -> Self {
        Self {
            accountant,
            monitor,
            interval,
        }
    }

    /// Run until the breaker disables trading or `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> ExitReason {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval_secs = self.interval.as_secs_f64(), "Control loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.tick().await {
                        self.announce_stop().await;
                        return ExitReason::Disabled;
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping control loop");
                    return ExitReason::Shutdown;
                }
            }
        }
    }

    /// One iteration. Returns whether the guard is still enabled.
    pub async fn tick(&mut self) -> bool {
        if self.monitor.check().await {
            error!("Integrity check fired");
        }
        let size = self.accountant.scale_trade_size().await;
        debug!(max_trade_size_usd = %size, "Control loop tick");

        self.accountant.breaker().is_enabled()
    }

    async fn announce_stop(&self) {
        let breaker = self.accountant.breaker();
        let message = format!(
            "Trading stopped: tier {}, kill switch {}",
            breaker.tier(),
            if breaker.kill_switch_enabled() { "on" } else { "off" }
        );
        error!("{message}");
        breaker
            .notify_operators(event_kinds::KILL_SWITCH, &message)
            .await;
    }
}
