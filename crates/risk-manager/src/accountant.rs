//! Per-trade sizing and realized P&L accounting.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use guard_core::config::RiskConfig;
use guard_core::{event_kinds, Clock, Tier};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::ledger::{GlobalLedger, StrategyLedger, TradeStats};

/// A limit crossed by a recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Breach {
    StrategyLoss {
        strategy: String,
        loss: Decimal,
        limit: Decimal,
    },
    GlobalLoss {
        loss: Decimal,
        limit: Decimal,
    },
    Drawdown {
        pct: Decimal,
        limit: Decimal,
    },
}

impl Breach {
    pub fn is_global(&self) -> bool {
        !matches!(self, Breach::StrategyLoss { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Breach::StrategyLoss { strategy, loss, limit } => {
                format!("strategy {strategy} disabled: windowed loss {loss} exceeds {limit}")
            }
            Breach::GlobalLoss { loss, limit } => {
                format!("global windowed loss {loss} exceeds {limit}")
            }
            Breach::Drawdown { pct, limit } => {
                format!("drawdown {}% exceeds {limit}%", pct.round_dp(2))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategySnapshot {
    pub name: String,
    pub active: bool,
    pub disabled_at: Option<DateTime<Utc>>,
    pub recent_pnl: Decimal,
    pub max_loss_usd: Decimal,
    pub max_trade_size_usd: Option<Decimal>,
    #[serde(flatten)]
    pub stats: TradeStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub recent_pnl: Decimal,
    pub current_capital: Decimal,
    pub peak_capital: Decimal,
    pub drawdown_pct: Decimal,
    pub max_trade_size_usd: Decimal,
    pub stats: TradeStats,
    pub strategies: Vec<StrategySnapshot>,
}

/// Decides trade sizes and books realized outcomes against the rolling windows.
///
/// Strategy ledgers and the global ledger are locked independently and never
/// across an await on the breaker.
pub struct RiskAccountant {
    config: RiskConfig,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    strategies: DashMap<String, StrategyLedger>,
    global: RwLock<GlobalLedger>,
}

impl RiskAccountant {
    pub fn new(
        config: RiskConfig,
        starting_capital: Decimal,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let global = GlobalLedger::new(
            config.rolling_window(),
            starting_capital,
            config.max_trade_size_usd,
        );
        Self {
            config,
            breaker,
            clock,
            strategies: DashMap::new(),
            global: RwLock::new(global),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Largest size the strategy may trade right now. Zero means do not trade.
    pub async fn check_trade(&self, strategy: &str, proposed_usd: Decimal) -> Decimal {
        if !self.breaker.is_trading_allowed() || proposed_usd <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let override_limit = match self.strategies.get(strategy) {
            Some(ledger) if ledger.disabled => {
                debug!(strategy = %strategy, "Trade blocked, strategy disabled");
                return Decimal::ZERO;
            }
            Some(ledger) => ledger.max_trade_size_usd,
            None => self
                .config
                .limits_for(strategy)
                .and_then(|l| l.max_trade_size_usd),
        };

        let mut limit = match override_limit {
            Some(limit) => limit,
            None => self.global.read().await.max_trade_size_usd,
        };
        if self.breaker.tier() == Tier::ReduceRisk {
            limit /= Decimal::TWO;
        }

        let allowed = proposed_usd.min(limit);
        if allowed < proposed_usd {
            debug!(strategy = %strategy, proposed = %proposed_usd, allowed = %allowed, "Trade size capped");
        }
        allowed
    }

    /// Book a realized P&L. Returns false if any limit was breached.
    pub async fn record_outcome(&self, strategy: &str, pnl_usd: Decimal) -> bool {
        self.record_outcome_detailed(strategy, pnl_usd).await.is_empty()
    }

    /// Book a realized P&L and report every limit it breached.
    ///
    /// The strategy check runs first and only disables that strategy. The
    /// global loss and drawdown checks then run regardless and HALT the breaker.
    pub async fn record_outcome_detailed(&self, strategy: &str, pnl_usd: Decimal) -> Vec<Breach> {
        let now = self.clock.now();
        let mut breaches = Vec::new();

        let newly_disabled = {
            let mut ledger = self
                .strategies
                .entry(strategy.to_string())
                .or_insert_with(|| self.new_ledger(strategy));
            ledger.record(now, pnl_usd);

            let loss = ledger.window.loss(now);
            if loss > ledger.max_loss_usd {
                breaches.push(Breach::StrategyLoss {
                    strategy: strategy.to_string(),
                    loss,
                    limit: ledger.max_loss_usd,
                });
                let newly = !ledger.disabled;
                ledger.disable(now);
                newly
            } else {
                false
            }
        };

        {
            let mut global = self.global.write().await;
            global.record(now, pnl_usd);

            let loss = global.window.loss(now);
            if loss > self.config.max_loss_usd {
                breaches.push(Breach::GlobalLoss {
                    loss,
                    limit: self.config.max_loss_usd,
                });
            }
            let pct = global.drawdown_pct();
            if pct > self.config.max_drawdown_pct {
                breaches.push(Breach::Drawdown {
                    pct,
                    limit: self.config.max_drawdown_pct,
                });
            }
        }

        if let Some(breach) = breaches.first().filter(|_| newly_disabled) {
            let message = breach.describe();
            error!(strategy = %strategy, "{message}");
            self.breaker
                .notify_operators(event_kinds::RISK, &message)
                .await;
        }

        let global: Vec<_> = breaches
            .iter()
            .filter(|b| b.is_global())
            .map(Breach::describe)
            .collect();
        if !global.is_empty() {
            let reason = global.join("; ");
            error!(strategy = %strategy, pnl = %pnl_usd, reason = %reason, "Global risk limit breached");
            self.breaker.record_risk_breach(&reason).await;
        }

        breaches
    }

    /// True unless the strategy has been disabled. Unseen strategies are active.
    pub fn is_strategy_active(&self, strategy: &str) -> bool {
        self.strategies
            .get(strategy)
            .map(|ledger| !ledger.disabled)
            .unwrap_or(true)
    }

    /// Operator re-enable of a disabled strategy. Returns whether it was disabled.
    pub fn enable_strategy(&self, strategy: &str, source: &str) -> bool {
        match self.strategies.get_mut(strategy) {
            Some(mut ledger) if ledger.disabled => {
                ledger.disabled = false;
                ledger.disabled_at = None;
                warn!(strategy = %strategy, source = %source, "Strategy re-enabled by operator");
                true
            }
            _ => false,
        }
    }

    /// Step the default trade-size cap by one increment.
    ///
    /// Up (to at most `max_scaled_trade_size_usd`) when the windowed P&L is
    /// positive, down (never below one increment) when it is worse than half
    /// the global max loss. At most one step per newly booked outcome, so
    /// polling without new trades leaves the cap alone. Returns the cap.
    pub async fn scale_trade_size(&self) -> Decimal {
        let now = self.clock.now();
        let step = self.config.scale_increment_usd;
        let ceiling = self.config.max_scaled_trade_size_usd;
        let mut global = self.global.write().await;

        if global.stats.trades == global.scaled_through {
            return global.max_trade_size_usd;
        }
        global.scaled_through = global.stats.trades;

        let recent = global.window.total(now);
        let previous = global.max_trade_size_usd;
        if recent > Decimal::ZERO && previous < ceiling {
            global.max_trade_size_usd = (previous + step).min(ceiling);
        } else if recent < -(self.config.max_loss_usd / Decimal::TWO) && previous > step {
            global.max_trade_size_usd = (previous - step).max(step);
        }

        if global.max_trade_size_usd != previous {
            info!(
                recent_pnl = %recent,
                from = %previous,
                to = %global.max_trade_size_usd,
                "Scaled max trade size"
            );
        }
        global.max_trade_size_usd
    }

    /// Net P&L inside the global rolling window.
    pub async fn recent_pnl(&self) -> Decimal {
        let now = self.clock.now();
        self.global.write().await.window.total(now)
    }

    pub async fn snapshot(&self) -> AccountSnapshot {
        let now = self.clock.now();

        let mut strategies: Vec<_> = self
            .strategies
            .iter_mut()
            .map(|mut entry| {
                let recent_pnl = entry.window.total(now);
                StrategySnapshot {
                    name: entry.key().clone(),
                    active: !entry.disabled,
                    disabled_at: entry.disabled_at,
                    recent_pnl,
                    max_loss_usd: entry.max_loss_usd,
                    max_trade_size_usd: entry.max_trade_size_usd,
                    stats: entry.stats,
                }
            })
            .collect();
        strategies.sort_by(|a, b| a.name.cmp(&b.name));

        let mut global = self.global.write().await;
        AccountSnapshot {
            recent_pnl: global.window.total(now),
            current_capital: global.current_capital,
            peak_capital: global.peak_capital,
            drawdown_pct: global.drawdown_pct(),
            max_trade_size_usd: global.max_trade_size_usd,
            stats: global.stats,
            strategies,
        }
    }

    fn new_ledger(&self, strategy: &str) -> StrategyLedger {
        let limits = self.config.limits_for(strategy);
        StrategyLedger::new(
            self.config.rolling_window(),
            limits
                .and_then(|l| l.max_loss_usd)
                .unwrap_or(self.config.max_loss_usd),
            limits.and_then(|l| l.max_trade_size_usd),
        )
    }
}
