//! Rolling-window P&L ledgers.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;

/// One realized P&L observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PnlSample {
    pub at: DateTime<Utc>,
    pub pnl: Decimal,
}

/// Time-bounded P&L samples. Every read prunes first, so a read never sees a
/// sample older than `now - span`.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<PnlSample>,
    span: Duration,
}

impl RollingWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            span,
        }
    }

    pub fn span(&self) -> Duration {
        self.span
    }

    pub fn push(&mut self, at: DateTime<Utc>, pnl: Decimal) {
        self.samples.push_back(PnlSample { at, pnl });
    }

    /// Drop samples older than the window. Timestamps may be out of order
    /// after a wall-clock step, so every sample is checked.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.span;
        self.samples.retain(|s| s.at >= cutoff);
    }

    /// Sum of samples inside the window.
    pub fn total(&mut self, now: DateTime<Utc>) -> Decimal {
        self.prune(now);
        self.samples.iter().map(|s| s.pnl).sum()
    }

    /// Net loss inside the window as a positive number; zero when net positive.
    pub fn loss(&mut self, now: DateTime<Utc>) -> Decimal {
        (-self.total(now)).max(Decimal::ZERO)
    }

    pub fn samples(&mut self, now: DateTime<Utc>) -> impl Iterator<Item = &PnlSample> {
        self.prune(now);
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Cumulative trade counters. Never pruned.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TradeStats {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
}

impl TradeStats {
    pub fn record(&mut self, pnl: Decimal) {
        self.trades += 1;
        if pnl > Decimal::ZERO {
            self.wins += 1;
        } else if pnl < Decimal::ZERO {
            self.losses += 1;
        }
    }
}

/// Per-strategy ledger, created lazily on the strategy's first trade.
#[derive(Debug, Clone)]
pub struct StrategyLedger {
    pub window: RollingWindow,
    pub stats: TradeStats,
    /// Sticky: only an explicit operator action clears it.
    pub disabled: bool,
    pub disabled_at: Option<DateTime<Utc>>,
    pub max_loss_usd: Decimal,
    /// `None` falls back to the global default at check time.
    pub max_trade_size_usd: Option<Decimal>,
}

impl StrategyLedger {
    pub fn new(span: Duration, max_loss_usd: Decimal, max_trade_size_usd: Option<Decimal>) -> Self {
        Self {
            window: RollingWindow::new(span),
            stats: TradeStats::default(),
            disabled: false,
            disabled_at: None,
            max_loss_usd,
            max_trade_size_usd,
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>, pnl: Decimal) {
        self.window.push(at, pnl);
        self.stats.record(pnl);
    }

    pub fn disable(&mut self, at: DateTime<Utc>) {
        if !self.disabled {
            self.disabled = true;
            self.disabled_at = Some(at);
        }
    }
}

/// Account-wide ledger with capital tracking.
#[derive(Debug, Clone)]
pub struct GlobalLedger {
    pub window: RollingWindow,
    pub stats: TradeStats,
    pub current_capital: Decimal,
    pub peak_capital: Decimal,
    /// Default per-trade cap; adjusted by trade-size scaling.
    pub max_trade_size_usd: Decimal,
    /// `stats.trades` at the last scaling decision.
    pub scaled_through: u64,
}

impl GlobalLedger {
    pub fn new(span: Duration, starting_capital: Decimal, max_trade_size_usd: Decimal) -> Self {
        Self {
            window: RollingWindow::new(span),
            stats: TradeStats::default(),
            current_capital: starting_capital,
            peak_capital: starting_capital,
            max_trade_size_usd,
            scaled_through: 0,
        }
    }

    /// Capital only moves through realized P&L.
    pub fn record(&mut self, at: DateTime<Utc>, pnl: Decimal) {
        self.window.push(at, pnl);
        self.stats.record(pnl);
        self.current_capital += pnl;
        self.peak_capital = self.peak_capital.max(self.current_capital);
    }

    /// `(peak - current) / peak * 100`, zero while peak is not positive.
    pub fn drawdown_pct(&self) -> Decimal {
        if self.peak_capital <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.peak_capital - self.current_capital) / self.peak_capital * Decimal::ONE_HUNDRED
    }
}
