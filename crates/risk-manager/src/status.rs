//! Read-only status for dashboards and the status endpoint.

use guard_core::Tier;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::accountant::{RiskAccountant, StrategySnapshot};
use crate::circuit_breaker::{TradeErrorRecord, Transition};

/// Point-in-time view of the breaker and the books.
#[derive(Debug, Clone, Serialize)]
pub struct GuardStatus {
    pub enabled: bool,
    pub trading_allowed: bool,
    pub tier: Tier,
    pub error_count: u32,
    pub recent_pnl: Decimal,
    pub current_capital: Decimal,
    pub peak_capital: Decimal,
    pub drawdown_pct: Decimal,
    pub max_trade_size_usd: Decimal,
    pub strategies: Vec<StrategySnapshot>,
    pub recent_errors: Vec<TradeErrorRecord>,
    pub transitions: Vec<Transition>,
}

impl GuardStatus {
    pub async fn collect(accountant: &RiskAccountant) -> Self {
        let breaker = accountant.breaker().status().await;
        let account = accountant.snapshot().await;

        Self {
            enabled: accountant.breaker().is_enabled(),
            trading_allowed: breaker.trading_allowed,
            tier: breaker.tier,
            error_count: breaker.error_count,
            recent_pnl: account.recent_pnl,
            current_capital: account.current_capital,
            peak_capital: account.peak_capital,
            drawdown_pct: account.drawdown_pct,
            max_trade_size_usd: account.max_trade_size_usd,
            strategies: account.strategies,
            recent_errors: breaker.recent_errors,
            transitions: breaker.transitions,
        }
    }
}
