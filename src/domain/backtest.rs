//! Back-test data model (C4): the position ledger a simulated run tracks
//! and the result/summary it produces.

use crate::domain::candle::{Candle, Period};
use crate::domain::strategy::{SignalRow, StrategyOptions};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

/// The single open position a back-test run may hold at any instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: i64,
    pub peak_price: f64,
    pub trough_price: f64,
    pub ai_confirmation: Option<AiConfirmation>,
}

impl Position {
    pub fn open(side: Side, entry_price: f64, entry_time: i64) -> Self {
        Self {
            side,
            entry_price,
            entry_time,
            peak_price: entry_price,
            trough_price: entry_price,
            ai_confirmation: None,
        }
    }

    pub fn with_ai_confirmation(mut self, confirmation: Option<AiConfirmation>) -> Self {
        self.ai_confirmation = confirmation;
        self
    }

    pub fn mark(&mut self, price: f64) {
        self.peak_price = self.peak_price.max(price);
        self.trough_price = self.trough_price.min(price);
    }

    /// `(exit-entry)/entry*100`, negated for a short.
    pub fn profit_percent(&self, exit_price: f64) -> f64 {
        let raw = (exit_price - self.entry_price) / self.entry_price * 100.0;
        match self.side {
            Side::Long => raw,
            Side::Short => -raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: Side,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit_percent: f64,
    pub profit_absolute: f64,
    pub forced_close: bool,
    pub ai_confirmation: Option<AiConfirmation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AiConfirmation {
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Summary {
    pub total_trades: usize,
    pub profitable_trades: usize,
    pub losing_trades: usize,
    pub win_rate_pct: f64,
    pub total_profit_pct: f64,
    pub average_profit_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
}

impl Summary {
    /// Built from a run's closed trades. `total_profit_pct` is additive
    /// across trades, not compounded — capital is never re-based between
    /// trades in this model.
    pub fn from_trades(trades: &[Trade]) -> Self {
        let total_trades = trades.len();
        if total_trades == 0 {
            return Summary::default();
        }
        let profitable_trades = trades.iter().filter(|t| t.profit_percent > 0.0).count();
        let losing_trades = trades.iter().filter(|t| t.profit_percent < 0.0).count();
        let win_rate_pct = profitable_trades as f64 / total_trades as f64 * 100.0;
        let total_profit_pct: f64 = trades.iter().map(|t| t.profit_percent).sum();
        let average_profit_pct = total_profit_pct / total_trades as f64;

        let mut equity = 0.0;
        let mut peak = 0.0;
        let mut max_drawdown_pct: f64 = 0.0;
        for t in trades {
            equity += t.profit_percent;
            peak = peak.max(equity);
            max_drawdown_pct = max_drawdown_pct.max(peak - equity);
        }

        let mean = average_profit_pct;
        let variance = trades
            .iter()
            .map(|t| (t.profit_percent - mean).powi(2))
            .sum::<f64>()
            / total_trades as f64;
        let stddev = variance.sqrt();
        let sharpe_ratio = if stddev > 0.0 { mean / stddev } else { 0.0 };

        Summary {
            total_trades,
            profitable_trades,
            losing_trades,
            win_rate_pct,
            total_profit_pct,
            average_profit_pct,
            max_drawdown_pct,
            sharpe_ratio,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestParams {
    pub exchange: String,
    pub symbol: String,
    pub period: Period,
    pub hours: f64,
    pub initial_capital: f64,
    pub strategy_name: String,
    pub strategy_options: StrategyOptions,
    pub use_ai: bool,
}

/// §6/§7 request validation: registered strategy, non-empty exchange and
/// symbol, finite positive hours. Must run before a job is created — this
/// is the only error kind allowed to surface ahead of that point.
pub fn validate_backtest_params(
    registry: &crate::domain::strategy::StrategyRegistry,
    params: &BacktestParams,
) -> Result<(), crate::domain::errors::ValidationError> {
    use crate::domain::errors::ValidationError;

    if params.exchange.trim().is_empty() {
        return Err(ValidationError::EmptyField { field: "exchange" });
    }
    if params.symbol.trim().is_empty() {
        return Err(ValidationError::EmptyField { field: "symbol" });
    }
    if !params.hours.is_finite() || params.hours <= 0.0 {
        return Err(ValidationError::InvalidHours(params.hours));
    }
    if !registry.is_valid(&params.strategy_name) {
        return Err(ValidationError::UnknownStrategy(params.strategy_name.clone()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub exchange: String,
    pub symbol: String,
    pub period: Period,
    pub start_time: i64,
    pub end_time: i64,
    pub strategy_name: String,
    pub strategy_options: StrategyOptions,
    pub candles_asc: Vec<Candle>,
    pub rows: Vec<SignalRow>,
    pub trades: Vec<Trade>,
    pub indicator_keys: Vec<String>,
    pub summary: Summary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(profit_percent: f64) -> Trade {
        Trade {
            side: Side::Long,
            entry_time: 0,
            exit_time: 1,
            entry_price: 100.0,
            exit_price: 100.0 * (1.0 + profit_percent / 100.0),
            profit_percent,
            profit_absolute: profit_percent,
            forced_close: false,
            ai_confirmation: None,
        }
    }

    #[test]
    fn drawdown_tracks_peak_to_trough_on_equity_curve() {
        // S3: per-trade profit sequence [+2,+3,-10,+4] -> equity [2,5,-5,-1]
        let trades = vec![trade(2.0), trade(3.0), trade(-10.0), trade(4.0)];
        let summary = Summary::from_trades(&trades);
        assert!((summary.max_drawdown_pct - 10.0).abs() < 1e-9);
        assert!((summary.total_profit_pct - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn win_rate_is_zero_for_no_trades() {
        let summary = Summary::from_trades(&[]);
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.win_rate_pct, 0.0);
        assert_eq!(summary.max_drawdown_pct, 0.0);
    }

    #[test]
    fn position_profit_percent_is_negated_for_shorts() {
        let pos = Position::open(Side::Short, 100.0, 0);
        assert!((pos.profit_percent(96.0) - 4.0).abs() < 1e-9);
    }

    fn valid_params() -> BacktestParams {
        BacktestParams {
            exchange: "binance".to_string(),
            symbol: "BTC/USDT".to_string(),
            period: Period::H1,
            hours: 24.0,
            initial_capital: 1_000.0,
            strategy_name: "dual_sma_cross".to_string(),
            strategy_options: StrategyOptions::default(),
            use_ai: false,
        }
    }

    fn registry_with(name: &str) -> crate::domain::strategy::StrategyRegistry {
        use crate::domain::indicator::IndicatorDefinition;
        use crate::domain::strategy::{
            EvaluationContext, Signal, StrategyFactory, StrategyOptions as Opts, TradingStrategy,
        };
        use async_trait::async_trait;
        use std::collections::HashMap;
        use std::sync::Arc;

        struct NoopStrategy;
        #[async_trait]
        impl TradingStrategy for NoopStrategy {
            fn description(&self) -> String {
                "noop".to_string()
            }
            fn define_indicators(&self, _period: Period, _options: &Opts) -> HashMap<String, IndicatorDefinition> {
                HashMap::new()
            }
            async fn execute(&mut self, _ctx: &EvaluationContext<'_>, _signal: &mut Signal) -> Result<(), crate::domain::errors::StrategyError> {
                Ok(())
            }
        }
        struct NoopFactory;
        impl StrategyFactory for NoopFactory {
            fn create(&self, _options: Opts) -> Box<dyn TradingStrategy> {
                Box::new(NoopStrategy)
            }
            fn default_options(&self) -> Opts {
                Opts::default()
            }
            fn description(&self) -> String {
                "noop factory".to_string()
            }
        }

        let mut registry = crate::domain::strategy::StrategyRegistry::new();
        registry.register(name, Arc::new(NoopFactory));
        registry
    }

    #[test]
    fn validation_rejects_unregistered_strategy() {
        let registry = registry_with("dual_sma_cross");
        let mut params = valid_params();
        params.strategy_name = "not_registered".to_string();
        let err = validate_backtest_params(&registry, &params).unwrap_err();
        assert!(matches!(err, crate::domain::errors::ValidationError::UnknownStrategy(_)));
    }

    #[test]
    fn validation_rejects_empty_exchange_and_symbol() {
        let registry = registry_with("dual_sma_cross");
        let mut params = valid_params();
        params.exchange = "  ".to_string();
        assert!(validate_backtest_params(&registry, &params).is_err());

        let mut params = valid_params();
        params.symbol = "".to_string();
        assert!(validate_backtest_params(&registry, &params).is_err());
    }

    #[test]
    fn validation_rejects_non_finite_or_non_positive_hours() {
        let registry = registry_with("dual_sma_cross");
        for hours in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut params = valid_params();
            params.hours = hours;
            assert!(validate_backtest_params(&registry, &params).is_err());
        }
    }

    #[test]
    fn validation_accepts_a_well_formed_request() {
        let registry = registry_with("dual_sma_cross");
        assert!(validate_backtest_params(&registry, &valid_params()).is_ok());
    }
}
