//! Back-test engine (C4): candle acquisition, the executor, position
//! simulation, and summary statistics.

use crate::application::candle_availability::CandleAvailability;
use crate::application::executor::StrategyExecutor;
use crate::config::Config;
use crate::domain::backtest::{AiConfirmation, BacktestParams, BacktestResult, Position, Side, Summary, Trade};
use crate::domain::candle::Candle;
use crate::domain::errors::BacktestError;
use crate::domain::strategy::{SignalDirection, SignalRow, StrategyRegistry};
use crate::domain::validator::{AlwaysConfirmValidator, FeaturePacket, SignalValidator, ValidationOutcome};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct BacktestEngine {
    candle_availability: Arc<CandleAvailability>,
    registry: Arc<StrategyRegistry>,
    executor: StrategyExecutor,
    validator: Arc<dyn SignalValidator>,
    config: Config,
}

impl BacktestEngine {
    pub fn new(candle_availability: Arc<CandleAvailability>, registry: Arc<StrategyRegistry>) -> Self {
        Self {
            candle_availability,
            registry,
            executor: StrategyExecutor::new(),
            validator: Arc::new(AlwaysConfirmValidator),
            config: Config::default(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn SignalValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub async fn run(&self, params: BacktestParams) -> Result<BacktestResult, BacktestError> {
        let end_time = Utc::now().timestamp();
        let start_time = end_time - (params.hours * 3600.0) as i64;

        let candles = self
            .candle_availability
            .ensure_range(&params.exchange, &params.symbol, params.period, start_time, end_time)
            .await
            .map_err(|err| BacktestError::MarketDataUnavailable {
                symbol: params.symbol.clone(),
                period: params.period.to_string(),
                reason: err.to_string(),
            })?;

        if candles.len() < self.config.min_candles_for_backtest {
            return Err(BacktestError::InsufficientData {
                symbol: params.symbol.clone(),
                period: params.period.to_string(),
                got: candles.len(),
                need: self.config.min_candles_for_backtest,
            });
        }

        let mut strategy = self
            .registry
            .create(&params.strategy_name, params.strategy_options.clone())?;

        let (rows, indicator_keys) = self
            .executor
            .execute(strategy.as_mut(), params.period, &params.strategy_options, &candles)
            .await?;

        let trades = self
            .simulate(&candles, &rows, params.initial_capital, params.use_ai, &params.symbol, &params.strategy_name)
            .await;

        let summary = Summary::from_trades(&trades);
        info!(symbol = %params.symbol, trades = trades.len(), win_rate = summary.win_rate_pct, "backtest run complete");

        Ok(BacktestResult {
            exchange: params.exchange.clone(),
            symbol: params.symbol,
            period: params.period,
            start_time,
            end_time,
            strategy_name: params.strategy_name,
            strategy_options: params.strategy_options,
            candles_asc: candles,
            rows,
            trades,
            indicator_keys,
            summary,
        })
    }

    async fn simulate(
        &self,
        candles: &[Candle],
        rows: &[SignalRow],
        initial_capital: f64,
        use_ai: bool,
        symbol: &str,
        strategy_name: &str,
    ) -> Vec<Trade> {
        let mut trades = Vec::new();
        let mut position: Option<Position> = None;

        for (i, row) in rows.iter().enumerate() {
            let Some(direction) = row.signal else {
                if let Some(pos) = position.as_mut() {
                    pos.mark(row.price);
                }
                continue;
            };

            match direction {
                SignalDirection::Long | SignalDirection::Short => {
                    let side = if direction == SignalDirection::Long { Side::Long } else { Side::Short };

                    if let Some(open) = position.take() {
                        if open.side != side {
                            trades.push(close_trade(&open, row, initial_capital, false));
                        } else {
                            position = Some(open);
                            continue;
                        }
                    }

                    let confirmation = if use_ai {
                        let recent = &candles[..=i];
                        let packet = FeaturePacket {
                            symbol,
                            side,
                            recent_candles: recent,
                            strategy_name,
                        };
                        let outcome = match tokio::time::timeout(self.config.validator_timeout, self.validator.validate(&packet)).await {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                warn!(symbol, strategy_name, "signal validator timed out, treating as unconfirmed");
                                ValidationOutcome::unavailable()
                            }
                        };
                        Some(if outcome.confirmed {
                            AiConfirmation::Confirmed
                        } else {
                            AiConfirmation::Rejected
                        })
                    } else {
                        None
                    };

                    if matches!(confirmation, Some(AiConfirmation::Rejected)) {
                        continue;
                    }

                    position = Some(Position::open(side, row.price, row.time).with_ai_confirmation(confirmation));
                }
                SignalDirection::Close => {
                    if let Some(open) = position.take() {
                        trades.push(close_trade(&open, row, initial_capital, false));
                    }
                }
            }
        }

        if let Some(open) = position.take() {
            if let Some(last) = rows.last() {
                trades.push(close_trade(&open, last, initial_capital, true));
            }
        }

        trades
    }
}

fn close_trade(position: &Position, row: &SignalRow, initial_capital: f64, forced: bool) -> Trade {
    let profit_percent = position.profit_percent(row.price);
    Trade {
        side: position.side,
        entry_time: position.entry_time,
        exit_time: row.time,
        entry_price: position.entry_price,
        exit_price: row.price,
        profit_percent,
        profit_absolute: initial_capital * profit_percent / 100.0,
        forced_close: forced,
        ai_confirmation: position.ai_confirmation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Period;
    use crate::domain::indicator::IndicatorDefinition;
    use crate::domain::strategy::{EvaluationContext, Signal, StrategyOptions, TradingStrategy};
    use crate::domain::errors::StrategyError;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn candles_ascending(prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| Candle::new(i as i64 * 3600, *p, *p, *p, *p, 10.0))
            .collect()
    }

    struct FixedStrategy {
        long_index: usize,
        close_index: usize,
    }

    #[async_trait]
    impl TradingStrategy for FixedStrategy {
        fn description(&self) -> String {
            "fixed entry/exit".to_string()
        }
        fn define_indicators(&self, _period: Period, _options: &StrategyOptions) -> HashMap<String, IndicatorDefinition> {
            HashMap::new()
        }
        async fn execute(&mut self, ctx: &EvaluationContext<'_>, signal: &mut Signal) -> Result<(), StrategyError> {
            if ctx.index == self.long_index {
                signal.long("enter", ctx.last_signal);
            } else if ctx.index == self.close_index {
                signal.close("exit");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn s1_trivial_long_only_generator_matches_expected_stats() {
        // S1: prices 100..109, long@2, close@7 -> entry 102, exit 107, profit ~4.9020%
        let prices: Vec<f64> = (100..110).map(|p| p as f64).collect();
        let candles = candles_ascending(&prices);
        let mut strategy = FixedStrategy {
            long_index: 2,
            close_index: 7,
        };
        let (rows, _) = StrategyExecutor::new()
            .execute(&mut strategy, Period::H1, &StrategyOptions::default(), &candles)
            .await
            .unwrap();

        struct NoopValidator;
        #[async_trait]
        impl SignalValidator for NoopValidator {
            async fn validate(&self, _p: &FeaturePacket<'_>) -> crate::domain::validator::ValidationOutcome {
                crate::domain::validator::ValidationOutcome::confirmed()
            }
        }

        let engine = BacktestEngine {
            candle_availability: Arc::new(CandleAvailability::new(
                Arc::new(NoRepo),
                Arc::new(NoSource),
            )),
            registry: Arc::new(StrategyRegistry::new()),
            executor: StrategyExecutor::new(),
            validator: Arc::new(NoopValidator),
            config: Config::default(),
        };

        let trades = engine.simulate(&candles, &rows, 1000.0, false, "TEST/USD", "fixed").await;
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.entry_price, 102.0);
        assert_eq!(trade.exit_price, 107.0);
        assert!((trade.profit_percent - 4.9019607843).abs() < 1e-6);

        let summary = Summary::from_trades(&trades);
        assert_eq!(summary.win_rate_pct, 100.0);
        assert_eq!(summary.max_drawdown_pct, 0.0);
    }

    struct NoRepo;
    #[async_trait]
    impl crate::domain::repositories::CandleRepository for NoRepo {
        async fn save_many(&self, _e: &str, _s: &str, _p: Period, _c: &[Candle]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_range(&self, _e: &str, _s: &str, _p: Period, _since: i64, _until: i64) -> anyhow::Result<Vec<Candle>> {
            Ok(vec![])
        }
        async fn count(&self, _e: &str, _s: &str, _p: Period, _since: i64, _until: i64) -> anyhow::Result<usize> {
            Ok(0)
        }
    }

    struct NoSource;
    #[async_trait]
    impl crate::domain::ports::MarketDataSource for NoSource {
        async fn fetch_ohlcv(&self, _e: &str, _s: &str, _p: Period, _since: i64, _until: i64) -> anyhow::Result<Vec<Candle>> {
            Ok(vec![])
        }
        async fn fetch_recent(&self, _e: &str, _s: &str, _p: Period) -> anyhow::Result<Vec<Candle>> {
            Ok(vec![])
        }
        async fn fetch_quote(&self, _e: &str, _s: &str) -> anyhow::Result<(f64, f64)> {
            Ok((1.0, 1.0))
        }
    }
}
