//! Strategy executor (C3): runs one strategy sequentially over an ascending
//! candle window, building every declared indicator series once up front.

use crate::domain::candle::{Candle, Period};
use crate::domain::errors::{ExecutorError, StrategyError};
use crate::domain::indicator::{catalog, IndicatorSeries};
use crate::domain::strategy::{EvaluationContext, Signal, SignalDirection, SignalRow, TradingStrategy};
use std::collections::HashMap;
use tracing::warn;

pub struct StrategyExecutor;

impl StrategyExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Builds every indicator the strategy declared, once, over the full
    /// window. Returns the name -> series map alongside its sorted keys.
    fn build_indicators(
        strategy: &dyn TradingStrategy,
        period: Period,
        options: &crate::domain::strategy::StrategyOptions,
        candles: &[Candle],
    ) -> Result<(HashMap<String, IndicatorSeries>, Vec<String>), ExecutorError> {
        let defs = strategy.define_indicators(period, options);
        let mut series = HashMap::with_capacity(defs.len());
        let mut keys: Vec<String> = defs.keys().cloned().collect();
        keys.sort();
        for (name, def) in defs {
            let built = catalog::build(&def, candles)?;
            series.insert(name, built);
        }
        Ok((series, keys))
    }

    /// Runs `strategy` over `candles` (must be non-empty, strictly ascending
    /// in time). A strategy error on one candle is recorded on that row and
    /// does not abort the run.
    pub async fn execute(
        &self,
        strategy: &mut dyn TradingStrategy,
        period: Period,
        options: &crate::domain::strategy::StrategyOptions,
        candles: &[Candle],
    ) -> Result<(Vec<SignalRow>, Vec<String>), ExecutorError> {
        if candles.is_empty() {
            return Err(ExecutorError::EmptyWindow);
        }
        for i in 1..candles.len() {
            if candles[i].time <= candles[i - 1].time {
                return Err(ExecutorError::OutOfOrder { index: i });
            }
        }

        let (indicators, keys) = Self::build_indicators(strategy, period, options, candles)?;

        let mut rows = Vec::with_capacity(candles.len());
        let mut last_signal: Option<SignalDirection> = None;

        for index in 0..candles.len() {
            let ctx = EvaluationContext {
                index,
                candles,
                indicators: &indicators,
                last_signal,
            };
            let mut signal = Signal::new();

            if let Err(err) = strategy.execute(&ctx, &mut signal).await {
                warn!(candle_index = index, error = %err, "strategy evaluation failed for candle");
                signal.debug("error", format_strategy_error(&err));
            }

            let (direction, reason, debug) = signal.into_parts();
            match direction {
                Some(SignalDirection::Close) => last_signal = None,
                Some(other) => last_signal = Some(other),
                None => {}
            }

            rows.push(SignalRow {
                time: candles[index].time,
                price: candles[index].close,
                signal: direction,
                reason,
                debug,
            });
        }

        Ok((rows, keys))
    }
}

impl Default for StrategyExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn format_strategy_error(err: &StrategyError) -> String {
    err.to_string()
}
