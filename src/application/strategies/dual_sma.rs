//! Dual simple-moving-average crossover.
//!
//! Long on a golden cross (fast SMA rises above slow SMA by more than
//! `threshold_pct`), close on a death cross (fast falls back below slow).

use crate::domain::candle::Period;
use crate::domain::errors::StrategyError;
use crate::domain::indicator::{IndicatorDefinition, IndicatorKind, IndicatorOptions};
use crate::domain::strategy::{
    EvaluationContext, Signal, SignalDirection, StrategyFactory, StrategyOptions, TradingStrategy,
};
use async_trait::async_trait;
use std::collections::HashMap;

pub struct DualSmaCrossStrategy {
    fast_period: usize,
    slow_period: usize,
    threshold_pct: f64,
}

impl DualSmaCrossStrategy {
    pub fn new(fast_period: usize, slow_period: usize, threshold_pct: f64) -> Self {
        Self {
            fast_period,
            slow_period,
            threshold_pct,
        }
    }
}

#[async_trait]
impl TradingStrategy for DualSmaCrossStrategy {
    fn description(&self) -> String {
        "Long on a golden cross of two SMAs, close on the death cross".to_string()
    }

    fn default_options(&self) -> StrategyOptions {
        StrategyOptions::new()
            .with("fast_period", 10)
            .with("slow_period", 30)
            .with("threshold_pct", 0.1)
    }

    fn define_indicators(&self, _period: Period, options: &StrategyOptions) -> HashMap<String, IndicatorDefinition> {
        let fast = options.get_usize("fast_period", self.fast_period);
        let slow = options.get_usize("slow_period", self.slow_period);
        let mut defs = HashMap::new();
        defs.insert(
            "fast_sma".to_string(),
            IndicatorDefinition::with_options(IndicatorKind::Sma, IndicatorOptions::new().with("length", fast as f64)),
        );
        defs.insert(
            "slow_sma".to_string(),
            IndicatorDefinition::with_options(IndicatorKind::Sma, IndicatorOptions::new().with("length", slow as f64)),
        );
        defs
    }

    async fn execute(&mut self, ctx: &EvaluationContext<'_>, signal: &mut Signal) -> Result<(), StrategyError> {
        let (Some(fast), Some(slow)) = (
            ctx.indicator("fast_sma").and_then(|v| v.as_scalar()),
            ctx.indicator("slow_sma").and_then(|v| v.as_scalar()),
        ) else {
            return Ok(());
        };

        let threshold = self.threshold_pct / 100.0;
        if fast > slow * (1.0 + threshold) {
            signal.long(format!("golden_cross fast={fast:.4} slow={slow:.4}"), ctx.last_signal);
        } else if ctx.last_signal == Some(SignalDirection::Long) && fast < slow * (1.0 - threshold) {
            signal.close(format!("death_cross fast={fast:.4} slow={slow:.4}"));
        }
        Ok(())
    }
}

pub struct DualSmaCrossFactory;

impl StrategyFactory for DualSmaCrossFactory {
    fn create(&self, options: StrategyOptions) -> Box<dyn TradingStrategy> {
        Box::new(DualSmaCrossStrategy::new(
            options.get_usize("fast_period", 10),
            options.get_usize("slow_period", 30),
            options.get_f64("threshold_pct", 0.1),
        ))
    }

    fn default_options(&self) -> StrategyOptions {
        DualSmaCrossStrategy::new(10, 30, 0.1).default_options()
    }

    fn description(&self) -> String {
        "Long on a golden cross of two SMAs, close on the death cross".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::indicator::IndicatorValue;

    fn ctx<'a>(candles: &'a [Candle], indicators: &'a HashMap<String, Vec<IndicatorValue>>, index: usize, last: Option<SignalDirection>) -> EvaluationContext<'a> {
        EvaluationContext {
            index,
            candles,
            indicators,
            last_signal: last,
        }
    }

    #[tokio::test]
    async fn golden_cross_opens_long() {
        let candles = vec![Candle::new(0, 100.0, 100.0, 100.0, 100.0, 1.0)];
        let mut indicators = HashMap::new();
        indicators.insert("fast_sma".to_string(), vec![IndicatorValue::Scalar(110.0)]);
        indicators.insert("slow_sma".to_string(), vec![IndicatorValue::Scalar(100.0)]);

        let mut strategy = DualSmaCrossStrategy::new(10, 30, 0.1);
        let mut signal = Signal::new();
        strategy.execute(&ctx(&candles, &indicators, 0, None), &mut signal).await.unwrap();
        assert_eq!(signal.direction(), Some(SignalDirection::Long));
    }

    #[tokio::test]
    async fn death_cross_closes_an_open_long() {
        let candles = vec![Candle::new(0, 100.0, 100.0, 100.0, 100.0, 1.0)];
        let mut indicators = HashMap::new();
        indicators.insert("fast_sma".to_string(), vec![IndicatorValue::Scalar(90.0)]);
        indicators.insert("slow_sma".to_string(), vec![IndicatorValue::Scalar(100.0)]);

        let mut strategy = DualSmaCrossStrategy::new(10, 30, 0.1);
        let mut signal = Signal::new();
        strategy
            .execute(&ctx(&candles, &indicators, 0, Some(SignalDirection::Long)), &mut signal)
            .await
            .unwrap();
        assert_eq!(signal.direction(), Some(SignalDirection::Close));
    }
}
