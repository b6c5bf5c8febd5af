//! RSI mean-reversion.
//!
//! Long when RSI drops into the oversold zone, close once it climbs back
//! past the exit level.

use crate::domain::candle::Period;
use crate::domain::errors::StrategyError;
use crate::domain::indicator::{IndicatorDefinition, IndicatorKind, IndicatorOptions};
use crate::domain::strategy::{
    EvaluationContext, Signal, SignalDirection, StrategyFactory, StrategyOptions, TradingStrategy,
};
use async_trait::async_trait;
use std::collections::HashMap;

pub struct RsiMeanReversionStrategy {
    length: usize,
    oversold: f64,
    exit_above: f64,
}

impl RsiMeanReversionStrategy {
    pub fn new(length: usize, oversold: f64, exit_above: f64) -> Self {
        Self {
            length,
            oversold,
            exit_above,
        }
    }
}

#[async_trait]
impl TradingStrategy for RsiMeanReversionStrategy {
    fn description(&self) -> String {
        "Long when RSI is oversold, close once it recovers past the exit level".to_string()
    }

    fn default_options(&self) -> StrategyOptions {
        StrategyOptions::new()
            .with("length", 14)
            .with("oversold", 30)
            .with("exit_above", 50)
    }

    fn define_indicators(&self, _period: Period, options: &StrategyOptions) -> HashMap<String, IndicatorDefinition> {
        let length = options.get_usize("length", self.length);
        let mut defs = HashMap::new();
        defs.insert(
            "rsi".to_string(),
            IndicatorDefinition::with_options(IndicatorKind::Rsi, IndicatorOptions::new().with("length", length as f64)),
        );
        defs
    }

    async fn execute(&mut self, ctx: &EvaluationContext<'_>, signal: &mut Signal) -> Result<(), StrategyError> {
        let Some(rsi) = ctx.indicator("rsi").and_then(|v| v.as_scalar()) else {
            return Ok(());
        };

        if rsi <= self.oversold {
            signal.long(format!("rsi_oversold rsi={rsi:.2}"), ctx.last_signal);
        } else if ctx.last_signal == Some(SignalDirection::Long) && rsi >= self.exit_above {
            signal.close(format!("rsi_recovered rsi={rsi:.2}"));
        }
        Ok(())
    }
}

pub struct RsiMeanReversionFactory;

impl StrategyFactory for RsiMeanReversionFactory {
    fn create(&self, options: StrategyOptions) -> Box<dyn TradingStrategy> {
        Box::new(RsiMeanReversionStrategy::new(
            options.get_usize("length", 14),
            options.get_f64("oversold", 30.0),
            options.get_f64("exit_above", 50.0),
        ))
    }

    fn default_options(&self) -> StrategyOptions {
        RsiMeanReversionStrategy::new(14, 30.0, 50.0).default_options()
    }

    fn description(&self) -> String {
        "Long when RSI is oversold, close once it recovers past the exit level".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::indicator::IndicatorValue;

    fn ctx<'a>(candles: &'a [Candle], indicators: &'a HashMap<String, Vec<IndicatorValue>>, last: Option<SignalDirection>) -> EvaluationContext<'a> {
        EvaluationContext {
            index: 0,
            candles,
            indicators,
            last_signal: last,
        }
    }

    #[tokio::test]
    async fn oversold_rsi_opens_long() {
        let candles = vec![Candle::new(0, 100.0, 100.0, 100.0, 100.0, 1.0)];
        let mut indicators = HashMap::new();
        indicators.insert("rsi".to_string(), vec![IndicatorValue::Scalar(25.0)]);

        let mut strategy = RsiMeanReversionStrategy::new(14, 30.0, 50.0);
        let mut signal = Signal::new();
        strategy.execute(&ctx(&candles, &indicators, None), &mut signal).await.unwrap();
        assert_eq!(signal.direction(), Some(SignalDirection::Long));
    }

    #[tokio::test]
    async fn recovery_past_exit_level_closes_the_long() {
        let candles = vec![Candle::new(0, 100.0, 100.0, 100.0, 100.0, 1.0)];
        let mut indicators = HashMap::new();
        indicators.insert("rsi".to_string(), vec![IndicatorValue::Scalar(55.0)]);

        let mut strategy = RsiMeanReversionStrategy::new(14, 30.0, 50.0);
        let mut signal = Signal::new();
        strategy
            .execute(&ctx(&candles, &indicators, Some(SignalDirection::Long)), &mut signal)
            .await
            .unwrap();
        assert_eq!(signal.direction(), Some(SignalDirection::Close));
    }
}
