//! MACD momentum.
//!
//! Long while the MACD histogram is positive and rising, short while it is
//! negative and falling; flips direction rather than closing to flat on a
//! sign change, since the position is expected to be held either way.

use crate::domain::candle::Period;
use crate::domain::errors::StrategyError;
use crate::domain::indicator::{IndicatorDefinition, IndicatorKind, IndicatorOptions, IndicatorValue};
use crate::domain::strategy::{
    EvaluationContext, Signal, SignalDirection, StrategyFactory, StrategyOptions, TradingStrategy,
};
use async_trait::async_trait;
use std::collections::HashMap;

pub struct MacdMomentumStrategy {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    last_histogram: Option<f64>,
}

impl MacdMomentumStrategy {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_period,
            slow_period,
            signal_period,
            last_histogram: None,
        }
    }
}

#[async_trait]
impl TradingStrategy for MacdMomentumStrategy {
    fn description(&self) -> String {
        "Rides MACD histogram momentum, flipping direction on a rising/falling sign change".to_string()
    }

    fn default_options(&self) -> StrategyOptions {
        StrategyOptions::new()
            .with("fast_period", 12)
            .with("slow_period", 26)
            .with("signal_period", 9)
    }

    fn define_indicators(&self, _period: Period, options: &StrategyOptions) -> HashMap<String, IndicatorDefinition> {
        let fast = options.get_usize("fast_period", self.fast_period);
        let slow = options.get_usize("slow_period", self.slow_period);
        let signal = options.get_usize("signal_period", self.signal_period);
        let mut defs = HashMap::new();
        defs.insert(
            "macd".to_string(),
            IndicatorDefinition::with_options(
                IndicatorKind::Macd,
                IndicatorOptions::new()
                    .with("fast_length", fast as f64)
                    .with("slow_length", slow as f64)
                    .with("signal_length", signal as f64),
            ),
        );
        defs
    }

    async fn execute(&mut self, ctx: &EvaluationContext<'_>, signal: &mut Signal) -> Result<(), StrategyError> {
        let Some(IndicatorValue::Macd { histogram, .. }) = ctx.indicator("macd") else {
            return Ok(());
        };
        let histogram = *histogram;
        let rising = self.last_histogram.map(|prev| histogram > prev).unwrap_or(false);
        let falling = self.last_histogram.map(|prev| histogram < prev).unwrap_or(false);
        self.last_histogram = Some(histogram);

        if histogram > 0.0 && rising {
            signal.long(format!("macd_momentum_up histogram={histogram:.4}"), ctx.last_signal);
        } else if histogram < 0.0 && falling {
            signal.short(format!("macd_momentum_down histogram={histogram:.4}"), ctx.last_signal);
        }
        Ok(())
    }
}

pub struct MacdMomentumFactory;

impl StrategyFactory for MacdMomentumFactory {
    fn create(&self, options: StrategyOptions) -> Box<dyn TradingStrategy> {
        Box::new(MacdMomentumStrategy::new(
            options.get_usize("fast_period", 12),
            options.get_usize("slow_period", 26),
            options.get_usize("signal_period", 9),
        ))
    }

    fn default_options(&self) -> StrategyOptions {
        MacdMomentumStrategy::new(12, 26, 9).default_options()
    }

    fn description(&self) -> String {
        "Rides MACD histogram momentum, flipping direction on a rising/falling sign change".to_string()
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
    async fn rising_positive_histogram_opens_long_after_a_warm_up_reading() {
        let candles = vec![Candle::new(0, 100.0, 100.0, 100.0, 100.0, 1.0)];
        let mut strategy = MacdMomentumStrategy::new(12, 26, 9);

        let mut indicators = HashMap::new();
        indicators.insert("macd".to_string(), vec![IndicatorValue::Macd { macd: 1.0, signal: 0.5, histogram: 0.2 }]);
        let mut signal = Signal::new();
        strategy.execute(&ctx(&candles, &indicators, None), &mut signal).await.unwrap();
        assert_eq!(signal.direction(), None);

        indicators.insert("macd".to_string(), vec![IndicatorValue::Macd { macd: 1.2, signal: 0.6, histogram: 0.5 }]);
        let mut signal = Signal::new();
        strategy.execute(&ctx(&candles, &indicators, None), &mut signal).await.unwrap();
        assert_eq!(signal.direction(), Some(SignalDirection::Long));
    }
}
