//! Deterministic in-memory fakes shared by unit and integration tests so a
//! full back-test can be assembled without network I/O. Not behind
//! `#[cfg(test)]` because `tests/` integration tests link against this
//! crate and need access to the same fixtures.

use crate::domain::backtest::Side;
use crate::domain::candle::{Candle, Period};
use crate::domain::errors::StrategyError;
use crate::domain::indicator::IndicatorDefinition;
use crate::domain::ports::MarketDataSource;
use crate::domain::repositories::CandleRepository;
use crate::domain::strategy::{
    EvaluationContext, Signal, SignalDirection, StrategyFactory, StrategyOptions, TradingStrategy,
};
use crate::domain::validator::{FeaturePacket, SignalValidator, ValidationOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Builds `n` strictly ascending hourly candles from a closed-form price
/// function, for tests that just need a well-formed window.
pub fn synthetic_candles(n: usize, start_time: i64, price_at: impl Fn(usize) -> f64) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let price = price_at(i);
            Candle::new(start_time + i as i64 * 3600, price, price, price, price, 1_000.0)
        })
        .collect()
}

/// A `CandleRepository` that never has anything persisted, forcing every
/// caller through the pull-through fetch path.
#[derive(Default)]
pub struct EmptyCandleRepository;

#[async_trait]
impl CandleRepository for EmptyCandleRepository {
    async fn save_many(&self, _exchange: &str, _symbol: &str, _period: Period, _candles: &[Candle]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_range(
        &self,
        _exchange: &str,
        _symbol: &str,
        _period: Period,
        _since: i64,
        _until: i64,
    ) -> anyhow::Result<Vec<Candle>> {
        Ok(vec![])
    }

    async fn count(&self, _exchange: &str, _symbol: &str, _period: Period, _since: i64, _until: i64) -> anyhow::Result<usize> {
        Ok(0)
    }
}

/// A `MarketDataSource` that always hands back a fixed, pre-built candle
/// window regardless of the requested range, with the forming-candle
/// trimming left to the caller (matching a real exchange's last bar).
pub struct FixedMarketDataSource {
    candles: Vec<Candle>,
    quote: (f64, f64),
}

impl FixedMarketDataSource {
    pub fn new(candles: Vec<Candle>) -> Self {
        let last_close = candles.last().map(|c| c.close).unwrap_or(0.0);
        Self {
            candles,
            quote: (last_close * 0.999, last_close * 1.001),
        }
    }
}

#[async_trait]
impl MarketDataSource for FixedMarketDataSource {
    async fn fetch_ohlcv(
        &self,
        _exchange: &str,
        _symbol: &str,
        _period: Period,
        since: i64,
        until: i64,
    ) -> anyhow::Result<Vec<Candle>> {
        Ok(self
            .candles
            .iter()
            .filter(|c| c.time >= since && c.time < until)
            .cloned()
            .collect())
    }

    async fn fetch_recent(&self, _exchange: &str, _symbol: &str, _period: Period) -> anyhow::Result<Vec<Candle>> {
        Ok(self.candles.clone())
    }

    async fn fetch_quote(&self, _exchange: &str, _symbol: &str) -> anyhow::Result<(f64, f64)> {
        Ok(self.quote)
    }
}

/// A validator that rejects every other call it receives, alternating
/// starting with a confirm. Used by the S6 scenario.
#[derive(Default)]
pub struct RejectEveryOtherValidator {
    calls: AtomicUsize,
}

#[async_trait]
impl SignalValidator for RejectEveryOtherValidator {
    fn name(&self) -> &str {
        "reject_every_other"
    }

    async fn validate(&self, _packet: &FeaturePacket<'_>) -> ValidationOutcome {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n % 2 == 0 {
            ValidationOutcome::confirmed()
        } else {
            ValidationOutcome::rejected("every_other_call_rejected")
        }
    }
}

/// Records every feature packet's side, for assertions on what the engine
/// actually asked the validator to confirm.
#[derive(Default)]
pub struct RecordingValidator {
    pub sides_seen: Mutex<Vec<Side>>,
}

#[async_trait]
impl SignalValidator for RecordingValidator {
    async fn validate(&self, packet: &FeaturePacket<'_>) -> ValidationOutcome {
        self.sides_seen.lock().unwrap().push(packet.side);
        ValidationOutcome::confirmed()
    }
}

/// A strategy that emits a fixed direction at fixed candle indices, for
/// scenario tests that need exact control over entries and exits.
#[derive(Clone)]
pub struct ScriptedStrategy {
    schedule: Vec<(usize, SignalDirection)>,
}

impl ScriptedStrategy {
    pub fn new(schedule: Vec<(usize, SignalDirection)>) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl TradingStrategy for ScriptedStrategy {
    fn description(&self) -> String {
        "emits a pre-scripted signal at fixed candle indices".to_string()
    }

    fn define_indicators(&self, _period: Period, _options: &StrategyOptions) -> HashMap<String, IndicatorDefinition> {
        HashMap::new()
    }

    async fn execute(&mut self, ctx: &EvaluationContext<'_>, signal: &mut Signal) -> Result<(), StrategyError> {
        if let Some((_, direction)) = self.schedule.iter().find(|(i, _)| *i == ctx.index) {
            match direction {
                SignalDirection::Long => signal.long("scripted", ctx.last_signal),
                SignalDirection::Short => signal.short("scripted", ctx.last_signal),
                SignalDirection::Close => signal.close("scripted"),
            }
        }
        Ok(())
    }
}

/// Builds a fresh [`ScriptedStrategy`] per run, the way the registry expects
/// every factory to.
pub struct ScriptedStrategyFactory {
    schedule: Vec<(usize, SignalDirection)>,
}

impl ScriptedStrategyFactory {
    pub fn new(schedule: Vec<(usize, SignalDirection)>) -> Self {
        Self { schedule }
    }
}

impl StrategyFactory for ScriptedStrategyFactory {
    fn create(&self, _options: StrategyOptions) -> Box<dyn TradingStrategy> {
        Box::new(ScriptedStrategy::new(self.schedule.clone()))
    }

    fn default_options(&self) -> StrategyOptions {
        StrategyOptions::default()
    }

    fn description(&self) -> String {
        "emits a pre-scripted signal at fixed candle indices".to_string()
    }
}
