//! Strategy contract and registry (C2): the uniform interface every
//! strategy implements, plus the data types the executor threads through it.

use crate::domain::candle::{Candle, Period};
use crate::domain::errors::StrategyError;
use crate::domain::indicator::{IndicatorDefinition, IndicatorSeries, IndicatorValue};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A strategy's option bag, merged over `default_options()` by the
/// registry at construction time. Strategies never mutate this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyOptions(pub Map<String, Value>);

impl StrategyOptions {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.0.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.0
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    /// Overlays `self` onto `defaults`, so unset keys keep their default.
    pub fn merged_over(&self, defaults: &StrategyOptions) -> StrategyOptions {
        let mut merged = defaults.0.clone();
        for (k, v) in &self.0 {
            merged.insert(k.clone(), v.clone());
        }
        StrategyOptions(merged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDirection {
    Long,
    Short,
    Close,
}

/// Per-candle signal collector passed to `TradingStrategy::execute`. At most
/// one direction is recorded per candle; re-asserting the already-open
/// direction is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    direction: Option<SignalDirection>,
    reason: Option<String>,
    debug: Map<String, Value>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, direction: SignalDirection, reason: impl Into<String>, last: Option<SignalDirection>) {
        if last == Some(direction) {
            return;
        }
        self.direction = Some(direction);
        self.reason = Some(reason.into());
    }

    pub fn long(&mut self, reason: impl Into<String>, last: Option<SignalDirection>) {
        self.set(SignalDirection::Long, reason, last);
    }

    pub fn short(&mut self, reason: impl Into<String>, last: Option<SignalDirection>) {
        self.set(SignalDirection::Short, reason, last);
    }

    pub fn close(&mut self, reason: impl Into<String>) {
        self.direction = Some(SignalDirection::Close);
        self.reason = Some(reason.into());
    }

    pub fn debug(&mut self, key: &str, value: impl Into<Value>) {
        self.debug.insert(key.to_string(), value.into());
    }

    pub fn direction(&self) -> Option<SignalDirection> {
        self.direction
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn into_parts(self) -> (Option<SignalDirection>, Option<String>, Map<String, Value>) {
        (self.direction, self.reason, self.debug)
    }
}

/// The executor's per-candle output.
#[derive(Debug, Clone)]
pub struct SignalRow {
    pub time: i64,
    pub price: f64,
    pub signal: Option<SignalDirection>,
    pub reason: Option<String>,
    pub debug: Map<String, Value>,
}

/// The read-only view a strategy sees at candle `index`: the candle itself,
/// history up to and including it, and every declared indicator series
/// sliced to the same point.
pub struct EvaluationContext<'a> {
    pub index: usize,
    pub candles: &'a [Candle],
    pub indicators: &'a HashMap<String, IndicatorSeries>,
    pub last_signal: Option<SignalDirection>,
}

impl<'a> EvaluationContext<'a> {
    pub fn candle(&self) -> &Candle {
        &self.candles[self.index]
    }

    pub fn price_history(&self) -> &'a [Candle] {
        &self.candles[..=self.index]
    }

    pub fn indicator(&self, name: &str) -> Option<&IndicatorValue> {
        self.indicators.get(name).map(|series| &series[self.index])
    }

    pub fn indicator_series(&self, name: &str) -> Option<&[IndicatorValue]> {
        self.indicators.get(name).map(|s| &s[..=self.index])
    }
}

/// The contract every strategy implements. `execute` may await external
/// collaborators (the signal validator); the executor always awaits it to
/// completion before moving to the next candle.
#[async_trait]
pub trait TradingStrategy: Send + Sync {
    fn description(&self) -> String;

    fn default_options(&self) -> StrategyOptions {
        StrategyOptions::default()
    }

    /// Called once per run, before the first candle is evaluated.
    fn define_indicators(
        &self,
        period: Period,
        options: &StrategyOptions,
    ) -> HashMap<String, IndicatorDefinition>;

    async fn execute(
        &mut self,
        ctx: &EvaluationContext<'_>,
        signal: &mut Signal,
    ) -> Result<(), StrategyError>;
}

/// Builds a fresh, independently-stateful strategy instance for one run.
pub trait StrategyFactory: Send + Sync {
    fn create(&self, options: StrategyOptions) -> Box<dyn TradingStrategy>;
    fn default_options(&self) -> StrategyOptions;
    fn description(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct StrategyInfo {
    pub name: String,
    pub description: String,
    pub default_options: StrategyOptions,
}

/// Keyed map of strategy constructors. `create` merges caller-supplied
/// options over the factory's defaults before instantiating.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: HashMap<String, Arc<dyn StrategyFactory>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn StrategyFactory>) {
        self.factories.insert(name.into(), factory);
    }

    pub fn is_valid(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(
        &self,
        name: &str,
        options: StrategyOptions,
    ) -> Result<Box<dyn TradingStrategy>, StrategyError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StrategyError::UnknownStrategy {
                name: name.to_string(),
            })?;
        let merged = options.merged_over(&factory.default_options());
        Ok(factory.create(merged))
    }

    pub fn info(&self) -> Vec<StrategyInfo> {
        let mut infos: Vec<StrategyInfo> = self
            .factories
            .iter()
            .map(|(name, factory)| StrategyInfo {
                name: name.clone(),
                description: factory.description(),
                default_options: factory.default_options(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_no_ops_when_reasserting_last_direction() {
        let mut s = Signal::new();
        s.long("entry", None);
        assert_eq!(s.direction(), Some(SignalDirection::Long));

        let mut s2 = Signal::new();
        s2.long("repeat", Some(SignalDirection::Long));
        assert_eq!(s2.direction(), None);
    }

    #[test]
    fn options_merge_keeps_defaults_for_unset_keys() {
        let defaults = StrategyOptions::new().with("length", 20).with("fast", 5);
        let overrides = StrategyOptions::new().with("length", 50);
        let merged = overrides.merged_over(&defaults);
        assert_eq!(merged.get_usize("length", 0), 50);
        assert_eq!(merged.get_usize("fast", 0), 5);
    }

    struct StubFactory;
    struct StubStrategy;

    #[async_trait]
    impl TradingStrategy for StubStrategy {
        fn description(&self) -> String {
            "stub".to_string()
        }

        fn define_indicators(
            &self,
            _period: Period,
            _options: &StrategyOptions,
        ) -> HashMap<String, IndicatorDefinition> {
            HashMap::new()
        }

        async fn execute(
            &mut self,
            _ctx: &EvaluationContext<'_>,
            _signal: &mut Signal,
        ) -> Result<(), StrategyError> {
            Ok(())
        }
    }

    impl StrategyFactory for StubFactory {
        fn create(&self, _options: StrategyOptions) -> Box<dyn TradingStrategy> {
            Box::new(StubStrategy)
        }
        fn default_options(&self) -> StrategyOptions {
            StrategyOptions::default()
        }
        fn description(&self) -> String {
            "stub factory".to_string()
        }
    }

    #[test]
    fn registry_rejects_unknown_strategy() {
        let registry = StrategyRegistry::new();
        let err = registry.create("nope", StrategyOptions::default()).unwrap_err();
        assert!(matches!(err, StrategyError::UnknownStrategy { .. }));
    }

    #[test]
    fn registry_creates_registered_strategy() {
        let mut registry = StrategyRegistry::new();
        registry.register("stub", Arc::new(StubFactory));
        assert!(registry.is_valid("stub"));
        assert!(registry.create("stub", StrategyOptions::default()).is_ok());
    }
}
