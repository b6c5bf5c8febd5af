//! Signal validator contract (C8): an optional external confirmation step
//! for back-test entries. Grounded on the risk-filter trait this codebase
//! already uses for order-time validation, narrowed to the single
//! confirm/reject question the back-test engine needs.

use crate::domain::backtest::Side;
use crate::domain::candle::Candle;
use async_trait::async_trait;

/// What the executor hands the validator before committing an entry.
#[derive(Debug, Clone)]
pub struct FeaturePacket<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub recent_candles: &'a [Candle],
    pub strategy_name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub confirmed: bool,
    pub rationale: Option<String>,
}

impl ValidationOutcome {
    pub fn confirmed() -> Self {
        Self {
            confirmed: true,
            rationale: None,
        }
    }

    pub fn rejected(rationale: impl Into<String>) -> Self {
        Self {
            confirmed: false,
            rationale: Some(rationale.into()),
        }
    }

    pub fn unavailable() -> Self {
        Self::rejected_without_blame()
    }

    fn rejected_without_blame() -> Self {
        Self {
            confirmed: false,
            rationale: Some("validator_unavailable".to_string()),
        }
    }
}

#[async_trait]
pub trait SignalValidator: Send + Sync {
    fn name(&self) -> &str {
        "signal_validator"
    }

    async fn validate(&self, packet: &FeaturePacket<'_>) -> ValidationOutcome;
}

/// Always confirms. The default when a run does not ask for AI confirmation.
pub struct AlwaysConfirmValidator;

#[async_trait]
impl SignalValidator for AlwaysConfirmValidator {
    async fn validate(&self, _packet: &FeaturePacket<'_>) -> ValidationOutcome {
        ValidationOutcome::confirmed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_confirm_validator_always_confirms() {
        let candles = vec![Candle::new(0, 1.0, 1.0, 1.0, 1.0, 1.0)];
        let packet = FeaturePacket {
            symbol: "BTC/USDT",
            side: Side::Long,
            recent_candles: &candles,
            strategy_name: "stub",
        };
        let outcome = AlwaysConfirmValidator.validate(&packet).await;
        assert!(outcome.confirmed);
    }

    #[test]
    fn unavailable_outcome_carries_fixed_rationale() {
        let outcome = ValidationOutcome::unavailable();
        assert!(!outcome.confirmed);
        assert_eq!(outcome.rationale.as_deref(), Some("validator_unavailable"));
    }
}
