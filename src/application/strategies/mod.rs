//! Concrete strategy implementations and the registry builder that wires
//! them up for a running process.

mod dual_sma;
mod macd_momentum;
mod rsi_mean_reversion;

pub use dual_sma::{DualSmaCrossFactory, DualSmaCrossStrategy};
pub use macd_momentum::{MacdMomentumFactory, MacdMomentumStrategy};
pub use rsi_mean_reversion::{RsiMeanReversionFactory, RsiMeanReversionStrategy};

use crate::domain::strategy::StrategyRegistry;
use std::sync::Arc;

/// The registry every process bootstraps with. Additional strategies can
/// still be registered on top of this by the caller.
pub fn default_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    registry.register("dual_sma_cross", Arc::new(DualSmaCrossFactory));
    registry.register("rsi_mean_reversion", Arc::new(RsiMeanReversionFactory));
    registry.register("macd_momentum", Arc::new(MacdMomentumFactory));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_registers_all_three_strategies() {
        let registry = default_registry();
        assert!(registry.is_valid("dual_sma_cross"));
        assert!(registry.is_valid("rsi_mean_reversion"));
        assert!(registry.is_valid("macd_momentum"));
        assert_eq!(registry.info().len(), 3);
    }
}
