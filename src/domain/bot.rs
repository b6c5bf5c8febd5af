//! Bot configuration (C6): the record the scheduler iterates every tick.

use crate::domain::candle::Period;
use crate::domain::strategy::StrategyOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotMode {
    /// Only log and notify; never places orders.
    Watch,
    /// Dispatches signals to order execution.
    Trade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Stopped,
    Running,
}

#[derive(Debug, Clone)]
pub struct Bot {
    pub id: String,
    pub profile_id: String,
    pub exchange: String,
    pub strategy_name: String,
    pub pair: String,
    pub period: Period,
    pub capital: f64,
    pub mode: BotMode,
    pub status: BotStatus,
    pub options: StrategyOptions,
}

impl Bot {
    pub fn is_running(&self) -> bool {
        self.status == BotStatus::Running
    }

    /// A settled-contract pair carries a `:` in its symbol, e.g. `BTC/USDT:USDT`.
    pub fn is_settled_contract(&self) -> bool {
        self.pair.contains(':')
    }
}
