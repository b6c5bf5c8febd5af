//! Repository Pattern abstractions.
//!
//! Following the same separation this codebase already draws between
//! business logic and storage, two traits bound the persistence edge the
//! core touches:
//! - `CandleRepository`: the persisted half of the candle-availability
//!   layer (C5); pull-through fetches are merged on top of what this
//!   returns.
//! - `BacktestRepository`: the query surface §6 describes for back-test
//!   history (filtering, sorting, pagination).
//!
//! In-memory implementations for tests live in `infrastructure::repositories`.

use crate::domain::candle::{Candle, Period};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait CandleRepository: Send + Sync {
    async fn save_many(&self, exchange: &str, symbol: &str, period: Period, candles: &[Candle]) -> Result<()>;

    async fn get_range(
        &self,
        exchange: &str,
        symbol: &str,
        period: Period,
        since: i64,
        until: i64,
    ) -> Result<Vec<Candle>>;

    async fn count(&self, exchange: &str, symbol: &str, period: Period, since: i64, until: i64) -> Result<usize>;
}

#[derive(Debug, Clone, Default)]
pub struct BacktestHistoryFilter {
    pub strategy: Option<String>,
    pub exchange: Option<String>,
    pub symbol_contains: Option<String>,
    pub period: Option<Period>,
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_desc: bool,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct BacktestHistoryRecord {
    pub run_group_id: String,
    pub exchange: String,
    pub symbol: String,
    pub period: Period,
    pub strategy: String,
    pub win_rate_pct: f64,
    pub total_profit_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub total_trades: usize,
}

#[async_trait]
pub trait BacktestRepository: Send + Sync {
    async fn create_many(&self, records: Vec<BacktestHistoryRecord>) -> Result<()>;

    async fn find_with_filters(&self, filter: &BacktestHistoryFilter) -> Result<Vec<BacktestHistoryRecord>>;

    async fn count_with_filters(&self, filter: &BacktestHistoryFilter) -> Result<usize>;
}
