//! In-memory repository implementations.
//!
//! Thread-safe, `Arc<RwLock<..>>`-backed implementations of the domain
//! repository traits. Suitable for single-instance deployments and tests;
//! a durable backend (Postgres, SQLite) is an external concern this crate
//! only needs through the `CandleRepository` / `BacktestRepository`
//! contracts.

use crate::domain::candle::{Candle, Period};
use crate::domain::repositories::{
    BacktestHistoryFilter, BacktestHistoryRecord, BacktestRepository, CandleRepository,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type CandleKey = (String, String, Period);

#[derive(Default)]
pub struct InMemoryCandleRepository {
    candles: Arc<RwLock<HashMap<CandleKey, Vec<Candle>>>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(exchange: &str, symbol: &str, period: Period) -> CandleKey {
        (exchange.to_string(), symbol.to_string(), period)
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn save_many(&self, exchange: &str, symbol: &str, period: Period, candles: &[Candle]) -> Result<()> {
        let mut store = self.candles.write().await;
        let series = store.entry(Self::key(exchange, symbol, period)).or_default();
        for candle in candles {
            if !series.iter().any(|c| c.time == candle.time) {
                series.push(*candle);
            }
        }
        series.sort_by_key(|c| c.time);
        Ok(())
    }

    async fn get_range(
        &self,
        exchange: &str,
        symbol: &str,
        period: Period,
        since: i64,
        until: i64,
    ) -> Result<Vec<Candle>> {
        let store = self.candles.read().await;
        Ok(store
            .get(&Self::key(exchange, symbol, period))
            .map(|series| {
                series
                    .iter()
                    .filter(|c| c.time >= since && c.time <= until)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, exchange: &str, symbol: &str, period: Period, since: i64, until: i64) -> Result<usize> {
        Ok(self.get_range(exchange, symbol, period, since, until).await?.len())
    }
}

#[derive(Default)]
pub struct InMemoryBacktestRepository {
    records: Arc<RwLock<Vec<BacktestHistoryRecord>>>,
}

impl InMemoryBacktestRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BacktestRepository for InMemoryBacktestRepository {
    async fn create_many(&self, records: Vec<BacktestHistoryRecord>) -> Result<()> {
        self.records.write().await.extend(records);
        Ok(())
    }

    async fn find_with_filters(&self, filter: &BacktestHistoryFilter) -> Result<Vec<BacktestHistoryRecord>> {
        let mut matches: Vec<BacktestHistoryRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| matches_filter(r, filter))
            .cloned()
            .collect();

        sort_records(&mut matches, filter);

        let page = filter.page.max(1);
        let limit = filter.limit.clamp(1, 200);
        let start = (page - 1) * limit;
        Ok(matches.into_iter().skip(start).take(limit).collect())
    }

    async fn count_with_filters(&self, filter: &BacktestHistoryFilter) -> Result<usize> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| matches_filter(r, filter))
            .count())
    }
}

fn matches_filter(record: &BacktestHistoryRecord, filter: &BacktestHistoryFilter) -> bool {
    if let Some(strategy) = &filter.strategy {
        if &record.strategy != strategy {
            return false;
        }
    }
    if let Some(exchange) = &filter.exchange {
        if &record.exchange != exchange {
            return false;
        }
    }
    if let Some(substr) = &filter.symbol_contains {
        if !record.symbol.contains(substr.as_str()) {
            return false;
        }
    }
    if let Some(period) = filter.period {
        if record.period != period {
            return false;
        }
    }
    if let Some(query) = &filter.query {
        let haystack = format!("{} {} {}", record.strategy, record.symbol, record.exchange);
        if !haystack.to_lowercase().contains(&query.to_lowercase()) {
            return false;
        }
    }
    true
}

fn sort_records(records: &mut [BacktestHistoryRecord], filter: &BacktestHistoryFilter) {
    let key_fn: fn(&BacktestHistoryRecord) -> f64 = match filter.sort_by.as_deref() {
        Some("roi") => |r| r.total_profit_pct,
        Some("win_rate") => |r| r.win_rate_pct,
        Some("sharpe") => |r| r.sharpe_ratio,
        Some("max_drawdown") => |r| r.max_drawdown_pct,
        Some("trades") => |r| r.total_trades as f64,
        _ => |_| 0.0,
    };
    records.sort_by(|a, b| key_fn(a).partial_cmp(&key_fn(b)).unwrap_or(std::cmp::Ordering::Equal));
    if filter.sort_desc {
        records.reverse();
    }
}
