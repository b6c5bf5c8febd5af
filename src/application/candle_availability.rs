//! Candle-availability layer (C5): merges persisted candles with
//! pull-through fetches from an external market-data source, paginating
//! conservatively and always dropping the still-forming bar.

use crate::config::Config;
use crate::domain::candle::{Candle, Period};
use crate::domain::ports::MarketDataSource;
use crate::domain::repositories::CandleRepository;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CandleAvailability {
    repository: Arc<dyn CandleRepository>,
    source: Arc<dyn MarketDataSource>,
    config: Config,
}

impl CandleAvailability {
    pub fn new(repository: Arc<dyn CandleRepository>, source: Arc<dyn MarketDataSource>) -> Self {
        Self::with_config(repository, source, Config::default())
    }

    pub fn with_config(repository: Arc<dyn CandleRepository>, source: Arc<dyn MarketDataSource>, config: Config) -> Self {
        Self {
            repository,
            source,
            config,
        }
    }

    /// Returns a contiguous, ascending, completed-candle stream covering
    /// `[since, until]`, fetching and persisting whatever the repository is
    /// missing.
    pub async fn ensure_range(
        &self,
        exchange: &str,
        symbol: &str,
        period: Period,
        since: i64,
        until: i64,
    ) -> anyhow::Result<Vec<Candle>> {
        let persisted = self
            .repository
            .get_range(exchange, symbol, period, since, until)
            .await?;

        let expected = ((until - since) / period.seconds()).max(1) as usize;
        let coverage = persisted.len() as f64 / expected as f64;
        if coverage >= self.config.persisted_coverage_threshold {
            return Ok(persisted);
        }

        let fetched = self.paginated_fetch(exchange, symbol, period, since, until).await?;
        if !fetched.is_empty() {
            self.repository.save_many(exchange, symbol, period, &fetched).await?;
        }

        Ok(merge_ascending_unique(persisted, fetched))
    }

    /// The most recent completed bars, for live-tick callers that don't need
    /// a long historical window.
    pub async fn fetch_recent(&self, exchange: &str, symbol: &str, period: Period) -> anyhow::Result<Vec<Candle>> {
        self.source.fetch_recent(exchange, symbol, period).await
    }

    /// Current bid/ask, for callers that need a live quote rather than the
    /// last completed candle's close.
    pub async fn fetch_quote(&self, exchange: &str, symbol: &str) -> anyhow::Result<(f64, f64)> {
        self.source.fetch_quote(exchange, symbol).await
    }

    async fn paginated_fetch(
        &self,
        exchange: &str,
        symbol: &str,
        period: Period,
        since: i64,
        until: i64,
    ) -> anyhow::Result<Vec<Candle>> {
        let mut all = Vec::new();
        let mut cursor = since;
        let mut batches = 0u32;

        while cursor < until && batches < self.config.candle_max_batches {
            let batch_until = (cursor + self.config.candle_batch_size * period.seconds()).min(until);
            let fetch = self.source.fetch_ohlcv(exchange, symbol, period, cursor, batch_until);
            let batch = match tokio::time::timeout(self.config.market_data_fetch_timeout, fetch).await {
                Ok(Ok(batch)) => batch,
                Ok(Err(err)) => {
                    warn!(exchange, symbol, %err, "candle batch fetch failed, returning partial result");
                    break;
                }
                Err(_) => {
                    warn!(exchange, symbol, "candle batch fetch timed out, returning partial result");
                    break;
                }
            };

            if batch.is_empty() {
                break;
            }

            // Drop the last candle: it may still be forming.
            let mut completed = batch;
            completed.pop();
            if completed.is_empty() {
                break;
            }

            let last_time = completed.last().map(|c| c.time).unwrap_or(cursor);
            let short_batch = completed.len() < self.config.candle_batch_size as usize - 1;
            cursor = last_time + period.seconds();
            all.extend(completed);
            batches += 1;

            if short_batch || cursor >= until {
                break;
            }

            tokio::time::sleep(self.config.candle_batch_delay).await;
        }

        debug!(exchange, symbol, batches, candles = all.len(), "paginated candle fetch complete");
        Ok(all)
    }
}

fn merge_ascending_unique(mut a: Vec<Candle>, mut b: Vec<Candle>) -> Vec<Candle> {
    a.append(&mut b);
    a.sort_by_key(|c| c.time);
    a.dedup_by_key(|c| c.time);
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EmptyRepository;

    #[async_trait]
    impl CandleRepository for EmptyRepository {
        async fn save_many(&self, _e: &str, _s: &str, _p: Period, _c: &[Candle]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_range(&self, _e: &str, _s: &str, _p: Period, _since: i64, _until: i64) -> anyhow::Result<Vec<Candle>> {
            Ok(vec![])
        }
        async fn count(&self, _e: &str, _s: &str, _p: Period, _since: i64, _until: i64) -> anyhow::Result<usize> {
            Ok(0)
        }
    }

    struct SingleBatchSource {
        candles: Mutex<Vec<Candle>>,
    }

    #[async_trait]
    impl MarketDataSource for SingleBatchSource {
        async fn fetch_ohlcv(&self, _e: &str, _s: &str, _p: Period, _since: i64, _until: i64) -> anyhow::Result<Vec<Candle>> {
            Ok(self.candles.lock().unwrap().drain(..).collect())
        }
        async fn fetch_recent(&self, _e: &str, _s: &str, _p: Period) -> anyhow::Result<Vec<Candle>> {
            Ok(vec![])
        }
        async fn fetch_quote(&self, _e: &str, _s: &str) -> anyhow::Result<(f64, f64)> {
            Ok((1.0, 1.0))
        }
    }

    #[tokio::test]
    async fn pull_through_fetch_drops_the_forming_candle() {
        let candles: Vec<Candle> = (0..5)
            .map(|i| Candle::new(i * 3600, 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect();
        let source = SingleBatchSource {
            candles: Mutex::new(candles),
        };
        let availability = CandleAvailability::new(Arc::new(EmptyRepository), Arc::new(source));
        let result = availability
            .ensure_range("binance", "BTC/USDT", Period::H1, 0, 4 * 3600)
            .await
            .unwrap();
        assert_eq!(result.len(), 4);
    }
}
