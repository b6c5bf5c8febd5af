//! External collaborator contracts. Everything in this module is consumed
//! through a narrow interface; concrete adapters (exchange SDKs, HTTP
//! clients) live outside this crate's scope and are represented here only
//! by the shape the core needs from them.

use crate::domain::backtest::Side;
use crate::domain::candle::{Candle, Period};
use crate::domain::errors::ExchangeCacheError;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Pull-through historical candle source consumed by the candle-availability
/// layer (C5). `since`/`until` are unix seconds; results are ascending and
/// exclude the bar currently forming.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_ohlcv(
        &self,
        exchange: &str,
        symbol: &str,
        period: Period,
        since: i64,
        until: i64,
    ) -> Result<Vec<Candle>>;

    async fn fetch_recent(&self, exchange: &str, symbol: &str, period: Period) -> Result<Vec<Candle>>;

    async fn fetch_quote(&self, exchange: &str, symbol: &str) -> Result<(f64, f64)>;
}

/// An order placed by the scheduler (C6) when a bot is in `trade` mode.
#[derive(Debug, Clone)]
pub enum OrderIntent {
    Market { side: Side, quote_amount: f64 },
    ClosePosition,
    SellFreeBalance,
}

#[async_trait]
pub trait ExecutionDispatcher: Send + Sync {
    async fn dispatch(&self, profile_id: &str, pair: &str, intent: OrderIntent) -> Result<()>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: String);
}

/// A constructed, markets-loaded client for one exchange. The cache (C9)
/// only needs to know it's cheap to clone and safe to share.
pub trait ExchangeClient: Send + Sync {
    fn exchange_name(&self) -> &str;
}

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    async fn connect_public(&self, exchange: &str) -> Result<Arc<dyn ExchangeClient>, ExchangeCacheError>;

    async fn connect_authed(
        &self,
        exchange: &str,
        profile_id: &str,
    ) -> Result<Arc<dyn ExchangeClient>, ExchangeCacheError>;
}
