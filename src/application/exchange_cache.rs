//! Exchange instance cache (C9): memoises constructed, markets-loaded
//! exchange clients behind a TTL, keyed separately for public and
//! profile-authenticated access.

use crate::config::Config;
use crate::domain::errors::ExchangeCacheError;
use crate::domain::ports::{ExchangeClient, ExchangeConnector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Retained for tests that want a fixed reference duration matching
/// [`Config::default`]'s `exchange_cache_ttl`.
pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

struct Entry {
    client: Arc<dyn ExchangeClient>,
    fetched_at: Instant,
}

impl Entry {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.fetched_at) < ttl
    }
}

pub struct ExchangeInstanceCache {
    connector: Arc<dyn ExchangeConnector>,
    public: RwLock<HashMap<String, Entry>>,
    authed: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl ExchangeInstanceCache {
    pub fn new(connector: Arc<dyn ExchangeConnector>) -> Self {
        Self::with_config(connector, Config::default())
    }

    pub fn with_config(connector: Arc<dyn ExchangeConnector>, config: Config) -> Self {
        Self {
            connector,
            public: RwLock::new(HashMap::new()),
            authed: RwLock::new(HashMap::new()),
            ttl: config.exchange_cache_ttl,
        }
    }

    pub async fn get_public(&self, exchange: &str) -> Result<Arc<dyn ExchangeClient>, ExchangeCacheError> {
        self.get_public_at(exchange, Instant::now()).await
    }

    pub async fn get_authed(&self, profile_id: &str, exchange: &str) -> Result<Arc<dyn ExchangeClient>, ExchangeCacheError> {
        self.get_authed_at(profile_id, exchange, Instant::now()).await
    }

    async fn get_public_at(&self, exchange: &str, now: Instant) -> Result<Arc<dyn ExchangeClient>, ExchangeCacheError> {
        if let Some(entry) = self.public.read().await.get(exchange) {
            if entry.is_fresh(now, self.ttl) {
                return Ok(entry.client.clone());
            }
        }
        let client = self.connector.connect_public(exchange).await?;
        self.public.write().await.insert(
            exchange.to_string(),
            Entry {
                client: client.clone(),
                fetched_at: now,
            },
        );
        Ok(client)
    }

    async fn get_authed_at(
        &self,
        profile_id: &str,
        exchange: &str,
        now: Instant,
    ) -> Result<Arc<dyn ExchangeClient>, ExchangeCacheError> {
        if let Some(entry) = self.authed.read().await.get(profile_id) {
            if entry.is_fresh(now, self.ttl) {
                return Ok(entry.client.clone());
            }
        }
        let client = self.connector.connect_authed(exchange, profile_id).await?;
        self.authed.write().await.insert(
            profile_id.to_string(),
            Entry {
                client: client.clone(),
                fetched_at: now,
            },
        );
        Ok(client)
    }

    /// Drops the cached authenticated client; callers must invoke this on
    /// credential change or profile deletion.
    pub async fn invalidate(&self, profile_id: &str) {
        self.authed.write().await.remove(profile_id);
    }
}
