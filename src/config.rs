//! Ambient configuration (§10.3): every constant named numerically in the
//! component design (§4) is configurable here, defaulting to the spec's
//! number. Loaded once at process start via [`Config::from_env`].

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Default exchange used when a caller does not name one explicitly.
    pub default_exchange: String,

    // --- Candle-availability layer (C5) ---
    /// Fraction of the expected bar count that must already be persisted
    /// before `ensure_range` skips the pull-through fetch.
    pub persisted_coverage_threshold: f64,
    /// Bars requested per pagination batch.
    pub candle_batch_size: i64,
    /// Hard cap on pagination batches per `ensure_range` call.
    pub candle_max_batches: u32,
    /// Minimum delay between pagination batches.
    pub candle_batch_delay: Duration,
    /// Minimum completed bars a back-test run requires before it proceeds.
    pub min_candles_for_backtest: usize,

    // --- Bot scheduler (C6) ---
    /// Tick cadence; fires once per this interval, aligned to the minute.
    pub scheduler_tick_interval: Duration,
    /// Extra lag added after the minute boundary before the tick fires.
    pub scheduler_tick_lag: Duration,
    /// Minimum interval between watch-mode notifications for one bot.
    pub scheduler_watch_throttle: Duration,
    /// Cadence of the throttle-bookkeeping cleanup task.
    pub scheduler_throttle_cleanup_interval: Duration,

    // --- Back-test job service (C7) ---
    /// Jobs allowed to run concurrently.
    pub max_concurrent_jobs: usize,
    /// Sibling periods a multi-period job may fan out concurrently.
    pub max_multi_backtest_concurrency: usize,
    /// Hours a finished job is retained before the reaper removes it.
    pub job_ttl_hours: i64,
    /// Cadence of the job-TTL cleanup task.
    pub job_cleanup_interval: Duration,
    /// Win-rate percentage at/above which a result is persisted to history.
    pub win_rate_persistence_gate_pct: f64,
    /// Maximum periods accepted in one multi-period job submission.
    pub max_multi_backtest_periods: usize,

    // --- Exchange instance cache (C9) ---
    /// TTL for both public and profile-authenticated cached clients.
    pub exchange_cache_ttl: Duration,

    // --- Suspension-point timeouts (§5) ---
    /// Per-batch market-data fetch timeout; a batch that exceeds this counts
    /// as a soft failure and breaks the pagination loop.
    pub market_data_fetch_timeout: Duration,
    /// Signal-validator call timeout; a call that exceeds this is treated as
    /// `confirmed=false`.
    pub validator_timeout: Duration,
}

impl Default for Config {
    /// The spec's numbers, with no environment access — the baseline
    /// `from_env` layers overrides onto.
    fn default() -> Self {
        Self {
            default_exchange: "binance".to_string(),

            persisted_coverage_threshold: 0.9,
            candle_batch_size: 500,
            candle_max_batches: 200,
            candle_batch_delay: Duration::from_millis(300),
            min_candles_for_backtest: 10,

            scheduler_tick_interval: Duration::from_secs(60),
            scheduler_tick_lag: Duration::from_secs(8),
            scheduler_watch_throttle: Duration::from_secs(30 * 60),
            scheduler_throttle_cleanup_interval: Duration::from_secs(60 * 60),

            max_concurrent_jobs: 1,
            max_multi_backtest_concurrency: 2,
            job_ttl_hours: 6,
            job_cleanup_interval: Duration::from_secs(15 * 60),
            win_rate_persistence_gate_pct: 60.0,
            max_multi_backtest_periods: 5,

            exchange_cache_ttl: Duration::from_secs(60 * 60),

            market_data_fetch_timeout: Duration::from_secs(10),
            validator_timeout: Duration::from_secs(3),
        }
    }
}

impl Config {
    /// Loads defaults, then overlays whichever recognized environment
    /// variables are present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Ok(Self {
            default_exchange: env::var("DEFAULT_EXCHANGE").unwrap_or(defaults.default_exchange),

            persisted_coverage_threshold: parse_env(
                "CANDLE_PERSISTED_COVERAGE_THRESHOLD",
                defaults.persisted_coverage_threshold,
            )?,
            candle_batch_size: parse_env("CANDLE_BATCH_SIZE", defaults.candle_batch_size)?,
            candle_max_batches: parse_env("CANDLE_MAX_BATCHES", defaults.candle_max_batches)?,
            candle_batch_delay: Duration::from_millis(parse_env(
                "CANDLE_BATCH_DELAY_MS",
                defaults.candle_batch_delay.as_millis() as u64,
            )?),
            min_candles_for_backtest: parse_env("MIN_CANDLES_FOR_BACKTEST", defaults.min_candles_for_backtest)?,

            scheduler_tick_interval: Duration::from_secs(parse_env(
                "SCHEDULER_TICK_INTERVAL_SECS",
                defaults.scheduler_tick_interval.as_secs(),
            )?),
            scheduler_tick_lag: Duration::from_secs(parse_env(
                "SCHEDULER_TICK_LAG_SECS",
                defaults.scheduler_tick_lag.as_secs(),
            )?),
            scheduler_watch_throttle: Duration::from_secs(parse_env(
                "SCHEDULER_WATCH_THROTTLE_SECS",
                defaults.scheduler_watch_throttle.as_secs(),
            )?),
            scheduler_throttle_cleanup_interval: Duration::from_secs(parse_env(
                "SCHEDULER_THROTTLE_CLEANUP_INTERVAL_SECS",
                defaults.scheduler_throttle_cleanup_interval.as_secs(),
            )?),

            max_concurrent_jobs: parse_env("MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?,
            max_multi_backtest_concurrency: parse_env(
                "MULTI_BACKTEST_CONCURRENCY",
                defaults.max_multi_backtest_concurrency,
            )?,
            job_ttl_hours: parse_env("JOB_TTL_HOURS", defaults.job_ttl_hours)?,
            job_cleanup_interval: Duration::from_secs(parse_env(
                "JOB_CLEANUP_INTERVAL_SECS",
                defaults.job_cleanup_interval.as_secs(),
            )?),
            win_rate_persistence_gate_pct: parse_env(
                "WIN_RATE_PERSISTENCE_GATE_PCT",
                defaults.win_rate_persistence_gate_pct,
            )?,
            max_multi_backtest_periods: parse_env("MAX_MULTI_BACKTEST_PERIODS", defaults.max_multi_backtest_periods)?,

            exchange_cache_ttl: Duration::from_secs(parse_env(
                "EXCHANGE_CACHE_TTL_SECS",
                defaults.exchange_cache_ttl.as_secs(),
            )?),

            market_data_fetch_timeout: Duration::from_secs(parse_env(
                "MARKET_DATA_FETCH_TIMEOUT_SECS",
                defaults.market_data_fetch_timeout.as_secs(),
            )?),
            validator_timeout: Duration::from_secs(parse_env(
                "VALIDATOR_TIMEOUT_SECS",
                defaults.validator_timeout.as_secs(),
            )?),
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("failed to parse {key}='{raw}'")),
        Err(_) => Ok(default),
    }
}
