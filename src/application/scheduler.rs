//! Bot scheduler (C6): fires every running bot exactly once per its
//! configured period, aligned to the minute boundary, and routes the
//! resulting signal to trade dispatch or a throttled notification.

use crate::application::candle_availability::CandleAvailability;
use crate::application::executor::StrategyExecutor;
use crate::config::Config;
use crate::domain::backtest::Side;
use crate::domain::bot::{Bot, BotMode};
use crate::domain::candle::Period;
use crate::domain::ports::{ExecutionDispatcher, NotificationSink, OrderIntent};
use crate::domain::strategy::{SignalDirection, StrategyRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Retained for tests that want fixed reference durations matching
/// [`Config::default`]'s scheduler numbers.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);
pub const TICK_LAG: Duration = Duration::from_secs(8);
pub const WATCH_THROTTLE: Duration = Duration::from_secs(30 * 60);
pub const THROTTLE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Tracks the last notification instant per bot, so watch-mode bots notify
/// at most once per `watch_throttle` window.
pub struct NotificationThrottle {
    last_sent: HashMap<String, Instant>,
    watch_throttle: Duration,
    cleanup_max_age: Duration,
}

impl NotificationThrottle {
    pub fn new(watch_throttle: Duration, cleanup_max_age: Duration) -> Self {
        Self {
            last_sent: HashMap::new(),
            watch_throttle,
            cleanup_max_age,
        }
    }

    /// Returns `true` (and records `now`) if a notification for `bot_id` may
    /// go out now; `false` if still inside the throttle window.
    pub fn allow(&mut self, bot_id: &str, now: Instant) -> bool {
        match self.last_sent.get(bot_id) {
            Some(last) if now.duration_since(*last) < self.watch_throttle => false,
            _ => {
                self.last_sent.insert(bot_id.to_string(), now);
                true
            }
        }
    }

    /// Drops bookkeeping older than `cleanup_max_age` so the map doesn't grow
    /// unbounded across a long-running process.
    pub fn cleanup(&mut self, now: Instant) {
        let max_age = self.cleanup_max_age;
        self.last_sent.retain(|_, last| now.duration_since(*last) < max_age);
    }
}

pub struct BotScheduler {
    candle_availability: Arc<CandleAvailability>,
    registry: Arc<StrategyRegistry>,
    dispatcher: Arc<dyn ExecutionDispatcher>,
    notifier: Arc<dyn NotificationSink>,
    throttle: NotificationThrottle,
    config: Config,
}

impl BotScheduler {
    pub fn new(
        candle_availability: Arc<CandleAvailability>,
        registry: Arc<StrategyRegistry>,
        dispatcher: Arc<dyn ExecutionDispatcher>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::with_config(candle_availability, registry, dispatcher, notifier, Config::default())
    }

    pub fn with_config(
        candle_availability: Arc<CandleAvailability>,
        registry: Arc<StrategyRegistry>,
        dispatcher: Arc<dyn ExecutionDispatcher>,
        notifier: Arc<dyn NotificationSink>,
        config: Config,
    ) -> Self {
        let throttle = NotificationThrottle::new(config.scheduler_watch_throttle, config.scheduler_throttle_cleanup_interval);
        Self {
            candle_availability,
            registry,
            dispatcher,
            notifier,
            throttle,
            config,
        }
    }

    /// Runs forever: aligns to the next minute boundary plus the exchange
    /// finalisation lag, then ticks every `scheduler_tick_interval`.
    pub async fn run_forever(&mut self, exchange: &str, bots: impl Fn() -> Vec<Bot>) {
        sleep(delay_to_next_boundary() + self.config.scheduler_tick_lag).await;
        loop {
            let minute_of_epoch = unix_minute_now();
            self.run_tick(exchange, minute_of_epoch, &bots()).await;
            sleep(self.config.scheduler_tick_interval).await;
        }
    }

    /// Runs one tick at a given `minute_of_epoch`, in caller-supplied bot
    /// iteration order. Exposed directly so tests can drive deterministic
    /// ticks without a real clock.
    pub async fn run_tick(&mut self, exchange: &str, minute_of_epoch: i64, bots: &[Bot]) {
        let now = Instant::now();
        for bot in bots.iter().filter(|b| b.is_running()) {
            if !bot.period.divides(minute_of_epoch) {
                continue;
            }
            if let Err(err) = self.run_bot(exchange, bot, now).await {
                error!(bot_id = %bot.id, error = %err, "scheduler tick failed for bot");
            }
        }
    }

    async fn run_bot(&mut self, exchange: &str, bot: &Bot, now: Instant) -> anyhow::Result<()> {
        let (bid, ask) = self.candle_availability.fetch_quote(exchange, &bot.pair).await?;
        info!(bot_id = %bot.id, bid, ask, "scheduler fetched current quote");

        let candles = self
            .candle_availability
            .fetch_recent(exchange, &bot.pair, bot.period)
            .await?;
        if candles.is_empty() {
            warn!(bot_id = %bot.id, "no candles available for scheduled tick");
            return Ok(());
        }

        let mut strategy = self.registry.create(&bot.strategy_name, bot.options.clone())?;
        let (rows, _) = StrategyExecutor::new()
            .execute(strategy.as_mut(), bot.period, &bot.options, &candles)
            .await?;

        let Some(last) = rows.last() else {
            return Ok(());
        };
        let Some(direction) = last.signal else {
            return Ok(());
        };

        info!(bot_id = %bot.id, direction = ?direction, pair = %bot.pair, price = last.price, "scheduler emitted signal");

        match bot.mode {
            BotMode::Watch => {
                if !self.throttle.allow(&bot.id, now) {
                    return Ok(());
                }
                self.notifier
                    .notify(format!("{:?} {} {} @ {}", direction, bot.strategy_name, bot.pair, last.price))
                    .await;
            }
            BotMode::Trade => {
                self.notifier
                    .notify(format!("{:?} {} {} @ {}", direction, bot.strategy_name, bot.pair, last.price))
                    .await;
                let intent = match direction {
                    SignalDirection::Long => OrderIntent::Market {
                        side: Side::Long,
                        quote_amount: bot.capital,
                    },
                    SignalDirection::Short => OrderIntent::Market {
                        side: Side::Short,
                        quote_amount: bot.capital,
                    },
                    SignalDirection::Close => {
                        if bot.is_settled_contract() {
                            OrderIntent::ClosePosition
                        } else {
                            OrderIntent::SellFreeBalance
                        }
                    }
                };
                self.dispatcher.dispatch(&bot.profile_id, &bot.pair, intent).await?;
            }
        }

        Ok(())
    }
}

fn unix_minute_now() -> i64 {
    chrono::Utc::now().timestamp() / 60
}

fn delay_to_next_boundary() -> Duration {
    let now = chrono::Utc::now().timestamp();
    let remainder = now % 60;
    Duration::from_secs((60 - remainder) as u64 % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisibility_matches_s4_scenario() {
        // S4: bots at 1m/5m/15m/1h. m=60 -> all four. m=15 -> 1m/5m/15m only. m=7 -> 1m only.
        let periods = [Period::M1, Period::M5, Period::M15, Period::H1];
        let at_60: Vec<bool> = periods.iter().map(|p| p.divides(60)).collect();
        assert_eq!(at_60, [true, true, true, true]);

        let at_15: Vec<bool> = periods.iter().map(|p| p.divides(15)).collect();
        assert_eq!(at_15, [true, true, true, false]);

        let at_7: Vec<bool> = periods.iter().map(|p| p.divides(7)).collect();
        assert_eq!(at_7, [true, false, false, false]);
    }

    #[test]
    fn throttle_suppresses_within_window_and_allows_after() {
        let mut throttle = NotificationThrottle::new(WATCH_THROTTLE, THROTTLE_CLEANUP_INTERVAL);
        let t0 = Instant::now();
        assert!(throttle.allow("bot-1", t0));
        assert!(!throttle.allow("bot-1", t0 + Duration::from_secs(60)));
        assert!(throttle.allow("bot-1", t0 + WATCH_THROTTLE + Duration::from_secs(1)));
    }

    #[test]
    fn throttle_cleanup_drops_stale_entries() {
        let mut throttle = NotificationThrottle::new(WATCH_THROTTLE, THROTTLE_CLEANUP_INTERVAL);
        let t0 = Instant::now();
        throttle.allow("bot-1", t0);
        throttle.cleanup(t0 + THROTTLE_CLEANUP_INTERVAL + Duration::from_secs(1));
        assert!(throttle.allow("bot-1", t0 + THROTTLE_CLEANUP_INTERVAL + Duration::from_secs(1)));
    }

    struct CountingNotifier {
        count: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl NotificationSink for CountingNotifier {
        async fn notify(&self, _message: String) {
            self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    struct NoopDispatcher;

    #[async_trait::async_trait]
    impl ExecutionDispatcher for NoopDispatcher {
        async fn dispatch(&self, _profile_id: &str, _pair: &str, _intent: OrderIntent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn watch_bot() -> Bot {
        Bot {
            id: "bot-1".to_string(),
            profile_id: "profile-1".to_string(),
            exchange: "binance".to_string(),
            strategy_name: "scripted".to_string(),
            pair: "BTC/USDT".to_string(),
            period: Period::H1,
            capital: 100.0,
            mode: BotMode::Watch,
            status: crate::domain::bot::BotStatus::Running,
            options: crate::domain::strategy::StrategyOptions::default(),
        }
    }

    fn scheduler_with(notifier: Arc<CountingNotifier>) -> BotScheduler {
        use crate::test_util::{FixedMarketDataSource, ScriptedStrategyFactory};

        let candles = crate::test_util::synthetic_candles(5, 0, |i| 100.0 + i as f64);
        let last_index = candles.len() - 1;
        let availability = Arc::new(CandleAvailability::new(
            Arc::new(crate::test_util::EmptyCandleRepository),
            Arc::new(FixedMarketDataSource::new(candles)),
        ));
        let mut registry = StrategyRegistry::new();
        registry.register(
            "scripted",
            Arc::new(ScriptedStrategyFactory::new(vec![(last_index, SignalDirection::Long)])),
        );

        BotScheduler::new(availability, Arc::new(registry), Arc::new(NoopDispatcher), notifier)
    }

    #[tokio::test]
    async fn watch_mode_does_not_notify_when_the_throttle_denies() {
        let notifier = Arc::new(CountingNotifier {
            count: std::sync::atomic::AtomicUsize::new(0),
        });
        let mut scheduler = scheduler_with(notifier.clone());
        let bot = watch_bot();
        let t0 = Instant::now();

        scheduler.run_bot("binance", &bot, t0).await.unwrap();
        assert_eq!(notifier.count.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Still inside the 30-minute watch throttle window: must not notify again.
        scheduler.run_bot("binance", &bot, t0 + Duration::from_secs(60)).await.unwrap();
        assert_eq!(notifier.count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
