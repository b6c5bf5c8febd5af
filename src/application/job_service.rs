//! Back-test job service (C7): a bounded-concurrency queue in front of
//! [`BacktestEngine`], with per-job progress snapshots and a typed event
//! broadcast that replaces a plain listener-list event emitter.

use crate::application::backtest_engine::BacktestEngine;
use crate::domain::backtest::{validate_backtest_params, BacktestParams, BacktestResult};
use crate::domain::candle::Period;
use crate::domain::errors::{JobError, ValidationError};
use crate::domain::job::{
    BacktestJob, BacktestJobEvent, BacktestJobEventKind, JobKind, JobPhase, JobSnapshot, JobStatus, PeriodState,
};
use crate::domain::repositories::{BacktestHistoryRecord, BacktestRepository};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

type JobMap = Arc<RwLock<HashMap<String, BacktestJob>>>;
type EventMap = Arc<RwLock<HashMap<String, broadcast::Sender<BacktestJobEvent>>>>;

/// Handed to a job's runner closure. Every mutation is applied to the job's
/// record under the service's lock and mirrored onto the job's event
/// stream, so a reader polling `JobService::status` and a reader watching
/// `JobService::subscribe` never disagree about what happened.
#[derive(Clone)]
pub struct RunnerContext {
    job_id: String,
    jobs: JobMap,
    events: EventMap,
}

impl RunnerContext {
    async fn mutate(&self, f: impl FnOnce(&mut BacktestJob)) {
        if let Some(job) = self.jobs.write().await.get_mut(&self.job_id) {
            f(job);
            job.updated_at = Utc::now();
        }
    }

    async fn emit(&self, kind: BacktestJobEventKind, message: String, period: Option<Period>) {
        if let Some(tx) = self.events.read().await.get(&self.job_id) {
            // No receivers is the common case (nobody is watching this job
            // live); a send error there is not a problem.
            let _ = tx.send(BacktestJobEvent {
                job_id: self.job_id.clone(),
                kind,
                timestamp: Utc::now(),
                message,
                period,
            });
        }
    }

    pub async fn set_progress(&self, phase: JobPhase, percent: u8, message: impl Into<String>) {
        let message = message.into();
        self.mutate(|job| {
            job.phase = phase;
            job.progress_percent = percent;
            job.message = message.clone();
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Running;
                job.started_at.get_or_insert(Utc::now());
            }
        })
        .await;
        self.emit(BacktestJobEventKind::JobProgress, message, None).await;
    }

    pub async fn emit_event(&self, kind: BacktestJobEventKind, message: impl Into<String>, period: Option<Period>) {
        self.emit(kind, message.into(), period).await;
    }

    pub async fn init_periods(&self, periods: &[Period]) {
        let snapshot = JobSnapshot::for_periods(periods);
        self.mutate(|job| job.snapshot = snapshot).await;
    }

    pub async fn set_period_state(&self, period: Period, state: PeriodState, message: Option<String>) {
        self.mutate(|job| {
            job.snapshot.period_states.insert(period, state);
            if state == PeriodState::Done {
                job.snapshot.completed_periods += 1;
            }
        })
        .await;
        let kind = match state {
            PeriodState::Running => BacktestJobEventKind::TimeframeStarted,
            PeriodState::Done => BacktestJobEventKind::TimeframeDone,
            PeriodState::Failed => BacktestJobEventKind::TimeframeFailed,
            PeriodState::Queued => BacktestJobEventKind::JobProgress,
        };
        self.emit(kind, message.unwrap_or_else(|| period.to_string()), Some(period)).await;
    }

    pub async fn set_period_summary(&self, period: Period, result: &BacktestResult) {
        let summary = result.summary;
        self.mutate(|job| {
            job.snapshot.partial_summaries.insert(period, summary);
        })
        .await;
    }

    pub async fn set_period_detail(&self, period: Period, result: BacktestResult) {
        self.mutate(|job| {
            job.snapshot.period_details.insert(period, result);
        })
        .await;
    }

    pub async fn set_period_failure(&self, period: Period, error_message: impl Into<String>) {
        let error_message = error_message.into();
        self.mutate(|job| {
            job.snapshot.failed_periods.insert(period, error_message.clone());
        })
        .await;
        self.set_period_state(period, PeriodState::Failed, Some(error_message)).await;
    }

    /// `5 + floor(completed/total * 85)` while the job's phase is `Running`.
    pub async fn running_progress_percent(&self) -> u8 {
        self.jobs
            .read()
            .await
            .get(&self.job_id)
            .map(|job| job.snapshot.running_progress_percent())
            .unwrap_or(5)
    }
}

/// Queue front-end for long-running back-test jobs. Jobs never block the
/// caller that submits them: `create_job` returns a job id immediately and
/// the runner executes on its own task once a concurrency slot frees up.
pub struct JobService {
    jobs: JobMap,
    events: EventMap,
    semaphore: Arc<Semaphore>,
}

impl JobService {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(HashMap::new())),
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Enqueues a job and spawns its runner once a concurrency permit is
    /// available. `runner` receives a [`RunnerContext`] it uses to report
    /// progress, and returns the job's final `BacktestResult` for a single
    /// period, or `None` for a multi-period job (whose periods are recorded
    /// individually via `set_period_summary`/`set_period_detail`).
    pub async fn create_job<F, Fut>(&self, kind: JobKind, runner: F) -> String
    where
        F: FnOnce(RunnerContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<BacktestResult>, JobError>> + Send + 'static,
    {
        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.jobs.write().await.insert(job_id.clone(), BacktestJob::new_queued(job_id.clone(), kind, now));
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        self.events.write().await.insert(job_id.clone(), tx);

        let ctx = RunnerContext {
            job_id: job_id.clone(),
            jobs: self.jobs.clone(),
            events: self.events.clone(),
        };
        let semaphore = self.semaphore.clone();
        let jobs = self.jobs.clone();
        let events = self.events.clone();
        let spawned_job_id = job_id.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            ctx.set_progress(JobPhase::Running, 5, "running").await;
            ctx.emit(BacktestJobEventKind::JobStarted, "job started".to_string(), None).await;

            let outcome = runner(ctx.clone()).await;
            let (event_kind, event_message) = match &outcome {
                Ok(_) => (BacktestJobEventKind::JobDone, "job done".to_string()),
                Err(err) => (BacktestJobEventKind::JobFailed, err.to_string()),
            };

            {
                let mut map = jobs.write().await;
                if let Some(job) = map.get_mut(&spawned_job_id) {
                    let now = Utc::now();
                    job.updated_at = now;
                    job.finished_at = Some(now);
                    match outcome {
                        Ok(result) => {
                            job.status = JobStatus::Done;
                            job.phase = JobPhase::Done;
                            job.progress_percent = 100;
                            job.message = "done".to_string();
                            job.result = result;
                        }
                        Err(err) => {
                            job.status = JobStatus::Failed;
                            job.phase = JobPhase::Failed;
                            job.error = Some(err.to_string());
                            job.message = err.to_string();
                        }
                    }
                }
            }

            if let Some(tx) = events.read().await.get(&spawned_job_id) {
                let _ = tx.send(BacktestJobEvent {
                    job_id: spawned_job_id.clone(),
                    kind: event_kind,
                    timestamp: Utc::now(),
                    message: event_message,
                    period: None,
                });
            }
        });

        job_id
    }

    pub async fn status(&self, job_id: &str) -> Result<BacktestJob, JobError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub async fn subscribe(&self, job_id: &str) -> Result<broadcast::Receiver<BacktestJobEvent>, JobError> {
        self.events
            .read()
            .await
            .get(job_id)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Removes terminal jobs whose `finished_at` is older than `ttl`,
    /// dropping their event channel along with them.
    pub async fn reap_expired(&self, ttl: chrono::Duration, now: chrono::DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().await;
        let expired: Vec<String> = jobs
            .iter()
            .filter(|(_, job)| job.is_terminal() && job.finished_at.is_some_and(|f| now - f > ttl))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        drop(jobs);
        if !expired.is_empty() {
            let mut events = self.events.write().await;
            for id in &expired {
                events.remove(id);
            }
        }
        expired.len()
    }

    /// Spawns the periodic TTL reaper. Holds only a clone of the shared
    /// maps, so it outlives any particular `JobService` value.
    pub fn spawn_cleanup_task(&self, ttl_hours: i64, interval: Duration) -> tokio::task::JoinHandle<()> {
        let jobs = self.jobs.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let ttl = chrono::Duration::hours(ttl_hours);
                let now = Utc::now();
                let mut map = jobs.write().await;
                let expired: Vec<String> = map
                    .iter()
                    .filter(|(_, job)| job.is_terminal() && job.finished_at.is_some_and(|f| now - f > ttl))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &expired {
                    map.remove(id);
                }
                drop(map);
                if !expired.is_empty() {
                    let mut ev = events.write().await;
                    for id in &expired {
                        ev.remove(id);
                    }
                    info!(removed = expired.len(), "job TTL cleanup removed expired jobs");
                }
            }
        })
    }
}

fn to_history_record(run_group_id: String, result: &BacktestResult) -> BacktestHistoryRecord {
    BacktestHistoryRecord {
        run_group_id,
        exchange: result.exchange.clone(),
        symbol: result.symbol.clone(),
        period: result.period,
        strategy: result.strategy_name.clone(),
        win_rate_pct: result.summary.win_rate_pct,
        total_profit_pct: result.summary.total_profit_pct,
        sharpe_ratio: result.summary.sharpe_ratio,
        max_drawdown_pct: result.summary.max_drawdown_pct,
        total_trades: result.summary.total_trades,
    }
}

/// Submits a single-period back-test. The result is persisted to history
/// only if its win rate clears `win_rate_gate_pct`.
///
/// Validates the request against the engine's strategy registry before a
/// job is created (§7: only a `ValidationError` surfaces at this point).
pub async fn submit_single_backtest(
    service: &JobService,
    engine: Arc<BacktestEngine>,
    repository: Arc<dyn BacktestRepository>,
    params: BacktestParams,
    win_rate_gate_pct: f64,
) -> Result<String, ValidationError> {
    validate_backtest_params(engine.registry(), &params)?;

    let job_id = service
        .create_job(JobKind::Single, move |ctx| async move {
            ctx.set_progress(JobPhase::Running, 5, "running backtest").await;
            let result = engine.run(params).await.map_err(JobError::from)?;

            ctx.set_progress(JobPhase::Saving, 92, "saving result").await;
            if result.summary.win_rate_pct >= win_rate_gate_pct {
                let record = to_history_record(Uuid::new_v4().to_string(), &result);
                if let Err(err) = repository.create_many(vec![record]).await {
                    warn!(%err, "failed to persist qualifying backtest result");
                }
            }
            Ok(Some(result))
        })
        .await;
    Ok(job_id)
}

/// Submits a multi-period job: up to `max_periods` timeframes of the same
/// symbol/strategy, fanned out with `concurrency` run at once. Rejects
/// oversized or otherwise invalid requests before a job is even created.
#[allow(clippy::too_many_arguments)]
pub async fn submit_multi_backtest(
    service: &JobService,
    engine: Arc<BacktestEngine>,
    repository: Arc<dyn BacktestRepository>,
    base_params: BacktestParams,
    periods: Vec<Period>,
    concurrency: usize,
    win_rate_gate_pct: f64,
    max_periods: usize,
) -> Result<String, JobError> {
    validate_backtest_params(engine.registry(), &base_params)?;
    if periods.len() > max_periods {
        return Err(JobError::TooManyPeriods {
            got: periods.len(),
            max: max_periods,
        });
    }
    let concurrency = concurrency.clamp(1, max_periods.max(1));
    let run_group_id = Uuid::new_v4().to_string();

    let job_id = service
        .create_job(JobKind::Multi, move |ctx| async move {
            ctx.init_periods(&periods).await;
            ctx.set_progress(JobPhase::Running, 5, "running multi-period backtest").await;

            let fanout = Arc::new(Semaphore::new(concurrency));
            let mut handles = Vec::with_capacity(periods.len());
            for period in periods.iter().copied() {
                let fanout = fanout.clone();
                let engine = engine.clone();
                let repository = repository.clone();
                let ctx = ctx.clone();
                let mut params = base_params.clone();
                params.period = period;
                let run_group_id = run_group_id.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = fanout.acquire_owned().await;
                    ctx.set_period_state(period, PeriodState::Running, None).await;
                    match engine.run(params).await {
                        Ok(result) => {
                            ctx.set_period_summary(period, &result).await;
                            if result.summary.win_rate_pct >= win_rate_gate_pct {
                                let record = to_history_record(run_group_id.clone(), &result);
                                if let Err(err) = repository.create_many(vec![record]).await {
                                    warn!(%err, period = %period, "failed to persist qualifying period result");
                                }
                            }
                            ctx.set_period_detail(period, result).await;
                            ctx.set_period_state(period, PeriodState::Done, None).await;
                        }
                        Err(err) => {
                            ctx.set_period_failure(period, err.to_string()).await;
                        }
                    }
                    let percent = ctx.running_progress_percent().await;
                    ctx.set_progress(JobPhase::Running, percent, format!("{period} complete")).await;
                }));
            }

            for handle in handles {
                let _ = handle.await;
            }

            ctx.set_progress(JobPhase::Saving, 92, "saving results").await;
            Ok(None)
        })
        .await;

    Ok(job_id)
}
