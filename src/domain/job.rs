//! Back-test job data model (C7).

use crate::domain::backtest::{BacktestResult, Summary};
use crate::domain::candle::Period;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Queued,
    Running,
    Saving,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodState {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Single,
    Multi,
}

/// A point-in-time view of a multi-period job's progress, copied out for
/// readers rather than shared by reference.
#[derive(Debug, Clone, Default)]
pub struct JobSnapshot {
    pub total_periods: usize,
    pub completed_periods: usize,
    pub period_states: HashMap<Period, PeriodState>,
    pub partial_summaries: HashMap<Period, Summary>,
    /// Full per-period result, kept separately from `partial_summaries` so
    /// readers that only want the headline numbers don't pay for it.
    pub period_details: HashMap<Period, BacktestResult>,
    pub failed_periods: HashMap<Period, String>,
}

impl JobSnapshot {
    pub fn for_periods(periods: &[Period]) -> Self {
        let mut states = HashMap::new();
        for p in periods {
            states.insert(*p, PeriodState::Queued);
        }
        Self {
            total_periods: periods.len(),
            completed_periods: 0,
            period_states: states,
            partial_summaries: HashMap::new(),
            period_details: HashMap::new(),
            failed_periods: HashMap::new(),
        }
    }

    /// `5 + floor(completed/total * 85)` while running.
    pub fn running_progress_percent(&self) -> u8 {
        if self.total_periods == 0 {
            return 5;
        }
        let ratio = self.completed_periods as f64 / self.total_periods as f64;
        (5.0 + (ratio * 85.0).floor()) as u8
    }
}

#[derive(Debug, Clone)]
pub struct BacktestJob {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress_percent: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<BacktestResult>,
    pub snapshot: JobSnapshot,
}

impl BacktestJob {
    pub fn new_queued(id: String, kind: JobKind, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            status: JobStatus::Queued,
            phase: JobPhase::Queued,
            progress_percent: 0,
            message: "queued".to_string(),
            created_at: now,
            started_at: None,
            updated_at: now,
            finished_at: None,
            error: None,
            result: None,
            snapshot: JobSnapshot::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Done | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BacktestJobEventKind {
    JobStarted,
    JobProgress,
    TimeframeStarted,
    TimeframeDone,
    TimeframeFailed,
    JobDone,
    JobFailed,
}

#[derive(Debug, Clone)]
pub struct BacktestJobEvent {
    pub job_id: String,
    pub kind: BacktestJobEventKind,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub period: Option<Period>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_reaches_33_percent_after_one_of_three_periods() {
        let mut snapshot = JobSnapshot::for_periods(&[Period::M1, Period::M5, Period::H1]);
        snapshot.completed_periods = 1;
        assert_eq!(snapshot.running_progress_percent(), 33);
    }

    #[test]
    fn progress_reaches_90_after_all_periods_complete() {
        let mut snapshot = JobSnapshot::for_periods(&[Period::M1, Period::M5, Period::H1]);
        snapshot.completed_periods = 3;
        assert_eq!(snapshot.running_progress_percent(), 90);
    }
}
