pub mod compare;
pub mod stats;

pub use compare::{compare, Comparison, Difference};
pub use stats::{compute_all_stats, compute_stats, percentile, Stats};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::RunStatus;
use crate::http::timing::PhaseTimings;

// ---------------------------------------------------------------------------
// TrialRun
// ---------------------------------------------------------------------------

/// Every trial of one scenario against one proxy/target pair.
///
/// Only the executor that owns a run mutates it; once its status is
/// terminal the run is read-only, so every field is exposed through
/// accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrialRun {
    run_id: Uuid,
    test_name: String,
    proxy_name: String,
    target_url: String,
    status: RunStatus,
    /// Number of trials requested.
    total_count: usize,
    success_count: usize,
    failed_count: usize,
    /// Indexed by trial number. `None` marks a trial that was never
    /// dispatched or never returned.
    trials: Vec<Option<PhaseTimings>>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl TrialRun {
    /// A fresh run with `total_count` empty slots.
    pub(crate) fn new(
        test_name: impl Into<String>,
        proxy_name: impl Into<String>,
        target_url: impl Into<String>,
        total_count: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            test_name: test_name.into(),
            proxy_name: proxy_name.into(),
            target_url: target_url.into(),
            status: RunStatus::Idle,
            total_count,
            success_count: 0,
            failed_count: 0,
            trials: vec![None; total_count],
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Utc::now();
    }

    /// Store the outcome of trial `index` in its reserved slot.
    ///
    /// Returns `false`, leaving the run untouched, for an out-of-range index
    /// or a slot that is already filled.
    pub(crate) fn record(&mut self, index: usize, timings: PhaseTimings) -> bool {
        let Some(slot) = self.trials.get_mut(index) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        if timings.success {
            self.success_count += 1;
        } else {
            self.failed_count += 1;
        }
        *slot = Some(timings);
        true
    }

    pub(crate) fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Utc::now();
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn proxy_name(&self) -> &str {
        &self.proxy_name
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn success_count(&self) -> usize {
        self.success_count
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    /// Trials that returned, successful or not.
    pub fn completed_count(&self) -> usize {
        self.success_count + self.failed_count
    }

    pub fn trials(&self) -> &[Option<PhaseTimings>] {
        &self.trials
    }

    /// Completed trials with their trial numbers, in index order.
    pub fn completed_trials(&self) -> impl Iterator<Item = (usize, &PhaseTimings)> {
        self.trials
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (i, t)))
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Wall-clock duration of the run.
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Successful trials as a percentage of the requested count.
    pub fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_count as f64 * 100.0
    }

    /// Completed trials per second of wall-clock time.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.completed_count() as f64 / secs
    }
}

// ---------------------------------------------------------------------------
// Test fixtures shared by the results submodules
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn new_run_has_empty_slots_and_idle_status() {
        let run = TrialRun::new("single", "edge", "http://example.com/", 4);
        assert_eq!(run.status(), RunStatus::Idle);
        assert_eq!(run.trials().len(), 4);
        assert!(run.trials().iter().all(Option::is_none));
        assert_eq!(run.completed_count(), 0);
    }

    #[test]
    fn record_counts_success_and_failure() {
        let run = run_of("edge", vec![ok(10), failed(5), ok(20)]);
        assert_eq!(run.success_count(), 2);
        assert_eq!(run.failed_count(), 1);
        assert_eq!(run.completed_count(), 3);
        assert_eq!(run.total_count(), 3);
        assert_eq!(run.status(), RunStatus::Completed);
    }

    #[test]
    fn record_rejects_duplicates_and_out_of_range() {
        let mut run = TrialRun::new("single", "edge", "http://example.com/", 2);
        assert!(run.record(1, ok(10)));
        assert!(!run.record(1, failed(10)));
        assert!(!run.record(2, ok(10)));
        assert_eq!(run.success_count(), 1);
        assert_eq!(run.failed_count(), 0);
        assert!(run.trials()[0].is_none());
    }

    #[test]
    fn completed_trials_keep_their_index() {
        let mut run = TrialRun::new("single", "edge", "http://example.com/", 5);
        run.record(3, ok(30));
        run.record(1, ok(10));
        let indices: Vec<usize> = run.completed_trials().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[test]
    fn success_rate_uses_requested_count() {
        let mut run = TrialRun::new("single", "edge", "http://example.com/", 4);
        run.record(0, ok(10));
        run.record(1, failed(10));
        assert!((run.success_rate() - 25.0).abs() < 1e-9);

        let empty = TrialRun::new("single", "edge", "http://example.com/", 0);
        assert_eq!(empty.success_rate(), 0.0);
        assert_eq!(empty.throughput(), 0.0);
    }

    #[test]
    fn finished_run_has_ordered_timestamps() {
        let run = run_of("edge", vec![ok(1)]);
        assert!(run.finished_at() >= run.started_at());
        assert!(!run.is_cancelled());
    }

    #[test]
    fn run_serializes_with_snake_case_fields() {
        let run = run_of("edge", vec![ok(12), failed(3)]);
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["proxy_name"], "edge");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["success_count"], 1);
        assert_eq!(json["trials"].as_array().unwrap().len(), 2);

        let back: TrialRun = serde_json::from_value(json).unwrap();
        assert_eq!(back.run_id(), run.run_id());
        assert_eq!(back.trials(), run.trials());
    }
}
