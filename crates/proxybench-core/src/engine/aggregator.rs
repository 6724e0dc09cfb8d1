use tokio::sync::mpsc;

use crate::engine::{notify, RunEvent};
use crate::error::TrialFailure;
use crate::http::timing::PhaseTimings;
use crate::results::TrialRun;

/// Failures logged in full at `warn` before the rest drop to `debug`.
const DETAILED_FAILURE_LOGS: usize = 5;

/// Completions between two progress observations for a run of `count`
/// trials: one twentieth of the run, but never fewer than ten.
pub fn progress_interval(count: usize) -> usize {
    (count / 20).max(10)
}

/// What a worker sends back after one trial.
#[derive(Debug)]
pub(crate) struct TrialOutcome {
    pub index: usize,
    pub result: Result<PhaseTimings, TrialFailure>,
}

// ---------------------------------------------------------------------------
// RunAggregator
// ---------------------------------------------------------------------------

/// Sole owner of a [`TrialRun`] while it executes.
///
/// Workers never touch the run; they send [`TrialOutcome`]s over a channel
/// and this single task writes slots, counts results and reports progress,
/// so none of that state needs a lock.
pub(crate) struct RunAggregator {
    run: TrialRun,
    progress_every: usize,
    failures_seen: usize,
    events: Option<mpsc::Sender<RunEvent>>,
}

impl RunAggregator {
    pub(crate) fn new(run: TrialRun, events: Option<mpsc::Sender<RunEvent>>) -> Self {
        Self {
            progress_every: progress_interval(run.total_count()),
            run,
            failures_seen: 0,
            events,
        }
    }

    /// Record outcomes until every sender is dropped, then hand the run back.
    pub(crate) async fn drain(mut self, mut rx: mpsc::Receiver<TrialOutcome>) -> TrialRun {
        while let Some(outcome) = rx.recv().await {
            self.record(outcome);
        }
        self.run
    }

    pub(crate) fn record(&mut self, outcome: TrialOutcome) {
        let TrialOutcome { index, result } = outcome;
        let timings = match result {
            Ok(timings) => timings,
            Err(failure) => {
                self.log_failure(index, &failure);
                failure.timings
            }
        };

        if !self.run.record(index, timings) {
            tracing::warn!("Dropping result for trial {index}: slot already filled or out of range");
            return;
        }

        let completed = self.run.completed_count();
        if completed % self.progress_every == 0 || completed == self.run.total_count() {
            self.report_progress();
        }
    }

    fn log_failure(&mut self, index: usize, failure: &TrialFailure) {
        self.failures_seen += 1;
        let proxy = self.run.proxy_name();
        if self.failures_seen <= DETAILED_FAILURE_LOGS {
            tracing::warn!(
                proxy,
                trial = index,
                status_code = failure.timings.status_code,
                elapsed_ms = u64::try_from(failure.timings.total.as_millis()).unwrap_or(u64::MAX),
                "Trial failed: {}",
                failure.error
            );
        } else {
            tracing::debug!(proxy, trial = index, "Trial failed: {}", failure.error);
        }
    }

    fn report_progress(&self) {
        let completed = self.run.completed_count();
        let succeeded = self.run.success_count();
        let failed = self.run.failed_count();
        let total = self.run.total_count();

        tracing::info!(
            proxy = self.run.proxy_name(),
            "Progress: {completed}/{total} ({succeeded} ok, {failed} failed)"
        );

        if let Some(tx) = &self.events {
            notify(
                tx,
                RunEvent::Progress {
                    completed,
                    succeeded,
                    failed,
                    total,
                },
            );
        }
    }
}
