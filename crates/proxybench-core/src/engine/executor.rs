use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::engine::aggregator::{RunAggregator, TrialOutcome};
use crate::engine::{notify, RunEvent, RunStatus};
use crate::http::client::RequestExecutor;
use crate::results::TrialRun;

const OUTCOME_CHANNEL_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// How trials of a run are admitted.
///
/// Both strategies are a bounded worker pool; they differ in pool width and
/// pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Low-interference sampling through a small pool. Each worker sleeps
    /// `interval` after its trial before giving its slot back. `workers: 1`
    /// is strict one-at-a-time sampling.
    Sequential { workers: usize, interval: Duration },
    /// `concurrency` trials in flight at once, to emulate a load level.
    Concurrent { concurrency: usize },
}

impl Strategy {
    pub const DEFAULT_SEQUENTIAL_WORKERS: usize = 10;

    pub fn sequential(interval: Duration) -> Self {
        Strategy::Sequential {
            workers: Self::DEFAULT_SEQUENTIAL_WORKERS,
            interval,
        }
    }

    pub fn concurrent(concurrency: usize) -> Self {
        Strategy::Concurrent { concurrency }
    }

    /// Admission gate width, never below one.
    pub fn width(&self) -> usize {
        match *self {
            Strategy::Sequential { workers, .. } => workers.max(1),
            Strategy::Concurrent { concurrency } => concurrency.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        match *self {
            Strategy::Sequential { interval, .. } => interval,
            Strategy::Concurrent { .. } => Duration::ZERO,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Strategy::Sequential { .. } => "sequential",
            Strategy::Concurrent { .. } => "concurrent",
        }
    }
}

// ---------------------------------------------------------------------------
// TrialExecutor
// ---------------------------------------------------------------------------

/// Drives `count` invocations of a [`RequestExecutor`] through a bounded
/// pool and collects them into a [`TrialRun`].
pub struct TrialExecutor<C> {
    client: Arc<C>,
    strategy: Strategy,
    events: Option<mpsc::Sender<RunEvent>>,
    cancel: CancellationToken,
}

impl<C: RequestExecutor> TrialExecutor<C> {
    pub fn new(client: Arc<C>, strategy: Strategy) -> Self {
        Self {
            client,
            strategy,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Send status changes and progress observations to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Stop dispatching once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `count` trials against `target_url`.
    ///
    /// Trial failures are counted, never propagated. The returned run is
    /// `Completed` when every trial was dispatched, or `Cancelled` when the
    /// token fired first; in that case in-flight trials are still awaited
    /// and kept in their slots.
    pub async fn run(&self, test_name: &str, target_url: &str, count: usize) -> TrialRun {
        let mut run = TrialRun::new(test_name, self.client.name(), target_url, count);
        tracing::info!(
            "Starting {} run '{test_name}' via {}: {count} trials against {target_url}, width {}",
            self.strategy.label(),
            run.proxy_name(),
            self.strategy.width()
        );

        run.start();
        self.emit(RunEvent::StatusChange {
            status: RunStatus::Running,
        });

        let (tx, rx) = mpsc::channel::<TrialOutcome>(OUTCOME_CHANNEL_CAPACITY);
        let aggregator = RunAggregator::new(run, self.events.clone());
        let (dispatched, mut run) =
            tokio::join!(self.dispatch(target_url, count, tx), aggregator.drain(rx));

        let status = if dispatched < count {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        run.finish(status);

        tracing::info!(
            "Run '{test_name}' via {} {status}: {}/{} succeeded ({:.1}%), {:.2} trials/s over {:?}",
            run.proxy_name(),
            run.success_count(),
            run.total_count(),
            run.success_rate(),
            run.throughput(),
            run.duration()
        );
        if status == RunStatus::Cancelled {
            tracing::warn!("Run '{test_name}' cancelled after dispatching {dispatched} of {count} trials");
        }

        self.emit(RunEvent::StatusChange { status });
        run
    }

    /// Admit trials through the gate until `count` are dispatched or the
    /// token fires, then wait for the in-flight ones. Returns how many were
    /// dispatched.
    async fn dispatch(
        &self,
        target_url: &str,
        count: usize,
        tx: mpsc::Sender<TrialOutcome>,
    ) -> usize {
        let gate = Arc::new(Semaphore::new(self.strategy.width()));
        let interval = self.strategy.interval();
        let target: Arc<str> = Arc::from(target_url);
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut dispatched = 0;

        while dispatched < count {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&gate).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let index = dispatched;
            let client = Arc::clone(&self.client);
            let target = Arc::clone(&target);
            let tx = tx.clone();
            let cancel = self.cancel.clone();

            workers.spawn(async move {
                let result = client.execute(&target).await;
                let _ = tx.send(TrialOutcome { index, result }).await;
                drop(tx);

                // The slot stays taken while pacing.
                if !interval.is_zero() {
                    tokio::select! {
                        _ = sleep(interval) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                drop(permit);
            });
            dispatched += 1;
        }

        // Close the channel once the workers drop their clones.
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!("Trial worker panicked; its slot stays empty: {e}");
                }
            }
        }

        dispatched
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            notify(tx, event);
        }
    }
}
