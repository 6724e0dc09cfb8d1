use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

pub mod aggregator;
pub mod executor;
pub mod suite;

pub use aggregator::progress_interval;
pub use executor::{Strategy, TrialExecutor};
pub use suite::{run_suite, ProxySelection, SuiteRequest};

/// Lifecycle of a single trial run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, nothing dispatched yet.
    #[default]
    Idle,
    /// Trials are being dispatched or are still in flight.
    Running,
    /// Every requested trial was dispatched and has returned.
    Completed,
    /// Cancellation was observed before every trial was dispatched. Trials
    /// already in flight were still collected.
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// An observation emitted while a run executes. Purely informational: a
/// slow or dropped receiver never changes what the run does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    StatusChange {
        status: RunStatus,
    },
    Progress {
        completed: usize,
        succeeded: usize,
        failed: usize,
        total: usize,
    },
}

/// Hand `event` to an observer without waiting. When the channel is full
/// the event is dropped; when the receiver is gone it is ignored.
pub(crate) fn notify(tx: &mpsc::Sender<RunEvent>, event: RunEvent) {
    match tx.try_send(event) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(event)) => {
            tracing::debug!("Event receiver is full; dropping {event:?}");
        }
    }
}
