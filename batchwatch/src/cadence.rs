//! Poll cadence: how long to wait before the next progress fetch.
//!
//! [`next_poll`] is a pure function of the snapshot that was *just* fetched. Callers pass
//! the fresh value explicitly; nothing here remembers earlier snapshots.

use std::time::Duration;

use crate::config::CadenceConfig;
use crate::types::{BatchProgressSnapshot, ProcessingStatus};

/// What the poller does after a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Fetch again after this delay
    After(Duration),
    /// The batch reached a terminal status; never fetch again
    Stop,
}

impl PollDecision {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            PollDecision::After(delay) => Some(*delay),
            PollDecision::Stop => None,
        }
    }
}

impl std::fmt::Display for PollDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollDecision::After(delay) => write!(f, "next poll in {}", humantime::format_duration(*delay)),
            PollDecision::Stop => f.write_str("polling stopped"),
        }
    }
}

/// Decide the delay until the next fetch. First matching rule wins:
///
/// | snapshot | decision |
/// |---|---|
/// | none yet, or `pending` | `queued_interval` |
/// | `completed` / `failed` | stop |
/// | `progress < warmup_below` | `warmup_interval` |
/// | `progress >= finishing_from` | `finishing_interval` |
/// | otherwise | `steady_interval` |
pub fn next_poll(snapshot: Option<&BatchProgressSnapshot>, cadence: &CadenceConfig) -> PollDecision {
    let Some(snapshot) = snapshot else {
        return PollDecision::After(cadence.queued_interval);
    };

    match snapshot.processing_status {
        ProcessingStatus::Pending => PollDecision::After(cadence.queued_interval),
        ProcessingStatus::Completed | ProcessingStatus::Failed => PollDecision::Stop,
        ProcessingStatus::Processing if snapshot.progress < cadence.warmup_below => {
            PollDecision::After(cadence.warmup_interval)
        }
        ProcessingStatus::Processing if snapshot.progress >= cadence.finishing_from => {
            PollDecision::After(cadence.finishing_interval)
        }
        ProcessingStatus::Processing => PollDecision::After(cadence.steady_interval),
    }
}
