//! Progress poller: follows one batch until its generation job finishes.
//!
//! A [`ProgressPoller`] runs as a single tokio task. Each cycle fetches a snapshot,
//! publishes the resulting [`ProgressView`], asks [`next_poll`] for the delay based on that
//! *fresh* snapshot, and sleeps. Fetch and sleep are strictly sequential, so snapshots are
//! applied in the order they were fetched and at most one request is in flight.
//!
//! Polling ends when:
//! - the batch completes (the completion callback fires, once),
//! - the batch fails,
//! - the endpoint reports the batch does not exist,
//! - the [`PollerHandle`] is cancelled or dropped. Teardown drops any in-flight request and
//!   no view update or callback happens afterwards.
//!
//! There is no wall-clock timeout. Transient errors are logged and retried on the next tick.
//!
//! ```ignore
//! let source = HttpProgressClient::from_config(&config);
//! let handle = ProgressPoller::new(batch_id, source, config.cadence.clone())
//!     .on_complete(|| tracing::info!("refreshing batch detail"))
//!     .spawn();
//!
//! let mut views = handle.subscribe();
//! while views.changed().await.is_ok() {
//!     println!("{}", views.borrow().render());
//! }
//! ```

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::cadence::{PollDecision, next_poll};
use crate::client::ProgressSource;
use crate::config::CadenceConfig;
use crate::errors::{Error, Result};
use crate::types::{BatchId, BatchProgressSnapshot, ProcessingStatus};
use crate::view::ProgressView;

/// Zero-argument side effect run when a batch completes.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// How a poller stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The batch completed; carries the final snapshot
    Completed(BatchProgressSnapshot),
    /// The batch failed; carries the final snapshot
    Failed(BatchProgressSnapshot),
    /// The endpoint does not know the batch
    NotFound,
    /// The handle was cancelled or dropped before a terminal state
    Cancelled,
}

impl PollOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PollOutcome::Completed(_))
    }
}

/// Polls the progress of one batch. Configure, then [`spawn`](ProgressPoller::spawn).
pub struct ProgressPoller<S> {
    batch_id: BatchId,
    source: S,
    cadence: CadenceConfig,
    on_complete: Option<CompletionCallback>,
}

impl<S> ProgressPoller<S>
where
    S: ProgressSource + 'static,
{
    pub fn new(batch_id: BatchId, source: S, cadence: CadenceConfig) -> Self {
        Self {
            batch_id,
            source,
            cadence,
            on_complete: None,
        }
    }

    /// Run `callback` once when a freshly fetched snapshot reports `completed`.
    ///
    /// Never called for failed or unknown batches, nor after the handle is torn down.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Start polling on a new task.
    ///
    /// The first fetch happens immediately. Dropping the returned handle stops the poller.
    pub fn spawn(self) -> PollerHandle {
        let (views, view) = watch::channel(ProgressView::Loading);
        let shutdown = CancellationToken::new();
        let drop_guard = shutdown.clone().drop_guard();
        let batch_id = self.batch_id.clone();

        let task = tokio::spawn(self.run(views, shutdown.clone()));

        PollerHandle {
            batch_id,
            view,
            task,
            shutdown,
            _drop_guard: drop_guard,
        }
    }

    /// The poll loop. Resolves once polling is over; never errors.
    #[tracing::instrument(skip_all, fields(batch_id = %self.batch_id))]
    pub async fn run(mut self, views: watch::Sender<ProgressView>, shutdown: CancellationToken) -> PollOutcome {
        info!("Starting batch progress poller");

        // Last non-terminal snapshot; a terminal one ends the loop instead of being stored
        let mut latest: Option<BatchProgressSnapshot> = None;
        let mut polls: u64 = 0;

        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(polls, "Poller cancelled, abandoning in-flight fetch");
                    return PollOutcome::Cancelled;
                }
                result = self.source.fetch_progress(&self.batch_id) => result,
            };
            polls += 1;

            if shutdown.is_cancelled() {
                info!(polls, "Poller cancelled, discarding fetched progress");
                return PollOutcome::Cancelled;
            }

            let delay = match fetched {
                Ok(snapshot) => {
                    publish(&views, ProgressView::from_snapshot(&snapshot));

                    match next_poll(Some(&snapshot), &self.cadence) {
                        PollDecision::After(delay) => {
                            latest = Some(snapshot);
                            delay
                        }
                        PollDecision::Stop => return self.finish(snapshot, polls),
                    }
                }
                Err(e @ Error::BatchNotFound { .. }) => {
                    warn!(polls, error = %e, "Batch not found, stopping poller");
                    publish(&views, ProgressView::not_found(self.batch_id.clone()));
                    return PollOutcome::NotFound;
                }
                Err(e) => {
                    warn!(polls, error = %e, "Failed to fetch batch progress, retrying on next tick");
                    next_poll(latest.as_ref(), &self.cadence)
                        .delay()
                        .unwrap_or(self.cadence.queued_interval)
                }
            };

            debug!(polls, delay_ms = delay.as_millis() as u64, "Scheduling next progress poll");

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(polls, "Poller cancelled");
                    return PollOutcome::Cancelled;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn finish(&mut self, snapshot: BatchProgressSnapshot, polls: u64) -> PollOutcome {
        match snapshot.processing_status {
            ProcessingStatus::Completed => {
                info!(polls, total_units = snapshot.total_units, "Batch processing completed");
                if let Some(callback) = self.on_complete.take() {
                    callback();
                }
                PollOutcome::Completed(snapshot)
            }
            _ => {
                warn!(
                    polls,
                    error = snapshot.processing_error.as_deref().unwrap_or("unknown"),
                    "Batch processing failed"
                );
                PollOutcome::Failed(snapshot)
            }
        }
    }
}

fn publish(views: &watch::Sender<ProgressView>, view: ProgressView) {
    views.send_if_modified(|current| {
        if *current == view {
            return false;
        }
        debug!(from = current.state_name(), to = view.state_name(), "Progress view changed");
        *current = view;
        true
    });
}

/// Owner of a running poller, the equivalent of a mounted progress view.
///
/// Dropping the handle cancels the poller.
pub struct PollerHandle {
    batch_id: BatchId,
    view: watch::Receiver<ProgressView>,
    task: JoinHandle<PollOutcome>,
    shutdown: CancellationToken,
    _drop_guard: DropGuard,
}

impl PollerHandle {
    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    /// Current view.
    pub fn view(&self) -> ProgressView {
        self.view.borrow().clone()
    }

    /// A receiver notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<ProgressView> {
        self.view.clone()
    }

    /// Stop polling. Idempotent.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the poller to stop.
    ///
    /// # Errors
    /// Only if the poller task panicked (for instance inside the completion callback).
    pub async fn finished(mut self) -> Result<PollOutcome> {
        let outcome = (&mut self.task)
            .await
            .map_err(|e| anyhow::anyhow!("Poller task for batch {} failed: {e}", self.batch_id))?;
        Ok(outcome)
    }
}
