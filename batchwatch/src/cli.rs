//! Command implementations for the `batchwatch` binary.
//!
//! `status` writes one rendered view to a caller-supplied writer. `watch` hands every view
//! change to a [`ViewSink`]: plain lines or JSON through [`LineSink`], or live bars through
//! [`crate::terminal::LiveProgress`]. Logging goes to stderr through `tracing`.

use std::collections::HashSet;
use std::future::Future;
use std::io::Write;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cadence::next_poll;
use crate::client::ProgressSource;
use crate::config::CadenceConfig;
use crate::errors::{Error, Result};
use crate::poller::{PollOutcome, ProgressPoller};
use crate::types::BatchId;
use crate::view::ProgressView;

/// How views are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Receives every view change of a `watch` run.
pub trait ViewSink {
    /// Called once with the deduplicated batch ids before any view is shown.
    fn watching(&mut self, _batch_ids: &[BatchId]) -> Result<()> {
        Ok(())
    }

    fn show(&mut self, batch_id: &BatchId, view: &ProgressView) -> Result<()>;

    /// Called once after every poller has stopped.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes each view as one line of text or JSON.
pub struct LineSink<W> {
    out: W,
    format: OutputFormat,
    prefixed: bool,
}

impl<W: Write> LineSink<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            prefixed: false,
        }
    }
}

impl<W: Write> ViewSink for LineSink<W> {
    fn watching(&mut self, batch_ids: &[BatchId]) -> Result<()> {
        self.prefixed = batch_ids.len() > 1;
        Ok(())
    }

    fn show(&mut self, batch_id: &BatchId, view: &ProgressView) -> Result<()> {
        write_view(&mut self.out, batch_id, view, self.format, self.prefixed)
    }
}

/// Final state of every watched batch, in completion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WatchSummary {
    pub outcomes: Vec<(BatchId, PollOutcome)>,
}

impl WatchSummary {
    /// True when every watched batch completed.
    pub fn all_completed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|(_, outcome)| outcome.is_completed())
    }
}

/// Fetch one snapshot and print its view and the poll decision it implies.
///
/// Returns whether the batch exists. Transient fetch errors are returned as errors.
pub async fn run_status<S, W>(
    source: &S,
    cadence: &CadenceConfig,
    batch_id: &BatchId,
    format: OutputFormat,
    out: &mut W,
) -> Result<bool>
where
    S: ProgressSource,
    W: Write,
{
    match source.fetch_progress(batch_id).await {
        Ok(snapshot) => {
            let view = ProgressView::from_snapshot(&snapshot);
            let decision = next_poll(Some(&snapshot), cadence);
            match format {
                OutputFormat::Text => {
                    write_view(out, batch_id, &view, format, false)?;
                    writeln!(out, "{decision}").map_err(io_error)?;
                }
                OutputFormat::Json => {
                    let line = serde_json::json!({
                        "batch_id": batch_id,
                        "snapshot": snapshot,
                        "view": view,
                        "next_poll_ms": decision.delay().map(|d| d.as_millis() as u64),
                    });
                    writeln!(out, "{line}").map_err(io_error)?;
                }
            }
            Ok(true)
        }
        Err(Error::BatchNotFound { batch_id }) => {
            let view = ProgressView::not_found(batch_id.clone());
            write_view(out, &batch_id, &view, format, false)?;
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Follow every batch in `batch_ids` until each reaches a terminal state or `shutdown`
/// resolves. Each batch gets its own poller; duplicates are watched once.
pub async fn run_watch<S, V, F>(
    source: S,
    cadence: &CadenceConfig,
    batch_ids: Vec<BatchId>,
    sink: &mut V,
    shutdown: F,
) -> Result<WatchSummary>
where
    S: ProgressSource + Clone + 'static,
    V: ViewSink + ?Sized,
    F: Future<Output = ()>,
{
    let mut seen = HashSet::new();
    let batch_ids: Vec<BatchId> = batch_ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
    sink.watching(&batch_ids)?;

    let stop = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<(BatchId, ProgressView)>();
    let mut watchers: JoinSet<(BatchId, Result<PollOutcome>)> = JoinSet::new();

    for batch_id in batch_ids {
        let completed_id = batch_id.clone();
        let handle = ProgressPoller::new(batch_id.clone(), source.clone(), cadence.clone())
            .on_complete(move || info!(batch_id = %completed_id, "Batch ready, units can be exported"))
            .spawn();

        // Read the initial view before the poller task gets a chance to run
        let mut views = handle.subscribe();
        let _ = tx.send((batch_id.clone(), views.borrow_and_update().clone()));

        let tx = tx.clone();
        let stop = stop.clone();
        watchers.spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        handle.cancel();
                        break;
                    }
                    changed = views.changed() => {
                        // Err: the poller stopped without a further view change
                        if changed.is_err() {
                            break;
                        }
                        let view = views.borrow_and_update().clone();
                        let terminal = view.is_terminal();
                        let _ = tx.send((batch_id.clone(), view));
                        if terminal {
                            break;
                        }
                    }
                }
            }

            (batch_id, handle.finished().await)
        });
    }
    drop(tx);

    tokio::pin!(shutdown);
    let mut stopping = false;
    loop {
        tokio::select! {
            _ = &mut shutdown, if !stopping => {
                info!("Stopping all batch pollers");
                stop.cancel();
                stopping = true;
            }
            message = rx.recv() => match message {
                Some((batch_id, view)) => sink.show(&batch_id, &view)?,
                None => break,
            }
        }
    }

    let mut summary = WatchSummary::default();
    while let Some(joined) = watchers.join_next().await {
        match joined {
            Ok((batch_id, Ok(outcome))) => summary.outcomes.push((batch_id, outcome)),
            Ok((batch_id, Err(e))) => {
                error!(batch_id = %batch_id, error = %e, "Poller failed");
                summary.outcomes.push((batch_id, PollOutcome::Cancelled));
            }
            Err(join_error) => {
                error!(error = %join_error, "Watcher task panicked");
            }
        }
    }
    sink.finish()?;

    Ok(summary)
}

fn write_view<W: Write>(
    out: &mut W,
    batch_id: &BatchId,
    view: &ProgressView,
    format: OutputFormat,
    prefixed: bool,
) -> Result<()> {
    match format {
        OutputFormat::Text if prefixed => writeln!(out, "[{batch_id}] {}", view.render()),
        OutputFormat::Text => writeln!(out, "{}", view.render()),
        OutputFormat::Json => {
            let line = serde_json::json!({ "batch_id": batch_id, "view": view });
            writeln!(out, "{line}")
        }
    }
    .map_err(io_error)?;
    out.flush().map_err(io_error)
}

fn io_error(e: std::io::Error) -> Error {
    Error::Other(anyhow::Error::new(e).context("Failed to write output"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockProgressSource;
    use crate::terminal::LiveProgress;
    use crate::types::BatchProgressSnapshot;
    use crate::view::LOADING_MESSAGE;
    use indicatif::ProgressDrawTarget;
    use std::time::Duration;

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_status_prints_view_and_decision() {
        let source = MockProgressSource::new();
        source.push_snapshot(BatchProgressSnapshot::processing(45.0, 450, 1000).with_eta(125.0));

        let mut out = Vec::new();
        let exists = run_status(
            &source,
            &CadenceConfig::default(),
            &BatchId::from("b-1"),
            OutputFormat::Text,
            &mut out,
        )
        .await
        .unwrap();

        assert!(exists);
        let output = text(out);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("450 / 1,000 units | ~2m 5s remaining"));
        assert_eq!(lines[1], "next poll in 2s");
    }

    #[tokio::test]
    async fn test_status_json() {
        let source = MockProgressSource::new();
        source.push_snapshot(BatchProgressSnapshot::completed(10));

        let mut out = Vec::new();
        run_status(
            &source,
            &CadenceConfig::default(),
            &BatchId::from("b-1"),
            OutputFormat::Json,
            &mut out,
        )
        .await
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(text(out).trim()).unwrap();
        assert_eq!(value["batch_id"], "b-1");
        assert_eq!(value["view"]["state"], "completed");
        assert_eq!(value["snapshot"]["processingStatus"], "completed");
        assert!(value["next_poll_ms"].is_null());
    }

    #[tokio::test]
    async fn test_status_not_found() {
        let source = MockProgressSource::new();
        source.push_not_found();

        let mut out = Vec::new();
        let exists = run_status(
            &source,
            &CadenceConfig::default(),
            &BatchId::from("ghost"),
            OutputFormat::Text,
            &mut out,
        )
        .await
        .unwrap();

        assert!(!exists);
        assert!(text(out).contains("Batch not found"));
    }

    #[tokio::test]
    async fn test_status_transient_error_is_returned() {
        let source = MockProgressSource::new();
        source.push_transient_error("upstream down");

        let mut out = Vec::new();
        let result = run_status(
            &source,
            &CadenceConfig::default(),
            &BatchId::from("b-1"),
            OutputFormat::Text,
            &mut out,
        )
        .await;

        assert!(matches!(result, Err(Error::UnexpectedStatus { status: 503, .. })));
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_prints_each_view_change() {
        let source = MockProgressSource::new();
        source.push_snapshot(BatchProgressSnapshot::pending(100));
        source.push_snapshot(BatchProgressSnapshot::processing(50.0, 50, 100));
        source.push_snapshot(BatchProgressSnapshot::completed(100));

        let mut out = Vec::new();
        let summary = run_watch(
            source.clone(),
            &CadenceConfig::default(),
            vec![BatchId::from("b-1")],
            &mut LineSink::new(&mut out, OutputFormat::Text),
            std::future::pending(),
        )
        .await
        .unwrap();

        assert!(summary.all_completed());
        let output = text(out);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.first(), Some(&LOADING_MESSAGE));
        assert!(lines.last().unwrap().contains("Batch processing complete"));
        assert!(output.contains("Batch queued"));
        assert!(output.contains("50 / 100 units"));
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_multiple_batches_independently() {
        let source = MockProgressSource::new();
        source.push_snapshot(BatchProgressSnapshot::completed(10));

        let mut out = Vec::new();
        let summary = run_watch(
            source.clone(),
            &CadenceConfig::default(),
            vec![BatchId::from("a"), BatchId::from("b"), BatchId::from("a")],
            &mut LineSink::new(&mut out, OutputFormat::Text),
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(summary.outcomes.len(), 2);
        assert!(summary.all_completed());
        // duplicate id polled once
        assert_eq!(source.call_count(), 2);

        let output = text(out);
        assert!(output.lines().any(|l| l.starts_with("[a] ✔")));
        assert!(output.lines().any(|l| l.starts_with("[b] ✔")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_not_found_and_failed_are_not_completed() {
        let source = MockProgressSource::new();
        source.push_snapshot(BatchProgressSnapshot::failed(None));

        let mut out = Vec::new();
        let summary = run_watch(
            source,
            &CadenceConfig::default(),
            vec![BatchId::from("b-1")],
            &mut LineSink::new(&mut out, OutputFormat::Json),
            std::future::pending(),
        )
        .await
        .unwrap();

        assert!(!summary.all_completed());
        assert!(matches!(summary.outcomes[0].1, PollOutcome::Failed(_)));

        let output = text(out);
        let last: serde_json::Value = serde_json::from_str(output.lines().last().unwrap()).unwrap();
        assert_eq!(last["view"]["state"], "failed");
        assert_eq!(last["view"]["message"], "Unknown error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_stops_on_shutdown() {
        let source = MockProgressSource::new();
        source.push_snapshot(BatchProgressSnapshot::pending(10));

        let mut out = Vec::new();
        let summary = run_watch(
            source.clone(),
            &CadenceConfig::default(),
            vec![BatchId::from("b-1")],
            &mut LineSink::new(&mut out, OutputFormat::Text),
            tokio::time::sleep(Duration::from_secs(12)),
        )
        .await
        .unwrap();

        assert_eq!(summary.outcomes, vec![(BatchId::from("b-1"), PollOutcome::Cancelled)]);
        assert!(!summary.all_completed());
        // fetches at 0s, 5s and 10s
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_drives_live_bars() {
        let source = MockProgressSource::new();
        source.push_snapshot(BatchProgressSnapshot::processing(60.0, 600, 1000));
        source.push_snapshot(BatchProgressSnapshot::completed(1000));

        let mut live = LiveProgress::new(ProgressDrawTarget::hidden()).unwrap();
        let summary = run_watch(
            source.clone(),
            &CadenceConfig::default(),
            vec![BatchId::from("b-1")],
            &mut live,
            std::future::pending(),
        )
        .await
        .unwrap();

        assert!(summary.all_completed());
        let bar = live.bar(&BatchId::from("b-1")).unwrap();
        assert!(bar.is_finished());
        assert!(bar.message().starts_with("✔ Batch processing complete"));
        assert_eq!(source.call_count(), 2);
    }
}
