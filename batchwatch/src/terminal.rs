//! Live terminal display for `watch`: one indicatif bar per batch inside a [`MultiProgress`].
//!
//! A bar starts as a spinner while the batch is loading or queued, switches to a percentage bar
//! with units and ETA while it is processing, and is finished with the banner once the batch
//! reaches a terminal state.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::cli::ViewSink;
use crate::errors::Result;
use crate::types::BatchId;
use crate::view::ProgressView;

const SPINNER_TEMPLATE: &str = "{prefix}{spinner:.blue} {wide_msg}";
const BAR_TEMPLATE: &str = "{prefix}[{bar:40.cyan/blue}] {pos:>3}% {wide_msg}";
const DONE_TEMPLATE: &str = "{prefix}{wide_msg}";
const TICK: Duration = Duration::from_millis(120);

/// Bars are measured in whole percent.
const BAR_LENGTH: u64 = 100;

pub struct LiveProgress {
    multi: MultiProgress,
    bars: HashMap<BatchId, ProgressBar>,
    spinner: ProgressStyle,
    bar: ProgressStyle,
    done: ProgressStyle,
}

impl LiveProgress {
    /// Draw to stdout when it is a terminal; otherwise keep the bars hidden.
    pub fn for_stdout() -> Result<Self> {
        let target = if std::io::stdout().is_terminal() {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self::new(target)
    }

    pub fn new(target: ProgressDrawTarget) -> Result<Self> {
        Ok(Self {
            multi: MultiProgress::with_draw_target(target),
            bars: HashMap::new(),
            spinner: style(SPINNER_TEMPLATE)?,
            bar: style(BAR_TEMPLATE)?.progress_chars("#>-"),
            done: style(DONE_TEMPLATE)?,
        })
    }

    /// The bar of a watched batch.
    pub fn bar(&self, batch_id: &BatchId) -> Option<&ProgressBar> {
        self.bars.get(batch_id)
    }

    fn apply(&self, bar: &ProgressBar, view: &ProgressView) {
        let rendered = view.render();

        if view.is_terminal() {
            bar.disable_steady_tick();
            bar.set_style(self.done.clone());
            let message = rendered.banner.as_ref().map(ToString::to_string).unwrap_or_default();
            bar.finish_with_message(message);
            return;
        }

        if let Some(progress) = &rendered.progress_bar {
            bar.disable_steady_tick();
            bar.set_style(self.bar.clone());
            bar.set_length(BAR_LENGTH);
            bar.set_position((progress.percent.floor() as u64).min(BAR_LENGTH));
            bar.set_message(progress.detail());
            return;
        }

        // Loading or queued: the spinner text or the banner
        bar.set_style(self.spinner.clone());
        bar.set_message(rendered.to_string());
        if !self.multi.is_hidden() {
            bar.enable_steady_tick(TICK);
        }
    }
}

impl ViewSink for LiveProgress {
    fn watching(&mut self, batch_ids: &[BatchId]) -> Result<()> {
        let prefixed = batch_ids.len() > 1;
        for batch_id in batch_ids {
            let bar = self.multi.add(ProgressBar::new_spinner());
            if prefixed {
                bar.set_prefix(format!("[{batch_id}] "));
            }
            self.bars.insert(batch_id.clone(), bar);
        }
        Ok(())
    }

    fn show(&mut self, batch_id: &BatchId, view: &ProgressView) -> Result<()> {
        if let Some(bar) = self.bars.get(batch_id) {
            self.apply(bar, view);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // Batches that never reached a terminal state were stopped by shutdown
        for bar in self.bars.values().filter(|bar| !bar.is_finished()) {
            bar.disable_steady_tick();
            bar.abandon();
        }
        Ok(())
    }
}

fn style(template: &str) -> Result<ProgressStyle> {
    ProgressStyle::with_template(template)
        .map_err(|e| anyhow::anyhow!("Invalid progress template {template:?}: {e}").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BatchProgressSnapshot;

    fn hidden() -> LiveProgress {
        LiveProgress::new(ProgressDrawTarget::hidden()).unwrap()
    }

    #[test]
    fn test_bar_follows_views_to_completion() {
        let id = BatchId::from("b-1");
        let mut live = hidden();
        live.watching(std::slice::from_ref(&id)).unwrap();

        live.show(&id, &ProgressView::Loading).unwrap();
        let bar = live.bar(&id).unwrap().clone();
        assert_eq!(bar.message(), "Loading batch progress...");
        assert_eq!(bar.prefix(), "");

        live.show(&id, &ProgressView::from_snapshot(&BatchProgressSnapshot::pending(10)))
            .unwrap();
        assert!(bar.message().starts_with("ℹ Batch queued"));
        assert!(!bar.is_finished());

        let processing = BatchProgressSnapshot::processing(45.7, 457, 1000).with_eta(125.0);
        live.show(&id, &ProgressView::from_snapshot(&processing)).unwrap();
        assert_eq!(bar.length(), Some(BAR_LENGTH));
        assert_eq!(bar.position(), 45);
        assert_eq!(bar.message(), "457 / 1,000 units | ~2m 5s remaining");

        live.show(&id, &ProgressView::from_snapshot(&BatchProgressSnapshot::completed(1000)))
            .unwrap();
        assert!(bar.is_finished());
        assert_eq!(
            bar.message(),
            "✔ Batch processing complete: All 1,000 units have been generated."
        );
    }

    #[test]
    fn test_failed_and_not_found_finish_with_banner() {
        let failed = BatchId::from("a");
        let missing = BatchId::from("b");
        let mut live = hidden();
        live.watching(&[failed.clone(), missing.clone()]).unwrap();

        live.show(&failed, &ProgressView::from_snapshot(&BatchProgressSnapshot::failed(None)))
            .unwrap();
        live.show(&missing, &ProgressView::not_found(missing.clone())).unwrap();

        let failed_bar = live.bar(&failed).unwrap();
        assert!(failed_bar.is_finished());
        assert_eq!(failed_bar.prefix(), "[a] ");
        assert!(failed_bar.message().starts_with("✖ Batch processing failed: Unknown error"));

        let missing_bar = live.bar(&missing).unwrap();
        assert!(missing_bar.is_finished());
        assert!(missing_bar.message().starts_with("✖ Batch not found"));
    }

    #[test]
    fn test_finish_abandons_unfinished_bars() {
        let id = BatchId::from("b-1");
        let mut live = hidden();
        live.watching(std::slice::from_ref(&id)).unwrap();
        live.show(&id, &ProgressView::Loading).unwrap();

        live.finish().unwrap();

        assert!(live.bar(&id).unwrap().is_finished());
    }
}
