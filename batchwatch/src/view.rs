//! What a progress tracker shows for a batch.
//!
//! [`ProgressView`] is derived purely from the latest snapshot's status (or from the
//! absence of one). [`ProgressView::render`] turns it into the small set of UI elements a
//! host draws: a spinner, a banner, or a progress bar. Each state renders exactly one of them.

use serde::Serialize;

use crate::types::{BatchId, BatchProgressSnapshot, ProcessingStatus, TimeRemaining};

/// Text shown next to the spinner before the first snapshot arrives.
pub const LOADING_MESSAGE: &str = "Loading batch progress...";

/// Message shown when a failed snapshot carries no reason.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Status-driven view of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProgressView {
    /// Nothing fetched yet
    Loading,
    /// Job is queued
    Pending,
    /// Job is generating units
    Processing {
        progress: f64,
        processed_units: u64,
        total_units: u64,
        eta: String,
    },
    Completed {
        total_units: u64,
    },
    Failed {
        message: String,
    },
    /// The progress endpoint does not know the batch
    NotFound {
        batch_id: BatchId,
    },
}

impl ProgressView {
    pub fn from_snapshot(snapshot: &BatchProgressSnapshot) -> Self {
        match snapshot.processing_status {
            ProcessingStatus::Pending => ProgressView::Pending,
            ProcessingStatus::Processing => ProgressView::Processing {
                progress: snapshot.progress.clamp(0.0, 100.0),
                processed_units: snapshot.processed_units,
                total_units: snapshot.total_units,
                eta: format_eta(snapshot.estimated_time_remaining.as_ref()),
            },
            ProcessingStatus::Completed => ProgressView::Completed {
                total_units: snapshot.total_units,
            },
            ProcessingStatus::Failed => ProgressView::Failed {
                message: snapshot
                    .processing_error
                    .as_deref()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or(UNKNOWN_ERROR)
                    .to_string(),
            },
        }
    }

    pub fn not_found(batch_id: BatchId) -> Self {
        ProgressView::NotFound { batch_id }
    }

    /// Completed, failed and not-found views never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressView::Completed { .. } | ProgressView::Failed { .. } | ProgressView::NotFound { .. }
        )
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            ProgressView::Loading => "loading",
            ProgressView::Pending => "pending",
            ProgressView::Processing { .. } => "processing",
            ProgressView::Completed { .. } => "completed",
            ProgressView::Failed { .. } => "failed",
            ProgressView::NotFound { .. } => "not_found",
        }
    }

    pub fn render(&self) -> RenderedView {
        match self {
            ProgressView::Loading => RenderedView {
                spinner: true,
                ..Default::default()
            },
            ProgressView::Pending => RenderedView::banner(
                Tone::Info,
                "Batch queued",
                "This batch is waiting to be processed. Progress will appear here once generation starts.",
            ),
            ProgressView::Processing {
                progress,
                processed_units,
                total_units,
                eta,
            } => RenderedView {
                progress_bar: Some(ProgressBar {
                    percent: *progress,
                    units: format!(
                        "{} / {} units",
                        group_thousands(*processed_units),
                        group_thousands(*total_units)
                    ),
                    eta: eta.clone(),
                }),
                ..Default::default()
            },
            ProgressView::Completed { total_units } => RenderedView::banner(
                Tone::Success,
                "Batch processing complete",
                &format!("All {} units have been generated.", group_thousands(*total_units)),
            ),
            ProgressView::Failed { message } => RenderedView::banner(
                Tone::Destructive,
                "Batch processing failed",
                &format!(
                    "{}. Please contact support or recreate the batch.",
                    message.trim_end_matches('.')
                ),
            ),
            ProgressView::NotFound { batch_id } => RenderedView::banner(
                Tone::Destructive,
                "Batch not found",
                &format!("No batch with ID {batch_id} exists or it is no longer accessible."),
            ),
        }
    }
}

/// The elements a host draws for a view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderedView {
    pub spinner: bool,
    pub banner: Option<Banner>,
    pub progress_bar: Option<ProgressBar>,
}

impl RenderedView {
    fn banner(tone: Tone, title: &str, message: &str) -> Self {
        Self {
            banner: Some(Banner {
                tone,
                title: title.to_string(),
                message: message.to_string(),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Info,
    Success,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Banner {
    pub tone: Tone,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressBar {
    pub percent: f64,
    /// e.g. "450 / 1,000 units"
    pub units: String,
    /// Output of [`format_eta`]
    pub eta: String,
}

impl Tone {
    pub fn marker(self) -> &'static str {
        match self {
            Tone::Info => "ℹ",
            Tone::Success => "✔",
            Tone::Destructive => "✖",
        }
    }
}

impl std::fmt::Display for Banner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.tone.marker(), self.title, self.message)
    }
}

impl ProgressBar {
    /// Units and ETA, as shown next to the bar.
    pub fn detail(&self) -> String {
        format!("{} | {}", self.units, self.eta)
    }
}

/// One-line plain-text form, used when output is not an interactive terminal.
impl std::fmt::Display for RenderedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.spinner {
            return f.write_str(LOADING_MESSAGE);
        }
        if let Some(banner) = &self.banner {
            return write!(f, "{banner}");
        }
        if let Some(bar) = &self.progress_bar {
            return write!(f, "{:>3.0}% | {}", bar.percent, bar.detail());
        }
        Ok(())
    }
}

/// Human-readable time remaining.
///
/// Absent or non-positive estimates render as "Calculating...". Otherwise the estimate is
/// floored to whole seconds and rendered as "~{m}m {s}s remaining" (or "~{s}s remaining"
/// under a minute).
pub fn format_eta(eta: Option<&TimeRemaining>) -> String {
    let Some(total) = eta.map(|e| e.total_seconds).filter(|s| *s > 0.0) else {
        return "Calculating...".to_string();
    };

    let seconds = total.floor() as u64;
    let minutes = seconds / 60;
    let remainder = seconds % 60;

    if minutes > 0 {
        format!("~{minutes}m {remainder}s remaining")
    } else {
        format!("~{remainder}s remaining")
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
