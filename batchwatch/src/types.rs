//! Wire types for the batch progress endpoint.
//!
//! A [`BatchProgressSnapshot`] is the point-in-time payload returned by
//! `GET /batches/{id}/progress`. Snapshots are read-only on the client: every poll
//! produces a fresh value and nothing here mutates one after it is decoded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Identifier of a batch (a production run of QR-coded units).
///
/// Opaque to the client; the progress endpoint is the source of truth for existence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BatchId {
    fn from(id: String) -> Self {
        BatchId(id)
    }
}

impl From<&str> for BatchId {
    fn from(id: &str) -> Self {
        BatchId(id.to_string())
    }
}

impl std::str::FromStr for BatchId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("batch id must not be empty".to_string());
        }
        Ok(BatchId(trimmed.to_string()))
    }
}

impl std::ops::Deref for BatchId {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of the server-side generation job.
///
/// Moves forward only: `pending -> processing -> {completed | failed}`. A job may also
/// fail straight out of `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// Whether no further transition happens without external intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Server estimate of the time left on a running job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRemaining {
    pub total_seconds: f64,
}

impl TimeRemaining {
    pub fn from_secs(total_seconds: f64) -> Self {
        Self { total_seconds }
    }
}

/// Progress payload for a single batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgressSnapshot {
    pub processing_status: ProcessingStatus,
    /// Percentage in `[0, 100]`, only meaningful while processing
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub processed_units: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_units: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<TimeRemaining>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
}

/// Queued and failed batches may report counters as `null`; read those as zero.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl BatchProgressSnapshot {
    /// A queued job with nothing processed yet.
    pub fn pending(total_units: u64) -> Self {
        Self {
            processing_status: ProcessingStatus::Pending,
            progress: 0.0,
            processed_units: 0,
            total_units,
            estimated_time_remaining: None,
            processing_started_at: None,
            processing_completed_at: None,
            processing_error: None,
        }
    }

    /// A running job at `progress` percent.
    pub fn processing(progress: f64, processed_units: u64, total_units: u64) -> Self {
        Self {
            processing_status: ProcessingStatus::Processing,
            progress,
            processed_units,
            total_units,
            ..Self::pending(total_units)
        }
    }

    /// A job that generated all of its units.
    pub fn completed(total_units: u64) -> Self {
        Self {
            processing_status: ProcessingStatus::Completed,
            progress: 100.0,
            processed_units: total_units,
            ..Self::pending(total_units)
        }
    }

    /// A job that gave up, with an optional server-supplied reason.
    pub fn failed(error: Option<&str>) -> Self {
        Self {
            processing_status: ProcessingStatus::Failed,
            processing_error: error.map(str::to_string),
            ..Self::pending(0)
        }
    }

    pub fn with_eta(mut self, total_seconds: f64) -> Self {
        self.estimated_time_remaining = Some(TimeRemaining::from_secs(total_seconds));
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.processing_status.is_terminal()
    }
}
