//! Sources of batch progress snapshots.
//!
//! The [`ProgressSource`] trait abstracts the progress endpoint so the poller can be driven by
//! the real HTTP API ([`HttpProgressClient`]) or by scripted responses in tests
//! ([`MockProgressSource`]).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::types::{BatchId, BatchProgressSnapshot};

/// Anything that can produce the current progress snapshot of a batch.
///
/// # Errors
/// Implementations return [`Error::BatchNotFound`] when the batch definitively does not
/// exist. Any other error is treated as transient by the poller.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn fetch_progress(&self, batch_id: &BatchId) -> Result<BatchProgressSnapshot>;
}

#[async_trait]
impl<S: ProgressSource + ?Sized> ProgressSource for Arc<S> {
    async fn fetch_progress(&self, batch_id: &BatchId) -> Result<BatchProgressSnapshot> {
        (**self).fetch_progress(batch_id).await
    }
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Reads progress from `GET {api_url}/batches/{id}/progress`.
#[derive(Clone)]
pub struct HttpProgressClient {
    client: reqwest::Client,
    api_url: Url,
    api_token: Option<String>,
    timeout: Duration,
}

impl HttpProgressClient {
    pub fn new(api_url: Url, api_token: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_token,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_url.clone(), config.api_token.clone(), config.request_timeout)
    }

    /// Build the progress URL, encoding the batch id as a single path segment.
    pub fn progress_url(&self, batch_id: &BatchId) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API URL {} cannot be used as a base", self.api_url))?
            .pop_if_empty()
            .extend(["batches", batch_id.as_str(), "progress"]);
        Ok(url)
    }
}

#[async_trait]
impl ProgressSource for HttpProgressClient {
    #[tracing::instrument(skip(self, batch_id), fields(batch_id = %batch_id))]
    async fn fetch_progress(&self, batch_id: &BatchId) -> Result<BatchProgressSnapshot> {
        let url = self.progress_url(batch_id)?;

        tracing::trace!(url = %url, timeout_ms = self.timeout.as_millis() as u64, "Fetching batch progress");

        let mut req = self.client.get(url.clone()).timeout(self.timeout);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await.map_err(|e| {
            tracing::debug!(url = %url, error = %e, "Progress request failed");
            e
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::BatchNotFound {
                batch_id: batch_id.clone(),
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let snapshot: BatchProgressSnapshot = serde_json::from_str(&body)?;

        tracing::debug!(
            status = %snapshot.processing_status,
            progress = snapshot.progress,
            processed_units = snapshot.processed_units,
            total_units = snapshot.total_units,
            "Fetched batch progress"
        );

        Ok(snapshot)
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

/// Scripted progress source.
///
/// Responses are returned in FIFO order. Once the script is exhausted the last response is
/// repeated, so a poller that keeps going observes a steady state rather than an error.
/// Every call records the (tokio) instant at which it started.
///
/// # Example
/// ```ignore
/// let source = MockProgressSource::new();
/// source.push_snapshot(BatchProgressSnapshot::pending(100));
/// source.push_transient_error("bad gateway");
/// source.push_snapshot(BatchProgressSnapshot::completed(100));
/// ```
#[derive(Clone, Default)]
pub struct MockProgressSource {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    last: Arc<Mutex<Option<MockResponse>>>,
    calls: Arc<Mutex<Vec<tokio::time::Instant>>>,
    completed_calls: Arc<Mutex<usize>>,
    latency: Option<Duration>,
}

/// A scripted response; errors are stored as constructors because [`Error`] is not `Clone`.
#[derive(Clone)]
enum MockResponse {
    Snapshot(BatchProgressSnapshot),
    NotFound,
    Transient(String),
}

impl MockProgressSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency` (measured in tokio time).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_snapshot(&self, snapshot: BatchProgressSnapshot) {
        self.responses.lock().push_back(MockResponse::Snapshot(snapshot));
    }

    /// Queue a 404-style terminal error.
    pub fn push_not_found(&self) {
        self.responses.lock().push_back(MockResponse::NotFound);
    }

    /// Queue a transient error (e.g. a 503).
    pub fn push_transient_error(&self, message: &str) {
        self.responses
            .lock()
            .push_back(MockResponse::Transient(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of fetches that ran to completion (were not dropped mid-flight).
    pub fn completed_call_count(&self) -> usize {
        *self.completed_calls.lock()
    }

    /// Gaps between consecutive fetch starts.
    pub fn call_gaps(&self) -> Vec<Duration> {
        self.calls.lock().windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn next_response(&self) -> Option<MockResponse> {
        let next = self.responses.lock().pop_front();
        match next {
            Some(response) => {
                *self.last.lock() = Some(response.clone());
                Some(response)
            }
            None => self.last.lock().clone(),
        }
    }
}

#[async_trait]
impl ProgressSource for MockProgressSource {
    async fn fetch_progress(&self, batch_id: &BatchId) -> Result<BatchProgressSnapshot> {
        self.calls.lock().push(tokio::time::Instant::now());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        *self.completed_calls.lock() += 1;

        match self.next_response() {
            Some(MockResponse::Snapshot(snapshot)) => Ok(snapshot),
            Some(MockResponse::NotFound) => Err(Error::BatchNotFound {
                batch_id: batch_id.clone(),
            }),
            Some(MockResponse::Transient(message)) => Err(Error::UnexpectedStatus { status: 503, body: message }),
            None => Err(Error::Other(anyhow::anyhow!(
                "No mock response configured for batch {batch_id}"
            ))),
        }
    }
}
