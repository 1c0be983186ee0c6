use thiserror::Error as ThisError;

use crate::types::BatchId;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The progress endpoint does not know this batch
    #[error("Batch {batch_id} not found")]
    BatchNotFound { batch_id: BatchId },

    /// Non-2xx response other than 404
    #[error("Unexpected status {status} from progress endpoint: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Transport failure (connect, timeout, TLS, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not a valid progress snapshot
    #[error("Failed to decode progress snapshot: {0}")]
    Decode(#[from] serde_json::Error),

    /// Invalid or inconsistent configuration
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether polling should stop for good after this error.
    ///
    /// Only a definitive "batch not found" is terminal. Everything else is retried on
    /// the next scheduled tick.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::BatchNotFound { .. })
    }
}

/// Type alias for batchwatch results
pub type Result<T> = std::result::Result<T, Error>;
