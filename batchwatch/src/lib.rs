//! # batchwatch: progress tracking for batch code generation
//!
//! When a batch of physical units (bottles, boxes, labels) is submitted, the platform generates
//! its QR authentication codes in a long-running background job. `batchwatch` follows that job
//! from the outside: it polls the batch progress endpoint, adapts the polling cadence to how far
//! along the job is, stops on a terminal state, and runs a completion hook exactly once.
//!
//! ## Architecture
//!
//! - [`client`]: the [`ProgressSource`] trait and its reqwest implementation against
//!   `GET {api_url}/batches/{id}/progress`.
//! - [`cadence`]: the pure decision `(snapshot) -> delay | stop`.
//! - [`poller`]: one tokio task per watched batch, publishing a [`ProgressView`] through a
//!   `watch` channel and torn down by dropping its [`PollerHandle`].
//! - [`view`]: status-driven view state and its rendering.
//! - [`cli`]: the `status` and `watch` commands of the binary.
//! - [`terminal`]: live indicatif progress bars for `watch`.
//!
//! ## Cadence
//!
//! | batch state | next poll |
//! |---|---|
//! | unknown / queued | 5s |
//! | running, < 10% | 5s |
//! | running, 10–90% | 2s |
//! | running, >= 90% | 1s |
//! | completed / failed / not found | never |
//!
//! Intervals and thresholds are configurable, see [`config::CadenceConfig`].
//!
//! ## Example
//!
//! ```ignore
//! use batchwatch::{BatchId, HttpProgressClient, ProgressPoller};
//!
//! let client = HttpProgressClient::from_config(&config);
//! let handle = ProgressPoller::new(BatchId::from("b-42"), client, config.cadence.clone())
//!     .on_complete(|| println!("batch ready"))
//!     .spawn();
//!
//! let outcome = handle.finished().await?;
//! ```

pub mod cadence;
pub mod cli;
pub mod client;
pub mod config;
pub mod errors;
pub mod poller;
pub mod telemetry;
pub mod terminal;
pub mod types;
pub mod view;

pub use cadence::{PollDecision, next_poll};
pub use client::{HttpProgressClient, MockProgressSource, ProgressSource};
pub use config::{Args, CadenceConfig, Command, Config};
pub use errors::{Error, Result};
pub use poller::{PollOutcome, PollerHandle, ProgressPoller};
pub use types::{BatchId, BatchProgressSnapshot, ProcessingStatus, TimeRemaining};
pub use view::{LOADING_MESSAGE, ProgressView, RenderedView, format_eta};
