//! Estimate egress
//!
//! A single emitter task drains the emission queue and hands each estimate to
//! every configured [`EstimateSink`]: the HTTP output endpoint and the
//! optional results CSV. The detection CSV is written from the router side
//! through [`RouteHooks`](crate::pipeline::RouteHooks).

mod emitter;
mod http;
mod recorder;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::PositionEstimate;

pub use emitter::run_emitter;
pub use http::HttpSink;
pub use recorder::{CsvRecorder, DetectionRecorder};

/// Estimate delivery errors
#[derive(Debug, Error)]
pub enum EgressError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Output server returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Delivery cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for solved positions.
#[async_trait]
pub trait EstimateSink: Send + 'static {
    async fn deliver(&mut self, estimate: &PositionEstimate) -> Result<(), EgressError>;

    /// Called once after the emission queue closes.
    async fn flush(&mut self) -> Result<(), EgressError> {
        Ok(())
    }

    /// Human-readable name for logging.
    fn sink_name(&self) -> &str;
}
