//! HTTP output sink with bounded retry.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EgressError, EstimateSink};
use crate::acquisition::{backoff_delay, millis};
use crate::config::EgressConfig;
use crate::types::PositionEstimate;

/// POSTs each estimate as JSON to the output endpoint.
///
/// Transport errors, 5xx and 429 are retried with exponential backoff up to
/// `max_attempts`. Any other non-success status is permanent. Cancellation
/// during a backoff aborts the delivery.
pub struct HttpSink {
    http: reqwest::Client,
    url: String,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    cancel: CancellationToken,
}

impl HttpSink {
    pub fn new(
        url: impl Into<String>,
        config: &EgressConfig,
        cancel: CancellationToken,
    ) -> Result<Self, EgressError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            cancel,
        })
    }

    async fn post_once(&self, body: Vec<u8>) -> Result<(), EgressError> {
        let resp = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!(status = %status, "Sent trilateration to output server");
            Ok(())
        } else {
            Err(EgressError::Status(status))
        }
    }
}

/// Whether another attempt could succeed.
fn is_transient(error: &EgressError) -> bool {
    match error {
        EgressError::Http(_) => true,
        EgressError::Status(status) => {
            status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
        }
        _ => false,
    }
}

#[async_trait]
impl EstimateSink for HttpSink {
    async fn deliver(&mut self, estimate: &PositionEstimate) -> Result<(), EgressError> {
        let body = serde_json::to_vec(estimate)?;

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.post_once(body.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if !is_transient(&e) => return Err(e),
                Err(e) => last_error = e.to_string(),
            }

            if attempt == self.max_attempts {
                break;
            }

            let delay = backoff_delay(self.initial_backoff, self.max_backoff, attempt);
            warn!(
                device_key = %estimate.device_key,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = millis(delay),
                error = %last_error,
                "Output delivery failed, retrying"
            );
            tokio::select! {
                () = self.cancel.cancelled() => return Err(EgressError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        Err(EgressError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }

    fn sink_name(&self) -> &str {
        "http"
    }
}
