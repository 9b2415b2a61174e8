//! HTTP polling source for one anchor.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::kismet::{decode_batch, AcquisitionError};
use crate::config::{AnchorConfig, IngestConfig};
use crate::pipeline::{MeasurementSource, SourceEvent};
use crate::types::{AnchorIndex, Measurement};

/// Delay before the next poll after `failures` consecutive failures.
///
/// `base * 2^(failures - 1)`, capped at `max`; `base` when nothing failed.
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return base;
    }
    let factor = 2u32.saturating_pow(failures - 1);
    base.saturating_mul(factor).min(max.max(base))
}

/// Whole milliseconds for log fields, saturating at `u64::MAX`.
pub fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Poll counters for one anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnchorPollStats {
    pub polls: u64,
    pub failures: u64,
    pub records: u64,
}

/// Polls one anchor endpoint and yields its records one at a time.
///
/// After the first batch with records, every request carries
/// `?timestamp=<last record time>` so the anchor only returns newer records.
/// Failed polls (transport, status, decode) are logged and retried with
/// exponential backoff; they never end the source.
pub struct HttpAnchorSource {
    http: reqwest::Client,
    name: String,
    anchor: AnchorIndex,
    input_url: String,
    poll_interval: Duration,
    max_backoff: Duration,
    cursor: Option<String>,
    buffer: VecDeque<Measurement>,
    consecutive_failures: u32,
    stats: AnchorPollStats,
}

impl HttpAnchorSource {
    pub fn new(
        anchor: AnchorIndex,
        config: &AnchorConfig,
        ingest: &IngestConfig,
    ) -> Result<Self, AcquisitionError> {
        let http = reqwest::Client::builder()
            .timeout(ingest.request_timeout())
            .build()?;

        Ok(Self {
            http,
            name: config.display_name(anchor.slot()),
            anchor,
            input_url: config.input_url.clone(),
            poll_interval: ingest.poll_interval(),
            max_backoff: ingest.max_backoff(),
            cursor: None,
            buffer: VecDeque::new(),
            consecutive_failures: 0,
            stats: AnchorPollStats::default(),
        })
    }

    pub fn anchor(&self) -> AnchorIndex {
        self.anchor
    }

    pub fn stats(&self) -> AnchorPollStats {
        self.stats
    }

    /// Timestamp sent with the next request, if any.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    async fn poll_once(&self) -> Result<Vec<Measurement>, AcquisitionError> {
        let mut request = self.http.get(&self.input_url);
        if let Some(ts) = &self.cursor {
            request = request.query(&[("timestamp", ts.as_str())]);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AcquisitionError::Status(status));
        }
        let body = resp.bytes().await?;
        decode_batch(&body, self.anchor)
    }

    fn accept(&mut self, batch: Vec<Measurement>) {
        if self.consecutive_failures > 0 {
            info!(
                anchor = %self.anchor,
                source = %self.name,
                failures = self.consecutive_failures,
                "Anchor reachable again"
            );
        }
        self.consecutive_failures = 0;

        if let Some(last) = batch.last() {
            if !last.timestamp.is_empty() {
                self.cursor = Some(last.timestamp.clone());
            }
        }
        debug!(anchor = %self.anchor, records = batch.len(), "Anchor batch received");
        self.stats.records += batch.len() as u64;
        self.buffer.extend(batch);
    }

    fn reject(&mut self, error: &AcquisitionError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.stats.failures += 1;
        warn!(
            anchor = %self.anchor,
            source = %self.name,
            url = %self.input_url,
            attempt = self.consecutive_failures,
            retry_in_ms = millis(backoff_delay(
                self.poll_interval,
                self.max_backoff,
                self.consecutive_failures
            )),
            error = %error,
            "Anchor poll failed"
        );
    }
}

#[async_trait]
impl MeasurementSource for HttpAnchorSource {
    async fn next_measurement(&mut self) -> Result<SourceEvent> {
        loop {
            if let Some(m) = self.buffer.pop_front() {
                return Ok(SourceEvent::Measurement(m));
            }

            if self.stats.polls > 0 {
                let delay = backoff_delay(self.poll_interval, self.max_backoff, self.consecutive_failures);
                tokio::time::sleep(delay).await;
            }

            self.stats.polls += 1;
            match self.poll_once().await {
                Ok(batch) => self.accept(batch),
                Err(e) => self.reject(&e),
            }
        }
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[test]
    fn millis_saturates_instead_of_wrapping() {
        assert_eq!(millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(2000);
        let max = Duration::from_millis(60_000);
        assert_eq!(backoff_delay(base, max, 0), base);
        assert_eq!(backoff_delay(base, max, 1), base);
        assert_eq!(backoff_delay(base, max, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(base, max, 4), Duration::from_millis(16_000));
        assert_eq!(backoff_delay(base, max, 6), max);
        assert_eq!(backoff_delay(base, max, u32::MAX), max);
    }

    #[derive(Clone, Default)]
    struct Anchor {
        seen: Arc<Mutex<Vec<Option<String>>>>,
        responses: Arc<Mutex<VecDeque<(StatusCode, String)>>>,
    }

    async fn data(
        State(anchor): State<Anchor>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, String) {
        anchor.seen.lock().unwrap().push(params.get("timestamp").cloned());
        anchor
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((StatusCode::OK, "[]".to_string()))
    }

    async fn serve(anchor: Anchor) -> String {
        let app = Router::new().route("/getData1", get(data)).with_state(anchor);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/getData1")
    }

    fn source_for(url: String) -> HttpAnchorSource {
        let config = AnchorConfig {
            name: "north".to_string(),
            input_url: url,
            x: 0.0,
            y: 0.0,
        };
        let ingest = IngestConfig {
            poll_interval_ms: 10,
            max_backoff_ms: 40,
            ..IngestConfig::default()
        };
        HttpAnchorSource::new(AnchorIndex::FIRST, &config, &ingest).unwrap()
    }

    fn record(time: &str, mac: &str, distance: f64) -> String {
        format!(
            r#"{{"kismet.device.base.last_time":"{time}","kismet.device.base.macaddr":"{mac}","distancia_senal_mediana_f2":{distance}}}"#
        )
    }

    async fn next(source: &mut HttpAnchorSource) -> Measurement {
        match tokio::time::timeout(Duration::from_secs(5), source.next_measurement())
            .await
            .unwrap()
            .unwrap()
        {
            SourceEvent::Measurement(m) => m,
            SourceEvent::Eof => panic!("HTTP source never ends"),
        }
    }

    #[tokio::test]
    async fn cursor_follows_last_record_time() {
        let anchor = Anchor::default();
        anchor.responses.lock().unwrap().extend([
            (
                StatusCode::OK,
                format!("[{},{}]", record("100", "AA", 1.5), record("101", "BB", 2.5)),
            ),
            (StatusCode::OK, format!("[{}]", record("102", "AA", 3.5))),
        ]);
        let mut source = source_for(serve(anchor.clone()).await);

        let first = next(&mut source).await;
        assert_eq!(first.device_key, "AA");
        assert_eq!(first.anchor_index, 1);
        assert_eq!(next(&mut source).await.device_key, "BB");
        assert_eq!(next(&mut source).await.timestamp, "102");
        assert_eq!(source.cursor(), Some("102"));

        let seen = anchor.seen.lock().unwrap().clone();
        assert_eq!(seen[0], None);
        assert_eq!(seen[1].as_deref(), Some("101"));
    }

    #[tokio::test]
    async fn failures_are_retried_not_fatal() {
        let anchor = Anchor::default();
        anchor.responses.lock().unwrap().extend([
            (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string()),
            (StatusCode::OK, "not json".to_string()),
            (StatusCode::OK, format!("[{}]", record("7", "CC", 4.0))),
        ]);
        let mut source = source_for(serve(anchor).await);

        let m = next(&mut source).await;
        assert_eq!(m.device_key, "CC");
        let stats = source.stats();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.polls, 3);
        assert_eq!(stats.records, 1);
    }

    #[tokio::test]
    async fn unreachable_anchor_keeps_retrying() {
        // Nothing listens on port 9 of localhost in the test environment.
        let mut source = source_for("http://127.0.0.1:9/getData1".to_string());
        let outcome =
            tokio::time::timeout(Duration::from_millis(300), source.next_measurement()).await;
        assert!(outcome.is_err(), "source must keep polling instead of failing");
        assert!(source.stats().failures >= 1);
    }
}
