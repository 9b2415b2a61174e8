//! Anchor feed task: pumps one [`MeasurementSource`] into the merged queue.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::source::{MeasurementSource, SourceEvent};
use crate::types::Measurement;

/// Why a feed stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEnd {
    Eof,
    Cancelled,
    SourceError,
    RouterClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub forwarded: u64,
    pub ended_by: FeedEnd,
}

/// Forward measurements from `source` until EOF, cancellation, a source
/// error, or the router going away.
///
/// `send().await` on the bounded merged queue is where a slow router pushes
/// back on the anchors.
pub async fn run_anchor_feed<S: MeasurementSource>(
    mut source: S,
    tx: mpsc::Sender<Measurement>,
    cancel: CancellationToken,
) -> FeedStats {
    let mut forwarded = 0u64;
    let name = source.source_name().to_string();
    info!(source = %name, "[Feed] Started");

    let ended_by = loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break FeedEnd::Cancelled,
            result = source.next_measurement() => match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(source = %name, error = %e, "[Feed] Source failed");
                    break FeedEnd::SourceError;
                }
            },
        };

        let measurement = match event {
            SourceEvent::Measurement(m) => m,
            SourceEvent::Eof => break FeedEnd::Eof,
        };

        tokio::select! {
            () = cancel.cancelled() => break FeedEnd::Cancelled,
            sent = tx.send(measurement) => {
                if sent.is_err() {
                    break FeedEnd::RouterClosed;
                }
                forwarded += 1;
            }
        }
    };

    info!(source = %name, forwarded, ended_by = ?ended_by, "[Feed] Stopped");
    FeedStats { forwarded, ended_by }
}
