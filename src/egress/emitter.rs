//! The emitter task: sole consumer of the emission queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::EstimateSink;
use crate::pipeline::{PipelineCounters, PipelineStats};
use crate::types::PipelineEvent;

/// Drain `rx` until every actor has dropped its sender.
///
/// Each estimate goes to every sink in order. A sink failure is logged and
/// counted and the next sink or event is processed; nothing here ends the
/// process. Geometry faults are logged only.
pub async fn run_emitter(
    mut rx: mpsc::Receiver<PipelineEvent>,
    mut sinks: Vec<Box<dyn EstimateSink>>,
    counters: Arc<PipelineCounters>,
) -> PipelineStats {
    info!(
        sinks = ?sinks.iter().map(|s| s.sink_name().to_string()).collect::<Vec<_>>(),
        "[Emitter] Started"
    );

    while let Some(event) = rx.recv().await {
        let estimate = match event {
            PipelineEvent::Estimate(estimate) => estimate,
            PipelineEvent::GeometryFault(fault) => {
                warn!(
                    device_key = %fault.device_key,
                    timestamp = %fault.timestamp,
                    distances = ?fault.distances,
                    reason = %fault.reason,
                    "[Emitter] Geometry fault, no estimate"
                );
                continue;
            }
        };

        debug!(device_key = %estimate.device_key, "[Emitter] Delivering estimate");

        for sink in &mut sinks {
            match sink.deliver(&estimate).await {
                Ok(()) => counters.record_delivery_ok(),
                Err(e) => {
                    counters.record_delivery_failed();
                    error!(
                        sink = sink.sink_name(),
                        device_key = %estimate.device_key,
                        error = %e,
                        "[Emitter] Delivery failed"
                    );
                }
            }
        }
    }

    for sink in &mut sinks {
        if let Err(e) = sink.flush().await {
            warn!(sink = sink.sink_name(), error = %e, "[Emitter] Flush failed");
        }
    }

    let stats = counters.snapshot();
    info!(
        delivered = stats.deliveries_ok,
        failed = stats.deliveries_failed,
        "[Emitter] Emission queue closed"
    );
    stats
}
