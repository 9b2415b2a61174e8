//! Device Actor - accumulates one distance per anchor and solves when all three are present

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tracing::{debug, info, warn};

use super::stats::PipelineCounters;
use crate::geometry::AnchorGeometry;
use crate::types::{
    AnchorIndex, GeometryFault, Measurement, PipelineEvent, PositionEstimate, ANCHOR_COUNT,
};

// ============================================================================
// Partial Vector
// ============================================================================

/// Pending distances for one device, one slot per anchor.
///
/// A slot holding a value <= 0 means "no reading yet in this cycle".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartialVector {
    slots: [f64; ANCHOR_COUNT],
}

impl PartialVector {
    pub const fn new() -> Self {
        Self {
            slots: [0.0; ANCHOR_COUNT],
        }
    }

    /// Store a reading for `anchor`, last write wins.
    ///
    /// A distance that is not `> 0` (NaN included) clears the slot, even when
    /// it held a valid reading. `+inf` is stored and fails at solve time.
    pub fn record(&mut self, anchor: AnchorIndex, distance: f64) {
        self.slots[anchor.slot()] = if distance > 0.0 {
            distance
        } else {
            0.0
        };
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|d| *d > 0.0)
    }

    /// Number of slots currently holding a reading.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|d| **d > 0.0).count()
    }

    /// Return the distances and reset every slot.
    pub fn take(&mut self) -> [f64; ANCHOR_COUNT] {
        std::mem::replace(&mut self.slots, [0.0; ANCHOR_COUNT])
    }

    pub const fn snapshot(&self) -> [f64; ANCHOR_COUNT] {
        self.slots
    }
}

// ============================================================================
// Actor Handle
// ============================================================================

/// Handle to feed measurements to one device actor.
#[derive(Clone)]
pub struct DeviceActorHandle {
    tx: mpsc::Sender<Measurement>,
}

impl DeviceActorHandle {
    /// Queue a measurement, waiting for room.
    ///
    /// Fails only when the actor is gone; the measurement is handed back.
    pub async fn send(&self, measurement: Measurement) -> Result<(), SendError<Measurement>> {
        self.tx.send(measurement).await
    }

    /// Queue a measurement without waiting.
    pub fn try_send(&self, measurement: Measurement) -> Result<(), TrySendError<Measurement>> {
        self.tx.try_send(measurement)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Device Actor
// ============================================================================

/// Owns the partial distance vector of one device key.
pub struct DeviceActor {
    device_key: String,
    geometry: Arc<AnchorGeometry>,
    rx: mpsc::Receiver<Measurement>,
    events: mpsc::Sender<PipelineEvent>,
    counters: Arc<PipelineCounters>,
    vector: PartialVector,
    solves: u64,
}

impl DeviceActor {
    /// Create new device actor and handle
    pub fn new(
        device_key: impl Into<String>,
        geometry: Arc<AnchorGeometry>,
        queue_capacity: usize,
        events: mpsc::Sender<PipelineEvent>,
        counters: Arc<PipelineCounters>,
    ) -> (Self, DeviceActorHandle) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));

        let actor = Self {
            device_key: device_key.into(),
            geometry,
            rx,
            events,
            counters,
            vector: PartialVector::new(),
            solves: 0,
        };

        (actor, DeviceActorHandle { tx })
    }

    /// Run until every handle is dropped, draining whatever is still queued.
    ///
    /// Returns the device key so the owner can tell which actor finished.
    pub async fn run(mut self) -> String {
        debug!(device_key = %self.device_key, "Device actor starting");

        while let Some(measurement) = self.rx.recv().await {
            self.handle_measurement(measurement).await;
        }

        debug!(
            device_key = %self.device_key,
            solves = self.solves,
            pending = self.vector.filled(),
            "Device actor stopped"
        );
        self.device_key
    }

    async fn handle_measurement(&mut self, measurement: Measurement) {
        let anchor = match measurement.anchor() {
            Ok(anchor) => anchor,
            Err(e) => {
                warn!(
                    device_key = %self.device_key,
                    error = %e,
                    "Dropping measurement with invalid anchor index"
                );
                self.counters.record_invalid_anchor();
                return;
            }
        };

        self.vector.record(anchor, measurement.distance);
        if !self.vector.is_complete() {
            return;
        }

        let distances = self.vector.take();
        let event = match self.geometry.solve(&distances) {
            Ok(position) => {
                self.solves += 1;
                self.counters.record_estimate();
                info!(
                    device_key = %self.device_key,
                    r1 = distances[0],
                    r2 = distances[1],
                    r3 = distances[2],
                    x = position.x,
                    y = position.y,
                    "Trilaterated device"
                );
                PipelineEvent::Estimate(PositionEstimate {
                    device_key: self.device_key.clone(),
                    timestamp: measurement.timestamp,
                    distances,
                    x: position.x,
                    y: position.y,
                })
            }
            Err(e) => {
                self.counters.record_geometry_fault();
                warn!(
                    device_key = %self.device_key,
                    error = %e,
                    ?distances,
                    "Trilateration failed, discarding distance triple"
                );
                PipelineEvent::GeometryFault(GeometryFault {
                    device_key: self.device_key.clone(),
                    timestamp: measurement.timestamp,
                    distances,
                    reason: e.to_string(),
                })
            }
        };

        if self.events.send(event).await.is_err() {
            debug!(device_key = %self.device_key, "Emission queue closed, result dropped");
        }
    }
}
