//! Pipeline-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by the router, actors and emitter.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    measurements_received: AtomicU64,
    measurements_dispatched: AtomicU64,
    dropped_empty_key: AtomicU64,
    dropped_overflow: AtomicU64,
    invalid_anchor: AtomicU64,
    estimates: AtomicU64,
    geometry_faults: AtomicU64,
    actors_spawned: AtomicU64,
    actors_evicted: AtomicU64,
    deliveries_ok: AtomicU64,
    deliveries_failed: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_received, measurements_received);
    counter!(record_dispatched, measurements_dispatched);
    counter!(record_empty_key, dropped_empty_key);
    counter!(record_overflow, dropped_overflow);
    counter!(record_invalid_anchor, invalid_anchor);
    counter!(record_estimate, estimates);
    counter!(record_geometry_fault, geometry_faults);
    counter!(record_actor_spawned, actors_spawned);
    counter!(record_delivery_ok, deliveries_ok);
    counter!(record_delivery_failed, deliveries_failed);

    pub fn record_evicted(&self, count: u64) {
        self.actors_evicted.fetch_add(count, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            measurements_received: self.measurements_received.load(Ordering::Relaxed),
            measurements_dispatched: self.measurements_dispatched.load(Ordering::Relaxed),
            dropped_empty_key: self.dropped_empty_key.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            invalid_anchor: self.invalid_anchor.load(Ordering::Relaxed),
            estimates: self.estimates.load(Ordering::Relaxed),
            geometry_faults: self.geometry_faults.load(Ordering::Relaxed),
            actors_spawned: self.actors_spawned.load(Ordering::Relaxed),
            actors_evicted: self.actors_evicted.load(Ordering::Relaxed),
            deliveries_ok: self.deliveries_ok.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}

/// Plain snapshot of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub measurements_received: u64,
    pub measurements_dispatched: u64,
    pub dropped_empty_key: u64,
    pub dropped_overflow: u64,
    pub invalid_anchor: u64,
    pub estimates: u64,
    pub geometry_faults: u64,
    pub actors_spawned: u64,
    pub actors_evicted: u64,
    pub deliveries_ok: u64,
    pub deliveries_failed: u64,
}

impl PipelineStats {
    /// Actors spawned and not yet evicted.
    pub const fn live_actors(&self) -> u64 {
        self.actors_spawned.saturating_sub(self.actors_evicted)
    }
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline: {} measurements ({} dispatched, {} no key, {} overflow, {} bad anchor), \
             {} estimates, {} geometry faults, {} actors ({} evicted), deliveries {} ok / {} failed",
            self.measurements_received,
            self.measurements_dispatched,
            self.dropped_empty_key,
            self.dropped_overflow,
            self.invalid_anchor,
            self.estimates,
            self.geometry_faults,
            self.actors_spawned,
            self.actors_evicted,
            self.deliveries_ok,
            self.deliveries_failed,
        )
    }
}
