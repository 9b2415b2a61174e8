//! Ingestion Router - dispatches the merged measurement stream to per-device actors.
//!
//! The router is the only writer of the device registry, so lookup-or-create
//! needs no locking: it drains the merged queue one measurement at a time and
//! creates at most one live actor per device key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::actor::{DeviceActor, DeviceActorHandle};
use super::stats::{PipelineCounters, PipelineStats};
use crate::config::{OverflowPolicy, RouterConfig};
use crate::geometry::AnchorGeometry;
use crate::types::{Measurement, PipelineEvent};

/// Minimum spacing of idle sweeps.
const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

// ============================================================================
// Route Hooks
// ============================================================================

/// Extension point called for every measurement the router receives,
/// before it is validated or dispatched.
pub trait RouteHooks: Send + 'static {
    fn on_measurement(&mut self, measurement: &Measurement);

    /// Called once when the router shuts down.
    fn on_shutdown(&mut self) {}
}

/// No-op implementation.
impl RouteHooks for () {
    fn on_measurement(&mut self, _measurement: &Measurement) {}
}

// ============================================================================
// Settings / Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    pub device_queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// `None` keeps actors for the process lifetime.
    pub idle_eviction: Option<Duration>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from(&RouterConfig::default())
    }
}

impl From<&RouterConfig> for RouterSettings {
    fn from(config: &RouterConfig) -> Self {
        Self {
            device_queue_capacity: config.device_queue_capacity,
            overflow: config.overflow,
            idle_eviction: config.idle_eviction(),
        }
    }
}

/// What happened to one routed measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Dispatched,
    DroppedEmptyKey,
    DroppedOverflow,
    ActorUnavailable,
}

struct RegistryEntry {
    handle: DeviceActorHandle,
    last_routed: Instant,
    finished: oneshot::Receiver<()>,
}

// ============================================================================
// Router
// ============================================================================

pub struct IngestionRouter<H: RouteHooks = ()> {
    geometry: Arc<AnchorGeometry>,
    settings: RouterSettings,
    events: mpsc::Sender<PipelineEvent>,
    counters: Arc<PipelineCounters>,
    hooks: H,
    registry: HashMap<String, RegistryEntry>,
    /// Evicted actors still working through their queue, by device key.
    draining: HashMap<String, oneshot::Receiver<()>>,
    actors: JoinSet<String>,
}

impl IngestionRouter<()> {
    pub fn new(
        geometry: Arc<AnchorGeometry>,
        settings: RouterSettings,
        events: mpsc::Sender<PipelineEvent>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            geometry,
            settings,
            events,
            counters,
            hooks: (),
            registry: HashMap::new(),
            draining: HashMap::new(),
            actors: JoinSet::new(),
        }
    }
}

impl<H: RouteHooks> IngestionRouter<H> {
    /// Attach hooks. Call before the first measurement is routed.
    pub fn with_hooks<H2: RouteHooks>(self, hooks: H2) -> IngestionRouter<H2> {
        IngestionRouter {
            geometry: self.geometry,
            settings: self.settings,
            events: self.events,
            counters: self.counters,
            hooks,
            registry: self.registry,
            draining: self.draining,
            actors: self.actors,
        }
    }

    /// Number of device keys with a registered actor.
    pub fn actor_count(&self) -> usize {
        self.registry.len()
    }

    pub fn has_actor(&self, device_key: &str) -> bool {
        self.registry.contains_key(device_key)
    }

    pub fn counters(&self) -> &Arc<PipelineCounters> {
        &self.counters
    }

    /// Route one measurement to its device actor, creating the actor on first sight.
    pub async fn route(&mut self, measurement: Measurement) -> RouteOutcome {
        self.counters.record_received();
        self.hooks.on_measurement(&measurement);

        if !measurement.has_device_key() {
            self.counters.record_empty_key();
            debug!(
                anchor = measurement.anchor_index,
                "Measurement without device key, dropping"
            );
            return RouteOutcome::DroppedEmptyKey;
        }

        let now = Instant::now();
        let live = self
            .registry
            .get_mut(&measurement.device_key)
            .filter(|entry| !entry.handle.is_closed())
            .map(|entry| {
                entry.last_routed = now;
                entry.handle.clone()
            });
        let handle = match live {
            Some(handle) => handle,
            None => {
                self.await_drained(&measurement.device_key).await;
                self.spawn_actor(&measurement.device_key, now)
            }
        };

        self.dispatch(handle, measurement).await
    }

    /// Wait for an evicted actor of `device_key` to finish its queue, so the
    /// key never has two actors emitting at once.
    async fn await_drained(&mut self, device_key: &str) {
        if let Some(finished) = self.draining.remove(device_key) {
            debug!(device_key = %device_key, "Waiting for evicted device actor to drain");
            // Err means the actor panicked; either way it is gone.
            let _ = finished.await;
        }
    }

    fn spawn_actor(&mut self, device_key: &str, now: Instant) -> DeviceActorHandle {
        let (actor, handle) = DeviceActor::new(
            device_key,
            Arc::clone(&self.geometry),
            self.settings.device_queue_capacity,
            self.events.clone(),
            Arc::clone(&self.counters),
        );
        let (done_tx, finished) = oneshot::channel();
        self.actors.spawn(async move {
            let device_key = actor.run().await;
            let _ = done_tx.send(());
            device_key
        });
        self.counters.record_actor_spawned();

        let previous = self.registry.insert(
            device_key.to_string(),
            RegistryEntry {
                handle: handle.clone(),
                last_routed: now,
                finished,
            },
        );
        if previous.is_some() {
            warn!(device_key = %device_key, "Device actor was gone, started a replacement");
        } else {
            info!(
                device_key = %device_key,
                devices = self.registry.len(),
                "Starting device actor"
            );
        }
        handle
    }

    async fn dispatch(&mut self, handle: DeviceActorHandle, measurement: Measurement) -> RouteOutcome {
        let policy = self.settings.overflow;
        let rejected = match policy {
            OverflowPolicy::Block => handle.send(measurement).await.err().map(|e| e.0),
            OverflowPolicy::DropNewest => match handle.try_send(measurement) {
                Ok(()) => None,
                Err(TrySendError::Full(m)) => {
                    self.counters.record_overflow();
                    warn!(device_key = %m.device_key, "Device queue full, dropping measurement");
                    return RouteOutcome::DroppedOverflow;
                }
                Err(TrySendError::Closed(m)) => Some(m),
            },
        };

        let Some(measurement) = rejected else {
            self.counters.record_dispatched();
            return RouteOutcome::Dispatched;
        };

        // The actor exited between lookup and send; give the key a fresh one.
        let key = measurement.device_key.clone();
        let replacement = self.spawn_actor(&key, Instant::now());
        if replacement.send(measurement).await.is_ok() {
            self.counters.record_dispatched();
            RouteOutcome::Dispatched
        } else {
            error!(device_key = %key, "Replacement device actor unavailable, measurement lost");
            RouteOutcome::ActorUnavailable
        }
    }

    /// Drop actors whose last measurement is older than the idle window.
    ///
    /// An evicted actor finishes what is already queued, then exits. Its
    /// pending partial vector is discarded. A measurement for an evicted key
    /// waits for that actor to exit before a new one starts, which keeps
    /// per-key emission order. Returns the number evicted.
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let Some(window) = self.settings.idle_eviction else {
            return 0;
        };

        let idle: Vec<String> = self
            .registry
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_routed) >= window)
            .map(|(device_key, _)| device_key.clone())
            .collect();

        for device_key in &idle {
            if let Some(entry) = self.registry.remove(device_key) {
                debug!(device_key = %device_key, "Evicting idle device actor");
                self.draining.insert(device_key.clone(), entry.finished);
            }
        }

        let evicted = idle.len();
        if evicted > 0 {
            self.counters.record_evicted(evicted as u64);
            info!(
                evicted,
                remaining = self.registry.len(),
                "Evicted idle device actors"
            );
        }
        evicted
    }

    fn reap(&mut self, joined: Result<String, JoinError>) {
        match joined {
            Ok(device_key) => {
                self.draining.remove(&device_key);
                debug!(device_key = %device_key, "Device actor finished");
            }
            Err(e) if e.is_panic() => error!(error = %e, "Device actor panicked"),
            Err(e) => debug!(error = %e, "Device actor cancelled"),
        }
    }

    /// Consume the merged queue until cancellation or until every producer is gone.
    ///
    /// On exit all actors are released and awaited, so anything already
    /// queued for a device still reaches the emission queue.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Measurement>,
        cancel: CancellationToken,
    ) -> PipelineStats {
        let sweep_period = self
            .settings
            .idle_eviction
            .map(|window| (window / 2).max(MIN_SWEEP_PERIOD));
        let mut sweep = tokio::time::interval(sweep_period.unwrap_or(Duration::from_secs(3600)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            overflow = ?self.settings.overflow,
            device_queue_capacity = self.settings.device_queue_capacity,
            idle_eviction_secs = self.settings.idle_eviction.map(|d| d.as_secs()),
            "[Router] Routing measurements"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("[Router] Shutdown signal received");
                    break;
                }
                next = rx.recv() => {
                    match next {
                        Some(measurement) => {
                            self.route(measurement).await;
                        }
                        None => {
                            info!("[Router] All measurement feeds closed");
                            break;
                        }
                    }
                }
                _ = sweep.tick(), if sweep_period.is_some() => {
                    self.evict_idle(Instant::now());
                }
                Some(joined) = self.actors.join_next(), if !self.actors.is_empty() => {
                    self.reap(joined);
                }
            }
        }

        self.shutdown().await
    }

    async fn shutdown(mut self) -> PipelineStats {
        let remaining = self.registry.len();
        self.registry.clear();
        self.draining.clear();
        self.hooks.on_shutdown();

        while let Some(joined) = self.actors.join_next().await {
            self.reap(joined);
        }

        let stats = self.counters.snapshot();
        info!(devices = remaining, "[Router] Stopped. {}", stats);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2;
    use crate::types::AnchorIndex;
    use std::sync::Mutex;

    fn geometry() -> Arc<AnchorGeometry> {
        Arc::new(AnchorGeometry::new([
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(5.0, 10.0),
        ]))
    }

    fn router_with(settings: RouterSettings) -> (IngestionRouter, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        let router = IngestionRouter::new(
            geometry(),
            settings,
            tx,
            Arc::new(PipelineCounters::new()),
        );
        (router, rx)
    }

    fn measurement(key: &str, anchor: AnchorIndex, distance: f64) -> Measurement {
        Measurement::new(key, anchor, distance, "2020-01-21T14:47:40")
    }

    #[tokio::test]
    async fn empty_key_is_dropped_without_actor() {
        let (mut router, _rx) = router_with(RouterSettings::default());
        let outcome = router.route(measurement("", AnchorIndex::FIRST, 3.0)).await;

        assert_eq!(outcome, RouteOutcome::DroppedEmptyKey);
        assert_eq!(router.actor_count(), 0);
        let stats = router.counters().snapshot();
        assert_eq!(stats.dropped_empty_key, 1);
        assert_eq!(stats.actors_spawned, 0);
    }

    #[tokio::test]
    async fn one_actor_per_device_key() {
        let (mut router, _rx) = router_with(RouterSettings::default());
        let keys: Vec<String> = (0..25).map(|i| format!("DE:VI:CE:{i:02}")).collect();

        for n in 0..2_000 {
            let key = &keys[n % keys.len()];
            let anchor = AnchorIndex::ALL[n % 3];
            // Non-positive distance keeps every vector incomplete.
            let outcome = router.route(measurement(key, anchor, -1.0)).await;
            assert_eq!(outcome, RouteOutcome::Dispatched);
        }

        assert_eq!(router.actor_count(), keys.len());
        let stats = router.counters().snapshot();
        assert_eq!(stats.actors_spawned, keys.len() as u64);
        assert_eq!(stats.measurements_dispatched, 2_000);
    }

    #[tokio::test]
    async fn run_flushes_actors_when_feeds_close() {
        let (router, mut events) = router_with(RouterSettings::default());
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(router.run(rx, CancellationToken::new()));

        tx.send(measurement("A", AnchorIndex::FIRST, 34f64.sqrt())).await.unwrap();
        tx.send(measurement("B", AnchorIndex::FIRST, 34f64.sqrt())).await.unwrap();
        tx.send(measurement("A", AnchorIndex::THIRD, 7.0)).await.unwrap();
        tx.send(measurement("A", AnchorIndex::SECOND, 34f64.sqrt())).await.unwrap();
        drop(tx);

        let stats = task.await.unwrap();
        assert_eq!(stats.actors_spawned, 2);
        assert_eq!(stats.estimates, 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.device_key(), "A");
        let estimate = event.as_estimate().unwrap();
        assert!((estimate.x - 5.0).abs() < 1e-6);
        assert!((estimate.y - 3.0).abs() < 1e-6);
        assert!(events.recv().await.is_none(), "all actors released the emission queue");
    }

    #[tokio::test]
    async fn cancellation_stops_router() {
        let (router, _events) = router_with(RouterSettings::default());
        let (_tx, rx) = mpsc::channel::<Measurement>(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(router.run(rx, cancel.clone()));

        cancel.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.measurements_received, 0);
    }

    #[tokio::test]
    async fn idle_actors_are_evicted_and_recreated() {
        let settings = RouterSettings {
            idle_eviction: Some(Duration::from_secs(30)),
            ..RouterSettings::default()
        };
        let (mut router, _rx) = router_with(settings);
        router.route(measurement("A", AnchorIndex::FIRST, 1.0)).await;
        router.route(measurement("B", AnchorIndex::FIRST, 1.0)).await;

        assert_eq!(router.evict_idle(Instant::now()), 0);
        assert_eq!(router.evict_idle(Instant::now() + Duration::from_secs(31)), 2);
        assert_eq!(router.actor_count(), 0);

        router.route(measurement("A", AnchorIndex::SECOND, 1.0)).await;
        assert!(router.has_actor("A"));
        let stats = router.counters().snapshot();
        assert_eq!(stats.actors_spawned, 3);
        assert_eq!(stats.actors_evicted, 2);
        assert_eq!(stats.live_actors(), 1);
    }

    #[tokio::test]
    async fn evicted_actor_drains_before_its_replacement_starts() {
        let settings = RouterSettings {
            idle_eviction: Some(Duration::from_secs(30)),
            ..RouterSettings::default()
        };
        let (mut router, mut events) = router_with(settings);
        let far = 50f64.sqrt();

        router.route(measurement("A", AnchorIndex::FIRST, 34f64.sqrt())).await;
        router.route(measurement("A", AnchorIndex::SECOND, 34f64.sqrt())).await;
        router.route(measurement("A", AnchorIndex::THIRD, 7.0)).await;
        assert_eq!(router.evict_idle(Instant::now() + Duration::from_secs(31)), 1);

        router.route(measurement("A", AnchorIndex::FIRST, far)).await;
        router.route(measurement("A", AnchorIndex::SECOND, far)).await;
        router.route(measurement("A", AnchorIndex::THIRD, 5.0)).await;
        let stats = router.shutdown().await;
        assert_eq!(stats.estimates, 2);

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert!((first.as_estimate().unwrap().y - 3.0).abs() < 1e-6);
        assert!((second.as_estimate().unwrap().y - 5.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn dead_actor_is_replaced_on_next_measurement() {
        let (mut router, _rx) = router_with(RouterSettings::default());
        router.route(measurement("A", AnchorIndex::FIRST, 1.0)).await;

        router.actors.abort_all();
        while router.actors.join_next().await.is_some() {}

        let outcome = router.route(measurement("A", AnchorIndex::SECOND, 1.0)).await;
        assert_eq!(outcome, RouteOutcome::Dispatched);
        assert_eq!(router.actor_count(), 1);
        let stats = router.counters().snapshot();
        assert_eq!(stats.actors_spawned, 2);
        assert_eq!(stats.measurements_dispatched, 2);
    }

    #[tokio::test]
    async fn send_to_closed_queue_resends_to_replacement() {
        let (mut router, _rx) = router_with(RouterSettings::default());
        router.route(measurement("A", AnchorIndex::FIRST, 1.0)).await;
        let stale = router.registry["A"].handle.clone();

        router.actors.abort_all();
        while router.actors.join_next().await.is_some() {}
        assert!(stale.is_closed());

        let outcome = router
            .dispatch(stale, measurement("A", AnchorIndex::SECOND, 1.0))
            .await;
        assert_eq!(outcome, RouteOutcome::Dispatched);
        assert_eq!(router.actor_count(), 1);
        assert!(!router.registry["A"].handle.is_closed());
        assert_eq!(router.counters().snapshot().actors_spawned, 2);
    }

    #[tokio::test]
    async fn eviction_disabled_by_default() {
        let (mut router, _rx) = router_with(RouterSettings::default());
        router.route(measurement("A", AnchorIndex::FIRST, 1.0)).await;
        assert_eq!(router.evict_idle(Instant::now() + Duration::from_secs(86_400)), 0);
        assert!(router.has_actor("A"));
    }

    #[tokio::test]
    async fn drop_policy_counts_overflow_instead_of_blocking() {
        // Single-threaded runtime: the actor cannot drain until the test yields.
        let settings = RouterSettings {
            device_queue_capacity: 2,
            overflow: OverflowPolicy::DropNewest,
            idle_eviction: None,
        };
        let (mut router, _rx) = router_with(settings);

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(router.route(measurement("A", AnchorIndex::FIRST, 1.0)).await);
        }

        assert_eq!(outcomes[0], RouteOutcome::Dispatched);
        assert_eq!(outcomes[1], RouteOutcome::Dispatched);
        assert!(outcomes[2..].iter().all(|o| *o == RouteOutcome::DroppedOverflow));
        assert_eq!(router.counters().snapshot().dropped_overflow, 3);
    }

    #[derive(Clone, Default)]
    struct Tap(Arc<Mutex<Vec<String>>>);

    impl RouteHooks for Tap {
        fn on_measurement(&mut self, measurement: &Measurement) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(measurement.device_key.clone());
            }
        }
    }

    #[tokio::test]
    async fn hooks_see_every_measurement_including_dropped() {
        let tap = Tap::default();
        let (router, _rx) = router_with(RouterSettings::default());
        let mut router = router.with_hooks(tap.clone());

        router.route(measurement("A", AnchorIndex::FIRST, 1.0)).await;
        router.route(measurement("", AnchorIndex::FIRST, 1.0)).await;

        let seen = tap.0.lock().unwrap().clone();
        assert_eq!(seen, vec!["A".to_string(), String::new()]);
    }
}
