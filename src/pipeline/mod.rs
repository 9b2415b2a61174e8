//! Measurement Pipeline
//!
//! ```text
//! anchor feeds ──▶ merged queue ──▶ IngestionRouter ──▶ DeviceActor (one per key)
//!                                                          │
//!                                                          ▼
//!                                                   emission queue ──▶ emitter
//! ```
//!
//! Every queue is a bounded tokio `mpsc` channel. The router is the sole
//! owner of the device registry; each actor is the sole owner of its
//! device's partial distance vector.

mod actor;
mod feed;
mod router;
mod stats;
pub mod source;

pub use actor::{DeviceActor, DeviceActorHandle, PartialVector};
pub use feed::{run_anchor_feed, FeedEnd, FeedStats};
pub use router::{IngestionRouter, RouteHooks, RouteOutcome, RouterSettings};
pub use source::{load_replay_csv, MeasurementSource, ReplaySource, SourceEvent, StdinSource};
pub use stats::{PipelineCounters, PipelineStats};
