//! Trilaterator: three-anchor device positioning
//!
//! Fixed anchors report estimated distances to nearby wireless devices. The
//! pipeline groups those reports per device and, once one distance from each
//! of the three anchors is known, solves for the device's 2-D position.
//!
//! ## Architecture
//!
//! - **Acquisition**: one HTTP poller per anchor feeding a merged queue
//! - **Ingestion Router**: lazily creates one actor per device key
//! - **Device Aggregation Actor**: owns the device's partial distance vector
//! - **Trilateration Solver**: closed-form solve against the anchor geometry
//! - **Egress**: a single emitter delivering estimates to HTTP and CSV sinks

pub mod acquisition;
pub mod config;
pub mod egress;
pub mod geometry;
pub mod pipeline;
pub mod types;

pub use config::{ConfigError, TrilaterationConfig};
pub use geometry::{AnchorGeometry, GeometryError, Point2};
pub use pipeline::{IngestionRouter, PipelineCounters, PipelineStats};
pub use types::{AnchorIndex, Measurement, MeasurementError, PipelineEvent, PositionEstimate};
