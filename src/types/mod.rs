//! Core data types shared by the pipeline stages.

mod estimate;
mod measurement;

pub use estimate::{GeometryFault, PipelineEvent, PositionEstimate};
pub use measurement::{AnchorIndex, Measurement, MeasurementError, ANCHOR_COUNT};
