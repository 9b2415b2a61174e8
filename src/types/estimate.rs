//! Results produced by the device actors.

use serde::{Deserialize, Serialize};

/// A solved device position.
///
/// The serialized field names are the ones the output endpoint consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    #[serde(rename = "Macaddr")]
    pub device_key: String,
    /// Timestamp of the measurement that completed the triple.
    #[serde(rename = "Time")]
    pub timestamp: String,
    #[serde(rename = "Distances")]
    pub distances: [f64; 3],
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
}

/// A complete triple that could not be solved for the current anchor layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryFault {
    pub device_key: String,
    pub timestamp: String,
    pub distances: [f64; 3],
    pub reason: String,
}

/// Everything a device actor can put on the emission queue.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Estimate(PositionEstimate),
    GeometryFault(GeometryFault),
}

impl PipelineEvent {
    pub fn device_key(&self) -> &str {
        match self {
            Self::Estimate(e) => &e.device_key,
            Self::GeometryFault(f) => &f.device_key,
        }
    }

    pub fn as_estimate(&self) -> Option<&PositionEstimate> {
        match self {
            Self::Estimate(e) => Some(e),
            Self::GeometryFault(_) => None,
        }
    }
}
