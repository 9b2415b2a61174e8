//! Measurement records produced by the anchor collaborators.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of anchors the positioning model is built around.
pub const ANCHOR_COUNT: usize = 3;

/// Reasons a measurement cannot be used by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeasurementError {
    #[error("measurement has an empty device key")]
    EmptyDeviceKey,

    #[error("anchor index {0} is outside 1..=3")]
    AnchorIndexOutOfRange(u8),
}

/// Identifies which of the three anchors produced a reading (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct AnchorIndex(u8);

impl AnchorIndex {
    pub const FIRST: Self = Self(1);
    pub const SECOND: Self = Self(2);
    pub const THIRD: Self = Self(3);

    /// All anchor indices in ascending order.
    pub const ALL: [Self; ANCHOR_COUNT] = [Self::FIRST, Self::SECOND, Self::THIRD];

    pub fn new(raw: u8) -> Result<Self, MeasurementError> {
        if (1..=ANCHOR_COUNT as u8).contains(&raw) {
            Ok(Self(raw))
        } else {
            Err(MeasurementError::AnchorIndexOutOfRange(raw))
        }
    }

    /// Build the index for the anchor at `position` in the configured list.
    pub fn from_position(position: usize) -> Result<Self, MeasurementError> {
        let raw = u8::try_from(position + 1).unwrap_or(u8::MAX);
        Self::new(raw)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Zero-based slot in a per-device distance vector.
    pub const fn slot(self) -> usize {
        self.0 as usize - 1
    }
}

impl TryFrom<u8> for AnchorIndex {
    type Error = MeasurementError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<AnchorIndex> for u8 {
    fn from(index: AnchorIndex) -> Self {
        index.0
    }
}

impl std::fmt::Display for AnchorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One timestamped distance reading from one anchor about one device.
///
/// `anchor_index` is kept as the raw tag the collaborator attached so that
/// an out-of-range value reaches the device actor and is reported there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub device_key: String,
    pub anchor_index: u8,
    /// Estimated distance to the anchor; values <= 0 mean "no reading".
    pub distance: f64,
    /// Source timestamp, carried through untouched.
    #[serde(default)]
    pub timestamp: String,
    /// Carried for recording only, never used in the solve.
    #[serde(default)]
    pub signal_intensity: f64,
}

impl Measurement {
    pub fn new(
        device_key: impl Into<String>,
        anchor: AnchorIndex,
        distance: f64,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            device_key: device_key.into(),
            anchor_index: anchor.get(),
            distance,
            timestamp: timestamp.into(),
            signal_intensity: 0.0,
        }
    }

    pub fn with_signal_intensity(mut self, signal_intensity: f64) -> Self {
        self.signal_intensity = signal_intensity;
        self
    }

    /// Checked view of the anchor tag.
    pub fn anchor(&self) -> Result<AnchorIndex, MeasurementError> {
        AnchorIndex::new(self.anchor_index)
    }

    pub fn has_device_key(&self) -> bool {
        !self.device_key.is_empty()
    }
}
