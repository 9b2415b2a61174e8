//! Fixed anchor layout shared read-only by every device actor.

use super::solver::{self, GeometryError, Point2};
use crate::config::{ConfigError, TrilaterationConfig};
use crate::types::{AnchorIndex, ANCHOR_COUNT};

/// Coordinates of the three anchors, indexed by [`AnchorIndex`].
///
/// Only constructible with all three positions known, so a value of this type
/// is always a complete layout. Share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorGeometry {
    xs: [f64; ANCHOR_COUNT],
    ys: [f64; ANCHOR_COUNT],
}

impl AnchorGeometry {
    pub fn new(anchors: [Point2; ANCHOR_COUNT]) -> Self {
        Self {
            xs: anchors.map(|p| p.x),
            ys: anchors.map(|p| p.y),
        }
    }

    /// Build the layout from the configured anchor list (list order is index order).
    pub fn from_config(config: &TrilaterationConfig) -> Result<Self, ConfigError> {
        let points: Vec<Point2> = config
            .anchors
            .iter()
            .map(|a| Point2::new(a.x, a.y))
            .collect();

        let anchors: [Point2; ANCHOR_COUNT] = points.try_into().map_err(|v: Vec<Point2>| {
            ConfigError::Validation(vec![format!(
                "exactly {ANCHOR_COUNT} anchors are required, found {}",
                v.len()
            )])
        })?;

        if let Some(i) = anchors.iter().position(|p| !p.is_finite()) {
            return Err(ConfigError::Validation(vec![format!(
                "anchor {} has non-finite coordinates",
                i + 1
            )]));
        }

        Ok(Self::new(anchors))
    }

    pub fn anchor(&self, index: AnchorIndex) -> Point2 {
        Point2::new(self.xs[index.slot()], self.ys[index.slot()])
    }

    pub const fn xs(&self) -> &[f64; ANCHOR_COUNT] {
        &self.xs
    }

    pub const fn ys(&self) -> &[f64; ANCHOR_COUNT] {
        &self.ys
    }

    /// Whether every solve against this layout would fail.
    pub fn is_degenerate(&self) -> bool {
        solver::is_degenerate(&self.xs, &self.ys)
    }

    /// Solve for the position matching distances indexed like the anchors.
    pub fn solve(&self, distances: &[f64; ANCHOR_COUNT]) -> Result<Point2, GeometryError> {
        solver::solve(distances, &self.xs, &self.ys)
    }
}
