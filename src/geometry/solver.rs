//! Closed-form three-circle trilateration.
//!
//! Subtracting the circle equations of anchor pairs (1,2) and (2,3) cancels
//! the quadratic terms and leaves a 2x2 linear system:
//!
//! ```text
//! A·X + B·Y = C    A = 2(x2 - x1), B = 2(y2 - y1), C = r1² - r2² - x1² + x2² - y1² + y2²
//! D·X + E·Y = F    D = 2(x3 - x2), E = 2(y3 - y2), F = r2² - r3² - x2² + x3² - y2² + y3²
//! ```
//!
//! which is solved with Cramer's rule. Distances are taken as exact; there is
//! no least-squares refinement.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relative tolerance below which the system determinant counts as zero.
pub const DEGENERATE_TOLERANCE: f64 = 1e-9;

/// Planar coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// The anchor layout cannot produce a unique position.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeometryError {
    #[error("anchors are collinear or coincident (determinant {denominator:e})")]
    Degenerate { denominator: f64 },

    #[error("solve produced a non-finite position ({x}, {y})")]
    NonFinite { x: f64, y: f64 },
}

/// Left-hand coefficients `[A, B, D, E]` of the linear system.
fn coefficients(x: &[f64; 3], y: &[f64; 3]) -> [f64; 4] {
    [
        -2.0 * x[0] + 2.0 * x[1],
        -2.0 * y[0] + 2.0 * y[1],
        -2.0 * x[1] + 2.0 * x[2],
        -2.0 * y[1] + 2.0 * y[2],
    ]
}

/// Determinant of the linear system and the largest magnitude it can reach
/// for the same anchor spacing.
fn determinant([a, b, d, e]: [f64; 4]) -> (f64, f64) {
    (a * e - b * d, a.hypot(b) * d.hypot(e))
}

fn within_tolerance(denominator: f64, scale: f64) -> bool {
    !denominator.is_finite() || denominator.abs() <= DEGENERATE_TOLERANCE * scale
}

/// True when anchor segments 1-2 and 2-3 are parallel (sine of the angle
/// between them within tolerance) or either has zero length.
pub fn is_degenerate(x: &[f64; 3], y: &[f64; 3]) -> bool {
    let (denominator, scale) = determinant(coefficients(x, y));
    within_tolerance(denominator, scale)
}

/// Estimate the position whose distances to the three anchors are `r`.
///
/// `x` and `y` hold the anchor coordinates indexed like `r`.
pub fn solve(r: &[f64; 3], x: &[f64; 3], y: &[f64; 3]) -> Result<Point2, GeometryError> {
    let [a, b, d, e] = coefficients(x, y);
    let (denominator, scale) = determinant([a, b, d, e]);
    if within_tolerance(denominator, scale) {
        return Err(GeometryError::Degenerate { denominator });
    }

    let c = r[0].powi(2) - r[1].powi(2) - x[0].powi(2) + x[1].powi(2) - y[0].powi(2)
        + y[1].powi(2);
    let f = r[1].powi(2) - r[2].powi(2) - x[1].powi(2) + x[2].powi(2) - y[1].powi(2)
        + y[2].powi(2);

    let point = Point2::new(
        (c * e - f * b) / denominator,
        (a * f - c * d) / denominator,
    );
    if !point.is_finite() {
        return Err(GeometryError::NonFinite {
            x: point.x,
            y: point.y,
        });
    }
    Ok(point)
}
