//! Anchor layout and the trilateration solve.

mod anchors;
pub mod solver;

pub use anchors::AnchorGeometry;
pub use solver::{solve, GeometryError, Point2};
