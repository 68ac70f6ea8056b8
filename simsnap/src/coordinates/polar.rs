use super::{Axis, CoordinateHandler, Geometry};

/// Axes are `(r, theta, z)`.
///
pub struct PolarHandler;

impl CoordinateHandler for PolarHandler {
    fn geometry(&self) -> Geometry {
        Geometry::Polar
    }

    fn axes(&self) -> [Axis; 3] {
        [Axis::linear("r"), Axis::angular("theta"), Axis::linear("z")]
    }

    fn radial_axis(&self) -> Option<usize> {
        Some(0)
    }
}
