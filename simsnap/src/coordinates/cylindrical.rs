use super::{Axis, CoordinateHandler, Geometry};

/// Axes are `(r, z, theta)`.
///
pub struct CylindricalHandler;

impl CoordinateHandler for CylindricalHandler {
    fn geometry(&self) -> Geometry {
        Geometry::Cylindrical
    }

    fn axes(&self) -> [Axis; 3] {
        [Axis::linear("r"), Axis::linear("z"), Axis::angular("theta")]
    }

    fn radial_axis(&self) -> Option<usize> {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axes() {
        let handler = CylindricalHandler;
        let axes = handler.axes();
        assert_eq!(handler.radial_axis(), Some(0));
        assert_eq!(axes[0].units(), "code_length");
        assert_eq!(axes[2].units(), "radian");
    }
}
