use super::{Axis, CoordinateHandler, Geometry};

pub struct CartesianHandler;

impl CoordinateHandler for CartesianHandler {
    fn geometry(&self) -> Geometry {
        Geometry::Cartesian
    }

    fn axes(&self) -> [Axis; 3] {
        [Axis::linear("x"), Axis::linear("y"), Axis::linear("z")]
    }
}
