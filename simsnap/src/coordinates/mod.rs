//! Coordinate handlers, one per supported geometry.
//!
//! A handler knows the axes of its geometry and installs the index fields (cell positions,
//! widths, volume and path elements) that every dataset of that geometry has.
//!
use std::fmt;
use std::str::FromStr;

use crate::{
    errors::{Error, Result},
    fields::{FieldCatalog, FieldInfo, FieldKey},
};

mod cartesian;
mod cylindrical;
mod polar;

pub use cartesian::CartesianHandler;
pub use cylindrical::CylindricalHandler;
pub use polar::PolarHandler;

/// Field type of the fields installed by coordinate handlers
pub const INDEX_TYPE: &str = "index";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Geometry {
    Cartesian,
    Cylindrical,
    Polar,
}

impl FromStr for Geometry {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "cartesian" => Ok(Geometry::Cartesian),
            "cylindrical" => Ok(Geometry::Cylindrical),
            "polar" => Ok(Geometry::Polar),
            _ => Err(Error::GeometryNotSupported(name.to_string())),
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Geometry::Cartesian => "cartesian",
            Geometry::Cylindrical => "cylindrical",
            Geometry::Polar => "polar",
        };

        write!(f, "{name}")
    }
}

/// One coordinate axis.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Axis {
    pub name: &'static str,
    pub angular: bool,
}

impl Axis {
    const fn linear(name: &'static str) -> Self {
        Self {
            name,
            angular: false,
        }
    }

    const fn angular(name: &'static str) -> Self {
        Self {
            name,
            angular: true,
        }
    }

    fn units(&self) -> &'static str {
        if self.angular {
            "radian"
        } else {
            "code_length"
        }
    }
}

pub trait CoordinateHandler: Send + Sync {
    fn geometry(&self) -> Geometry;

    /// The axes, in index order
    fn axes(&self) -> [Axis; 3];

    /// Index of the radial axis, for geometries that have one
    fn radial_axis(&self) -> Option<usize> {
        None
    }

    /// Install this geometry's index fields into `catalog`.
    ///
    /// For each axis this is the cell position, the cell width `d<axis>` and the path element
    /// `path_element_<axis>`, plus `cell_volume`. Path elements along angular axes depend on the
    /// radius.
    ///
    fn setup_fields(&self, catalog: &mut dyn FieldCatalog) {
        let axes = self.axes();
        let radius = self
            .radial_axis()
            .map(|index| FieldKey::new(INDEX_TYPE, axes[index].name));

        for axis in axes {
            let position = FieldKey::new(INDEX_TYPE, axis.name);
            let width = FieldKey::new(INDEX_TYPE, format!("d{}", axis.name));
            catalog.add_field(FieldInfo::derived(position, axis.units(), false, vec![]));
            catalog.add_field(FieldInfo::derived(
                width.clone(),
                axis.units(),
                false,
                vec![],
            ));

            let mut dependencies = vec![width];
            if axis.angular {
                dependencies.extend(radius.clone());
            }
            catalog.add_field(FieldInfo::derived(
                FieldKey::new(INDEX_TYPE, format!("path_element_{}", axis.name)),
                "code_length",
                false,
                dependencies,
            ));
        }

        let mut dependencies: Vec<FieldKey> = axes
            .iter()
            .map(|axis| FieldKey::new(INDEX_TYPE, format!("d{}", axis.name)))
            .collect();
        dependencies.extend(radius);
        catalog.add_field(FieldInfo::derived(
            FieldKey::new(INDEX_TYPE, "cell_volume"),
            "code_length**3",
            false,
            dependencies,
        ));
    }
}

/// Pick the coordinate handler for a geometry name.
///
pub fn select(geometry: &str) -> Result<Box<dyn CoordinateHandler>> {
    let handler: Box<dyn CoordinateHandler> = match geometry.parse()? {
        Geometry::Cartesian => Box::new(CartesianHandler),
        Geometry::Cylindrical => Box::new(CylindricalHandler),
        Geometry::Polar => Box::new(PolarHandler),
    };

    Ok(handler)
}
