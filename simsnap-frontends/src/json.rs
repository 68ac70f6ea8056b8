//! Datasets described by a JSON parameter file.
//!
//! The file holds the snapshot's parameters at the top level, its code units under `"units"`
//! and the fields it holds under `"fields"`. Anything else is kept as a free form parameter.
//!
//! ```json
//! {
//!     "current_time": 0.5,
//!     "domain_dimensions": [32, 32, 32],
//!     "domain_left_edge": [0.0, 0.0, 0.0],
//!     "domain_right_edge": [1.0, 1.0, 1.0],
//!     "particle_types": ["io"],
//!     "units": {"length": [1.0, "Mpc"], "mass": [1e10, "Msun"], "time": [1.0, "Gyr"]},
//!     "fields": [["enzo", "Density"], ["io", "particle_mass"]]
//! }
//! ```
//!
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use simsnap::{
    fields::{FieldCatalog, FieldInfoContainer, FieldKey, KnownField, KnownFields},
    units::{UnitRegistry, UnitValue},
    CodeUnits, CosmologyParameters, Dataset, DatasetContext, Error, Frontend, Index, IndexFields,
    Parameters, Result,
};

/// A number with its units, written as `[value, "units"]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Value(f64, String);

impl From<Value> for UnitValue {
    fn from(Value(value, units): Value) -> Self {
        UnitValue::new(value, units)
    }
}

/// The `"units"` section of a parameter file.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct JsonUnits {
    length: Value,
    mass: Value,
    time: Value,
    #[serde(default)]
    velocity: Option<Value>,
}

impl JsonUnits {
    fn code_units(self) -> CodeUnits {
        CodeUnits {
            length: self.length.into(),
            mass: self.mass.into(),
            time: self.time.into(),
            velocity: self.velocity.map(UnitValue::from),
        }
    }
}

fn default_geometry() -> String {
    String::from("cartesian")
}

fn default_refine_by() -> u32 {
    2
}

/// The parameter file, as written on disk.
///
#[derive(Debug, Deserialize)]
struct ParameterFile {
    current_time: Option<f64>,
    domain_dimensions: Option<Vec<usize>>,
    domain_left_edge: Option<Vec<f64>>,
    domain_right_edge: Option<Vec<f64>>,
    #[serde(default = "default_geometry")]
    geometry: String,
    cosmology: Option<CosmologyParameters>,
    #[serde(default = "default_refine_by")]
    refine_by: u32,
    dimensionality: Option<usize>,
    unique_identifier: Option<String>,
    #[serde(default)]
    particle_types: Vec<String>,

    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

/// Reads snapshots described by JSON parameter files.
///
/// Field units and aliases come from the frontend's known fields, not from the file.
///
pub struct JsonFrontend {
    known: KnownFields,
}

impl JsonFrontend {
    /// A frontend that knows the usual fluid and particle fields.
    ///
    pub fn new() -> Self {
        Self::with_known_fields(KnownFields {
            fluid: vec![
                KnownField::new("Density", "code_mass/code_length**3", &["density"]),
                KnownField::new("Temperature", "K", &["temperature"]),
                KnownField::new("x-velocity", "code_velocity", &["velocity_x"]),
                KnownField::new("y-velocity", "code_velocity", &["velocity_y"]),
                KnownField::new("z-velocity", "code_velocity", &["velocity_z"]),
                KnownField::new("Bx", "code_magnetic", &["magnetic_field_x"]),
            ],
            particle: vec![
                KnownField::new("particle_mass", "code_mass", &["mass"]),
                KnownField::new("particle_position_x", "code_length", &[]),
                KnownField::new("particle_position_y", "code_length", &[]),
                KnownField::new("particle_position_z", "code_length", &[]),
                KnownField::new("creation_time", "code_time", &[]),
            ],
            derived: vec![],
        })
    }

    pub fn with_known_fields(known: KnownFields) -> Self {
        Self { known }
    }

    /// Open the parameter file at `path`.
    ///
    pub fn open<P: AsRef<Path>>(path: P, context: &DatasetContext) -> Result<Arc<Dataset>> {
        context.open_from_path(path, Arc::new(Self::new()))
    }
}

impl Default for JsonFrontend {
    fn default() -> Self {
        Self::new()
    }
}

impl Frontend for JsonFrontend {
    fn name(&self) -> &str {
        "json"
    }

    fn parse_parameters(&self, path: Option<&Path>) -> Result<Parameters> {
        let path = path.ok_or_else(|| {
            Error::RuntimeMisuse(String::from("the json frontend reads from a path"))
        })?;
        debug!("Reading parameter file {path:?}");
        let reader = BufReader::new(File::open(path)?);
        let file: ParameterFile = serde_json::from_reader(reader)?;

        let dimensionality = file
            .dimensionality
            .or_else(|| file.domain_dimensions.as_ref().map(Vec::len))
            .unwrap_or(3);

        Ok(Parameters {
            current_time: file
                .current_time
                .map(|time| UnitValue::new(time, "code_time")),
            domain_dimensions: file.domain_dimensions,
            domain_left_edge: file.domain_left_edge.map(Array1::from),
            domain_right_edge: file.domain_right_edge.map(Array1::from),
            geometry: file.geometry,
            cosmology: file.cosmology,
            refine_by: file.refine_by,
            dimensionality,
            unique_identifier: file.unique_identifier,
            particle_types: file.particle_types,
            extra: file.extra,
        })
    }

    fn code_units(
        &self,
        parameters: &Parameters,
        _domain_width: &Array1<f64>,
        _registry: &UnitRegistry,
    ) -> Result<CodeUnits> {
        let units = parameters
            .extra
            .get("units")
            .ok_or(Error::MissingParameter("units"))?;
        let units: JsonUnits = serde_json::from_value(units.clone())?;

        Ok(units.code_units())
    }

    fn create_index(&self, dataset: &Dataset) -> Result<Box<dyn Index>> {
        let fields = match dataset.parameter("fields") {
            Some(fields) => serde_json::from_value::<Vec<(String, String)>>(fields.clone())?,
            None => vec![],
        };
        let field_list: Vec<FieldKey> = fields
            .into_iter()
            .map(|(ftype, fname)| FieldKey::new(ftype, fname))
            .collect();
        debug!("Indexed {dataset}: {} fields", field_list.len());

        Ok(Box::new(JsonIndex {
            fields: IndexFields::new(field_list),
        }))
    }

    fn field_catalog(&self) -> Box<dyn FieldCatalog> {
        Box::new(FieldInfoContainer::new(self.known.clone()))
    }
}

struct JsonIndex {
    fields: IndexFields,
}

impl Index for JsonIndex {
    fn fields(&self) -> &IndexFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut IndexFields {
        &mut self.fields
    }
}
