//! The seam between the core and concrete simulation formats.
//!
//! A `Frontend` knows how to read one kind of snapshot: it parses the parameters, decides what
//! the code units are, builds the spatial index and supplies the field catalog. Everything
//! format-specific lives behind this trait.
//!
use std::collections::BTreeMap;
use std::path::Path;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::{
    dataset::Dataset,
    errors::{Error, Result},
    fields::{FieldCatalog, FieldInfoContainer, FieldKey, KnownFields},
    index::Index,
    units::{UnitRegistry, UnitValue},
};

/// Parameters a frontend extracts from its source.
///
/// Domain edges and the current time are given in code units unless the `UnitValue` says
/// otherwise.
///
#[derive(Clone, Debug)]
pub struct Parameters {
    pub current_time: Option<UnitValue>,
    pub domain_dimensions: Option<Vec<usize>>,
    pub domain_left_edge: Option<Array1<f64>>,
    pub domain_right_edge: Option<Array1<f64>>,
    pub geometry: String,
    pub cosmology: Option<CosmologyParameters>,
    pub refine_by: u32,
    pub dimensionality: usize,

    /// Identifier distinguishing this snapshot from others with the same path and time
    pub unique_identifier: Option<String>,

    /// Particle types present in the source. Empty means the default `io` type.
    pub particle_types: Vec<String>,

    /// Free form parameters, accessible through `Dataset::parameter`
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            current_time: None,
            domain_dimensions: None,
            domain_left_edge: None,
            domain_right_edge: None,
            geometry: String::from("cartesian"),
            cosmology: None,
            refine_by: 2,
            dimensionality: 3,
            unique_identifier: None,
            particle_types: vec![],
            extra: BTreeMap::new(),
        }
    }
}

impl Parameters {
    pub fn cosmological_simulation(&self) -> bool {
        self.cosmology.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CosmologyParameters {
    pub current_redshift: f64,
    pub omega_matter: f64,
    pub omega_lambda: f64,
    pub hubble_constant: f64,
}

/// What a frontend reports as its code units.
///
/// `velocity` is optional; when absent the velocity unit is `length / time`.
///
#[derive(Clone, Debug, PartialEq)]
pub struct CodeUnits {
    pub length: UnitValue,
    pub mass: UnitValue,
    pub time: UnitValue,
    pub velocity: Option<UnitValue>,
}

/// Introspection offered by in-memory descriptors.
///
/// Frontends that return one of these from `Frontend::introspection` are opened in two phases:
/// `Dataset::open_from_descriptor` hands back a deferred construction that the caller completes
/// with `initialize`.
///
pub trait InMemoryIntrospection {
    /// All fields the descriptor holds data for
    fn fields(&self) -> Vec<FieldKey>;

    /// Whether a field holds particle data
    fn is_particle_field(&self, field: &FieldKey) -> bool;
}

pub trait Frontend: Send + Sync {
    /// Short tag for the format, e.g. `"stream"`
    fn name(&self) -> &str;

    /// Parse the source's parameters.
    ///
    /// `path` is the normalized source path, or `None` for in-memory descriptors.
    ///
    fn parse_parameters(&self, path: Option<&Path>) -> Result<Parameters>;

    /// Determine the length, mass and time units of the source.
    ///
    /// `domain_width` is in code units and is captured before the code units are rebound. The
    /// registry already holds the comoving units for cosmological datasets.
    ///
    fn code_units(
        &self,
        parameters: &Parameters,
        domain_width: &Array1<f64>,
        registry: &UnitRegistry,
    ) -> Result<CodeUnits>;

    /// Return `true` to keep datasets of this format out of the identity cache.
    fn skip_cache(&self) -> bool {
        false
    }

    /// Build the spatial index for a dataset.
    ///
    fn create_index(&self, _dataset: &Dataset) -> Result<Box<dyn Index>> {
        Err(Error::RuntimeMisuse(format!(
            "the {} frontend has no index type; it cannot be used for structural access",
            self.name()
        )))
    }

    /// Build an empty field catalog. The dataset fills it from the index's field list.
    ///
    fn field_catalog(&self) -> Box<dyn FieldCatalog> {
        Box::new(FieldInfoContainer::new(KnownFields::default()))
    }

    fn introspection(&self) -> Option<&dyn InMemoryIntrospection> {
        None
    }
}
