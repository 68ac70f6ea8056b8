use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{array, Array1};

use crate::{
    config::Config,
    dataset::{Dataset, DatasetContext},
    errors::{Error, Result},
    fields::{
        FieldCatalog, FieldInfo, FieldInfoContainer, FieldKey, KnownField, KnownFields,
    },
    frontend::{CodeUnits, CosmologyParameters, Frontend, InMemoryIntrospection, Parameters},
    index::{Index, IndexFields},
    units::{UnitRegistry, UnitValue},
};

/// Parameters of a small cartesian domain, twice as wide in x as in y and z.
///
pub(crate) fn parameters() -> Parameters {
    Parameters {
        current_time: Some(UnitValue::new(4.5, "code_time")),
        domain_dimensions: Some(vec![64, 32, 32]),
        domain_left_edge: Some(array![0.0, 0.0, 0.0]),
        domain_right_edge: Some(array![2.0, 1.0, 1.0]),
        particle_types: vec![String::from("io"), String::from("stars")],
        unique_identifier: Some(String::from("run-42")),
        ..Parameters::default()
    }
}

/// Fields held by the test frontend's sources
pub(crate) fn field_list() -> Vec<FieldKey> {
    vec![
        FieldKey::new("test", "Density"),
        FieldKey::new("test", "Temperature"),
        FieldKey::new("io", "particle_mass"),
        FieldKey::new("io", "particle_position_x"),
        FieldKey::new("io", "particle_velocity_x"),
        FieldKey::new("stars", "particle_mass"),
        FieldKey::new("stars", "particle_position_x"),
        FieldKey::new("stars", "creation_time"),
    ]
}

pub(crate) fn known_fields() -> KnownFields {
    KnownFields {
        fluid: vec![
            KnownField::new("Density", "code_mass/code_length**3", &["density"]),
            KnownField::new("Temperature", "K", &["temperature"]),
        ],
        particle: vec![
            KnownField::new("particle_mass", "code_mass", &["mass"]),
            KnownField::new("particle_position_x", "code_length", &[]),
            KnownField::new("particle_velocity_x", "code_velocity", &[]),
            KnownField::new("creation_time", "code_time", &[]),
        ],
        derived: vec![
            FieldInfo::derived(
                FieldKey::new("gas", "pressure"),
                "dyn/cm**2",
                false,
                vec![
                    FieldKey::new("gas", "density"),
                    FieldKey::new("gas", "temperature"),
                ],
            ),
            FieldInfo::derived(
                FieldKey::new("gas", "magnetic_energy"),
                "erg/cm**3",
                false,
                vec![FieldKey::new("gas", "magnetic_field_x")],
            ),
        ],
    }
}

fn install_metallicity(catalog: &mut FieldInfoContainer) {
    catalog.add_field(FieldInfo::derived(
        FieldKey::new("gas", "metallicity"),
        "",
        false,
        vec![FieldKey::new("gas", "density")],
    ));
}

/// A frontend whose sources are all the same small dataset.
///
pub(crate) struct TestFrontend {
    length: UnitValue,
    mass: UnitValue,
    time: UnitValue,
    velocity: Option<UnitValue>,
    cosmology: Option<CosmologyParameters>,
    parameters: Parameters,
    field_list: Vec<FieldKey>,
    skip_cache: bool,
    in_memory: bool,
    fail_parse: bool,
    parses: AtomicUsize,
}

impl TestFrontend {
    pub(crate) fn new() -> Self {
        Self {
            length: UnitValue::new(1.0, "kpc"),
            mass: UnitValue::new(1e10, "Msun"),
            time: UnitValue::new(1.0, "Myr"),
            velocity: None,
            cosmology: None,
            parameters: parameters(),
            field_list: field_list(),
            skip_cache: false,
            in_memory: false,
            fail_parse: false,
            parses: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_velocity(mut self, velocity: UnitValue) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub(crate) fn with_length(mut self, length: UnitValue) -> Self {
        self.length = length;
        self
    }

    pub(crate) fn with_cosmology(mut self, cosmology: CosmologyParameters) -> Self {
        self.cosmology = Some(cosmology);
        self
    }

    pub(crate) fn with_parameters<F>(mut self, modify: F) -> Self
    where
        F: FnOnce(&mut Parameters),
    {
        modify(&mut self.parameters);
        self
    }

    pub(crate) fn with_field_list(mut self, field_list: Vec<FieldKey>) -> Self {
        self.field_list = field_list;
        self
    }

    pub(crate) fn skipping_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub(crate) fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail_parse = true;
        self
    }

    /// Number of times parameters have been parsed
    pub(crate) fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}

impl Frontend for TestFrontend {
    fn name(&self) -> &str {
        "test"
    }

    fn parse_parameters(&self, _path: Option<&Path>) -> Result<Parameters> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        if self.fail_parse {
            return Err(Error::Frontend(String::from("corrupt header")));
        }

        let mut parameters = self.parameters.clone();
        parameters.cosmology = self.cosmology;

        Ok(parameters)
    }

    fn code_units(
        &self,
        _parameters: &Parameters,
        _domain_width: &Array1<f64>,
        _registry: &UnitRegistry,
    ) -> Result<CodeUnits> {
        Ok(CodeUnits {
            length: self.length.clone(),
            mass: self.mass.clone(),
            time: self.time.clone(),
            velocity: self.velocity.clone(),
        })
    }

    fn skip_cache(&self) -> bool {
        self.skip_cache
    }

    fn create_index(&self, _dataset: &Dataset) -> Result<Box<dyn Index>> {
        Ok(Box::new(TestIndex::new(self.field_list.clone())))
    }

    fn field_catalog(&self) -> Box<dyn FieldCatalog> {
        Box::new(
            FieldInfoContainer::new(known_fields()).with_plugin("metallicity", install_metallicity),
        )
    }

    fn introspection(&self) -> Option<&dyn InMemoryIntrospection> {
        if self.in_memory {
            Some(self)
        } else {
            None
        }
    }
}

impl InMemoryIntrospection for TestFrontend {
    fn fields(&self) -> Vec<FieldKey> {
        self.field_list.clone()
    }

    fn is_particle_field(&self, field: &FieldKey) -> bool {
        self.parameters.particle_types.contains(&field.ftype)
    }
}

/// An index that only keeps field lists.
///
pub(crate) struct TestIndex {
    fields: IndexFields,
}

impl TestIndex {
    pub(crate) fn new(field_list: Vec<FieldKey>) -> Self {
        Self {
            fields: IndexFields::new(field_list),
        }
    }
}

impl Index for TestIndex {
    fn fields(&self) -> &IndexFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut IndexFields {
        &mut self.fields
    }
}

/// A context with its own cache and the default configuration
pub(crate) fn context() -> DatasetContext {
    DatasetContext::new(Arc::new(Config::default()))
}

/// A dataset from the test frontend, opened as an in-memory descriptor.
///
pub(crate) fn dataset() -> Result<Arc<Dataset>> {
    dataset_from(TestFrontend::new())
}

pub(crate) fn dataset_from(frontend: TestFrontend) -> Result<Arc<Dataset>> {
    context().open_from_descriptor(Arc::new(frontend))?.into_dataset()
}
