//! The dataset: one simulation snapshot with its units, geometry and field catalog.
//!
//! Datasets are opened through a `DatasetContext`, which supplies the configuration, the
//! identity cache and the metadata store. `Dataset::open_from_path` and
//! `Dataset::open_from_descriptor` use the process wide context.
//!
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::hash::Hash;
use std::path::{self, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use cid::{multihash::MultihashGeneric, Cid};
use log::{debug, error, info, warn};
use multihash::{Hasher, Sha2_256};
use ndarray::Array1;
use parking_lot::Mutex;
use paste::paste;

use crate::{
    cache::DatasetCache,
    config::Config,
    coordinates::{self, CoordinateHandler},
    cosmology::CosmologyInfo,
    errors::{Error, Result},
    fields::{
        resolve::{FieldMemo, FieldTypes},
        FieldCatalog, FieldDependencies, FieldInfo, FieldKey, UNKNOWN,
    },
    frontend::{Frontend, Parameters},
    helpers::set_intersection,
    index::Index,
    particle_file::ParticleIo,
    particles::{FilterRegistry, FilterRequest, ParticleFilter, ParticleUnion},
    store::{MemoryStore, MetadataStore, MinimalRepresentation, NullStore},
    units::{
        binding::bind_cosmology, create_unit_registry, dimensions::LENGTH, dimensions::TIME,
        set_units, ArrayFactory, Quantity, QuantityFactory, Unit, UnitArray, UnitRegistry,
        UnitValue,
    },
};

/// The SHA_256 multicodec code
const SHA2_256: u64 = 0x12;

/// The raw binary multicodec code
const RAW: u64 = 0x55;

/// Basename given to datasets that don't come from a file
pub const IN_MEMORY_BASENAME: &str = "InMemoryParameterFile";

/// Particle type used when a source doesn't name any
pub const DEFAULT_PARTICLE_TYPE: &str = "io";

/// Units tried by `get_smallest_appropriate_unit`, largest first
const DISTANCE_UNITS: [&str; 7] = ["Mpc", "kpc", "pc", "au", "rsun", "km", "cm"];

/// Where datasets come from and where they go.
///
#[derive(Clone)]
pub struct DatasetContext {
    pub config: Arc<Config>,
    pub cache: Arc<DatasetCache>,
    pub store: Arc<dyn MetadataStore>,
}

impl DatasetContext {
    /// A context with its own, empty, identity cache and no metadata store.
    ///
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            cache: Arc::new(DatasetCache::new()),
            store: Arc::new(NullStore),
        }
    }

    /// The process wide context: global configuration and global identity cache.
    ///
    pub fn global() -> Self {
        Self {
            config: Config::global(),
            cache: DatasetCache::global(),
            store: Arc::new(NullStore),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = store;
        self
    }

    /// Open the dataset at `path`.
    ///
    /// If a dataset for the same normalized path is alive, it is returned and `frontend` is not
    /// used. Otherwise a new dataset is built and, unless the frontend or configuration says not
    /// to, cached under its path.
    ///
    pub fn open_from_path<P: AsRef<Path>>(
        &self,
        path: P,
        frontend: Arc<dyn Frontend>,
    ) -> Result<Arc<Dataset>> {
        let path = path::absolute(path.as_ref())?;
        if self.config.skip_dataset_cache || frontend.skip_cache() {
            return Ok(Arc::new(Dataset::build(Some(path), frontend, self)?));
        }

        self.cache.get_or_create(&path, || {
            Ok(Arc::new(Dataset::build(Some(path.clone()), frontend, self)?))
        })
    }

    /// Open an in-memory descriptor. The result is never cached.
    ///
    /// Frontends offering in-memory introspection get a deferred construction, completed with
    /// `DeferredDataset::initialize`.
    ///
    pub fn open_from_descriptor(&self, frontend: Arc<dyn Frontend>) -> Result<Construction> {
        if frontend.introspection().is_some() {
            return Ok(Construction::Deferred(DeferredDataset {
                frontend,
                context: self.clone(),
            }));
        }

        Ok(Construction::Ready(Arc::new(Dataset::build(
            None, frontend, self,
        )?)))
    }

    /// Reopen a dataset from its record in a metadata store.
    ///
    pub fn open_from_store(
        &self,
        store: &MemoryStore,
        hash: &str,
        frontend: Arc<dyn Frontend>,
    ) -> Result<Arc<Dataset>> {
        let record = store
            .get(hash)
            .ok_or_else(|| Error::RuntimeMisuse(format!("no dataset with hash {hash} in store")))?;

        self.open_from_path(record.path(), frontend)
    }
}

/// The outcome of opening a descriptor.
///
pub enum Construction {
    Ready(Arc<Dataset>),
    Deferred(DeferredDataset),
}

impl Construction {
    /// The dataset, initializing it first if construction was deferred.
    ///
    pub fn into_dataset(self) -> Result<Arc<Dataset>> {
        match self {
            Construction::Ready(dataset) => Ok(dataset),
            Construction::Deferred(deferred) => deferred.initialize(),
        }
    }
}

/// A descriptor that has been accepted but not initialized yet.
///
pub struct DeferredDataset {
    frontend: Arc<dyn Frontend>,
    context: DatasetContext,
}

impl DeferredDataset {
    pub fn frontend(&self) -> &Arc<dyn Frontend> {
        &self.frontend
    }

    /// The fields the descriptor holds data for
    pub fn fields(&self) -> Vec<FieldKey> {
        self.frontend
            .introspection()
            .map(|introspection| introspection.fields())
            .unwrap_or_default()
    }

    /// The descriptor's particle fields
    pub fn particle_fields(&self) -> Vec<FieldKey> {
        match self.frontend.introspection() {
            None => vec![],
            Some(introspection) => introspection
                .fields()
                .into_iter()
                .filter(|field| introspection.is_particle_field(field))
                .collect(),
        }
    }

    /// Run the full construction.
    ///
    pub fn initialize(self) -> Result<Arc<Dataset>> {
        Ok(Arc::new(Dataset::build(
            None,
            self.frontend,
            &self.context,
        )?))
    }
}

/// What makes two datasets the same dataset.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Identity {
    /// Normalized path, or basename for in-memory datasets
    source: String,
    current_time: String,
    unique_identifier: String,
}

impl Identity {
    fn new(
        source: String,
        current_time: Option<&UnitValue>,
        unique_identifier: Option<&str>,
    ) -> Self {
        let current_time = match current_time {
            Some(time) => format!("{} {}", time.value, time.units),
            None => String::from("none"),
        };

        Self {
            source,
            current_time,
            unique_identifier: unique_identifier.unwrap_or_default().to_string(),
        }
    }

    fn content_hash(&self) -> Result<Cid> {
        let mut hash = Sha2_256::default();
        hash.update(self.to_string().as_bytes());

        let digest = hash.finalize();
        let hash = MultihashGeneric::wrap(SHA2_256, digest)?;

        Ok(Cid::new_v1(RAW, hash))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{}",
            self.source, self.current_time, self.unique_identifier
        )
    }
}

/// Code units as bound for a dataset. Velocity is always known after binding.
///
struct BoundUnits {
    length: UnitValue,
    mass: UnitValue,
    time: UnitValue,
    velocity: UnitValue,
}

/// The parts of a dataset that change as fields and particle types are added.
///
struct Structure {
    index: Option<Box<dyn Index>>,
    catalog: Box<dyn FieldCatalog>,
    fluid_types: Vec<String>,
    particle_types: Vec<String>,
    particle_types_raw: Vec<String>,
    particle_unions: BTreeMap<String, ParticleUnion>,
    known_filters: BTreeMap<String, Option<ParticleFilter>>,
    filtered_particle_types: Vec<String>,
    field_dependencies: FieldDependencies,
    unloaded_fields: Vec<FieldKey>,
}

impl Structure {
    fn field_types<'a>(&'a self, default_fluid_type: &'a str) -> FieldTypes<'a> {
        FieldTypes {
            default_fluid_type,
            fluid_types: &self.fluid_types,
            particle_types: &self.particle_types,
        }
    }
}

/// One simulation snapshot.
///
/// Identity, units and domain are fixed at construction. The particle type taxonomy and the
/// field catalog can grow afterward, as unions and filters are added. The spatial index is
/// built on first use, by the frontend, and field info is created with it.
///
/// Structural changes (unions, filters, field additions) must not be made from several threads
/// at once on the same dataset.
///
pub struct Dataset {
    parameter_filename: Option<PathBuf>,
    basename: String,
    directory: PathBuf,
    fullpath: PathBuf,
    backup_filename: Option<PathBuf>,
    read_from_backup: bool,
    instantiated: SystemTime,
    min_level: u32,
    max_level: u32,

    frontend: Arc<dyn Frontend>,
    config: Arc<Config>,
    identity: Identity,
    content_hash: Cid,
    parameters: Parameters,
    coordinates: Box<dyn CoordinateHandler>,

    registry: Arc<UnitRegistry>,
    units: BoundUnits,
    cosmology: Option<CosmologyInfo>,
    current_time: Quantity,
    domain_dimensions: Vec<usize>,
    domain_left_edge: UnitArray,
    domain_right_edge: UnitArray,
    domain_width: UnitArray,
    domain_center: UnitArray,

    arr: OnceLock<ArrayFactory>,
    quan: OnceLock<QuantityFactory>,

    structure: Mutex<Structure>,
    memo: Mutex<FieldMemo>,
}

macro_rules! unit_accessors {
    ($($name:ident),*) => {
        paste! {
            $(
                #[doc = "The code " $name " unit as a quantity"]
                pub fn [<$name _unit>](&self) -> Result<Quantity> {
                    let unit = &self.units.$name;
                    self.quan().create(unit.value, &unit.units)
                }
            )*
        }
    };
}

impl Dataset {
    /// Open the dataset at `path` with the process wide context.
    ///
    pub fn open_from_path<P: AsRef<Path>>(
        path: P,
        frontend: Arc<dyn Frontend>,
    ) -> Result<Arc<Dataset>> {
        DatasetContext::global().open_from_path(path, frontend)
    }

    /// Open an in-memory descriptor with the process wide context.
    ///
    pub fn open_from_descriptor(frontend: Arc<dyn Frontend>) -> Result<Construction> {
        DatasetContext::global().open_from_descriptor(frontend)
    }

    fn build(
        path: Option<PathBuf>,
        frontend: Arc<dyn Frontend>,
        context: &DatasetContext,
    ) -> Result<Self> {
        let config = Arc::clone(&context.config);

        let (basename, directory) = match &path {
            Some(path) => (
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path.parent().map(Path::to_path_buf).unwrap_or_default(),
            ),
            None => (String::from(IN_MEMORY_BASENAME), PathBuf::from(".")),
        };
        let fullpath = path::absolute(&directory)?;

        let backup_filename = path.as_ref().map(|path| {
            let mut backup = path.clone().into_os_string();
            backup.push(&config.backup_suffix);
            PathBuf::from(backup)
        });
        let read_from_backup = backup_filename
            .as_ref()
            .map_or(false, |backup| backup.exists());

        let instantiated = SystemTime::now();
        let min_level = 0;

        let mut registry = create_unit_registry()?;
        let parameters = frontend.parse_parameters(path.as_deref())?;
        let coordinates = coordinates::select(&parameters.geometry)?;

        let source = match &path {
            Some(path) => path.to_string_lossy().into_owned(),
            None => basename.clone(),
        };
        let identity = Identity::new(
            source,
            parameters.current_time.as_ref(),
            parameters.unique_identifier.as_deref(),
        );
        let content_hash = identity.content_hash()?;

        let record = MinimalRepresentation {
            hash: content_hash.to_string(),
            basename: basename.clone(),
            directory: directory.clone(),
            frontend: frontend.name().to_string(),
            current_time: parameters
                .current_time
                .clone()
                .unwrap_or_else(|| UnitValue::new(0.0, "code_time")),
            unique_identifier: parameters.unique_identifier.clone(),
        };
        if let Err(err) = context.store.register(&record) {
            debug!("Could not register {basename} with the metadata store: {err}");
        }

        if config.log_key_parameters {
            log_key_parameters(&parameters);
        }

        let code_units = set_units(&mut registry, &parameters, frontend.as_ref())?;
        let registry = Arc::new(registry);
        let velocity = code_units.velocity.clone().ok_or_else(|| {
            Error::Frontend(String::from("velocity unit was not bound"))
        })?;
        let units = BoundUnits {
            length: code_units.length,
            mass: code_units.mass,
            time: code_units.time,
            velocity,
        };

        // Derived domain attributes, all against this dataset's own registry
        let cosmology = bind_cosmology(&parameters, &registry)?;
        let arr = ArrayFactory::new(&registry);
        let quan = QuantityFactory::new(&registry);

        let left = parameters
            .domain_left_edge
            .clone()
            .ok_or(Error::MissingParameter("domain_left_edge"))?;
        let right = parameters
            .domain_right_edge
            .clone()
            .ok_or(Error::MissingParameter("domain_right_edge"))?;
        let domain_width = arr.create(&right - &left, "code_length")?;
        let domain_center = arr.create((&left + &right) / 2.0, "code_length")?;
        let domain_left_edge = arr.create(left, "code_length")?;
        let domain_right_edge = arr.create(right, "code_length")?;

        let current_time = parameters
            .current_time
            .as_ref()
            .ok_or(Error::MissingParameter("current_time"))?;
        current_time.scale_in(&registry, TIME)?;
        let current_time = quan.create(current_time.value, &current_time.units)?;

        let domain_dimensions = parameters
            .domain_dimensions
            .clone()
            .ok_or(Error::MissingParameter("domain_dimensions"))?;

        let particle_types_raw = if parameters.particle_types.is_empty() {
            vec![String::from(DEFAULT_PARTICLE_TYPE)]
        } else {
            parameters.particle_types.clone()
        };

        let structure = Structure {
            index: None,
            catalog: frontend.field_catalog(),
            fluid_types: config.fluid_types.clone(),
            particle_types: particle_types_raw.clone(),
            particle_types_raw,
            particle_unions: BTreeMap::new(),
            known_filters: BTreeMap::new(),
            filtered_particle_types: vec![],
            field_dependencies: FieldDependencies::new(),
            unloaded_fields: vec![],
        };

        Ok(Self {
            parameter_filename: path,
            basename,
            directory,
            fullpath,
            backup_filename,
            read_from_backup,
            instantiated,
            min_level,
            max_level: config.max_level,
            frontend,
            config,
            identity,
            content_hash,
            parameters,
            coordinates,
            registry,
            units,
            cosmology,
            current_time,
            domain_dimensions,
            domain_left_edge,
            domain_right_edge,
            domain_width,
            domain_center,
            arr: OnceLock::new(),
            quan: OnceLock::new(),
            structure: Mutex::new(structure),
            memo: Mutex::new(FieldMemo::default()),
        })
    }

    /// Source file, or `None` for in-memory datasets
    pub fn parameter_filename(&self) -> Option<&Path> {
        self.parameter_filename.as_deref()
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Absolute path of the directory the dataset is in
    pub fn fullpath(&self) -> &Path {
        &self.fullpath
    }

    pub fn backup_filename(&self) -> Option<&Path> {
        self.backup_filename.as_deref()
    }

    /// Whether a backup file was found next to the source
    pub fn read_from_backup(&self) -> bool {
        self.read_from_backup
    }

    pub fn instantiated(&self) -> SystemTime {
        self.instantiated
    }

    pub fn min_level(&self) -> u32 {
        self.min_level
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Name of the frontend that read this dataset
    pub fn source_format(&self) -> &str {
        self.frontend.name()
    }

    pub fn frontend(&self) -> &Arc<dyn Frontend> {
        &self.frontend
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn unique_identifier(&self) -> Option<&str> {
        self.parameters.unique_identifier.as_deref()
    }

    pub fn geometry(&self) -> &str {
        &self.parameters.geometry
    }

    pub fn coordinates(&self) -> &dyn CoordinateHandler {
        self.coordinates.as_ref()
    }

    pub fn refine_by(&self) -> u32 {
        self.parameters.refine_by
    }

    pub fn dimensionality(&self) -> usize {
        self.parameters.dimensionality
    }

    pub fn domain_dimensions(&self) -> &[usize] {
        &self.domain_dimensions
    }

    pub fn domain_left_edge(&self) -> &UnitArray {
        &self.domain_left_edge
    }

    pub fn domain_right_edge(&self) -> &UnitArray {
        &self.domain_right_edge
    }

    pub fn domain_width(&self) -> &UnitArray {
        &self.domain_width
    }

    pub fn domain_center(&self) -> &UnitArray {
        &self.domain_center
    }

    pub fn current_time(&self) -> &Quantity {
        &self.current_time
    }

    pub fn cosmological_simulation(&self) -> bool {
        self.cosmology.is_some()
    }

    pub fn cosmology(&self) -> Option<&CosmologyInfo> {
        self.cosmology.as_ref()
    }

    pub fn current_redshift(&self) -> Option<f64> {
        self.cosmology.as_ref().map(|info| info.current_redshift)
    }

    pub fn unit_registry(&self) -> &Arc<UnitRegistry> {
        &self.registry
    }

    /// Factory for unit arrays bound to this dataset's registry
    pub fn arr(&self) -> &ArrayFactory {
        self.arr.get_or_init(|| ArrayFactory::new(&self.registry))
    }

    /// Factory for quantities bound to this dataset's registry
    pub fn quan(&self) -> &QuantityFactory {
        self.quan.get_or_init(|| QuantityFactory::new(&self.registry))
    }

    unit_accessors!(length, mass, time, velocity);

    /// Evaluate a unit expression against this dataset's registry.
    ///
    pub fn get_unit_from_registry(&self, expr: &str) -> Result<Unit> {
        Unit::new(expr, &self.registry)
    }

    /// A free form parameter from the source
    pub fn parameter(&self, key: &str) -> Option<&serde_json::Value> {
        self.parameters.extra.get(key)
    }

    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.extra.contains_key(key)
    }

    pub fn parameter_keys(&self) -> Vec<&str> {
        self.parameters.extra.keys().map(String::as_str).collect()
    }

    /// The largest of Mpc, kpc, pc, au, rsun, km and cm that is smaller than `length`.
    ///
    /// Falls back to cm for lengths of a centimeter or less.
    ///
    pub fn get_smallest_appropriate_unit(&self, length: &Quantity) -> Result<String> {
        if length.units().dimensions() != LENGTH {
            return Err(Error::DimensionMismatch {
                unit: length.units().to_string(),
                expected: LENGTH.to_string(),
                found: length.units().dimensions().to_string(),
            });
        }

        for unit in DISTANCE_UNITS {
            if self.quan().create(1.0, unit)?.in_base() < length.in_base() {
                return Ok(unit.to_string());
            }
        }

        Ok(String::from("cm"))
    }

    /// Number of refinement levels a factor of two in resolution corresponds to.
    ///
    /// Fails unless `refine_by` is a power of two.
    ///
    pub fn ires_factor(&self) -> Result<u32> {
        let refine_by = self.parameters.refine_by;
        if !refine_by.is_power_of_two() {
            return Err(Error::RuntimeMisuse(format!(
                "refine_by {refine_by} is not a power of two"
            )));
        }

        Ok(refine_by.trailing_zeros())
    }

    /// Ratio of cell sizes between levels `l0` and `l1`
    pub fn relative_refinement(&self, l0: i32, l1: i32) -> f64 {
        (self.parameters.refine_by as f64).powf(l1 as f64 - l0 as f64)
    }

    /// Content hash of the dataset's identity: path, current time and unique identifier.
    ///
    pub fn content_hash(&self) -> Cid {
        self.content_hash
    }

    pub fn minimal_representation(&self) -> MinimalRepresentation {
        MinimalRepresentation {
            hash: self.content_hash.to_string(),
            basename: self.basename.clone(),
            directory: self.directory.clone(),
            frontend: self.frontend.name().to_string(),
            current_time: UnitValue::new(
                self.current_time.value(),
                self.current_time.units().expr(),
            ),
            unique_identifier: self.parameters.unique_identifier.clone(),
        }
    }

    /// Run `f` against the structure and index, building the index first if needed.
    ///
    /// The frontend's `create_index` runs with the structure locked, so it must not call back
    /// into field or particle type methods of this dataset.
    ///
    fn with_index<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Structure, &mut dyn Index) -> Result<R>,
    {
        let mut structure = self.structure.lock();
        let mut index = match structure.index.take() {
            Some(index) => index,
            None => {
                let mut index = self.frontend.create_index(self)?;
                self.create_field_info_in(&mut *structure, index.as_mut())?;

                index
            }
        };

        let result = f(&mut *structure, index.as_mut());
        structure.index = Some(index);

        result
    }

    /// Build the index now, if it hasn't been built yet.
    ///
    pub fn index(&self) -> Result<()> {
        self.with_index(|_, _| Ok(()))
    }

    /// Rebuild the field catalog from the index's field list.
    ///
    pub fn create_field_info(&self) -> Result<()> {
        self.with_index(|structure, index| self.create_field_info_in(structure, index))
    }

    fn create_field_info_in(&self, structure: &mut Structure, index: &mut dyn Index) -> Result<()> {
        structure.field_dependencies.clear();
        structure.unloaded_fields.clear();
        structure.filtered_particle_types.clear();
        index.reset_derived_field_list();

        for key in index.field_list() {
            if !structure.particle_types.contains(&key.ftype)
                && !structure.fluid_types.contains(&key.ftype)
            {
                structure.fluid_types.push(key.ftype.clone());
            }
        }

        // Unions and filters from an earlier call are set up again below, not as plain types
        let unions: Vec<ParticleUnion> = structure.particle_unions.values().cloned().collect();
        let filters: Vec<ParticleFilter> =
            structure.known_filters.values().flatten().cloned().collect();
        let ptypes: Vec<String> = structure
            .particle_types
            .iter()
            .filter(|ptype| {
                !structure.particle_unions.contains_key(*ptype)
                    && !filters.iter().any(|filter| &filter.name == *ptype)
            })
            .cloned()
            .collect();

        let mut catalog = self.frontend.field_catalog();
        self.coordinates.setup_fields(catalog.as_mut());
        catalog.setup_fluid_fields(
            index.field_list(),
            &structure.particle_types,
            &self.config.default_fluid_type,
        );
        index.setup_particle_types(&ptypes, catalog.as_mut());
        structure.catalog = catalog;

        for union in unions {
            self.add_particle_union_in(structure, index, union);
        }
        if !structure.particle_types.iter().any(|ptype| ptype == "all") {
            debug!("Creating particle union 'all'");
            let union = ParticleUnion {
                name: String::from("all"),
                sub_types: structure.particle_types_raw.clone(),
            };
            if self.add_particle_union_in(structure, index, union) == 0 {
                debug!("Particle types of {self} have no fields in common");
            }
        }

        let (dependencies, unloaded) = structure.catalog.check_derived_fields();
        if !unloaded.is_empty() {
            let names: Vec<String> = unloaded.iter().map(FieldKey::to_string).collect();
            warn!(
                "Fields unavailable in {self}, missing dependencies: {}",
                names.join(", ")
            );
        }
        structure.field_dependencies.extend(dependencies);
        structure.unloaded_fields = unloaded;

        if self.config.load_field_plugins {
            debug!("Loading field plugins");
            let before: HashSet<FieldKey> = structure.catalog.keys().into_iter().collect();
            for plugin in structure.catalog.load_all_plugins() {
                debug!("Loaded field plugin {plugin}");
            }
            let added: Vec<FieldKey> = structure
                .catalog
                .keys()
                .into_iter()
                .filter(|key| !before.contains(key))
                .collect();
            let dependencies = structure.catalog.find_dependencies(&added);
            structure.field_dependencies.extend(dependencies);
        }
        index.set_derived_field_list(structure.catalog.keys());

        for filter in filters {
            if !self.setup_filtered_type(structure, index, &filter) {
                warn!("Particle filter {:?} no longer applies to {self}", filter.name);
            }
        }

        self.memo.lock().clear();

        Ok(())
    }

    /// Add a particle union. Returns the number of fields the union got.
    ///
    /// A union offers the fields common to all of its members that are raw particle types. The
    /// union's name is registered as a particle type even if it gets no fields.
    ///
    pub fn add_particle_union(&self, union: ParticleUnion) -> Result<usize> {
        self.with_index(|structure, index| Ok(self.add_particle_union_in(structure, index, union)))
    }

    fn add_particle_union_in(
        &self,
        structure: &mut Structure,
        index: &mut dyn Index,
        union: ParticleUnion,
    ) -> usize {
        let by_type = particle_fields_by_type(index.field_list(), &structure.particle_types);
        let members: Vec<HashSet<String>> = union
            .sub_types
            .iter()
            .filter(|ptype| structure.particle_types_raw.contains(ptype))
            .map(|ptype| {
                by_type
                    .get(ptype)
                    .map(|fnames| fnames.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .collect();
        let common = set_intersection(&members);

        if !structure.particle_types.contains(&union.name) {
            structure.particle_types.push(union.name.clone());
        }

        let fields: Vec<FieldKey> = common
            .iter()
            .map(|fname| FieldKey::new(&union.name, fname))
            .collect();
        let new_fields: Vec<FieldKey> = fields
            .iter()
            .filter(|key| !index.field_list().contains(key))
            .cloned()
            .collect();
        index.extend_field_list(&new_fields);
        let added = index.setup_particle_types(&[union.name.clone()], structure.catalog.as_mut());

        // Union fields take their members' units when the members agree
        for key in &fields {
            let units: BTreeSet<String> = union
                .sub_types
                .iter()
                .filter_map(|ptype| structure.catalog.get(&FieldKey::new(ptype, &key.fname)))
                .map(|info| info.units.clone())
                .collect();
            if units.len() != 1 {
                continue;
            }
            if let (Some(info), Some(units)) = (structure.catalog.get(key), units.into_iter().next())
            {
                let mut info = (*info).clone();
                info.units = units;
                structure.catalog.add_field(info);
            }
        }

        let dependencies = structure.catalog.find_dependencies(&added);
        structure.field_dependencies.extend(dependencies);
        debug!(
            "Created particle union {:?} of {:?} with {} fields",
            union.name,
            union.sub_types,
            new_fields.len()
        );
        structure.particle_unions.insert(union.name.clone(), union);
        self.memo.lock().clear();

        new_fields.len()
    }

    /// Add a particle filter, looking named filters up in the global filter registry.
    ///
    pub fn add_particle_filter<R: Into<FilterRequest>>(&self, request: R) -> Result<bool> {
        self.add_particle_filter_from(request, FilterRegistry::global())
    }

    /// Add a particle filter. Returns `false` if no candidate filter could be set up.
    ///
    /// A named request tries each definition registered under that name, in order, and uses
    /// the first whose requirements are met. Nothing is left behind by a failed attempt.
    ///
    pub fn add_particle_filter_from<R: Into<FilterRequest>>(
        &self,
        request: R,
        registry: &FilterRegistry,
    ) -> Result<bool> {
        let request = request.into();
        self.with_index(|structure, index| {
            let name = request.name().to_string();
            structure.known_filters.insert(name.clone(), None);

            let candidates = match request {
                FilterRequest::Named(name) => registry.candidates(&name),
                FilterRequest::Definition(filter) => vec![filter],
            };

            for filter in candidates {
                if self.setup_filtered_type(structure, index, &filter) {
                    structure.known_filters.remove(&name);
                    structure
                        .known_filters
                        .insert(filter.name.clone(), Some(filter));

                    return Ok(true);
                }
            }

            structure.known_filters.remove(&name);

            Ok(false)
        })
    }

    fn setup_filtered_type(
        &self,
        structure: &mut Structure,
        index: &mut dyn Index,
        filter: &ParticleFilter,
    ) -> bool {
        if !index.setup_filtered_type(filter, structure.catalog.as_mut()) {
            return false;
        }

        if !structure.particle_types.contains(&filter.name) {
            structure.particle_types.push(filter.name.clone());
        }
        structure.filtered_particle_types.push(filter.name.clone());

        let mut new_fields: Vec<FieldKey> = structure
            .catalog
            .keys()
            .into_iter()
            .filter(|key| key.ftype == filter.name)
            .collect();
        new_fields.extend(index.setup_particle_types(&[filter.name.clone()], structure.catalog.as_mut()));
        let dependencies = structure.catalog.find_dependencies(&new_fields);
        structure.field_dependencies.extend(dependencies);
        self.memo.lock().clear();

        true
    }

    /// Add a field definition to the catalog.
    ///
    pub fn add_field(&self, info: FieldInfo) -> Result<()> {
        self.with_index(|structure, index| {
            let key = info.name.clone();
            structure.catalog.add_field(info);
            let dependencies = structure.catalog.find_dependencies(&[key.clone()]);
            structure.field_dependencies.extend(dependencies);
            if !index.derived_field_list().contains(&key) {
                let mut derived = index.derived_field_list().to_vec();
                derived.push(key);
                index.set_derived_field_list(derived);
            }
            self.memo.lock().clear();

            Ok(())
        })
    }

    /// Alias old field names to new ones, for each `(old, new)` pair whose new name resolves.
    ///
    /// Aliases are made in the default fluid type. Returns the aliases added.
    ///
    pub fn setup_deprecated_fields(&self, aliases: &[(&str, &str)]) -> Result<Vec<FieldKey>> {
        self.with_index(|structure, _| {
            let mut added = vec![];
            for (old, new) in aliases {
                let target = match self.resolve_in(structure, FieldKey::new(UNKNOWN, *new)) {
                    Ok((_, info)) => info.name.clone(),
                    Err(_) => continue,
                };
                let alias = FieldKey::new(&self.config.default_fluid_type, *old);
                if structure.catalog.alias(alias.clone(), &target) {
                    added.push(alias);
                }
            }

            let dependencies = structure.catalog.find_dependencies(&added);
            structure.field_dependencies.extend(dependencies);
            self.memo.lock().clear();

            Ok(added)
        })
    }

    /// Resolve a field request to its definition.
    ///
    /// A field type of `"unknown"` asks for the type to be guessed.
    ///
    pub fn resolve(&self, ftype: &str, fname: &str) -> Result<Arc<FieldInfo>> {
        self.resolve_name(ftype, fname).map(|(_, info)| info)
    }

    /// Resolve a field request, returning the effective key along with the definition.
    ///
    pub fn resolve_name(&self, ftype: &str, fname: &str) -> Result<(FieldKey, Arc<FieldInfo>)> {
        self.with_index(|structure, _| self.resolve_in(structure, FieldKey::new(ftype, fname)))
    }

    fn resolve_in(
        &self,
        structure: &Structure,
        requested: FieldKey,
    ) -> Result<(FieldKey, Arc<FieldInfo>)> {
        let types = structure.field_types(&self.config.default_fluid_type);
        self.memo.lock().resolve(
            structure.catalog.as_ref(),
            &types,
            requested,
            &self.basename,
        )
    }

    /// The most recent resolution, if the catalog hasn't changed since
    pub fn last_resolved(&self) -> Option<(FieldKey, Arc<FieldInfo>)> {
        self.memo.lock().last()
    }

    pub fn has_field(&self, key: &FieldKey) -> Result<bool> {
        self.with_index(|structure, _| Ok(structure.catalog.contains(key)))
    }

    pub fn field_list(&self) -> Result<Vec<FieldKey>> {
        self.with_index(|_, index| Ok(index.field_list().to_vec()))
    }

    pub fn derived_field_list(&self) -> Result<Vec<FieldKey>> {
        self.with_index(|_, index| Ok(index.derived_field_list().to_vec()))
    }

    /// Field names of each particle type
    pub fn particle_fields_by_type(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.with_index(|structure, index| {
            Ok(particle_fields_by_type(
                index.field_list(),
                &structure.particle_types,
            ))
        })
    }

    /// All particle types, raw ones first, then unions and filters in the order added
    pub fn particle_types(&self) -> Result<Vec<String>> {
        self.with_index(|structure, _| Ok(structure.particle_types.clone()))
    }

    /// Particle types that come straight from the source
    pub fn particle_types_raw(&self) -> Vec<String> {
        self.structure.lock().particle_types_raw.clone()
    }

    pub fn fluid_types(&self) -> Result<Vec<String>> {
        self.with_index(|structure, _| Ok(structure.fluid_types.clone()))
    }

    pub fn particle_unions(&self) -> Result<BTreeMap<String, ParticleUnion>> {
        self.with_index(|structure, _| Ok(structure.particle_unions.clone()))
    }

    /// Filters that have been set up, by name
    pub fn known_filters(&self) -> Result<BTreeMap<String, ParticleFilter>> {
        self.with_index(|structure, _| {
            Ok(structure
                .known_filters
                .iter()
                .filter_map(|(name, filter)| {
                    filter.as_ref().map(|filter| (name.clone(), filter.clone()))
                })
                .collect())
        })
    }

    pub fn filtered_particle_types(&self) -> Result<Vec<String>> {
        self.with_index(|structure, _| Ok(structure.filtered_particle_types.clone()))
    }

    pub fn field_dependencies(&self) -> Result<FieldDependencies> {
        self.with_index(|structure, _| Ok(structure.field_dependencies.clone()))
    }

    /// Derived fields dropped because their dependencies couldn't be met
    pub fn unloaded_fields(&self) -> Result<Vec<FieldKey>> {
        self.with_index(|structure, _| Ok(structure.unloaded_fields.clone()))
    }

    /// Number of particles of each type, as counted by the index
    pub fn particle_count(&self) -> Result<BTreeMap<String, u64>> {
        self.with_index(|_, index| Ok(index.count_particles()))
    }

    /// The index's particle reader, if it has one
    pub fn particle_io(&self) -> Result<Option<Arc<dyn ParticleIo>>> {
        self.with_index(|_, index| Ok(index.io()))
    }
}

fn particle_fields_by_type(
    field_list: &[FieldKey],
    particle_types: &[String],
) -> BTreeMap<String, Vec<String>> {
    let mut by_type: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in field_list {
        if particle_types.contains(&key.ftype) {
            by_type
                .entry(key.ftype.clone())
                .or_default()
                .push(key.fname.clone());
        }
    }

    by_type
}

fn log_key_parameters(parameters: &Parameters) {
    fn log_parameter(name: &str, value: Option<String>) {
        match value {
            Some(value) => info!("Parameters: {name:<25} = {value}"),
            None => error!("Missing {name} in parameter file definition!"),
        }
    }

    fn show_edge(edge: Option<&Array1<f64>>) -> Option<String> {
        edge.map(|edge| edge.to_string())
    }

    log_parameter(
        "current_time",
        parameters
            .current_time
            .as_ref()
            .map(|time| format!("{} {}", time.value, time.units)),
    );
    log_parameter(
        "domain_dimensions",
        parameters
            .domain_dimensions
            .as_ref()
            .map(|dimensions| format!("{dimensions:?}")),
    );
    log_parameter("domain_left_edge", show_edge(parameters.domain_left_edge.as_ref()));
    log_parameter("domain_right_edge", show_edge(parameters.domain_right_edge.as_ref()));
    log_parameter(
        "cosmological_simulation",
        Some(parameters.cosmological_simulation().to_string()),
    );

    if let Some(cosmology) = &parameters.cosmology {
        log_parameter("current_redshift", Some(cosmology.current_redshift.to_string()));
        log_parameter("omega_lambda", Some(cosmology.omega_lambda.to_string()));
        log_parameter("omega_matter", Some(cosmology.omega_matter.to_string()));
        log_parameter("hubble_constant", Some(cosmology.hubble_constant.to_string()));
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for Dataset {}

impl Hash for Dataset {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.basename)
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("basename", &self.basename)
            .field("frontend", &self.frontend.name())
            .field("geometry", &self.parameters.geometry)
            .field("current_time", &self.current_time)
            .finish()
    }
}
