//! In-memory datasets.
//!
//! A `StreamFrontend` describes arrays the caller already holds: fluid fields on a uniform grid
//! and any number of particle types. Stream datasets never go through the identity cache and
//! are opened in two phases, so the caller can look at what the descriptor holds before
//! committing to the full construction.
//!
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use ndarray::{Array1, Zip};

use simsnap::{
    fields::{FieldCatalog, FieldInfoContainer, FieldKey, KnownField, KnownFields},
    units::{UnitRegistry, UnitValue},
    CodeUnits, Construction, CosmologyParameters, Dataset, DatasetContext, Error, Frontend,
    InMemoryIntrospection, Index, IndexFields, Parameters, ParticleFile, ParticleIo, Region,
    Result,
};

/// Field type of a stream's fluid fields
pub const STREAM_TYPE: &str = "stream";

const POSITION_FIELDS: [&str; 3] = [
    "particle_position_x",
    "particle_position_y",
    "particle_position_z",
];

static NEXT_STREAM: AtomicU64 = AtomicU64::new(0);

/// One array held by a stream, with its units.
///
#[derive(Clone, Debug, PartialEq)]
pub struct StreamField {
    pub data: Array1<f64>,
    pub units: String,
}

/// Describes in-memory data as a dataset.
///
pub struct StreamFrontend {
    fields: BTreeMap<FieldKey, StreamField>,
    domain_dimensions: Vec<usize>,
    left_edge: Array1<f64>,
    right_edge: Array1<f64>,
    sim_time: f64,
    length_unit: UnitValue,
    mass_unit: UnitValue,
    time_unit: UnitValue,
    velocity_unit: Option<UnitValue>,
    geometry: String,
    cosmology: Option<CosmologyParameters>,
    unique_identifier: String,
}

impl StreamFrontend {
    /// A stream over a uniform grid of `domain_dimensions` cells spanning the given edges.
    ///
    /// Code units default to cm, g and s.
    ///
    pub fn uniform_grid(
        domain_dimensions: &[usize],
        left_edge: Array1<f64>,
        right_edge: Array1<f64>,
    ) -> Self {
        let stream = NEXT_STREAM.fetch_add(1, Ordering::SeqCst);

        Self {
            fields: BTreeMap::new(),
            domain_dimensions: domain_dimensions.to_vec(),
            left_edge,
            right_edge,
            sim_time: 0.0,
            length_unit: UnitValue::new(1.0, "cm"),
            mass_unit: UnitValue::new(1.0, "g"),
            time_unit: UnitValue::new(1.0, "s"),
            velocity_unit: None,
            geometry: String::from("cartesian"),
            cosmology: None,
            unique_identifier: format!("stream-{}-{stream}", std::process::id()),
        }
    }

    /// Add a fluid field. It must have one value per grid cell.
    ///
    pub fn with_field<N, U>(mut self, fname: N, data: Array1<f64>, units: U) -> Result<Self>
    where
        N: Into<String>,
        U: Into<String>,
    {
        let key = FieldKey::new(STREAM_TYPE, fname);
        let cells: usize = self.domain_dimensions.iter().product();
        if data.len() != cells {
            return Err(Error::Frontend(format!(
                "field {key} has {} values, the grid has {cells} cells",
                data.len()
            )));
        }

        self.fields.insert(
            key,
            StreamField {
                data,
                units: units.into(),
            },
        );

        Ok(self)
    }

    /// Add a field of a particle type. All fields of a type must have the same length.
    ///
    pub fn with_particles<T, N, U>(
        mut self,
        ptype: T,
        fname: N,
        data: Array1<f64>,
        units: U,
    ) -> Result<Self>
    where
        T: Into<String>,
        N: Into<String>,
        U: Into<String>,
    {
        let key = FieldKey::new(ptype, fname);
        if key.ftype == STREAM_TYPE {
            return Err(Error::Frontend(format!(
                "{STREAM_TYPE:?} is reserved for fluid fields"
            )));
        }
        if let Some(count) = self.particle_counts().get(&key.ftype) {
            if *count != data.len() as u64 {
                return Err(Error::Frontend(format!(
                    "field {key} has {} values, other {} fields have {count}",
                    data.len(),
                    key.ftype
                )));
            }
        }

        self.fields.insert(
            key,
            StreamField {
                data,
                units: units.into(),
            },
        );

        Ok(self)
    }

    pub fn with_time(mut self, sim_time: f64) -> Self {
        self.sim_time = sim_time;
        self
    }

    pub fn with_units(mut self, length: UnitValue, mass: UnitValue, time: UnitValue) -> Self {
        self.length_unit = length;
        self.mass_unit = mass;
        self.time_unit = time;
        self
    }

    pub fn with_velocity_unit(mut self, velocity: UnitValue) -> Self {
        self.velocity_unit = Some(velocity);
        self
    }

    pub fn with_geometry<S: Into<String>>(mut self, geometry: S) -> Self {
        self.geometry = geometry.into();
        self
    }

    pub fn with_cosmology(mut self, cosmology: CosmologyParameters) -> Self {
        self.cosmology = Some(cosmology);
        self
    }

    /// Open the stream and run the full construction right away.
    ///
    pub fn load(self, context: &DatasetContext) -> Result<Arc<Dataset>> {
        context.open_from_descriptor(Arc::new(self))?.into_dataset()
    }

    /// Open the stream, deferring construction.
    ///
    pub fn open(self, context: &DatasetContext) -> Result<Construction> {
        context.open_from_descriptor(Arc::new(self))
    }

    pub fn field(&self, key: &FieldKey) -> Option<&StreamField> {
        self.fields.get(key)
    }

    fn particle_types(&self) -> Vec<String> {
        let mut ptypes: Vec<String> = vec![];
        for key in self.fields.keys() {
            if key.ftype != STREAM_TYPE && !ptypes.contains(&key.ftype) {
                ptypes.push(key.ftype.clone());
            }
        }

        ptypes
    }

    fn particle_counts(&self) -> BTreeMap<String, u64> {
        self.fields
            .iter()
            .filter(|(key, _)| key.ftype != STREAM_TYPE)
            .map(|(key, field)| (key.ftype.clone(), field.data.len() as u64))
            .collect()
    }

    fn known_fields(&self) -> KnownFields {
        let mut known = KnownFields::default();
        for (key, field) in &self.fields {
            if key.ftype == STREAM_TYPE {
                let fname = key.fname.as_str();
                known
                    .fluid
                    .push(KnownField::new(fname, field.units.as_str(), &[fname]));
            } else if !known.particle.iter().any(|known| known.name == key.fname) {
                known
                    .particle
                    .push(KnownField::new(key.fname.as_str(), field.units.as_str(), &[]));
            }
        }

        known
    }
}

impl Frontend for StreamFrontend {
    fn name(&self) -> &str {
        "stream"
    }

    fn parse_parameters(&self, _path: Option<&Path>) -> Result<Parameters> {
        let dimensions = self.domain_dimensions.len();
        if self.left_edge.len() != dimensions || self.right_edge.len() != dimensions {
            return Err(Error::Frontend(format!(
                "grid has {dimensions} dimensions, edges have {} and {}",
                self.left_edge.len(),
                self.right_edge.len()
            )));
        }

        Ok(Parameters {
            current_time: Some(UnitValue::new(self.sim_time, "code_time")),
            domain_dimensions: Some(self.domain_dimensions.clone()),
            domain_left_edge: Some(self.left_edge.clone()),
            domain_right_edge: Some(self.right_edge.clone()),
            geometry: self.geometry.clone(),
            cosmology: self.cosmology,
            dimensionality: dimensions,
            unique_identifier: Some(self.unique_identifier.clone()),
            particle_types: self.particle_types(),
            ..Parameters::default()
        })
    }

    fn code_units(
        &self,
        _parameters: &Parameters,
        _domain_width: &Array1<f64>,
        _registry: &UnitRegistry,
    ) -> Result<CodeUnits> {
        Ok(CodeUnits {
            length: self.length_unit.clone(),
            mass: self.mass_unit.clone(),
            time: self.time_unit.clone(),
            velocity: self.velocity_unit.clone(),
        })
    }

    fn skip_cache(&self) -> bool {
        true
    }

    fn create_index(&self, dataset: &Dataset) -> Result<Box<dyn Index>> {
        let io = StreamParticleIo::new(self);
        debug!(
            "Indexing stream {dataset}: {} fields, particles {:?}",
            self.fields.len(),
            io.counts
        );

        Ok(Box::new(StreamIndex {
            fields: IndexFields::new(self.fields.keys().cloned().collect()),
            io: Arc::new(io),
        }))
    }

    fn field_catalog(&self) -> Box<dyn FieldCatalog> {
        Box::new(FieldInfoContainer::new(self.known_fields()))
    }

    fn introspection(&self) -> Option<&dyn InMemoryIntrospection> {
        Some(self)
    }
}

impl InMemoryIntrospection for StreamFrontend {
    fn fields(&self) -> Vec<FieldKey> {
        self.fields.keys().cloned().collect()
    }

    fn is_particle_field(&self, field: &FieldKey) -> bool {
        field.ftype != STREAM_TYPE
    }
}

/// The index of a stream dataset.
///
pub struct StreamIndex {
    fields: IndexFields,
    io: Arc<StreamParticleIo>,
}

impl Index for StreamIndex {
    fn fields(&self) -> &IndexFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut IndexFields {
        &mut self.fields
    }

    fn io(&self) -> Option<Arc<dyn ParticleIo>> {
        let io: Arc<dyn ParticleIo> = self.io.clone();
        Some(io)
    }

    fn count_particles(&self) -> BTreeMap<String, u64> {
        self.io.counts.clone()
    }
}

/// Reads a stream's particles. A stream is a single particle file.
///
pub struct StreamParticleIo {
    counts: BTreeMap<String, u64>,

    /// x, y and z positions, for types that have all three
    positions: BTreeMap<String, [Array1<f64>; 3]>,
}

impl StreamParticleIo {
    fn new(stream: &StreamFrontend) -> Self {
        let mut positions = BTreeMap::new();
        for ptype in stream.particle_types() {
            let [x, y, z] = POSITION_FIELDS.map(|fname| stream.field(&FieldKey::new(&ptype, fname)));
            if let (Some(x), Some(y), Some(z)) = (x, y, z) {
                positions.insert(ptype, [x.data.clone(), y.data.clone(), z.data.clone()]);
            }
        }

        Self {
            counts: stream.particle_counts(),
            positions,
        }
    }

    fn inside(&self, ptype: &str, region: &Region) -> Option<Vec<bool>> {
        if region.left_edge.len() != 3 || region.right_edge.len() != 3 {
            return None;
        }
        let [x, y, z] = self.positions.get(ptype)?;
        let contains = |axis: usize, value: f64| {
            region.left_edge[axis] <= value && value < region.right_edge[axis]
        };

        let mut inside = vec![];
        Zip::from(x).and(y).and(z).for_each(|&x, &y, &z| {
            inside.push(contains(0, x) && contains(1, y) && contains(2, z));
        });

        Some(inside)
    }
}

impl ParticleIo for StreamParticleIo {
    fn count_particles(&self, _file: &ParticleFile) -> Result<BTreeMap<String, u64>> {
        Ok(self.counts.clone())
    }

    /// Indices of the particles inside `region`, for streams with a single particle type.
    ///
    fn select(&self, _file: &ParticleFile, region: &Region) -> Option<Vec<usize>> {
        if self.positions.len() != 1 {
            return None;
        }
        let ptype = self.positions.keys().next()?;
        let inside = self.inside(ptype, region)?;

        Some(
            inside
                .into_iter()
                .enumerate()
                .filter_map(|(index, inside)| inside.then_some(index))
                .collect(),
        )
    }

    fn count(&self, _file: &ParticleFile, region: &Region) -> Option<BTreeMap<String, u64>> {
        self.positions
            .keys()
            .map(|ptype| {
                let inside = self.inside(ptype, region)?;
                let count = inside.into_iter().filter(|inside| *inside).count();

                Some((ptype.clone(), count as u64))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn context() -> DatasetContext {
        DatasetContext::new(Arc::new(simsnap::Config::default()))
    }

    fn stream() -> Result<StreamFrontend> {
        StreamFrontend::uniform_grid(&[4, 4, 4], array![0.0, 0.0, 0.0], array![1.0, 1.0, 1.0])
            .with_time(2.0)
            .with_units(
                UnitValue::new(1.0, "kpc"),
                UnitValue::new(1.0, "Msun"),
                UnitValue::new(1.0, "Myr"),
            )
            .with_field("density", Array1::from_elem(64, 1.0), "code_mass/code_length**3")?
            .with_field("temperature", Array1::linspace(10.0, 1e4, 64), "K")?
            .with_particles("io", "particle_mass", array![1.0, 2.0, 3.0], "code_mass")?
            .with_particles("io", "particle_position_x", array![0.1, 0.5, 0.9], "code_length")?
            .with_particles("io", "particle_position_y", array![0.1, 0.5, 0.9], "code_length")?
            .with_particles("io", "particle_position_z", array![0.1, 0.5, 0.9], "code_length")
    }

    #[test]
    fn test_two_phase_construction() -> Result<()> {
        let context = context();
        let deferred = match stream()?.open(&context)? {
            Construction::Deferred(deferred) => deferred,
            Construction::Ready(_) => panic!("expected deferred construction"),
        };
        assert_eq!(deferred.fields().len(), 6);
        assert_eq!(deferred.particle_fields().len(), 4);

        let dataset = deferred.initialize()?;
        assert_eq!(dataset.basename(), simsnap::IN_MEMORY_BASENAME);
        assert_eq!(dataset.source_format(), "stream");
        assert!(context.cache.is_empty());

        let info = dataset.resolve("gas", "density")?;
        assert_eq!(info.units, "code_mass/code_length**3");
        assert_eq!(dataset.particle_types()?, vec!["io", "all"]);
        assert!((dataset.current_time().to_value("Myr")? - 2.0).abs() < 1e-12);

        Ok(())
    }

    #[test]
    fn test_streams_are_distinct() -> Result<()> {
        let context = context();
        let first = stream()?.load(&context)?;
        let second = stream()?.load(&context)?;
        assert_ne!(first, second);
        assert_ne!(first.content_hash(), second.content_hash());

        Ok(())
    }

    #[test]
    fn test_validation() -> Result<()> {
        let grid = || StreamFrontend::uniform_grid(&[4, 4, 4], array![0.0, 0.0, 0.0], array![1.0, 1.0, 1.0]);
        assert!(matches!(
            grid().with_field("density", Array1::zeros(10), "g/cm**3"),
            Err(Error::Frontend(_))
        ));
        assert!(matches!(
            grid().with_particles("stream", "particle_mass", Array1::zeros(3), "g"),
            Err(Error::Frontend(_))
        ));
        assert!(matches!(
            grid()
                .with_particles("io", "particle_mass", Array1::zeros(3), "g")?
                .with_particles("io", "particle_position_x", Array1::zeros(4), "cm"),
            Err(Error::Frontend(_))
        ));

        let flat = StreamFrontend::uniform_grid(&[4, 4, 4], array![0.0, 0.0], array![1.0, 1.0]);
        assert!(matches!(flat.load(&context()), Err(Error::Frontend(_))));

        Ok(())
    }

    #[test]
    fn test_particle_file() -> Result<()> {
        let dataset = stream()?.load(&context())?;
        assert_eq!(dataset.particle_count()?, BTreeMap::from([(String::from("io"), 3)]));

        let io = dataset.particle_io()?.unwrap();
        let file = ParticleFile::new(&dataset, &io, "stream", 0)?;
        assert_eq!(file.total_particles()["io"], 3);

        let region = Region {
            left_edge: array![0.0, 0.0, 0.0],
            right_edge: array![0.5, 1.0, 1.0],
        };
        assert_eq!(file.count(&region)?, Some(BTreeMap::from([(String::from("io"), 1)])));
        assert_eq!(file.select(&region)?, Some(vec![0]));

        let everything = Region {
            left_edge: array![0.0, 0.0, 0.0],
            right_edge: array![1.0, 1.0, 1.0],
        };
        assert_eq!(file.select(&everything)?, Some(vec![0, 1, 2]));

        let flat = Region {
            left_edge: array![0.0, 0.0],
            right_edge: array![1.0, 1.0],
        };
        assert_eq!(file.select(&flat)?, None);
        assert_eq!(file.count(&flat)?, None);

        Ok(())
    }
}
