use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use ndarray::Array1;

use crate::{
    dataset::Dataset,
    errors::{Error, Result},
    fields::FieldKey,
};

/// An axis aligned box in code units.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub left_edge: Array1<f64>,
    pub right_edge: Array1<f64>,
}

/// Reads particles from the files of one format.
///
/// Only counting is required; the rest default to doing nothing.
///
pub trait ParticleIo: Send + Sync {
    /// Number of particles of each type in `file`
    fn count_particles(&self, file: &ParticleFile) -> Result<BTreeMap<String, u64>>;

    /// Indices of the particles in `file` that fall inside `region`
    fn select(&self, _file: &ParticleFile, _region: &Region) -> Option<Vec<usize>> {
        None
    }

    /// Number of particles of each type in `file` that fall inside `region`
    fn count(&self, _file: &ParticleFile, _region: &Region) -> Option<BTreeMap<String, u64>> {
        None
    }

    fn calculate_offsets(&self, _file: &ParticleFile, _fields: &[FieldKey]) {}
}

/// One file of a particle dataset.
///
/// The reader is held weakly: it belongs to the dataset's index, and a file descriptor must not
/// keep it alive.
///
pub struct ParticleFile {
    dataset: Arc<Dataset>,
    io: Weak<dyn ParticleIo>,
    filename: PathBuf,
    file_id: usize,
    total_particles: BTreeMap<String, u64>,
}

impl ParticleFile {
    /// Describe a file and count its particles.
    ///
    pub fn new<P: AsRef<Path>>(
        dataset: &Arc<Dataset>,
        io: &Arc<dyn ParticleIo>,
        filename: P,
        file_id: usize,
    ) -> Result<Self> {
        let mut file = Self {
            dataset: Arc::clone(dataset),
            io: Arc::downgrade(io),
            filename: filename.as_ref().to_path_buf(),
            file_id,
            total_particles: BTreeMap::new(),
        };
        file.total_particles = io.count_particles(&file)?;

        Ok(file)
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn file_id(&self) -> usize {
        self.file_id
    }

    pub fn total_particles(&self) -> &BTreeMap<String, u64> {
        &self.total_particles
    }

    pub fn select(&self, region: &Region) -> Result<Option<Vec<usize>>> {
        Ok(self.io()?.select(self, region))
    }

    pub fn count(&self, region: &Region) -> Result<Option<BTreeMap<String, u64>>> {
        Ok(self.io()?.count(self, region))
    }

    pub fn calculate_offsets(&self, fields: &[FieldKey]) -> Result<()> {
        self.io()?.calculate_offsets(self, fields);

        Ok(())
    }

    fn io(&self) -> Result<Arc<dyn ParticleIo>> {
        self.io.upgrade().ok_or_else(|| {
            Error::RuntimeMisuse(format!(
                "the reader for {:?} has been dropped",
                self.filename
            ))
        })
    }
}
