//! Registration of datasets with a metadata store.
//!
//! Registration is best effort: a dataset that can't be registered still opens. What gets
//! registered is a `MinimalRepresentation`, enough to find and reopen the dataset later.
//!
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{Error, Result},
    units::UnitValue,
};

/// The smallest description of a dataset that can be used to reopen it.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinimalRepresentation {
    /// Content hash of the dataset's identity, as a CID string
    pub hash: String,
    pub basename: String,
    pub directory: PathBuf,
    pub frontend: String,
    pub current_time: UnitValue,
    pub unique_identifier: Option<String>,
}

impl MinimalRepresentation {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.basename)
    }
}

pub trait MetadataStore: Send + Sync {
    fn register(&self, record: &MinimalRepresentation) -> Result<()>;
}

/// A store that isn't there. Registration always fails with `NoParameterShelf`.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStore;

impl MetadataStore for NullStore {
    fn register(&self, _record: &MinimalRepresentation) -> Result<()> {
        Err(Error::NoParameterShelf)
    }
}

/// A store that keeps records in memory, keyed by content hash.
///
/// Can be saved to and loaded from a JSON file.
///
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, MinimalRepresentation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &str) -> Option<MinimalRepresentation> {
        self.records.read().get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        let records = self.records.read();
        let mut records: Vec<&MinimalRepresentation> = records.values().collect();
        records.sort_by(|a, b| a.hash.cmp(&b.hash));
        serde_json::to_writer_pretty(writer, &records)?;

        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let records: Vec<MinimalRepresentation> = serde_json::from_reader(reader)?;
        let records = records
            .into_iter()
            .map(|record| (record.hash.clone(), record))
            .collect();

        Ok(Self {
            records: RwLock::new(records),
        })
    }
}

impl MetadataStore for MemoryStore {
    fn register(&self, record: &MinimalRepresentation) -> Result<()> {
        self.records
            .write()
            .insert(record.hash.clone(), record.clone());

        Ok(())
    }
}
