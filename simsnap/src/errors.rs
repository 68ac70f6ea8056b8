use std::io;
use std::path::PathBuf;
use std::result;

use thiserror::Error;

use crate::fields::FieldKey;

#[derive(Debug, Error)]
pub enum Error {
    #[error("geometry {0:?} is not supported")]
    GeometryNotSupported(String),

    #[error("could not find field {field} in {dataset}")]
    FieldNotFound { field: FieldKey, dataset: String },

    #[error("missing {0} in parameter file definition")]
    MissingParameter(&'static str),

    #[error("{0}")]
    RuntimeMisuse(String),

    #[error("unit {0:?} is not in the registry")]
    UnitNotFound(String),

    #[error("unit {0:?} is already in the registry")]
    UnitExists(String),

    #[error("could not parse unit expression {expr:?}: {reason}")]
    UnitParse { expr: String, reason: String },

    #[error("{unit} has dimensions {found}, expected {expected}")]
    DimensionMismatch {
        unit: String,
        expected: String,
        found: String,
    },

    #[error("no parameter shelf is configured")]
    NoParameterShelf,

    #[error("dataset for {0:?} failed to load in another thread")]
    Load(PathBuf),

    #[error("frontend error: {0}")]
    Frontend(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Multihash(#[from] cid::multihash::Error),

    #[error(transparent)]
    IO(#[from] io::Error),
}

pub type Result<T> = result::Result<T, Error>;
