//! Field definitions, the catalog that holds them, and name resolution against it.
//!
use std::fmt;

use serde::{Deserialize, Serialize};

mod catalog;
mod container;
pub(crate) mod resolve;

pub use catalog::{FieldCatalog, FieldDependencies};
pub use container::{FieldInfoContainer, FieldPlugin, KnownField, KnownFields};

/// The field type callers pass when they want the type guessed
pub const UNKNOWN: &str = "unknown";

/// A `(field_type, field_name)` pair, e.g. `("gas", "density")`.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub ftype: String,
    pub fname: String,
}

impl FieldKey {
    pub fn new<T, N>(ftype: T, fname: N) -> Self
    where
        T: Into<String>,
        N: Into<String>,
    {
        Self {
            ftype: ftype.into(),
            fname: fname.into(),
        }
    }
}

impl From<(&str, &str)> for FieldKey {
    fn from((ftype, fname): (&str, &str)) -> Self {
        Self::new(ftype, fname)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {:?})", self.ftype, self.fname)
    }
}

/// How a field gets its data.
///
/// The computation itself belongs to whoever reads the data; a definition only records what a
/// field depends on.
///
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    /// Read directly from the source
    OnDisk,

    /// Computed from other fields
    Derived { dependencies: Vec<FieldKey> },

    /// Another name for an existing field
    Alias(FieldKey),
}

/// The definition of a single field.
///
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub name: FieldKey,
    pub units: String,
    pub particle_type: bool,
    pub kind: FieldKind,
    pub display_name: Option<String>,
    pub take_log: bool,
}

impl FieldInfo {
    pub fn on_disk<S: Into<String>>(name: FieldKey, units: S, particle_type: bool) -> Self {
        Self {
            name,
            units: units.into(),
            particle_type,
            kind: FieldKind::OnDisk,
            display_name: None,
            take_log: true,
        }
    }

    pub fn derived<S: Into<String>>(
        name: FieldKey,
        units: S,
        particle_type: bool,
        dependencies: Vec<FieldKey>,
    ) -> Self {
        Self {
            name,
            units: units.into(),
            particle_type,
            kind: FieldKind::Derived { dependencies },
            display_name: None,
            take_log: true,
        }
    }

    /// A new name for `target`, sharing its units and domain.
    ///
    pub fn alias(name: FieldKey, target: &FieldInfo) -> Self {
        Self {
            name,
            units: target.units.clone(),
            particle_type: target.particle_type,
            kind: FieldKind::Alias(target.name.clone()),
            display_name: target.display_name.clone(),
            take_log: target.take_log,
        }
    }

    /// Fields this one needs to exist before it can be computed
    pub fn dependencies(&self) -> Vec<FieldKey> {
        match &self.kind {
            FieldKind::OnDisk => vec![],
            FieldKind::Derived { dependencies } => dependencies.clone(),
            FieldKind::Alias(target) => vec![target.clone()],
        }
    }

    pub fn is_derived(&self) -> bool {
        !matches!(self.kind, FieldKind::OnDisk)
    }
}
