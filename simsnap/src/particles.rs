//! Particle unions and particle filters.
//!
//! A union is a new particle type made of several existing ones; it offers the fields all of
//! its members have. A filter is a new particle type selecting from one existing type.
//!
use std::collections::BTreeMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::fields::FieldKey;

/// A named particle type that stands for several others.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticleUnion {
    pub name: String,
    pub sub_types: Vec<String>,
}

impl ParticleUnion {
    pub fn new<S: Into<String>>(name: S, sub_types: &[&str]) -> Self {
        Self {
            name: name.into(),
            sub_types: sub_types.iter().map(|ptype| ptype.to_string()).collect(),
        }
    }
}

/// A particle type derived from `filtered_type` by a selection.
///
/// `requires` names the fields of `filtered_type` the selection reads. The selection itself is
/// applied when data is read, so isn't part of the definition.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticleFilter {
    pub name: String,
    pub filtered_type: String,
    pub requires: Vec<String>,
}

impl ParticleFilter {
    pub fn new<N, T>(name: N, filtered_type: T, requires: &[&str]) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            filtered_type: filtered_type.into(),
            requires: requires.iter().map(|field| field.to_string()).collect(),
        }
    }

    /// Whether every required field exists in `field_list`.
    ///
    pub fn available(&self, field_list: &[FieldKey]) -> bool {
        self.requires.iter().all(|fname| {
            field_list
                .iter()
                .any(|key| key.ftype == self.filtered_type && &key.fname == fname)
        })
    }

    /// The fields the filtered type gets: one for each field of `filtered_type`.
    ///
    pub fn filtered_fields(&self, field_list: &[FieldKey]) -> Vec<(FieldKey, FieldKey)> {
        field_list
            .iter()
            .filter(|key| key.ftype == self.filtered_type)
            .map(|key| (FieldKey::new(self.name.clone(), key.fname.clone()), key.clone()))
            .collect()
    }
}

/// How a caller asks for a filter to be added to a dataset.
///
#[derive(Clone, Debug)]
pub enum FilterRequest {
    /// Look the name up in a filter registry and use the first candidate that works
    Named(String),

    /// Use this definition
    Definition(ParticleFilter),
}

impl From<&str> for FilterRequest {
    fn from(name: &str) -> Self {
        FilterRequest::Named(name.to_string())
    }
}

impl From<ParticleFilter> for FilterRequest {
    fn from(filter: ParticleFilter) -> Self {
        FilterRequest::Definition(filter)
    }
}

impl FilterRequest {
    pub fn name(&self) -> &str {
        match self {
            FilterRequest::Named(name) => name,
            FilterRequest::Definition(filter) => &filter.name,
        }
    }
}

/// Filter definitions by name. A name may have several candidate definitions.
///
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: RwLock<BTreeMap<String, Vec<ParticleFilter>>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process wide registry
    pub fn global() -> &'static FilterRegistry {
        static REGISTRY: OnceLock<FilterRegistry> = OnceLock::new();
        REGISTRY.get_or_init(FilterRegistry::new)
    }

    pub fn add_filter(&self, filter: ParticleFilter) {
        self.filters
            .write()
            .entry(filter.name.clone())
            .or_default()
            .push(filter);
    }

    /// Candidate definitions for `name`, in the order they were added
    pub fn candidates(&self, name: &str) -> Vec<ParticleFilter> {
        self.filters.read().get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_list() -> Vec<FieldKey> {
        vec![
            FieldKey::new("io", "particle_mass"),
            FieldKey::new("io", "particle_position_x"),
            FieldKey::new("stars", "particle_mass"),
        ]
    }

    #[test]
    fn test_available() {
        let filter = ParticleFilter::new("heavy", "io", &["particle_mass"]);
        assert!(filter.available(&field_list()));

        let filter = ParticleFilter::new("young", "io", &["creation_time"]);
        assert!(!filter.available(&field_list()));

        let filter = ParticleFilter::new("fast", "dm", &[]);
        assert!(filter.available(&field_list()));
    }

    #[test]
    fn test_filtered_fields() {
        let filter = ParticleFilter::new("heavy", "io", &["particle_mass"]);
        let fields = filter.filtered_fields(&field_list());
        assert_eq!(
            fields,
            vec![
                (
                    FieldKey::new("heavy", "particle_mass"),
                    FieldKey::new("io", "particle_mass")
                ),
                (
                    FieldKey::new("heavy", "particle_position_x"),
                    FieldKey::new("io", "particle_position_x")
                ),
            ]
        );
    }

    #[test]
    fn test_registry_candidates() {
        let registry = FilterRegistry::new();
        assert!(registry.candidates("heavy").is_empty());

        registry.add_filter(ParticleFilter::new("heavy", "dm", &[]));
        registry.add_filter(ParticleFilter::new("heavy", "io", &[]));
        let candidates = registry.candidates("heavy");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].filtered_type, "dm");
        assert_eq!(candidates[1].filtered_type, "io");
    }

    #[test]
    fn test_request_name() {
        assert_eq!(FilterRequest::from("heavy").name(), "heavy");
        let filter = ParticleFilter::new("light", "io", &[]);
        assert_eq!(FilterRequest::from(filter).name(), "light");
    }
}
