//! The spatial index of a dataset, as far as field bookkeeping is concerned.
//!
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::{
    fields::{FieldCatalog, FieldInfo, FieldKey},
    particle_file::ParticleIo,
    particles::ParticleFilter,
};

/// The field lists an index keeps.
///
/// `field_list` is what the source holds; `derived_field_list` is everything the catalog can
/// provide once derived fields have been checked.
///
#[derive(Clone, Debug, Default)]
pub struct IndexFields {
    pub field_list: Vec<FieldKey>,
    pub derived_field_list: Vec<FieldKey>,
}

impl IndexFields {
    pub fn new(field_list: Vec<FieldKey>) -> Self {
        Self {
            field_list,
            derived_field_list: vec![],
        }
    }
}

pub trait Index: Send {
    fn fields(&self) -> &IndexFields;

    fn fields_mut(&mut self) -> &mut IndexFields;

    fn field_list(&self) -> &[FieldKey] {
        &self.fields().field_list
    }

    fn derived_field_list(&self) -> &[FieldKey] {
        &self.fields().derived_field_list
    }

    /// Add fields to both lists, skipping any already present.
    ///
    fn extend_field_list(&mut self, new_fields: &[FieldKey]) {
        let fields = self.fields_mut();
        for key in new_fields {
            if !fields.field_list.contains(key) {
                fields.field_list.push(key.clone());
            }
            if !fields.derived_field_list.contains(key) {
                fields.derived_field_list.push(key.clone());
            }
        }
    }

    fn reset_derived_field_list(&mut self) {
        self.fields_mut().derived_field_list.clear();
    }

    fn set_derived_field_list(&mut self, mut derived: Vec<FieldKey>) {
        derived.sort();
        self.fields_mut().derived_field_list = derived;
    }

    /// Set up catalog fields for new particle types. Returns the fields that were added.
    ///
    fn setup_particle_types(
        &mut self,
        ptypes: &[String],
        catalog: &mut dyn FieldCatalog,
    ) -> Vec<FieldKey> {
        let before: HashSet<FieldKey> = catalog.keys().into_iter().collect();
        for ptype in ptypes {
            catalog.setup_particle_fields(ptype, self.field_list());
        }

        let mut added: Vec<FieldKey> = catalog
            .keys()
            .into_iter()
            .filter(|key| !before.contains(key))
            .collect();
        added.sort();

        let fields = self.fields_mut();
        for key in &added {
            if !fields.derived_field_list.contains(key) {
                fields.derived_field_list.push(key.clone());
            }
        }

        added
    }

    /// Give a filtered particle type the fields of the type it filters.
    ///
    /// Returns `false`, changing nothing, if the filter's requirements aren't met or the
    /// filtered type has no fields.
    ///
    fn setup_filtered_type(
        &mut self,
        filter: &ParticleFilter,
        catalog: &mut dyn FieldCatalog,
    ) -> bool {
        if !filter.available(self.derived_field_list()) {
            return false;
        }

        let filtered = filter.filtered_fields(self.derived_field_list());
        if filtered.is_empty() {
            return false;
        }

        let mut new_fields = vec![];
        for (key, source) in filtered {
            let units = catalog
                .get(&source)
                .map(|info| info.units.clone())
                .unwrap_or_default();
            catalog.add_field(FieldInfo::derived(key.clone(), units, true, vec![source]));
            new_fields.push(key);
        }
        self.extend_field_list(&new_fields);

        true
    }

    /// Particle reader, for indexes over particle data
    fn io(&self) -> Option<Arc<dyn ParticleIo>> {
        None
    }

    /// Number of particles of each type
    fn count_particles(&self) -> BTreeMap<String, u64> {
        BTreeMap::new()
    }
}
