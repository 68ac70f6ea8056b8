use std::collections::BTreeMap;
use std::sync::Arc;

use super::{FieldInfo, FieldKey};

/// Map from a field to the fields it depends on
pub type FieldDependencies = BTreeMap<FieldKey, Vec<FieldKey>>;

/// The catalog of field definitions known to a dataset.
///
/// The dataset populates the catalog and looks fields up in it but never decides itself how a
/// field is computed. `FieldInfoContainer` is the standard implementation; frontends may supply
/// their own.
///
pub trait FieldCatalog: Send {
    fn contains(&self, key: &FieldKey) -> bool;

    fn get(&self, key: &FieldKey) -> Option<Arc<FieldInfo>>;

    /// Look a field up by bare name.
    ///
    /// Returns `None` unless exactly one field in the catalog has that name.
    ///
    fn get_by_name(&self, fname: &str) -> Option<Arc<FieldInfo>>;

    /// All field keys, in no particular order
    fn keys(&self) -> Vec<FieldKey>;

    /// Add (or replace) a definition.
    fn add_field(&mut self, info: FieldInfo);

    /// Make `alias` another name for `target`. Returns `false` if `target` isn't in the catalog.
    fn alias(&mut self, alias: FieldKey, target: &FieldKey) -> bool;

    /// Install definitions for the non-particle fields in `field_list`, plus any standard fluid
    /// fields the catalog knows how to derive. Aliases of on-disk fields go in `alias_type`.
    ///
    fn setup_fluid_fields(
        &mut self,
        field_list: &[FieldKey],
        particle_types: &[String],
        alias_type: &str,
    );

    /// Install definitions for particle type `ptype`'s fields in `field_list`, plus standard
    /// particle and deposition fields for that type.
    ///
    fn setup_particle_fields(&mut self, ptype: &str, field_list: &[FieldKey]);

    /// Check that every derived field's dependencies can be met.
    ///
    /// Fields that can't be satisfied are dropped from the catalog and returned as the second
    /// element.
    ///
    fn check_derived_fields(&mut self) -> (FieldDependencies, Vec<FieldKey>);

    /// Dependencies of the given fields. Fields not in the catalog are left out.
    fn find_dependencies(&mut self, fields: &[FieldKey]) -> FieldDependencies;

    /// Load optional field plugins. Returns the names of the plugins loaded.
    fn load_all_plugins(&mut self) -> Vec<String>;
}
