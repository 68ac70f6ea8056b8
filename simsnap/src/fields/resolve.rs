//! Resolution of field requests against a catalog, with a single-slot memo.
//!
use std::sync::Arc;

use log::debug;

use crate::errors::{Error, Result};

use super::{FieldCatalog, FieldInfo, FieldKey, UNKNOWN};

/// The field type taxonomy of a dataset, as needed for guessing types.
///
pub(crate) struct FieldTypes<'a> {
    pub default_fluid_type: &'a str,
    pub fluid_types: &'a [String],
    pub particle_types: &'a [String],
}

impl FieldTypes<'_> {
    fn guesses(&self) -> impl Iterator<Item = &str> {
        ["all", self.default_fluid_type]
            .into_iter()
            .chain(self.fluid_types.iter().map(String::as_str))
            .chain(self.particle_types.iter().map(String::as_str))
    }
}

#[derive(Clone, Debug)]
struct Resolved {
    requested: FieldKey,
    key: FieldKey,
    info: Arc<FieldInfo>,
}

/// Remembers the most recent resolution.
///
/// Must be cleared whenever the catalog changes, or a stale definition can be returned.
///
#[derive(Debug, Default)]
pub(crate) struct FieldMemo {
    last: Option<Resolved>,
}

impl FieldMemo {
    pub fn clear(&mut self) {
        self.last = None;
    }

    /// The key and definition of the most recent resolution
    pub fn last(&self) -> Option<(FieldKey, Arc<FieldInfo>)> {
        self.last
            .as_ref()
            .map(|last| (last.key.clone(), Arc::clone(&last.info)))
    }

    /// Resolve `requested` to a field definition.
    ///
    /// A field type of `"unknown"` asks for the type to be guessed. Returns the effective key
    /// along with the definition, which for guessed types may differ from the definition's own
    /// name.
    ///
    pub fn resolve(
        &mut self,
        catalog: &dyn FieldCatalog,
        types: &FieldTypes,
        requested: FieldKey,
        dataset: &str,
    ) -> Result<(FieldKey, Arc<FieldInfo>)> {
        if let Some(last) = &self.last {
            if last.requested == requested {
                return Ok((last.key.clone(), Arc::clone(&last.info)));
            }
        }

        if let Some(info) = catalog.get(&requested) {
            return Ok(self.remember(requested.clone(), requested, info));
        }

        if requested.ftype != UNKNOWN {
            return Err(Error::FieldNotFound {
                field: requested,
                dataset: dataset.to_string(),
            });
        }

        if let Some(last) = &self.last {
            if last.key.fname == requested.fname {
                return Ok((last.key.clone(), Arc::clone(&last.info)));
            }
        }

        if let Some(info) = catalog.get_by_name(&requested.fname) {
            let last_type = self.last.as_ref().map(|last| last.key.ftype.as_str());
            let is_particle_type = |ftype: &str| types.particle_types.iter().any(|t| t == ftype);
            let is_fluid_type = |ftype: &str| {
                ftype == types.default_fluid_type || types.fluid_types.iter().any(|t| t == ftype)
            };

            let ftype = if info.particle_type && !last_type.map_or(false, is_particle_type) {
                String::from("all")
            } else if !info.particle_type && !last_type.map_or(false, is_fluid_type) {
                types.default_fluid_type.to_string()
            } else {
                info.name.ftype.clone()
            };
            let key = FieldKey::new(ftype, info.name.fname.clone());

            return Ok(self.remember(requested, key, info));
        }

        for ftype in types.guesses() {
            let key = FieldKey::new(ftype, requested.fname.clone());
            if let Some(info) = catalog.get(&key) {
                debug!("Guessed field type {ftype:?} for {:?}", requested.fname);
                return Ok(self.remember(requested, key, info));
            }
        }

        Err(Error::FieldNotFound {
            field: requested,
            dataset: dataset.to_string(),
        })
    }

    fn remember(
        &mut self,
        requested: FieldKey,
        key: FieldKey,
        info: Arc<FieldInfo>,
    ) -> (FieldKey, Arc<FieldInfo>) {
        self.last = Some(Resolved {
            requested,
            key: key.clone(),
            info: Arc::clone(&info),
        });

        (key, info)
    }
}
