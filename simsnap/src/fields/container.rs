use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use log::debug;

use super::{FieldCatalog, FieldDependencies, FieldInfo, FieldKey};

/// A field a frontend knows the units and aliases of.
///
#[derive(Clone, Debug)]
pub struct KnownField {
    pub name: String,
    pub units: String,
    pub aliases: Vec<String>,
    pub display_name: Option<String>,
}

impl KnownField {
    pub fn new<N, U>(name: N, units: U, aliases: &[&str]) -> Self
    where
        N: Into<String>,
        U: Into<String>,
    {
        Self {
            name: name.into(),
            units: units.into(),
            aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
            display_name: None,
        }
    }
}

/// What a frontend knows about the fields its sources can contain.
///
/// `derived` holds extra fluid field definitions installed by `setup_fluid_fields`. Their
/// dependencies are checked later by `check_derived_fields`.
///
#[derive(Clone, Debug, Default)]
pub struct KnownFields {
    pub fluid: Vec<KnownField>,
    pub particle: Vec<KnownField>,
    pub derived: Vec<FieldInfo>,
}

impl KnownFields {
    fn fluid(&self, fname: &str) -> Option<&KnownField> {
        self.fluid.iter().find(|known| known.name == fname)
    }

    fn particle(&self, fname: &str) -> Option<&KnownField> {
        self.particle.iter().find(|known| known.name == fname)
    }
}

/// An optional set of field definitions, installed by `load_all_plugins`.
///
#[derive(Clone)]
pub struct FieldPlugin {
    pub name: String,
    pub install: fn(&mut FieldInfoContainer),
}

impl fmt::Debug for FieldPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldPlugin")
            .field("name", &self.name)
            .finish()
    }
}

/// The standard field catalog.
///
/// On-disk fields get their units and aliases from `KnownFields`. Fluid aliases are made in the
/// alias type given to `setup_fluid_fields`; particle aliases stay in their particle type.
///
#[derive(Debug)]
pub struct FieldInfoContainer {
    fields: HashMap<FieldKey, Arc<FieldInfo>>,
    known: KnownFields,
    plugins: Vec<FieldPlugin>,
    loaded_plugins: HashSet<String>,
}

impl FieldInfoContainer {
    pub fn new(known: KnownFields) -> Self {
        Self {
            fields: HashMap::new(),
            known,
            plugins: vec![],
            loaded_plugins: HashSet::new(),
        }
    }

    pub fn with_plugin<S: Into<String>>(
        mut self,
        name: S,
        install: fn(&mut FieldInfoContainer),
    ) -> Self {
        self.plugins.push(FieldPlugin {
            name: name.into(),
            install,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn add_output_field(&mut self, key: &FieldKey, known: Option<&KnownField>, particle: bool) {
        let units = known.map(|known| known.units.as_str()).unwrap_or("");
        let mut info = FieldInfo::on_disk(key.clone(), units, particle);
        info.display_name = known.and_then(|known| known.display_name.clone());
        self.add_field(info);
    }
}

impl FieldCatalog for FieldInfoContainer {
    fn contains(&self, key: &FieldKey) -> bool {
        self.fields.contains_key(key)
    }

    fn get(&self, key: &FieldKey) -> Option<Arc<FieldInfo>> {
        self.fields.get(key).cloned()
    }

    fn get_by_name(&self, fname: &str) -> Option<Arc<FieldInfo>> {
        let mut found = self.fields.values().filter(|info| info.name.fname == fname);
        let first = found.next()?;
        match found.next() {
            Some(_) => None,
            None => Some(Arc::clone(first)),
        }
    }

    fn keys(&self) -> Vec<FieldKey> {
        self.fields.keys().cloned().collect()
    }

    fn add_field(&mut self, info: FieldInfo) {
        self.fields.insert(info.name.clone(), Arc::new(info));
    }

    fn alias(&mut self, alias: FieldKey, target: &FieldKey) -> bool {
        match self.fields.get(target) {
            None => false,
            Some(target) => {
                let info = FieldInfo::alias(alias, target);
                self.add_field(info);

                true
            }
        }
    }

    fn setup_fluid_fields(
        &mut self,
        field_list: &[FieldKey],
        particle_types: &[String],
        alias_type: &str,
    ) {
        let mut field_list: Vec<&FieldKey> = field_list
            .iter()
            .filter(|key| !particle_types.contains(&key.ftype))
            .collect();
        field_list.sort();

        for key in field_list {
            let known = self.known.fluid(&key.fname).cloned();
            self.add_output_field(key, known.as_ref(), false);
            if let Some(known) = known {
                for alias in known.aliases {
                    let alias = FieldKey::new(alias_type, alias);
                    self.alias(alias, key);
                }
            }
        }

        for info in self.known.derived.clone() {
            self.add_field(info);
        }
    }

    fn setup_particle_fields(&mut self, ptype: &str, field_list: &[FieldKey]) {
        let mut field_list: Vec<&FieldKey> =
            field_list.iter().filter(|key| key.ftype == ptype).collect();
        field_list.sort();

        for key in &field_list {
            if self.contains(key) {
                continue;
            }
            let known = self.known.particle(&key.fname).cloned();
            self.add_output_field(key, known.as_ref(), true);
            if let Some(known) = known {
                for alias in known.aliases {
                    self.alias(FieldKey::new(ptype, alias), key);
                }
            }
        }

        let ones = FieldKey::new(ptype, "particle_ones");
        self.add_field(FieldInfo::derived(ones.clone(), "", true, vec![]));
        self.add_field(FieldInfo::derived(
            FieldKey::new("deposit", format!("{ptype}_count")),
            "",
            false,
            vec![ones],
        ));

        let mass = FieldKey::new(ptype, "particle_mass");
        if self.contains(&mass) {
            self.add_field(FieldInfo::derived(
                FieldKey::new("deposit", format!("{ptype}_density")),
                "g/cm**3",
                false,
                vec![mass],
            ));
        }
    }

    fn check_derived_fields(&mut self) -> (FieldDependencies, Vec<FieldKey>) {
        let mut unavailable = vec![];

        // Dropping a field can strand others that depend on it, so repeat until nothing changes.
        loop {
            let mut dropped = vec![];
            let mut derived: Vec<&Arc<FieldInfo>> =
                self.fields.values().filter(|info| info.is_derived()).collect();
            derived.sort_by(|a, b| a.name.cmp(&b.name));
            for info in derived {
                if info
                    .dependencies()
                    .iter()
                    .any(|dependency| !self.fields.contains_key(dependency))
                {
                    dropped.push(info.name.clone());
                }
            }

            if dropped.is_empty() {
                break;
            }

            for key in &dropped {
                debug!("Dropping field {key}, its dependencies are unavailable");
                self.fields.remove(key);
            }
            unavailable.extend(dropped);
        }

        let dependencies: BTreeMap<FieldKey, Vec<FieldKey>> = self
            .fields
            .values()
            .map(|info| (info.name.clone(), info.dependencies()))
            .collect();
        unavailable.sort();

        (dependencies, unavailable)
    }

    fn find_dependencies(&mut self, fields: &[FieldKey]) -> FieldDependencies {
        fields
            .iter()
            .filter_map(|key| self.fields.get(key))
            .map(|info| (info.name.clone(), info.dependencies()))
            .collect()
    }

    fn load_all_plugins(&mut self) -> Vec<String> {
        let mut loaded = vec![];
        for plugin in self.plugins.clone() {
            if self.loaded_plugins.insert(plugin.name.clone()) {
                (plugin.install)(self);
                loaded.push(plugin.name);
            }
        }

        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> KnownFields {
        KnownFields {
            fluid: vec![
                KnownField::new("Density", "code_mass/code_length**3", &["density"]),
                KnownField::new("Temperature", "K", &["temperature"]),
            ],
            particle: vec![
                KnownField::new("particle_mass", "code_mass", &["mass"]),
                KnownField::new("particle_position_x", "code_length", &[]),
            ],
            derived: vec![
                FieldInfo::derived(
                    FieldKey::new("gas", "pressure"),
                    "dyn/cm**2",
                    false,
                    vec![
                        FieldKey::new("gas", "density"),
                        FieldKey::new("gas", "temperature"),
                    ],
                ),
                FieldInfo::derived(
                    FieldKey::new("gas", "entropy"),
                    "",
                    false,
                    vec![FieldKey::new("gas", "pressure")],
                ),
            ],
        }
    }

    fn field_list() -> Vec<FieldKey> {
        vec![
            FieldKey::new("enzo", "Density"),
            FieldKey::new("io", "particle_mass"),
            FieldKey::new("io", "particle_position_x"),
        ]
    }

    #[test]
    fn test_setup_fluid_fields() {
        let mut catalog = FieldInfoContainer::new(known());
        catalog.setup_fluid_fields(&field_list(), &[String::from("io")], "gas");

        let density = catalog.get(&FieldKey::new("enzo", "Density")).unwrap();
        assert_eq!(density.units, "code_mass/code_length**3");
        assert!(!density.particle_type);
        assert!(!catalog.contains(&FieldKey::new("io", "particle_mass")));

        let alias = catalog.get(&FieldKey::new("gas", "density")).unwrap();
        assert_eq!(alias.units, density.units);
        assert_eq!(alias.dependencies(), vec![FieldKey::new("enzo", "Density")]);

        assert!(catalog.contains(&FieldKey::new("gas", "pressure")));
    }

    #[test]
    fn test_fluid_alias_type() {
        let mut catalog = FieldInfoContainer::new(known());
        catalog.setup_fluid_fields(&field_list(), &[String::from("io")], "fluid");
        assert!(catalog.contains(&FieldKey::new("fluid", "density")));
        assert!(!catalog.contains(&FieldKey::new("gas", "density")));
    }

    #[test]
    fn test_setup_particle_fields() {
        let mut catalog = FieldInfoContainer::new(known());
        catalog.setup_particle_fields("io", &field_list());

        let mass = catalog.get(&FieldKey::new("io", "particle_mass")).unwrap();
        assert!(mass.particle_type);
        assert_eq!(mass.units, "code_mass");
        assert!(catalog.contains(&FieldKey::new("io", "mass")));
        assert!(catalog.contains(&FieldKey::new("io", "particle_ones")));
        assert!(catalog.contains(&FieldKey::new("deposit", "io_count")));
        assert!(catalog.contains(&FieldKey::new("deposit", "io_density")));
        assert!(!catalog.contains(&FieldKey::new("enzo", "Density")));

        let count = catalog.get(&FieldKey::new("deposit", "io_count")).unwrap();
        assert!(!count.particle_type);
    }

    #[test]
    fn test_no_deposit_density_without_mass() {
        let mut catalog = FieldInfoContainer::new(known());
        let field_list = vec![FieldKey::new("dm", "particle_position_x")];
        catalog.setup_particle_fields("dm", &field_list);
        assert!(catalog.contains(&FieldKey::new("deposit", "dm_count")));
        assert!(!catalog.contains(&FieldKey::new("deposit", "dm_density")));
    }

    #[test]
    fn test_get_by_name() {
        let mut catalog = FieldInfoContainer::new(known());
        catalog.setup_fluid_fields(&field_list(), &[String::from("io")], "gas");
        catalog.setup_particle_fields("io", &field_list());

        let density = catalog.get_by_name("Density").unwrap();
        assert_eq!(density.name, FieldKey::new("enzo", "Density"));
        assert!(catalog.get_by_name("nothing").is_none());

        catalog.add_field(FieldInfo::on_disk(FieldKey::new("other", "Density"), "", false));
        assert!(catalog.get_by_name("Density").is_none());
    }

    #[test]
    fn test_alias_missing_target() {
        let mut catalog = FieldInfoContainer::new(known());
        assert!(!catalog.alias(FieldKey::new("gas", "x"), &FieldKey::new("gas", "y")));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_check_derived_fields() {
        let mut catalog = FieldInfoContainer::new(known());
        catalog.setup_fluid_fields(&field_list(), &[String::from("io")], "gas");

        // Temperature isn't on disk, so pressure goes and takes entropy with it
        let (dependencies, unavailable) = catalog.check_derived_fields();
        assert_eq!(
            unavailable,
            vec![
                FieldKey::new("gas", "entropy"),
                FieldKey::new("gas", "pressure")
            ]
        );
        assert!(!catalog.contains(&FieldKey::new("gas", "pressure")));
        assert!(!catalog.contains(&FieldKey::new("gas", "entropy")));
        assert_eq!(
            dependencies[&FieldKey::new("gas", "density")],
            vec![FieldKey::new("enzo", "Density")]
        );
    }

    #[test]
    fn test_check_derived_fields_satisfied() {
        let mut catalog = FieldInfoContainer::new(known());
        let mut field_list = field_list();
        field_list.push(FieldKey::new("enzo", "Temperature"));
        catalog.setup_fluid_fields(&field_list, &[String::from("io")], "gas");

        let (dependencies, unavailable) = catalog.check_derived_fields();
        assert!(unavailable.is_empty());
        assert_eq!(
            dependencies[&FieldKey::new("gas", "entropy")],
            vec![FieldKey::new("gas", "pressure")]
        );

        let found = catalog.find_dependencies(&[
            FieldKey::new("gas", "pressure"),
            FieldKey::new("gas", "missing"),
        ]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[&FieldKey::new("gas", "pressure")].len(), 2);
    }

    fn install_metallicity(catalog: &mut FieldInfoContainer) {
        catalog.add_field(FieldInfo::on_disk(
            FieldKey::new("gas", "metallicity"),
            "Zsun",
            false,
        ));
    }

    #[test]
    fn test_load_all_plugins() {
        let mut catalog =
            FieldInfoContainer::new(known()).with_plugin("metallicity", install_metallicity);
        assert_eq!(catalog.load_all_plugins(), vec![String::from("metallicity")]);
        assert!(catalog.contains(&FieldKey::new("gas", "metallicity")));

        // Loading again is a no-op
        assert!(catalog.load_all_plugins().is_empty());
    }
}
