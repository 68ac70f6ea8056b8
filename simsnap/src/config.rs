use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Environment variable naming a JSON configuration file
pub const CONFIG_VAR: &str = "SIMSNAP_CONFIG";

static GLOBAL_CONFIG: OnceLock<Arc<Config>> = OnceLock::new();

/// Library wide settings.
///
/// Missing keys take their default values, so a configuration file only needs the settings it
/// changes.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Never put datasets opened from paths into the identity cache
    pub skip_dataset_cache: bool,

    /// Suffix of the sibling file a dataset may have been backed up to
    pub backup_suffix: String,

    /// Log key parameters at info level when a dataset is opened
    pub log_key_parameters: bool,

    /// Load field plugins when field info is created
    pub load_field_plugins: bool,

    pub default_fluid_type: String,
    pub fluid_types: Vec<String>,
    pub max_level: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            skip_dataset_cache: false,
            backup_suffix: String::from("_backup.gdf"),
            log_key_parameters: true,
            load_field_plugins: true,
            default_fluid_type: String::from("gas"),
            fluid_types: vec![
                String::from("gas"),
                String::from("deposit"),
                String::from("index"),
            ],
            max_level: 99,
        }
    }
}

impl Config {
    /// Read a configuration from a JSON file.
    ///
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);

        Ok(serde_json::from_reader(reader)?)
    }

    /// Read the configuration file named by `SIMSNAP_CONFIG`, or use the defaults if it isn't set.
    ///
    pub fn from_env() -> Result<Self> {
        match env::var_os(CONFIG_VAR) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// The process wide configuration, read from the environment on first use.
    ///
    /// A configuration file that can't be read is logged and the defaults used instead.
    ///
    pub fn global() -> Arc<Config> {
        let config = GLOBAL_CONFIG.get_or_init(|| {
            let config = Self::from_env().unwrap_or_else(|err| {
                warn!("Unable to read configuration from ${CONFIG_VAR}: {err}");
                Self::default()
            });

            Arc::new(config)
        });

        Arc::clone(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    use crate::errors::Error;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.skip_dataset_cache);
        assert_eq!(config.backup_suffix, "_backup.gdf");
        assert_eq!(config.default_fluid_type, "gas");
        assert_eq!(config.max_level, 99);
    }

    #[test]
    fn test_from_file_partial() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{"skip_dataset_cache": true, "max_level": 12}}"#)?;

        let config = Config::from_file(file.path())?;
        assert!(config.skip_dataset_cache);
        assert_eq!(config.max_level, 12);
        assert_eq!(config.backup_suffix, "_backup.gdf");
        assert!(config.load_field_plugins);

        Ok(())
    }

    #[test]
    fn test_from_file_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let missing = Config::from_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(Error::IO(_))));

        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "not json")?;
        assert!(matches!(Config::from_file(file.path()), Err(Error::Json(_))));

        Ok(())
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let mut config = Config::default();
        config.fluid_types.push(String::from("enzo"));
        let json = serde_json::to_string(&config)?;
        let back: Config = serde_json::from_str(&json)?;
        assert_eq!(back, config);

        Ok(())
    }
}
