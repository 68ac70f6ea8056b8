use std::collections::HashMap;
use std::f64::consts::PI;

use crate::errors::{Error, Result};

use super::dimensions::{
    Dimensions, ANGLE, DIMENSIONLESS, ENERGY, LENGTH, MAGNETIC_FIELD, MASS, TEMPERATURE, TIME,
};

/// Centimeters per parsec
pub const CM_PER_PC: f64 = 3.0856775809623245e18;

/// Centimeters per astronomical unit
pub const CM_PER_AU: f64 = 1.495978707e13;

/// Grams per solar mass
pub const G_PER_MSUN: f64 = 1.98841586e33;

/// Seconds per Julian year
pub const S_PER_YR: f64 = 31557600.0;

const SI_PREFIXES: [(&str, f64); 20] = [
    ("da", 1e1),
    ("Y", 1e24),
    ("Z", 1e21),
    ("E", 1e18),
    ("P", 1e15),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
    ("f", 1e-15),
    ("a", 1e-18),
    ("z", 1e-21),
    ("y", 1e-24),
];

/// A single entry in a `UnitRegistry`
///
#[derive(Clone, Debug, PartialEq)]
pub struct UnitEntry {
    /// Value of one of this unit in CGS base units
    pub scale: f64,

    /// The physical dimensions of the unit
    pub dimensions: Dimensions,

    /// Optional LaTeX representation
    pub tex: Option<String>,

    /// Whether SI prefixes may be applied to this symbol, e.g. `Mpc` from `pc`
    pub prefixable: bool,
}

/// A lookup table from unit symbols to scale factors and dimensions.
///
/// Every dataset owns a fresh registry. Symbols not found verbatim are retried as an SI prefix
/// followed by a prefixable symbol.
///
#[derive(Clone, Debug)]
pub struct UnitRegistry {
    lut: HashMap<String, UnitEntry>,
}

impl UnitRegistry {
    /// Create a registry populated with the default symbol table.
    ///
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for (symbol, scale, dimensions, prefixable) in default_symbols() {
            registry.lut.insert(
                symbol.to_string(),
                UnitEntry {
                    scale,
                    dimensions,
                    tex: None,
                    prefixable,
                },
            );
        }

        registry
    }

    /// Create a registry with no symbols in it at all.
    ///
    pub fn empty() -> Self {
        Self {
            lut: HashMap::new(),
        }
    }

    pub fn lut(&self) -> &HashMap<String, UnitEntry> {
        &self.lut
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.lut.contains_key(symbol)
    }

    /// Get the entry for an exact symbol, without prefix resolution.
    ///
    pub fn get(&self, symbol: &str) -> Option<&UnitEntry> {
        self.lut.get(symbol)
    }

    /// Resolve a symbol to `(scale, dimensions)`, applying SI prefixes if needed.
    ///
    pub fn lookup(&self, symbol: &str) -> Result<(f64, Dimensions)> {
        if let Some(entry) = self.lut.get(symbol) {
            return Ok((entry.scale, entry.dimensions));
        }

        for (prefix, factor) in SI_PREFIXES {
            if let Some(rest) = symbol.strip_prefix(prefix) {
                if rest.is_empty() {
                    continue;
                }
                if let Some(entry) = self.lut.get(rest) {
                    if entry.prefixable {
                        return Ok((factor * entry.scale, entry.dimensions));
                    }
                }
            }
        }

        Err(Error::UnitNotFound(symbol.to_string()))
    }

    /// Add a new, prefixable symbol to the registry.
    ///
    /// Fails if the symbol is already present. Use `modify` to change the scale of an existing
    /// symbol.
    ///
    pub fn add(
        &mut self,
        symbol: &str,
        scale: f64,
        dimensions: Dimensions,
        tex: Option<&str>,
    ) -> Result<()> {
        self.add_entry(
            symbol,
            UnitEntry {
                scale,
                dimensions,
                tex: tex.map(String::from),
                prefixable: true,
            },
        )
    }

    pub fn add_entry(&mut self, symbol: &str, entry: UnitEntry) -> Result<()> {
        if self.lut.contains_key(symbol) {
            return Err(Error::UnitExists(symbol.to_string()));
        }
        self.lut.insert(symbol.to_string(), entry);

        Ok(())
    }

    /// Change the scale of an existing symbol in place, keeping its dimensions.
    ///
    pub fn modify(&mut self, symbol: &str, scale: f64) -> Result<()> {
        match self.lut.get_mut(symbol) {
            Some(entry) => {
                entry.scale = scale;
                Ok(())
            }
            None => Err(Error::UnitNotFound(symbol.to_string())),
        }
    }

    /// Evaluate a unit expression such as `"g/cm**3"` to `(scale, dimensions)`.
    ///
    pub fn evaluate(&self, expr: &str) -> Result<(f64, Dimensions)> {
        super::unit::parse_expression(expr, self)
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn default_symbols() -> Vec<(&'static str, f64, Dimensions, bool)> {
    vec![
        // length
        ("cm", 1.0, LENGTH, false),
        ("m", 1e2, LENGTH, true),
        ("pc", CM_PER_PC, LENGTH, true),
        ("mpc", 1e6 * CM_PER_PC, LENGTH, false),
        ("AU", CM_PER_AU, LENGTH, true),
        ("au", CM_PER_AU, LENGTH, true),
        ("ly", 9.4607304725808e17, LENGTH, true),
        ("rsun", 6.957e10, LENGTH, false),
        ("Rsun", 6.957e10, LENGTH, false),
        ("unitary", 1.0, LENGTH, false),
        // mass
        ("g", 1.0, MASS, true),
        ("Msun", G_PER_MSUN, MASS, false),
        ("msun", G_PER_MSUN, MASS, false),
        ("amu", 1.660538921e-24, MASS, false),
        // time
        ("s", 1.0, TIME, true),
        ("min", 60.0, TIME, false),
        ("hr", 3600.0, TIME, false),
        ("day", 86400.0, TIME, false),
        ("yr", S_PER_YR, TIME, true),
        // temperature
        ("K", 1.0, TEMPERATURE, false),
        // angle
        ("radian", 1.0, ANGLE, false),
        ("degree", PI / 180.0, ANGLE, false),
        // energy
        ("erg", 1.0, ENERGY, true),
        ("J", 1e7, ENERGY, true),
        ("eV", 1.602176634e-12, ENERGY, true),
        // electromagnetic
        ("gauss", 1.0, MAGNETIC_FIELD, true),
        // dimensionless
        ("dimensionless", 1.0, DIMENSIONLESS, false),
        ("h", 1.0, DIMENSIONLESS, false),
    ]
}
