//! Creation of a dataset's unit registry and binding of its code units.
//!
//! A fresh registry starts with every code unit at scale 1.0. `set_units` then adds comoving
//! units for cosmological datasets and rebinds the code units to the physical scale reported by
//! the frontend. The registry is frozen (shared behind an `Arc`) only after this is done, so no
//! quantity can be built against placeholder code units.
//!
use std::sync::Arc;

use log::debug;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::{
    cosmology::{Cosmology, CosmologyInfo},
    errors::{Error, Result},
    frontend::{CodeUnits, Frontend, Parameters},
    helpers::max_extent,
};

use super::dimensions::{Dimensions, LENGTH, MAGNETIC_FIELD, MASS, TEMPERATURE, TIME, VELOCITY};
use super::registry::{UnitEntry, UnitRegistry};

/// The code units every dataset registry is seeded with
pub const CODE_UNITS: [(&str, Dimensions); 6] = [
    ("code_length", LENGTH),
    ("code_mass", MASS),
    ("code_time", TIME),
    ("code_magnetic", MAGNETIC_FIELD),
    ("code_temperature", TEMPERATURE),
    ("code_velocity", VELOCITY),
];

/// Length units that get a comoving counterpart, `<unit>cm`, in cosmological datasets
pub const COMOVING_UNITS: [&str; 5] = ["m", "pc", "AU", "au", "mpc"];

/// A number with a unit expression that has not been evaluated against a registry yet.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitValue {
    pub value: f64,
    pub units: String,
}

impl UnitValue {
    pub fn new<S: Into<String>>(value: f64, units: S) -> Self {
        Self {
            value,
            units: units.into(),
        }
    }

    /// Value in CGS base units, checking that the dimensions are what's expected.
    ///
    pub fn scale_in(&self, registry: &UnitRegistry, expected: Dimensions) -> Result<f64> {
        let (scale, dimensions) = registry.evaluate(&self.units)?;
        if dimensions != expected {
            return Err(Error::DimensionMismatch {
                unit: self.units.clone(),
                expected: expected.to_string(),
                found: dimensions.to_string(),
            });
        }

        Ok(self.value * scale)
    }
}

/// Create a registry with code units as placeholders at scale 1.0.
///
pub fn create_unit_registry() -> Result<UnitRegistry> {
    let mut registry = UnitRegistry::new();
    for (symbol, dimensions) in CODE_UNITS {
        registry.add_entry(
            symbol,
            UnitEntry {
                scale: 1.0,
                dimensions,
                tex: None,
                prefixable: false,
            },
        )?;
    }

    Ok(registry)
}

/// Add cosmological units, if any, and bind code units.
///
/// Runs once per registry: comoving units are added, not modified, so a second call on a
/// cosmological registry fails with `UnitExists`.
///
pub fn set_units(
    registry: &mut UnitRegistry,
    parameters: &Parameters,
    frontend: &dyn Frontend,
) -> Result<CodeUnits> {
    if let Some(cosmology) = &parameters.cosmology {
        registry.modify("h", cosmology.hubble_constant)?;
        for unit in COMOVING_UNITS {
            let (scale, _) = registry.lookup(unit)?;
            let tex = format!("\\rm{{{unit}}}/(1+z)");
            registry.add(
                &format!("{unit}cm"),
                scale / (1.0 + cosmology.current_redshift),
                LENGTH,
                Some(&tex),
            )?;
        }
    }

    set_code_units(registry, parameters, frontend)
}

/// Rebind the code units to the scales reported by the frontend.
///
/// Calling this again with the same inputs produces the same scales.
///
pub fn set_code_units(
    registry: &mut UnitRegistry,
    parameters: &Parameters,
    frontend: &dyn Frontend,
) -> Result<CodeUnits> {
    let domain_width = domain_width(parameters)?;
    let mut code_units = frontend.code_units(parameters, &domain_width, registry)?;

    let length = code_units.length.scale_in(registry, LENGTH)?;
    let mass = code_units.mass.scale_in(registry, MASS)?;
    let time = code_units.time.scale_in(registry, TIME)?;
    let velocity = match &code_units.velocity {
        Some(velocity) => velocity.scale_in(registry, VELOCITY)?,
        None => {
            let velocity = UnitValue::new(
                code_units.length.value / code_units.time.value,
                format!("({})/({})", code_units.length.units, code_units.time.units),
            );
            let scale = velocity.scale_in(registry, VELOCITY)?;
            code_units.velocity = Some(velocity);

            scale
        }
    };

    registry.modify("code_length", length)?;
    registry.modify("code_mass", mass)?;
    registry.modify("code_time", time)?;
    registry.modify("code_velocity", velocity)?;

    let widest = max_extent(domain_width.iter().copied()).unwrap_or(1.0);
    registry.modify("unitary", widest * length)?;

    debug!(
        "Bound code units: length={length:e} mass={mass:e} time={time:e} velocity={velocity:e}"
    );

    Ok(code_units)
}

/// Width of the domain in code units.
///
pub fn domain_width(parameters: &Parameters) -> Result<Array1<f64>> {
    let left = parameters
        .domain_left_edge
        .as_ref()
        .ok_or(Error::MissingParameter("domain_left_edge"))?;
    let right = parameters
        .domain_right_edge
        .as_ref()
        .ok_or(Error::MissingParameter("domain_right_edge"))?;
    if left.len() != right.len() {
        return Err(Error::Frontend(format!(
            "domain edges have different lengths: {} and {}",
            left.len(),
            right.len()
        )));
    }

    Ok(right - left)
}

/// Build the cosmology helper for a cosmological dataset, against the frozen registry.
///
pub fn bind_cosmology(
    parameters: &Parameters,
    registry: &Arc<UnitRegistry>,
) -> Result<Option<CosmologyInfo>> {
    match &parameters.cosmology {
        None => Ok(None),
        Some(params) => {
            let cosmology = Cosmology::new(
                params.hubble_constant,
                params.omega_matter,
                params.omega_lambda,
                registry,
            );
            let critical_density = cosmology.critical_density(params.current_redshift)?;

            Ok(Some(CosmologyInfo {
                current_redshift: params.current_redshift,
                hubble_constant: params.hubble_constant,
                omega_matter: params.omega_matter,
                omega_lambda: params.omega_lambda,
                critical_density,
                cosmology,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    use crate::frontend::CosmologyParameters;
    use crate::testing::{self, TestFrontend};
    use crate::units::registry::CM_PER_PC;

    #[test]
    fn test_create_unit_registry() -> Result<()> {
        let registry = create_unit_registry()?;
        for (symbol, dimensions) in CODE_UNITS {
            let entry = registry.get(symbol).unwrap();
            assert_eq!(entry.scale, 1.0);
            assert_eq!(entry.dimensions, dimensions);
        }

        Ok(())
    }

    #[test]
    fn test_set_code_units() -> Result<()> {
        let frontend = TestFrontend::new();
        let parameters = frontend.parse_parameters(None)?;
        let mut registry = create_unit_registry()?;
        let code_units = set_units(&mut registry, &parameters, &frontend)?;

        let lut = registry.lut();
        assert_eq!(lut["code_length"].scale, CM_PER_PC * 1e3);
        assert_eq!(lut["code_length"].dimensions, LENGTH);
        assert_eq!(lut["code_mass"].scale, 1.98841586e33 * 1e10);
        assert_eq!(lut["code_time"].scale, 31557600.0 * 1e6);
        assert_eq!(
            lut["code_velocity"].scale,
            CM_PER_PC * 1e3 / (31557600.0 * 1e6)
        );
        assert_eq!(lut["code_velocity"].dimensions, VELOCITY);
        assert_eq!(lut["code_magnetic"].scale, 1.0);
        assert_eq!(lut["code_temperature"].scale, 1.0);

        // Domain is 2 wide on its widest side
        assert_eq!(lut["unitary"].scale, 2.0 * (CM_PER_PC * 1e3));
        assert_eq!(code_units.velocity.unwrap().units, "(kpc)/(Myr)");

        Ok(())
    }

    #[test]
    fn test_set_code_units_idempotent() -> Result<()> {
        let frontend = TestFrontend::new();
        let parameters = frontend.parse_parameters(None)?;
        let mut registry = create_unit_registry()?;
        set_code_units(&mut registry, &parameters, &frontend)?;
        let first = registry.lut().clone();

        set_code_units(&mut registry, &parameters, &frontend)?;
        for (symbol, entry) in registry.lut() {
            assert_eq!(first[symbol].scale.to_bits(), entry.scale.to_bits());
        }

        Ok(())
    }

    #[test]
    fn test_explicit_velocity() -> Result<()> {
        let frontend = TestFrontend::new().with_velocity(UnitValue::new(3.0, "km/s"));
        let parameters = frontend.parse_parameters(None)?;
        let mut registry = create_unit_registry()?;
        set_units(&mut registry, &parameters, &frontend)?;
        assert_eq!(registry.lut()["code_velocity"].scale, 3e5);

        Ok(())
    }

    #[test]
    fn test_wrong_dimensions() -> Result<()> {
        let frontend = TestFrontend::new().with_length(UnitValue::new(1.0, "g"));
        let parameters = frontend.parse_parameters(None)?;
        let mut registry = create_unit_registry()?;
        assert!(matches!(
            set_units(&mut registry, &parameters, &frontend),
            Err(Error::DimensionMismatch { .. })
        ));
        assert_eq!(registry.lut()["code_length"].scale, 1.0);

        Ok(())
    }

    #[test]
    fn test_missing_domain_edge_leaves_placeholders() -> Result<()> {
        let frontend = TestFrontend::new();
        let mut parameters = frontend.parse_parameters(None)?;
        parameters.domain_right_edge = None;
        let mut registry = create_unit_registry()?;
        assert!(matches!(
            set_units(&mut registry, &parameters, &frontend),
            Err(Error::MissingParameter("domain_right_edge"))
        ));
        for (symbol, _) in CODE_UNITS {
            assert_eq!(registry.lut()[symbol].scale, 1.0);
        }
        assert_eq!(registry.lut()["unitary"].scale, 1.0);

        Ok(())
    }

    #[test]
    fn test_mismatched_domain_edges() {
        let mut parameters = Parameters::default();
        parameters.domain_left_edge = Some(array![0.0, 0.0]);
        parameters.domain_right_edge = Some(array![1.0, 1.0, 1.0]);
        assert!(matches!(
            domain_width(&parameters),
            Err(Error::Frontend(_))
        ));
    }

    #[test]
    fn test_comoving_units() -> Result<()> {
        let frontend = TestFrontend::new().with_cosmology(CosmologyParameters {
            current_redshift: 1.0,
            omega_matter: 0.3,
            omega_lambda: 0.7,
            hubble_constant: 0.7,
        });
        let parameters = frontend.parse_parameters(None)?;
        let mut registry = create_unit_registry()?;
        set_units(&mut registry, &parameters, &frontend)?;

        let (mpc, _) = registry.lookup("Mpc")?;
        assert_eq!(registry.lookup("mpccm")?, (mpc / 2.0, LENGTH));
        assert_eq!(registry.lookup("Mpccm")?.0, 1e6 * (CM_PER_PC / 2.0));
        assert_eq!(registry.lookup("pccm")?, (CM_PER_PC / 2.0, LENGTH));
        assert_eq!(registry.lookup("mcm")?, (100.0 / 2.0, LENGTH));
        assert!(registry.contains("AUcm"));
        assert!(registry.contains("aucm"));
        assert_eq!(registry.get("h").unwrap().scale, 0.7);

        // Runs once only
        assert!(matches!(
            set_units(&mut registry, &parameters, &frontend),
            Err(Error::UnitExists(_))
        ));

        Ok(())
    }

    #[test]
    fn test_comoving_code_length() -> Result<()> {
        let frontend = TestFrontend::new()
            .with_length(UnitValue::new(1.0, "Mpccm/h"))
            .with_cosmology(CosmologyParameters {
                current_redshift: 3.0,
                omega_matter: 0.3,
                omega_lambda: 0.7,
                hubble_constant: 0.5,
            });
        let parameters = frontend.parse_parameters(None)?;
        let mut registry = create_unit_registry()?;
        set_units(&mut registry, &parameters, &frontend)?;

        let expected = 1e6 * (CM_PER_PC / 4.0) / 0.5;
        assert_eq!(registry.lut()["code_length"].scale, expected);

        Ok(())
    }

    #[test]
    fn test_bind_cosmology() -> Result<()> {
        let mut parameters = testing::parameters();
        let registry = Arc::new(create_unit_registry()?);
        assert!(bind_cosmology(&parameters, &registry)?.is_none());

        parameters.cosmology = Some(CosmologyParameters {
            current_redshift: 0.0,
            omega_matter: 0.3,
            omega_lambda: 0.7,
            hubble_constant: 0.7,
        });
        let info = bind_cosmology(&parameters, &registry)?.unwrap();
        assert_eq!(info.hubble_constant, 0.7);
        assert!(Arc::ptr_eq(info.critical_density.units().registry(), &registry));
        let rho = info.critical_density.to_value("g/cm**3")?;
        assert!((rho - 9.204e-30).abs() / 9.204e-30 < 1e-3);

        Ok(())
    }
}
