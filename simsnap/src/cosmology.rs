use std::f64::consts::PI;
use std::sync::Arc;

use crate::{
    errors::Result,
    units::{Quantity, QuantityFactory, UnitRegistry, CM_PER_PC},
};

/// Newton's gravitational constant in CGS
pub const G_CGS: f64 = 6.67408e-8;

/// Friedmann cosmology with matter, a cosmological constant and curvature.
///
/// Only what a dataset needs at load time is here: the Hubble parameter and the critical
/// density at a given redshift.
///
pub struct Cosmology {
    pub hubble_constant: f64,
    pub omega_matter: f64,
    pub omega_lambda: f64,
    pub omega_curvature: f64,
    quan: QuantityFactory,
}

impl Cosmology {
    pub fn new(
        hubble_constant: f64,
        omega_matter: f64,
        omega_lambda: f64,
        registry: &Arc<UnitRegistry>,
    ) -> Self {
        Self {
            hubble_constant,
            omega_matter,
            omega_lambda,
            omega_curvature: 1.0 - omega_matter - omega_lambda,
            quan: QuantityFactory::new(registry),
        }
    }

    /// H(z) / H0
    pub fn expansion_factor(&self, z: f64) -> f64 {
        let zp1 = 1.0 + z;
        (self.omega_matter * zp1.powi(3) + self.omega_curvature * zp1.powi(2) + self.omega_lambda)
            .sqrt()
    }

    /// The Hubble parameter at redshift `z`, in 1/s
    pub fn hubble_parameter(&self, z: f64) -> Result<Quantity> {
        let h0 = 100.0 * self.hubble_constant * 1e5 / (1e6 * CM_PER_PC);
        self.quan.create(h0 * self.expansion_factor(z), "1/s")
    }

    /// Critical density at redshift `z`, `3 H(z)**2 / (8 pi G)`, in g/cm**3
    pub fn critical_density(&self, z: f64) -> Result<Quantity> {
        let hz = self.hubble_parameter(z)?.in_base();
        self.quan.create(3.0 * hz * hz / (8.0 * PI * G_CGS), "g/cm**3")
    }
}

/// Cosmological attributes of a dataset.
///
pub struct CosmologyInfo {
    pub current_redshift: f64,
    pub hubble_constant: f64,
    pub omega_matter: f64,
    pub omega_lambda: f64,
    pub critical_density: Quantity,
    pub cosmology: Cosmology,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_expansion() {
        let registry = Arc::new(UnitRegistry::new());
        let cosmology = Cosmology::new(0.7, 0.3, 0.7, &registry);
        assert!(cosmology.omega_curvature.abs() < 1e-12);
        assert!((cosmology.expansion_factor(0.0) - 1.0).abs() < 1e-12);

        // Matter dominated at high redshift
        let e = cosmology.expansion_factor(1000.0);
        let matter_only = (0.3 * 1001.0_f64.powi(3)).sqrt();
        assert!((e - matter_only).abs() / matter_only < 1e-3);
    }

    #[test]
    fn test_hubble_parameter() -> Result<()> {
        let registry = Arc::new(UnitRegistry::new());
        let cosmology = Cosmology::new(0.7, 0.3, 0.7, &registry);
        let h0 = cosmology.hubble_parameter(0.0)?;
        assert_eq!(h0.units().expr(), "1/s");
        assert!((h0.value() - 2.2685e-18).abs() / 2.2685e-18 < 1e-3);

        Ok(())
    }

    #[test]
    fn test_critical_density_grows_with_redshift() -> Result<()> {
        let registry = Arc::new(UnitRegistry::new());
        let cosmology = Cosmology::new(0.7, 0.3, 0.7, &registry);
        let now = cosmology.critical_density(0.0)?.value();
        let then = cosmology.critical_density(1.0)?.value();
        assert!(then > now);
        let ratio = then / now;
        let expected = 0.3 * 8.0 + 0.7;
        assert!((ratio - expected).abs() / expected < 1e-9);

        Ok(())
    }
}
