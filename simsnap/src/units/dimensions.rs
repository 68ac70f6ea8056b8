//! Physical dimensions as exponents over the base quantities.
//!
use std::fmt;
use std::ops::{Div, Mul};

const BASE_NAMES: [&str; 5] = ["mass", "length", "time", "temperature", "angle"];

/// The dimensions of a unit, expressed as exponents of mass, length, time, temperature and angle.
///
/// Exponents are stored as floats because CGS electromagnetic units carry half-integer powers
/// (the gauss is `mass**(1/2) * length**(-1/2) / time`).
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dimensions {
    exponents: [f64; 5],
}

pub const DIMENSIONLESS: Dimensions = Dimensions::new([0.0, 0.0, 0.0, 0.0, 0.0]);
pub const MASS: Dimensions = Dimensions::new([1.0, 0.0, 0.0, 0.0, 0.0]);
pub const LENGTH: Dimensions = Dimensions::new([0.0, 1.0, 0.0, 0.0, 0.0]);
pub const TIME: Dimensions = Dimensions::new([0.0, 0.0, 1.0, 0.0, 0.0]);
pub const TEMPERATURE: Dimensions = Dimensions::new([0.0, 0.0, 0.0, 1.0, 0.0]);
pub const ANGLE: Dimensions = Dimensions::new([0.0, 0.0, 0.0, 0.0, 1.0]);
pub const VELOCITY: Dimensions = Dimensions::new([0.0, 1.0, -1.0, 0.0, 0.0]);
pub const DENSITY: Dimensions = Dimensions::new([1.0, -3.0, 0.0, 0.0, 0.0]);
pub const ENERGY: Dimensions = Dimensions::new([1.0, 2.0, -2.0, 0.0, 0.0]);
pub const MAGNETIC_FIELD: Dimensions = Dimensions::new([0.5, -0.5, -1.0, 0.0, 0.0]);

impl Dimensions {
    pub const fn new(exponents: [f64; 5]) -> Self {
        Self { exponents }
    }

    pub fn is_dimensionless(&self) -> bool {
        self.exponents.iter().all(|&e| e == 0.0)
    }

    /// Raise to a (possibly fractional) power.
    ///
    pub fn powf(self, power: f64) -> Self {
        let mut exponents = self.exponents;
        for e in exponents.iter_mut() {
            *e *= power;
        }

        Self { exponents }
    }
}

impl Mul for Dimensions {
    type Output = Dimensions;

    fn mul(self, other: Dimensions) -> Dimensions {
        let mut exponents = self.exponents;
        for (e, o) in exponents.iter_mut().zip(other.exponents) {
            *e += o;
        }

        Dimensions { exponents }
    }
}

impl Div for Dimensions {
    type Output = Dimensions;

    fn div(self, other: Dimensions) -> Dimensions {
        self * other.powf(-1.0)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }

        let mut first = true;
        for (name, &e) in BASE_NAMES.iter().zip(self.exponents.iter()) {
            if e == 0.0 {
                continue;
            }
            if !first {
                write!(f, "*")?;
            }
            first = false;
            if e == 1.0 {
                write!(f, "({name})")?;
            } else {
                write!(f, "({name})**({e})")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_dimensions() {
        assert_eq!(LENGTH / TIME, VELOCITY);
        assert_eq!(MASS / LENGTH.powf(3.0), DENSITY);
        assert_eq!(MASS * VELOCITY * VELOCITY, ENERGY);
        assert!((LENGTH / LENGTH).is_dimensionless());
    }

    #[test]
    fn test_display() {
        assert_eq!(DIMENSIONLESS.to_string(), "dimensionless");
        assert_eq!(LENGTH.to_string(), "(length)");
        assert_eq!(VELOCITY.to_string(), "(length)*(time)**(-1)");
    }
}
