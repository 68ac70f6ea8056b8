use std::fmt;
use std::ops::{Div, Mul};
use std::sync::Arc;

use ndarray::Array1;

use crate::errors::Result;
use crate::helpers::max_extent;

use super::registry::UnitRegistry;
use super::unit::Unit;

/// A scalar value carrying a unit.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Quantity {
    value: f64,
    units: Unit,
}

impl Quantity {
    pub fn new(value: f64, units: Unit) -> Self {
        Self { value, units }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn units(&self) -> &Unit {
        &self.units
    }

    /// The value expressed in CGS base units
    pub fn in_base(&self) -> f64 {
        self.value * self.units.base_value()
    }

    /// Convert to another unit of the same dimensions, using this quantity's registry.
    ///
    pub fn in_units(&self, expr: &str) -> Result<Quantity> {
        let units = Unit::new(expr, self.units.registry())?;
        let factor = self.units.conversion_to(&units)?;

        Ok(Quantity::new(self.value * factor, units))
    }

    /// Convert to another unit and return just the number.
    ///
    pub fn to_value(&self, expr: &str) -> Result<f64> {
        Ok(self.in_units(expr)?.value)
    }
}

impl Mul for &Quantity {
    type Output = Quantity;

    fn mul(self, other: &Quantity) -> Quantity {
        Quantity::new(self.value * other.value, self.units.combine(&other.units, false))
    }
}

impl Div for &Quantity {
    type Output = Quantity;

    fn div(self, other: &Quantity) -> Quantity {
        Quantity::new(self.value / other.value, self.units.combine(&other.units, true))
    }
}

impl Mul<f64> for &Quantity {
    type Output = Quantity;

    fn mul(self, other: f64) -> Quantity {
        Quantity::new(self.value * other, self.units.clone())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.units)
    }
}

/// A one dimensional array of values sharing a unit.
///
#[derive(Clone, Debug, PartialEq)]
pub struct UnitArray {
    values: Array1<f64>,
    units: Unit,
}

impl UnitArray {
    pub fn new(values: Array1<f64>, units: Unit) -> Self {
        Self { values, units }
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn units(&self) -> &Unit {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Quantity> {
        self.values
            .get(index)
            .map(|&value| Quantity::new(value, self.units.clone()))
    }

    /// Largest element, or `None` for an empty array
    pub fn max(&self) -> Option<Quantity> {
        max_extent(self.values.iter().copied()).map(|value| Quantity::new(value, self.units.clone()))
    }

    pub fn in_units(&self, expr: &str) -> Result<UnitArray> {
        let units = Unit::new(expr, self.units.registry())?;
        let factor = self.units.conversion_to(&units)?;

        Ok(UnitArray::new(&self.values * factor, units))
    }

    pub fn in_base(&self) -> Array1<f64> {
        &self.values * self.units.base_value()
    }
}

impl fmt::Display for UnitArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.values, self.units)
    }
}

/// Builds unit arrays bound to one dataset's registry.
///
pub struct ArrayFactory {
    registry: Arc<UnitRegistry>,
}

impl ArrayFactory {
    pub fn new(registry: &Arc<UnitRegistry>) -> Self {
        Self {
            registry: Arc::clone(registry),
        }
    }

    pub fn create<V>(&self, values: V, units: &str) -> Result<UnitArray>
    where
        V: Into<Array1<f64>>,
    {
        Ok(UnitArray::new(values.into(), Unit::new(units, &self.registry)?))
    }

    pub fn registry(&self) -> &Arc<UnitRegistry> {
        &self.registry
    }
}

/// Builds scalar quantities bound to one dataset's registry.
///
pub struct QuantityFactory {
    registry: Arc<UnitRegistry>,
}

impl QuantityFactory {
    pub fn new(registry: &Arc<UnitRegistry>) -> Self {
        Self {
            registry: Arc::clone(registry),
        }
    }

    pub fn create(&self, value: f64, units: &str) -> Result<Quantity> {
        Ok(Quantity::new(value, Unit::new(units, &self.registry)?))
    }

    pub fn registry(&self) -> &Arc<UnitRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    use crate::errors::Error;
    use crate::units::dimensions::VELOCITY;

    fn factories() -> (ArrayFactory, QuantityFactory) {
        let registry = Arc::new(UnitRegistry::new());
        (ArrayFactory::new(&registry), QuantityFactory::new(&registry))
    }

    #[test]
    fn test_quantity_in_units() -> Result<()> {
        let (_, quan) = factories();
        let distance = quan.create(2.0, "km")?;
        assert_eq!(distance.to_value("cm")?, 2e5);
        assert_eq!(distance.in_base(), 2e5);
        assert_eq!(distance.to_string(), "2 km");

        assert!(matches!(
            distance.in_units("g"),
            Err(Error::DimensionMismatch { .. })
        ));

        Ok(())
    }

    #[test]
    fn test_quantity_arithmetic() -> Result<()> {
        let (_, quan) = factories();
        let length = quan.create(10.0, "km")?;
        let time = quan.create(2.0, "s")?;
        let speed = &length / &time;
        assert_eq!(speed.value(), 5.0);
        assert_eq!(speed.units().dimensions(), VELOCITY);
        assert_eq!(speed.to_value("cm/s")?, 5e5);

        let area = &length * &length;
        assert_eq!(area.to_value("cm**2")?, 1e12);

        let doubled = &length * 2.0;
        assert_eq!(doubled.to_value("km")?, 20.0);

        Ok(())
    }

    #[test]
    fn test_array() -> Result<()> {
        let (arr, _) = factories();
        let edges = arr.create(array![1.0, 3.0, 2.0], "km")?;
        assert_eq!(edges.len(), 3);
        assert_eq!(edges.max().unwrap().value(), 3.0);
        assert_eq!(edges.get(2).unwrap().value(), 2.0);
        assert!(edges.get(3).is_none());
        assert_eq!(edges.in_units("cm")?.values(), &array![1e5, 3e5, 2e5]);
        assert_eq!(edges.in_base(), array![1e5, 3e5, 2e5]);

        let empty = arr.create(Array1::<f64>::zeros(0), "cm")?;
        assert!(empty.is_empty());
        assert!(empty.max().is_none());

        Ok(())
    }

    #[test]
    fn test_factories_share_registry() -> Result<()> {
        let (arr, quan) = factories();
        assert!(Arc::ptr_eq(arr.registry(), quan.registry()));
        let q = quan.create(1.0, "cm")?;
        assert!(Arc::ptr_eq(q.units().registry(), quan.registry()));

        Ok(())
    }
}
