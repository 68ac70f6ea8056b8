//! Units: a per-dataset registry of symbols, unit expressions, quantities, and the protocol for
//! binding a dataset's code units to physical scales.
//!
pub mod binding;
pub mod dimensions;
mod quantity;
mod registry;
mod unit;

pub use binding::{
    create_unit_registry, set_code_units, set_units, UnitValue, CODE_UNITS, COMOVING_UNITS,
};
pub use dimensions::Dimensions;
pub use quantity::{ArrayFactory, Quantity, QuantityFactory, UnitArray};
pub use registry::{UnitEntry, UnitRegistry, CM_PER_AU, CM_PER_PC, G_PER_MSUN, S_PER_YR};
pub use unit::Unit;
