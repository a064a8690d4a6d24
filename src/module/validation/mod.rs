//! Module validation
//!
//! Identity and structural capability checks for candidate units.

pub mod module_validator;

pub use module_validator::{InvalidReason, ModuleValidator, ValidationResult};
