//! Candidate validation
//!
//! Decides whether a candidate unit may be loaded in a scope: identity
//! constraints first, then a structural check of its exported types inside a
//! throwaway isolation context.

use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use wasmtime::Engine;

use crate::config::ModuleConfig;
use crate::module::loader::IsolationContext;
use crate::module::registry::discovery::read_identity;
use crate::module::traits::{Capability, ModuleError};

/// Why a candidate was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// No file with the unit extension at the path
    NotFound(String),
    NameTooLong { name: String, max: usize },
    ReservedName(String),
    /// Identity or unit bytes could not be read
    Malformed(String),
    /// Zero or several exported types satisfy the required contract
    InvalidModuleKind(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::NotFound(path) => write!(f, "no loadable unit at {}", path),
            InvalidReason::NameTooLong { name, max } => {
                write!(f, "name `{}` exceeds {} characters", name, max)
            }
            InvalidReason::ReservedName(name) => write!(f, "name `{}` is reserved", name),
            InvalidReason::Malformed(reason) => write!(f, "malformed unit: {}", reason),
            InvalidReason::InvalidModuleKind(reason) => write!(f, "{}", reason),
        }
    }
}

impl From<InvalidReason> for ModuleError {
    fn from(reason: InvalidReason) -> Self {
        match reason {
            InvalidReason::NotFound(path) => ModuleError::NotFound(path),
            InvalidReason::NameTooLong { name, max } => ModuleError::NameTooLong { name, max },
            InvalidReason::ReservedName(name) => ModuleError::ReservedName(name),
            InvalidReason::Malformed(reason) => ModuleError::UnitLoad(reason),
            InvalidReason::InvalidModuleKind(reason) => ModuleError::InvalidModuleKind(reason),
        }
    }
}

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Candidate may be loaded; `type_name` is the exported type implementing it
    Valid {
        name: String,
        capability: Capability,
        type_name: String,
    },
    Invalid(InvalidReason),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid { .. })
    }
}

/// Module validator
pub struct ModuleValidator {
    engine: Engine,
    extension: String,
    reserved_name: String,
    max_name_len: usize,
    hook_fuel: Option<u64>,
}

impl ModuleValidator {
    pub fn new(engine: &Engine, config: &ModuleConfig) -> Self {
        Self {
            engine: engine.clone(),
            extension: config.extension.clone(),
            reserved_name: config.reserved_name.clone(),
            max_name_len: config.max_name_len,
            hook_fuel: config.hook_fuel,
        }
    }

    /// Validate a candidate against a required capability
    ///
    /// Checks fail fast in order: file, name length, reserved name, structure.
    pub fn validate(&self, path: &Path, capability: Capability) -> ValidationResult {
        let result = self.check(path, capability);
        match &result {
            ValidationResult::Valid { name, type_name, .. } => {
                debug!("Candidate {} valid as {} (type {})", name, capability, type_name)
            }
            ValidationResult::Invalid(reason) => {
                warn!("Candidate {:?} rejected: {}", path, reason)
            }
        }
        result
    }

    fn check(&self, path: &Path, capability: Capability) -> ValidationResult {
        if !path.is_file() || !self.has_unit_extension(path) {
            return ValidationResult::Invalid(InvalidReason::NotFound(
                path.display().to_string(),
            ));
        }

        let name = match read_identity(path) {
            Ok((name, _)) => name,
            Err(e) => return ValidationResult::Invalid(InvalidReason::Malformed(e.to_string())),
        };

        if let Err(reason) = self.check_name(&name) {
            return ValidationResult::Invalid(reason);
        }

        match self.inspect(path, &name, capability) {
            Ok(type_name) => ValidationResult::Valid {
                name,
                capability,
                type_name,
            },
            Err(reason) => ValidationResult::Invalid(reason),
        }
    }

    /// Identity constraints alone
    pub fn check_name(&self, name: &str) -> Result<(), InvalidReason> {
        if name.chars().count() > self.max_name_len {
            return Err(InvalidReason::NameTooLong {
                name: name.to_string(),
                max: self.max_name_len,
            });
        }
        if name == self.reserved_name {
            return Err(InvalidReason::ReservedName(name.to_string()));
        }
        Ok(())
    }

    /// Load into a throwaway context and find the single satisfying type
    fn inspect(
        &self,
        path: &Path,
        name: &str,
        capability: Capability,
    ) -> Result<String, InvalidReason> {
        let bytes = fs::read(path).map_err(|e| InvalidReason::Malformed(e.to_string()))?;

        let mut context = IsolationContext::create(&self.engine, name, self.hook_fuel);
        // A unit that does not compile exposes no module type at all
        let outcome = context
            .load_unit(&bytes)
            .map_err(|e| {
                InvalidReason::InvalidModuleKind(format!("{} does not compile: {}", name, e))
            })
            .and_then(|unit| {
                let mut types = unit.types_satisfying(capability);
                match types.len() {
                    1 => Ok(types.remove(0).name),
                    0 => Err(InvalidReason::InvalidModuleKind(format!(
                        "{} exports no {} type",
                        name, capability
                    ))),
                    n => Err(InvalidReason::InvalidModuleKind(format!(
                        "{} exports {} {} types ({})",
                        name,
                        n,
                        capability,
                        types
                            .iter()
                            .map(|t| t.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ))),
                }
            });

        // Never leak the inspection unit
        let _ = context.release();
        outcome
    }

    #[inline]
    fn has_unit_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e == self.extension)
    }
}
