//! Unit loading
//!
//! Compiles units into isolation contexts and exposes their exported types.

pub mod context;
pub mod host;
pub mod unit;

pub use context::{ContextHandle, IsolationContext};
pub use unit::{ExportedType, LoadedUnit, Signature, UnitExport, UnitImport, ValueKind};

use wasmtime::{Config, Engine};

use crate::module::traits::ModuleError;

/// Build the engine shared by every isolation context
///
/// With a `hook_fuel` budget, every hook call (and instantiation) is metered and
/// traps once the budget is spent.
pub fn build_engine(hook_fuel: Option<u64>) -> Result<Engine, ModuleError> {
    let mut config = Config::new();
    config.consume_fuel(hook_fuel.is_some());
    Engine::new(&config).map_err(|e| ModuleError::UnitLoad(e.to_string()))
}
