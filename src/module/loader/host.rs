//! Host functions offered to units
//!
//! Units import these from the `modhost` namespace. Anything else a unit imports
//! is linked as a trapping stub.

use tracing::{debug, error, info, trace, warn};
use wasmtime::{Caller, Engine, Extern, Linker, Module};

use crate::module::traits::ModuleError;

/// Import namespace of the host API
pub const HOST_NAMESPACE: &str = "modhost";

/// Per-store data
pub struct UnitState {
    /// Name of the module owning the store (log attribution)
    pub unit_name: String,
}

/// Build a linker for one unit
pub fn build_linker(engine: &Engine, module: &Module) -> Result<Linker<UnitState>, ModuleError> {
    let mut linker = Linker::new(engine);

    linker
        .func_wrap(
            HOST_NAMESPACE,
            "log",
            |mut caller: Caller<'_, UnitState>, level: i32, ptr: i32, len: i32| {
                let message = read_guest_str(&mut caller, ptr, len)
                    .unwrap_or_else(|| "<unreadable message>".to_string());
                let unit = caller.data().unit_name.as_str();
                match level {
                    0 => error!(module = unit, "{}", message),
                    1 => warn!(module = unit, "{}", message),
                    2 => info!(module = unit, "{}", message),
                    3 => debug!(module = unit, "{}", message),
                    _ => trace!(module = unit, "{}", message),
                }
            },
        )
        .map_err(|e| ModuleError::UnitLoad(e.to_string()))?;

    linker
        .func_wrap(HOST_NAMESPACE, "now_ms", || -> i64 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64
        })
        .map_err(|e| ModuleError::UnitLoad(e.to_string()))?;

    // Unresolved imports only fail when called
    linker
        .define_unknown_imports_as_traps(module)
        .map_err(|e| ModuleError::UnitLoad(e.to_string()))?;

    Ok(linker)
}

fn read_guest_str(caller: &mut Caller<'_, UnitState>, ptr: i32, len: i32) -> Option<String> {
    let memory = match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => memory,
        _ => return None,
    };
    let start = usize::try_from(ptr).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    let bytes = memory.data(&*caller).get(start..end)?;
    String::from_utf8(bytes.to_vec()).ok()
}
