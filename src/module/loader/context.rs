//! Isolation contexts
//!
//! An [`IsolationContext`] is the exclusive owner of everything one loaded unit
//! brings into the host: its compiled code, its store (linear memory, globals,
//! tables) and its instance. Other components only ever see a [`ContextHandle`],
//! which does not keep the context alive.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;
use uuid::Uuid;
use wasmtime::{Engine, Instance, Module, Store};

use crate::module::loader::host::{build_linker, UnitState};
use crate::module::loader::unit::{LoadedUnit, IS_ACTIVE, SET_ACTIVE};
use crate::module::reclamation::ReclamationObserver;
use crate::module::registry::manifest::UnitManifest;
use crate::module::traits::{Hook, ModuleError, TenantId};

struct ContextInner {
    store: Store<UnitState>,
    module: Option<Module>,
    instance: Option<Instance>,
    /// Exported type bound by `instantiate`
    type_name: Option<String>,
    hook_fuel: Option<u64>,
}

impl ContextInner {
    fn bound(&self, module_name: &str) -> Result<(Instance, String), ModuleError> {
        match (&self.instance, &self.type_name) {
            (Some(instance), Some(type_name)) => Ok((*instance, type_name.clone())),
            _ => Err(ModuleError::NotLoaded(module_name.to_string())),
        }
    }

    fn refuel(&mut self) -> Result<(), ModuleError> {
        if let Some(fuel) = self.hook_fuel {
            self.store
                .set_fuel(fuel)
                .map_err(|e| ModuleError::UnitLoad(e.to_string()))?;
        }
        Ok(())
    }

    fn call_hook(&mut self, module_name: &str, hook: Hook) -> Result<(), ModuleError> {
        let (instance, type_name) = self.bound(module_name)?;
        let failure = |reason: String| ModuleError::HookFailure {
            module: module_name.to_string(),
            hook: hook.to_string(),
            reason,
        };

        let export = format!("{}.{}", type_name, hook.member());
        let func = instance
            .get_typed_func::<(), i32>(&mut self.store, &export)
            .map_err(|e| failure(e.to_string()))?;

        self.refuel()?;
        match func.call(&mut self.store, ()) {
            Ok(0) => Ok(()),
            Ok(status) => Err(failure(format!("returned status {}", status))),
            Err(trap) => Err(failure(trap.to_string())),
        }
    }

    fn is_active(&mut self, module_name: &str, tenant: TenantId) -> Result<bool, ModuleError> {
        let (instance, type_name) = self.bound(module_name)?;
        let failure = |reason: String| ModuleError::HookFailure {
            module: module_name.to_string(),
            hook: IS_ACTIVE.to_string(),
            reason,
        };

        let func = instance
            .get_typed_func::<i64, i32>(&mut self.store, &format!("{}.{}", type_name, IS_ACTIVE))
            .map_err(|e| failure(e.to_string()))?;

        self.refuel()?;
        func.call(&mut self.store, tenant as i64)
            .map(|active| active != 0)
            .map_err(|trap| failure(trap.to_string()))
    }

    fn set_active(
        &mut self,
        module_name: &str,
        tenant: TenantId,
        active: bool,
    ) -> Result<(), ModuleError> {
        let (instance, type_name) = self.bound(module_name)?;
        let failure = |reason: String| ModuleError::HookFailure {
            module: module_name.to_string(),
            hook: SET_ACTIVE.to_string(),
            reason,
        };

        let func = instance
            .get_typed_func::<(i64, i32), ()>(
                &mut self.store,
                &format!("{}.{}", type_name, SET_ACTIVE),
            )
            .map_err(|e| failure(e.to_string()))?;

        self.refuel()?;
        func.call(&mut self.store, (tenant as i64, active as i32))
            .map_err(|trap| failure(trap.to_string()))
    }
}

fn lock(inner: &Mutex<ContextInner>) -> MutexGuard<'_, ContextInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive owner of one loaded unit
///
/// Not `Clone`: exactly one exists per loaded module. [`release`](Self::release)
/// consumes it, so a released context can never be reused.
pub struct IsolationContext {
    id: Uuid,
    name: String,
    engine: Engine,
    inner: Arc<Mutex<ContextInner>>,
}

impl IsolationContext {
    /// Create an empty context
    pub fn create(engine: &Engine, name: &str, hook_fuel: Option<u64>) -> Self {
        let id = Uuid::new_v4();
        debug!(context_id = %id, "Creating isolation context {}", name);

        let store = Store::new(
            engine,
            UnitState {
                unit_name: name.to_string(),
            },
        );

        Self {
            id,
            name: name.to_string(),
            engine: engine.clone(),
            inner: Arc::new(Mutex::new(ContextInner {
                store,
                module: None,
                instance: None,
                type_name: None,
                hook_fuel,
            })),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Compile unit bytes into this context
    ///
    /// A context holds at most one unit.
    pub fn load_unit(&mut self, bytes: &[u8]) -> Result<LoadedUnit, ModuleError> {
        let mut inner = lock(&self.inner);
        if inner.module.is_some() {
            return Err(ModuleError::UnitLoad(format!(
                "Context {} already holds a unit",
                self.name
            )));
        }

        let manifest = UnitManifest::from_unit_bytes(bytes)?;
        let module =
            Module::new(&self.engine, bytes).map_err(|e| ModuleError::UnitLoad(e.to_string()))?;
        let unit = LoadedUnit::describe(&module, bytes, manifest);
        inner.module = Some(module);

        debug!(
            context_id = %self.id,
            "Loaded unit into context {} ({} bytes, {} exports)",
            self.name,
            unit.size_bytes,
            unit.exports.len()
        );
        Ok(unit)
    }

    /// Instantiate the loaded unit and bind the exported type that implements the module
    pub fn instantiate(&self, type_name: &str) -> Result<(), ModuleError> {
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        let module = inner
            .module
            .clone()
            .ok_or_else(|| ModuleError::UnitLoad(format!("Context {} holds no unit", self.name)))?;

        let linker = build_linker(&self.engine, &module)?;
        inner.refuel()?;
        let instance = linker
            .instantiate(&mut inner.store, &module)
            .map_err(|e| ModuleError::UnitLoad(e.to_string()))?;

        inner.instance = Some(instance);
        inner.type_name = Some(type_name.to_string());
        Ok(())
    }

    pub fn call_hook(&self, hook: Hook) -> Result<(), ModuleError> {
        lock(&self.inner).call_hook(&self.name, hook)
    }

    pub fn is_active(&self, tenant: TenantId) -> Result<bool, ModuleError> {
        lock(&self.inner).is_active(&self.name, tenant)
    }

    pub fn set_active(&self, tenant: TenantId, active: bool) -> Result<(), ModuleError> {
        lock(&self.inner).set_active(&self.name, tenant, active)
    }

    /// Non-owning handle for callers outside the registry
    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            name: self.name.clone(),
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Tear the context down
    ///
    /// Drops the instance and compiled unit immediately, so outstanding handles
    /// fail from here on, then gives up ownership of the store. The returned
    /// observer reports when the last strong reference is gone.
    pub fn release(self) -> ReclamationObserver {
        {
            let mut inner = lock(&self.inner);
            inner.instance = None;
            inner.type_name = None;
            inner.module = None;
        }

        debug!(context_id = %self.id, "Released isolation context {}", self.name);

        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(&self.inner) as Weak<Mutex<ContextInner>>;
        ReclamationObserver::new(self.id, self.name, weak)
    }
}

/// Weak handle into an isolation context
///
/// Used by detached tasks. Every call fails with `NotLoaded` once the context
/// has been released.
#[derive(Clone)]
pub struct ContextHandle {
    name: String,
    inner: Weak<Mutex<ContextInner>>,
}

impl ContextHandle {
    pub fn call_hook(&self, hook: Hook) -> Result<(), ModuleError> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| ModuleError::NotLoaded(self.name.clone()))?;
        let result = lock(&inner).call_hook(&self.name, hook);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::loader::build_engine;

    const GREETER: &str = r#"
        (module
          (func (export "Greeter.on_load") (result i32) (i32.const 0))
          (func (export "Greeter.on_ready") (result i32) (i32.const 0))
          (func (export "Greeter.on_unload") (result i32) (i32.const 3)))
    "#;

    fn loaded_context() -> IsolationContext {
        let engine = build_engine(None).unwrap();
        let mut context = IsolationContext::create(&engine, "Greeter", None);
        let bytes = wat::parse_str(GREETER).unwrap();
        context.load_unit(&bytes).unwrap();
        context.instantiate("Greeter").unwrap();
        context
    }

    #[test]
    fn test_hooks_report_status() {
        let context = loaded_context();
        assert!(context.call_hook(Hook::OnLoad).is_ok());
        let result = context.call_hook(Hook::OnUnload);
        assert!(matches!(result, Err(ModuleError::HookFailure { .. })));
    }

    #[test]
    fn test_second_unit_rejected() {
        let engine = build_engine(None).unwrap();
        let mut context = IsolationContext::create(&engine, "Greeter", None);
        let bytes = wat::parse_str(GREETER).unwrap();
        context.load_unit(&bytes).unwrap();
        assert!(matches!(
            context.load_unit(&bytes),
            Err(ModuleError::UnitLoad(_))
        ));
    }

    #[test]
    fn test_release_invalidates_handles() {
        let context = loaded_context();
        let handle = context.handle();
        assert!(handle.call_hook(Hook::OnReady).is_ok());

        let observer = context.release();
        assert!(observer.is_reclaimed());
        assert!(matches!(
            handle.call_hook(Hook::OnReady),
            Err(ModuleError::NotLoaded(_))
        ));
    }

    #[test]
    fn test_malformed_bytes_rejected() {
        let engine = build_engine(None).unwrap();
        let mut context = IsolationContext::create(&engine, "junk", None);
        assert!(context.load_unit(b"\0asm\x02\0\0\0").is_err());
    }
}
