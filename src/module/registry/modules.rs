//! Live module registry
//!
//! Maps `(scope, name)` to the loaded module and the isolation context that owns
//! it. The registry itself is plain data; the manager wraps it in a lock and is
//! the only writer.

use std::collections::HashMap;
use uuid::Uuid;

use crate::module::loader::{ContextHandle, IsolationContext};
use crate::module::traits::{ModuleInfo, ModuleKey, ModuleState, Scope};

/// A loaded module together with the context that owns its unit
pub struct RegisteredModule {
    pub info: ModuleInfo,
    pub context: IsolationContext,
    /// An `on_ready` call is in flight
    ready_dispatched: bool,
}

impl RegisteredModule {
    pub fn new(info: ModuleInfo, context: IsolationContext) -> Self {
        Self {
            info,
            context,
            ready_dispatched: false,
        }
    }
}

/// Registry of loaded modules
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleKey, RegisteredModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a module under a free key
    ///
    /// An occupied key leaves the registry untouched and hands the module back.
    pub fn try_insert(
        &mut self,
        key: ModuleKey,
        module: RegisteredModule,
    ) -> Result<(), RegisteredModule> {
        if self.modules.contains_key(&key) {
            return Err(module);
        }
        self.modules.insert(key, module);
        Ok(())
    }

    pub fn remove(&mut self, key: &ModuleKey) -> Option<RegisteredModule> {
        self.modules.remove(key)
    }

    pub fn contains(&self, key: &ModuleKey) -> bool {
        self.modules.contains_key(key)
    }

    /// Snapshot of a module
    pub fn get(&self, key: &ModuleKey) -> Option<ModuleInfo> {
        self.modules.get(key).map(|m| m.info.clone())
    }

    /// Borrow a module in place (for hook calls that must not outlive the entry)
    pub fn entry(&self, key: &ModuleKey) -> Option<&RegisteredModule> {
        self.modules.get(key)
    }

    /// Names registered in a scope, sorted
    pub fn list_all(&self, scope: Scope) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .keys()
            .filter(|key| key.scope() == scope)
            .map(|key| key.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Tenants with at least one loaded module, sorted
    pub fn tenants(&self) -> Vec<u64> {
        let mut tenants: Vec<u64> = self
            .modules
            .keys()
            .filter_map(|key| match key {
                ModuleKey::Tenant(id, _) => Some(*id),
                ModuleKey::Global(_) => None,
            })
            .collect();
        tenants.sort_unstable();
        tenants.dedup();
        tenants
    }

    /// Keys of every module in `state`
    pub fn keys_in_state(&self, state: ModuleState) -> Vec<ModuleKey> {
        let mut keys: Vec<ModuleKey> = self
            .modules
            .iter()
            .filter(|(_, m)| m.info.state == state)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Non-owning handle into a module's context
    pub fn handle(&self, key: &ModuleKey) -> Option<ContextHandle> {
        self.modules.get(key).map(|m| m.context.handle())
    }

    /// Advance a module's state
    ///
    /// Applies only while the entry still belongs to `context_id`, is in `from`
    /// and `from -> to` is a legal transition. Returns whether it applied.
    pub fn transition(
        &mut self,
        key: &ModuleKey,
        context_id: Uuid,
        from: ModuleState,
        to: ModuleState,
    ) -> bool {
        match self.modules.get_mut(key) {
            Some(module)
                if module.info.context_id == context_id
                    && module.info.state == from
                    && from.can_advance_to(to) =>
            {
                module.info.state = to;
                true
            }
            _ => false,
        }
    }

    /// Claim the single `on_ready` dispatch of a `Loaded` module
    ///
    /// Returns the context id and a handle for the detached call, or `None` when
    /// the module is not `Loaded` or a call is already in flight.
    pub fn claim_ready(&mut self, key: &ModuleKey) -> Option<(Uuid, ContextHandle)> {
        let module = self.modules.get_mut(key)?;
        if module.info.state != ModuleState::Loaded || module.ready_dispatched {
            return None;
        }
        module.ready_dispatched = true;
        Some((module.info.context_id, module.context.handle()))
    }

    /// Finish a claimed `on_ready` dispatch
    ///
    /// On success the module becomes `Ready`; on failure it stays `Loaded` and
    /// may be claimed again. Returns whether the module became `Ready`.
    pub fn complete_ready(&mut self, key: &ModuleKey, context_id: Uuid, succeeded: bool) -> bool {
        match self.modules.get_mut(key) {
            Some(module) if module.info.context_id == context_id => {
                module.ready_dispatched = false;
            }
            _ => return false,
        }
        succeeded && self.transition(key, context_id, ModuleState::Loaded, ModuleState::Ready)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
