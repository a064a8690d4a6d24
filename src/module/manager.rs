//! Module manager for orchestrating all modules
//!
//! Handles module lifecycle: runtime loading, unloading and reloading, batch
//! operations, the host connection signal and reclamation checks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wasmtime::Engine;

use crate::config::{HostConfig, ModuleConfig};
use crate::module::loader::{build_engine, ContextHandle, IsolationContext};
use crate::module::reclamation::ReclamationVerifier;
use crate::module::registry::discovery::read_identity;
use crate::module::registry::{
    CandidateRef, CandidateScanner, DependencyScanReport, DependencyScanner, ModuleRegistry,
    RegisteredModule,
};
use crate::module::traits::{
    Hook, ModuleAdmin, ModuleError, ModuleInfo, ModuleKey, ModuleState, Scope, TenantId,
};
use crate::module::validation::{ModuleValidator, ValidationResult};

/// Outcome of a successful load
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub info: ModuleInfo,
    /// Advisory; never blocks the load
    pub dependencies: DependencyScanReport,
}

/// Outcome of a successful unload
#[derive(Debug, Clone)]
pub struct UnloadReport {
    pub info: ModuleInfo,
    /// `on_unload` completed without failure
    pub hook_succeeded: bool,
    /// `None` when reclamation checks are disabled
    pub reclaimed: Option<bool>,
}

/// Module manager coordinates all loaded modules
pub struct ModuleManager {
    engine: Engine,
    config: ModuleConfig,
    scanner: CandidateScanner,
    validator: ModuleValidator,
    dependency_scanner: DependencyScanner,
    verifier: ReclamationVerifier,
    /// Live modules; only this manager writes to it
    modules: Arc<RwLock<ModuleRegistry>>,
    /// Per-key serialization of load/unload
    key_locks: Mutex<HashMap<ModuleKey, Arc<AsyncMutex<()>>>>,
    /// Host realtime connection established
    connected: AtomicBool,
}

impl ModuleManager {
    /// Create a new module manager
    pub fn new(config: &HostConfig) -> Result<Self, ModuleError> {
        let engine = build_engine(config.modules.hook_fuel)?;
        Ok(Self::with_engine(engine, config))
    }

    /// Create a module manager on an existing engine
    pub fn with_engine(engine: Engine, config: &HostConfig) -> Self {
        let modules = &config.modules;
        Self {
            scanner: CandidateScanner::new(modules.extension.clone()),
            validator: ModuleValidator::new(&engine, modules),
            dependency_scanner: DependencyScanner::new(
                modules.dependency_blacklist.clone(),
                modules.blocked_namespaces.clone(),
            ),
            verifier: ReclamationVerifier::new(config.reclamation.clone()),
            modules: Arc::new(RwLock::new(ModuleRegistry::new())),
            key_locks: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            config: modules.clone(),
            engine,
        }
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn lock_key(&self, key: &ModuleKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop locks nobody is holding or waiting on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Load a module by name into a scope
    pub async fn load(&self, scope: Scope, name: &str) -> Result<LoadReport, ModuleError> {
        self.validator.check_name(name)?;

        let key = ModuleKey::new(scope, name);
        let _guard = self.lock_key(&key).await;
        self.load_locked(&key, None).await
    }

    /// Unload a module
    pub async fn unload(&self, scope: Scope, name: &str) -> Result<UnloadReport, ModuleError> {
        let key = ModuleKey::new(scope, name);
        let _guard = self.lock_key(&key).await;
        self.unload_locked(&key).await
    }

    /// Unload then load a module, holding its key throughout
    pub async fn reload_module(&self, scope: Scope, name: &str) -> Result<LoadReport, ModuleError> {
        info!(scope = %scope, "Reloading module: {}", name);
        self.validator.check_name(name)?;

        let key = ModuleKey::new(scope, name);
        let _guard = self.lock_key(&key).await;
        if let Err(e) = self.unload_locked(&key).await {
            debug!("Reload of {}: nothing to unload ({})", key, e);
        }
        self.load_locked(&key, None).await
    }

    /// Load every candidate found in a scope's directory
    ///
    /// Returns `(loaded, total)`; a failing candidate never aborts the batch.
    pub async fn load_all(&self, scope: Scope) -> (usize, usize) {
        let directory = match self.module_directory(scope) {
            Ok(directory) => directory,
            Err(e) => {
                error!(scope = %scope, "Failed to prepare module directory: {}", e);
                return (0, 0);
            }
        };
        let candidates: Vec<CandidateRef> = match self.scanner.scan(&directory) {
            Ok(candidates) => candidates.collect(),
            Err(e) => {
                error!(scope = %scope, "Failed to scan {:?}: {}", directory, e);
                return (0, 0);
            }
        };

        let total = candidates.len();
        let mut loaded = 0;
        for candidate in candidates {
            let key = ModuleKey::new(scope, &candidate.name);
            let result = match self.validator.check_name(&candidate.name) {
                Ok(()) => {
                    let _guard = self.lock_key(&key).await;
                    self.load_locked(&key, Some(candidate)).await
                }
                Err(reason) => Err(reason.into()),
            };
            match result {
                Ok(_) => loaded += 1,
                Err(e) => warn!(scope = %scope, "Failed to load {}: {}", key, e),
            }
        }

        info!(scope = %scope, "Loaded {}/{} modules", loaded, total);
        (loaded, total)
    }

    /// Unload every module registered in a scope
    pub async fn unload_all(&self, scope: Scope) -> (usize, usize) {
        let names = self.modules.read().await.list_all(scope);
        let total = names.len();
        let mut unloaded = 0;
        for name in names {
            match self.unload(scope, &name).await {
                Ok(_) => unloaded += 1,
                Err(e) => warn!(scope = %scope, "Failed to unload {}: {}", name, e),
            }
        }

        info!(scope = %scope, "Unloaded {}/{} modules", unloaded, total);
        (unloaded, total)
    }

    /// Unload every module in every scope
    pub async fn shutdown(&self) -> (usize, usize) {
        info!("Shutting down module manager");
        let keys: Vec<ModuleKey> = {
            let registry = self.modules.read().await;
            let mut keys = registry.keys_in_state(ModuleState::Loaded);
            keys.extend(registry.keys_in_state(ModuleState::Ready));
            keys
        };

        let total = keys.len();
        let mut unloaded = 0;
        for key in keys {
            match self.unload(key.scope(), key.name()).await {
                Ok(_) => unloaded += 1,
                Err(e) => warn!("Error unloading module {}: {}", key, e),
            }
        }
        self.set_disconnected();
        info!("Module manager shut down ({}/{} unloaded)", unloaded, total);
        (unloaded, total)
    }

    /// Mark the host connection established and fire `on_ready` for loaded modules
    pub async fn set_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);

        let mut registry = self.modules.write().await;
        let tenants = registry.tenants();
        info!(
            "Host connected; {} tenant(s) with loaded modules: {:?}",
            tenants.len(),
            tenants
        );

        for key in registry.keys_in_state(ModuleState::Loaded) {
            if let Some((context_id, handle)) = registry.claim_ready(&key) {
                self.spawn_ready(key, context_id, handle);
            }
        }
    }

    pub fn set_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Host disconnected");
        }
    }

    /// Scan a candidate for restricted dependencies without registering it
    pub fn check_dependencies(&self, path: &Path) -> Result<DependencyScanReport, ModuleError> {
        let (name, _) = read_identity(path)?;
        let bytes = fs::read(path)?;

        let mut context = IsolationContext::create(&self.engine, &name, self.config.hook_fuel);
        let report = context
            .load_unit(&bytes)
            .map(|unit| self.dependency_scanner.scan(&unit));
        let _ = context.release();
        report
    }

    /// Query a tenant module's activation state
    pub async fn is_module_active(&self, tenant: TenantId, name: &str) -> Option<bool> {
        let key = ModuleKey::new(Scope::Tenant(tenant), name);
        let registry = self.modules.read().await;
        let module = registry.entry(&key)?;
        match module.context.is_active(tenant) {
            Ok(active) => Some(active),
            Err(e) => {
                warn!("Failed to query activation of {}: {}", key, e);
                None
            }
        }
    }

    /// Change a tenant module's activation state
    pub async fn set_module_active(&self, tenant: TenantId, name: &str, active: bool) -> bool {
        let key = ModuleKey::new(Scope::Tenant(tenant), name);
        let registry = self.modules.read().await;
        let Some(module) = registry.entry(&key) else {
            warn!("Cannot change activation of {}: not loaded", key);
            return false;
        };
        match module.context.set_active(tenant, active) {
            Ok(()) => {
                info!("Module {} {}", key, if active { "activated" } else { "deactivated" });
                true
            }
            Err(e) => {
                warn!("Failed to change activation of {}: {}", key, e);
                false
            }
        }
    }

    pub async fn module_state(&self, scope: Scope, name: &str) -> Option<ModuleState> {
        self.module_info(scope, name).await.map(|info| info.state)
    }

    pub async fn module_info(&self, scope: Scope, name: &str) -> Option<ModuleInfo> {
        self.modules.read().await.get(&ModuleKey::new(scope, name))
    }

    pub async fn list(&self, scope: Scope) -> Vec<String> {
        self.modules.read().await.list_all(scope)
    }

    /// Module directory for a scope, created when missing
    fn module_directory(&self, scope: Scope) -> Result<PathBuf, ModuleError> {
        let directory = self.config.directory_for(scope);
        if !directory.exists() {
            debug!(scope = %scope, "Module directory does not exist, creating: {:?}", directory);
            fs::create_dir_all(&directory)?;
        }
        Ok(directory)
    }

    /// Pick the unit to load for a key and the type implementing it
    ///
    /// Without an explicit candidate, every unit declaring the name is tried in
    /// scan order and the first valid one wins.
    fn resolve_candidate(
        &self,
        key: &ModuleKey,
        candidate: Option<CandidateRef>,
    ) -> Result<(CandidateRef, String), ModuleError> {
        if let Some(candidate) = candidate {
            let type_name = self.validate_candidate(key, &candidate)?;
            return Ok((candidate, type_name));
        }

        let directory = self.module_directory(key.scope())?;
        let candidates: Vec<CandidateRef> =
            self.scanner.find_all(&directory, key.name())?.collect();

        let mut last_error = None;
        for candidate in candidates {
            match self.validate_candidate(key, &candidate) {
                Ok(type_name) => return Ok((candidate, type_name)),
                Err(e) => {
                    debug!("Skipping candidate {:?} for {}: {}", candidate.path, key, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ModuleError::NotFound(key.to_string())))
    }

    fn validate_candidate(
        &self,
        key: &ModuleKey,
        candidate: &CandidateRef,
    ) -> Result<String, ModuleError> {
        match self
            .validator
            .validate(&candidate.path, key.scope().capability())
        {
            ValidationResult::Valid {
                name: declared,
                type_name,
                ..
            } if declared == key.name() => Ok(type_name),
            ValidationResult::Valid { name: declared, .. } => {
                Err(ModuleError::InvalidManifest(format!(
                    "{:?} declares `{}`, expected `{}`",
                    candidate.path,
                    declared,
                    key.name()
                )))
            }
            ValidationResult::Invalid(reason) => Err(reason.into()),
        }
    }

    /// Load with the key lock held
    ///
    /// Nothing is committed to the registry unless `on_load` succeeds.
    async fn load_locked(
        &self,
        key: &ModuleKey,
        candidate: Option<CandidateRef>,
    ) -> Result<LoadReport, ModuleError> {
        let scope = key.scope();
        let name = key.name();
        info!(scope = %scope, "Loading module: {}", name);

        if self.modules.read().await.contains(key) {
            return Err(ModuleError::AlreadyLoaded(key.to_string()));
        }

        let (candidate, type_name) = self.resolve_candidate(key, candidate)?;

        let bytes = fs::read(&candidate.path)?;
        let context = IsolationContext::create(&self.engine, name, self.config.hook_fuel);
        let context_id = context.id();

        // Compilation and unit code stay off the async workers
        let hook_type = type_name.clone();
        let (context, prepared) = tokio::task::spawn_blocking(move || {
            let mut context = context;
            let prepared = context.load_unit(&bytes).and_then(|unit| {
                context.instantiate(&hook_type)?;
                context.call_hook(Hook::OnLoad)?;
                Ok(unit)
            });
            (context, prepared)
        })
        .await
        .map_err(|e| ModuleError::UnitLoad(format!("Load task for {} failed: {}", key, e)))?;

        let unit = match prepared {
            Ok(unit) => unit,
            Err(e) => {
                error!(scope = %scope, context_id = %context_id, "Failed to load {}: {}", name, e);
                self.discard(context).await;
                return Err(e);
            }
        };

        let dependencies = self.dependency_scanner.scan(&unit);
        if !dependencies.is_clean() {
            let violation = ModuleError::DependencyViolation(dependencies.clone().into_vec());
            warn!(scope = %scope, "Loading {} despite advisory scan: {}", name, violation);
        }

        let info = ModuleInfo {
            name: name.to_string(),
            scope,
            state: ModuleState::Loaded,
            type_name,
            context_id,
            version: unit.manifest.as_ref().and_then(|m| m.version.clone()),
            digest: unit.digest.clone(),
            size_bytes: unit.size_bytes,
            path: candidate.path,
        };

        {
            let mut registry = self.modules.write().await;
            if let Err(rejected) =
                registry.try_insert(key.clone(), RegisteredModule::new(info.clone(), context))
            {
                drop(registry);
                self.discard(rejected.context).await;
                return Err(ModuleError::AlreadyLoaded(key.to_string()));
            }

            if self.is_connected() {
                if let Some((context_id, handle)) = registry.claim_ready(key) {
                    self.spawn_ready(key.clone(), context_id, handle);
                }
            }
        }

        info!(
            scope = %scope,
            context_id = %context_id,
            "Module {} loaded ({} bytes, sha256 {})",
            name,
            info.size_bytes,
            info.digest
        );
        Ok(LoadReport { info, dependencies })
    }

    /// Unload with the key lock held
    async fn unload_locked(&self, key: &ModuleKey) -> Result<UnloadReport, ModuleError> {
        info!(scope = %key.scope(), "Unloading module: {}", key.name());

        let (context_id, handle) = {
            let mut registry = self.modules.write().await;
            let Some(info) = registry.get(key) else {
                return Err(ModuleError::NotLoaded(key.to_string()));
            };
            if !registry.transition(key, info.context_id, info.state, ModuleState::Unloading) {
                return Err(ModuleError::NotLoaded(key.to_string()));
            }
            let handle = registry
                .handle(key)
                .ok_or_else(|| ModuleError::NotLoaded(key.to_string()))?;
            (info.context_id, handle)
        };

        // Failure here never stops the unload
        let hook_succeeded = match run_hook(handle, Hook::OnUnload, key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(context_id = %context_id, "{}", e);
                false
            }
        };

        // Remove before release: no lookup may observe a torn-down context
        let removed = self
            .modules
            .write()
            .await
            .remove(key)
            .ok_or_else(|| ModuleError::NotLoaded(key.to_string()))?;
        let mut info = removed.info;
        let observer = removed.context.release();
        info.state = ModuleState::Unloaded;

        let reclaimed = if self.config.verify_reclamation {
            Some(self.verifier.confirm(&observer).await)
        } else {
            None
        };

        info!(scope = %key.scope(), context_id = %context_id, "Module {} unloaded", key.name());
        Ok(UnloadReport {
            info,
            hook_succeeded,
            reclaimed,
        })
    }

    /// Tear down a context that never made it into the registry
    async fn discard(&self, context: IsolationContext) {
        let observer = context.release();
        if self.config.verify_reclamation {
            self.verifier.confirm(&observer).await;
        }
    }

    /// Run `on_ready` detached from the caller
    fn spawn_ready(&self, key: ModuleKey, context_id: Uuid, handle: ContextHandle) {
        let modules = Arc::clone(&self.modules);
        tokio::spawn(async move {
            let result = run_hook(handle, Hook::OnReady, &key).await;
            if let Err(e) = &result {
                warn!(context_id = %context_id, "{}", e);
            }

            let ready = modules
                .write()
                .await
                .complete_ready(&key, context_id, result.is_ok());
            if ready {
                info!(context_id = %context_id, "Module {} ready", key);
            }
        });
    }
}

/// Run a hook on the blocking pool
///
/// Unit code runs until it returns or its fuel runs out; an async worker must
/// never be the thread waiting on it.
async fn run_hook(handle: ContextHandle, hook: Hook, key: &ModuleKey) -> Result<(), ModuleError> {
    tokio::task::spawn_blocking(move || handle.call_hook(hook))
        .await
        .unwrap_or_else(|e| {
            Err(ModuleError::HookFailure {
                module: key.to_string(),
                hook: hook.to_string(),
                reason: e.to_string(),
            })
        })
}

#[async_trait]
impl ModuleAdmin for ModuleManager {
    async fn load_module(&self, scope: Scope, name: &str) -> bool {
        match self.load(scope, name).await {
            Ok(_) => true,
            Err(e) => {
                warn!(scope = %scope, "Load of {} failed: {}", name, e);
                false
            }
        }
    }

    async fn unload_module(&self, scope: Scope, name: &str) -> bool {
        match self.unload(scope, name).await {
            Ok(_) => true,
            Err(e) => {
                warn!(scope = %scope, "Unload of {} failed: {}", name, e);
                false
            }
        }
    }

    async fn load_all_modules(&self, scope: Scope) -> (usize, usize) {
        self.load_all(scope).await
    }

    async fn unload_all_modules(&self, scope: Scope) -> (usize, usize) {
        self.unload_all(scope).await
    }

    async fn list_modules(&self, scope: Scope) -> Vec<String> {
        self.list(scope).await
    }
}
