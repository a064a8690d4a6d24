//! Module system types and interfaces
//!
//! Defines the identity, scope and lifecycle types shared by every part of the
//! module system, plus the administrative surface consumed by the command layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of an external organizational unit (tenant)
pub type TenantId = u64;

/// Module lifecycle state
///
/// Only the [`ModuleManager`](crate::module::manager::ModuleManager) advances a
/// module's state. `Unloaded` is terminal.
///
/// The registry only ever stores `Loaded`, `Ready` and `Unloading`: a candidate
/// is `Unvalidated` until it is registered, and a removed module is reported
/// as `Unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleState {
    /// Candidate found but not yet validated
    Unvalidated,
    /// Instantiated and `on_load` completed
    Loaded,
    /// `on_ready` completed after the host connection was established
    Ready,
    /// `on_unload` is running
    Unloading,
    /// Torn down; never reused
    Unloaded,
}

impl ModuleState {
    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(self, next: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, next),
            (Unvalidated, Loaded)
                | (Unvalidated, Unloaded)
                | (Loaded, Ready)
                | (Loaded, Unloading)
                | (Ready, Unloading)
                | (Unloading, Unloaded)
        )
    }
}

/// Where a module lives: one instance host-wide, or one per tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Tenant(TenantId),
}

impl Scope {
    /// The structural capability a candidate must expose to load in this scope
    pub fn capability(&self) -> Capability {
        match self {
            Scope::Global => Capability::Global,
            Scope::Tenant(_) => Capability::TenantScoped,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Tenant(id) => write!(f, "tenant:{}", id),
        }
    }
}

/// Module contract a unit's exported type must satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Lifecycle hooks only
    Global,
    /// Lifecycle hooks plus per-tenant activation
    TenantScoped,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Global => write!(f, "global module"),
            Capability::TenantScoped => write!(f, "tenant module"),
        }
    }
}

/// Registry key: a name within a scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleKey {
    Global(String),
    Tenant(TenantId, String),
}

impl ModuleKey {
    pub fn new(scope: Scope, name: &str) -> Self {
        match scope {
            Scope::Global => ModuleKey::Global(name.to_string()),
            Scope::Tenant(id) => ModuleKey::Tenant(id, name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ModuleKey::Global(name) | ModuleKey::Tenant(_, name) => name,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            ModuleKey::Global(_) => Scope::Global,
            ModuleKey::Tenant(id, _) => Scope::Tenant(*id),
        }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope(), self.name())
    }
}

/// Lifecycle hooks every module exports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    OnLoad,
    OnReady,
    OnUnload,
}

impl Hook {
    /// Export member name of this hook
    pub fn member(&self) -> &'static str {
        match self {
            Hook::OnLoad => "on_load",
            Hook::OnReady => "on_ready",
            Hook::OnUnload => "on_unload",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.member())
    }
}

/// Snapshot of a registered module, safe to hand out to any caller
///
/// Holds no reference into the module's isolation context.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub scope: Scope,
    pub state: ModuleState,
    /// Exported type that satisfied the module contract
    pub type_name: String,
    /// Id of the owning isolation context
    pub context_id: Uuid,
    pub version: Option<String>,
    /// SHA-256 of the unit bytes (hex)
    pub digest: String,
    pub size_bytes: usize,
    pub path: PathBuf,
}

/// Module system errors
///
/// All of these are recovered locally; none terminates the host.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module candidate not found: {0}")]
    NotFound(String),

    #[error("Module name `{name}` exceeds {max} characters")]
    NameTooLong { name: String, max: usize },

    #[error("Module name `{0}` is reserved by the host")]
    ReservedName(String),

    #[error("Module already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("Module not loaded: {0}")]
    NotLoaded(String),

    #[error("Invalid module kind: {0}")]
    InvalidModuleKind(String),

    #[error("Invalid module manifest: {0}")]
    InvalidManifest(String),

    #[error("Restricted dependencies: {0:?}")]
    DependencyViolation(Vec<String>),

    #[error("Context of module {0} still reachable after reclamation attempts")]
    ReclamationTimeout(String),

    #[error("Hook {hook} of module {module} failed: {reason}")]
    HookFailure {
        module: String,
        hook: String,
        reason: String,
    },

    #[error("Failed to load unit: {0}")]
    UnitLoad(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for ModuleError {
    fn from(e: toml::de::Error) -> Self {
        ModuleError::InvalidManifest(e.to_string())
    }
}

/// Administrative surface consumed by a command layer
///
/// Every operation reports success as a plain signal; failures are logged by the
/// implementation and never propagated.
#[async_trait]
pub trait ModuleAdmin: Send + Sync {
    async fn load_module(&self, scope: Scope, name: &str) -> bool;

    async fn unload_module(&self, scope: Scope, name: &str) -> bool;

    /// Returns `(loaded, total)`
    async fn load_all_modules(&self, scope: Scope) -> (usize, usize);

    /// Returns `(unloaded, total)`
    async fn unload_all_modules(&self, scope: Scope) -> (usize, usize);

    async fn list_modules(&self, scope: Scope) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(ModuleState::Loaded.can_advance_to(ModuleState::Ready));
        assert!(ModuleState::Ready.can_advance_to(ModuleState::Unloading));
        assert!(!ModuleState::Unvalidated.can_advance_to(ModuleState::Ready));
        assert!(!ModuleState::Unloaded.can_advance_to(ModuleState::Loaded));
        assert!(!ModuleState::Ready.can_advance_to(ModuleState::Loaded));
    }

    #[test]
    fn test_module_key_scope_roundtrip() {
        let key = ModuleKey::new(Scope::Tenant(7), "Bar");
        assert_eq!(key.scope(), Scope::Tenant(7));
        assert_eq!(key.name(), "Bar");
        assert_eq!(key.to_string(), "tenant:7/Bar");
        assert_ne!(key, ModuleKey::new(Scope::Tenant(8), "Bar"));
    }

    #[test]
    fn test_scope_capability() {
        assert_eq!(Scope::Global.capability(), Capability::Global);
        assert_eq!(Scope::Tenant(1).capability(), Capability::TenantScoped);
    }
}
