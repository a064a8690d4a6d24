//! Module system for the host
//!
//! Loads third-party extension units at runtime, drives their lifecycle hooks
//! and unloads them again without restarting the host.
//!
//! ## Architecture
//!
//! - **Isolation**: every module lives in its own isolation context (compiled
//!   code, store, instance) owned by exactly one registry entry
//! - **Validation**: identity constraints and a structural contract check run
//!   in a throwaway context before anything is registered
//! - **Advisory dependency scan**: restricted namespaces are reported, never enforced
//! - **Failure containment**: hook failures are logged per module and never
//!   abort batch operations or the host
//! - **Reclamation**: released contexts are checked for leftover owners

pub mod loader;
pub mod manager;
pub mod reclamation;
pub mod registry;
pub mod traits;
pub mod validation;

pub use manager::{LoadReport, ModuleManager, UnloadReport};
pub use reclamation::{ReclamationObserver, ReclamationVerifier};
pub use traits::{
    Capability, ModuleAdmin, ModuleError, ModuleInfo, ModuleKey, ModuleState, Scope, TenantId,
};
pub use validation::{InvalidReason, ModuleValidator, ValidationResult};
