//! modhost - runtime module host
//!
//! A long-lived host that discovers WebAssembly extension units, validates them
//! against a global or tenant module contract, drives their lifecycle hooks and
//! unloads them again, confirming that their isolation context was reclaimed.
//!
//! ## Design Principles
//!
//! 1. **Exclusive ownership**: one isolation context per loaded module, released exactly once
//! 2. **Explicit state**: the registry is owned by the [`ModuleManager`], never a global
//! 3. **Local recovery**: no module failure terminates the host

pub mod admin;
pub mod config;
pub mod module;
pub mod utils;

pub use config::{HostConfig, LoggingConfig, ModuleConfig, ReclamationConfig};
pub use module::{ModuleAdmin, ModuleError, ModuleManager, ModuleState, Scope};
