//! Module registry and discovery
//!
//! Handles candidate discovery, manifest parsing, the dependency scan and the
//! table of live modules.

pub mod dependencies;
pub mod discovery;
pub mod manifest;
pub mod modules;

pub use dependencies::{DependencyScanReport, DependencyScanner};
pub use discovery::{CandidateRef, CandidateScanner};
pub use manifest::UnitManifest;
pub use modules::{ModuleRegistry, RegisteredModule};
