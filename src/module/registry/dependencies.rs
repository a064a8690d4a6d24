//! Static dependency scan
//!
//! Inspects what a loaded unit declares (manifest dependencies and type
//! references) and what it imports, and reports every identifier that falls
//! under a configured blacklist. The scan is advisory: anything a unit builds
//! by name at runtime is invisible to it, and a report never blocks a load.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::module::loader::LoadedUnit;

/// Violations found in one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyScanReport {
    pub violations: BTreeSet<String>,
}

impl DependencyScanReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.violations.into_iter().collect()
    }
}

/// Dependency scanner
#[derive(Debug, Clone)]
pub struct DependencyScanner {
    /// Forbidden external dependencies (exact match)
    dependency_blacklist: Vec<String>,
    /// Forbidden namespaces (matched on `::` boundaries)
    blocked_namespaces: Vec<String>,
}

impl DependencyScanner {
    pub fn new(dependency_blacklist: Vec<String>, blocked_namespaces: Vec<String>) -> Self {
        Self {
            dependency_blacklist,
            blocked_namespaces,
        }
    }

    /// Scan a unit
    pub fn scan(&self, unit: &LoadedUnit) -> DependencyScanReport {
        let mut report = DependencyScanReport::default();

        if let Some(manifest) = &unit.manifest {
            for dependency in &manifest.dependencies {
                if self.is_blacklisted(dependency) || self.is_blocked_namespace(dependency) {
                    report.violations.insert(dependency.clone());
                }
            }

            for reference in &manifest.references {
                // `a::b::Type` is owned by `a::b`
                let owner = reference
                    .rsplit_once("::")
                    .map(|(namespace, _)| namespace)
                    .unwrap_or(reference.as_str());
                if self.is_blocked_namespace(owner) {
                    report.violations.insert(reference.clone());
                }
            }
        }

        for import in &unit.imports {
            if self.is_blacklisted(&import.module) || self.is_blocked_namespace(&import.module) {
                report
                    .violations
                    .insert(format!("{}::{}", import.module, import.name));
            }
        }

        if report.is_clean() {
            debug!("Dependency scan clean");
        } else {
            warn!(
                "Dependency scan found {} restricted identifier(s): {:?}",
                report.violations.len(),
                report.violations
            );
        }
        report
    }

    #[inline]
    fn is_blacklisted(&self, identifier: &str) -> bool {
        self.dependency_blacklist.iter().any(|b| b == identifier)
    }

    #[inline]
    fn is_blocked_namespace(&self, namespace: &str) -> bool {
        self.blocked_namespaces.iter().any(|blocked| {
            namespace == blocked
                || namespace
                    .strip_prefix(blocked.as_str())
                    .map_or(false, |rest| rest.starts_with("::"))
        })
    }
}
