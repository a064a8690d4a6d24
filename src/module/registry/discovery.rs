//! Candidate discovery
//!
//! Scans a module directory for loadable units and reads their declared identity.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::module::registry::manifest::UnitManifest;
use crate::module::traits::ModuleError;

/// Loadable unit found on disk
#[derive(Debug, Clone)]
pub struct CandidateRef {
    /// Path to the unit file
    pub path: PathBuf,
    /// Declared identity (manifest name, or file stem when no manifest is embedded)
    pub name: String,
    /// Embedded manifest, if any
    pub manifest: Option<UnitManifest>,
}

/// Candidate scanner
///
/// Results are never cached: every call walks the directory again.
pub struct CandidateScanner {
    /// Loadable unit extension, without the dot
    extension: String,
}

impl CandidateScanner {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    /// Whether a path carries the loadable unit extension
    pub fn has_unit_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e == self.extension)
    }

    /// Discover all candidates in a directory
    ///
    /// Read-only: a missing directory yields nothing. Units whose identity
    /// cannot be read are still returned (named by file stem) so that batch
    /// operations count them; validation rejects them later.
    pub fn scan<P: AsRef<Path>>(
        &self,
        directory: P,
    ) -> Result<impl Iterator<Item = CandidateRef> + '_, ModuleError> {
        let directory = directory.as_ref();
        debug!("Scanning for candidates in {:?}", directory);

        let paths = self.unit_paths(directory)?;
        info!("Found {} candidate units in {:?}", paths.len(), directory);

        Ok(paths.into_iter().map(|path| {
            match read_identity(&path) {
                Ok((name, manifest)) => CandidateRef {
                    path,
                    name,
                    manifest,
                },
                Err(e) => {
                    warn!("Failed to read identity of {:?}: {}", path, e);
                    CandidateRef {
                        name: file_stem(&path),
                        path,
                        manifest: None,
                    }
                }
            }
        }))
    }

    /// Candidates declaring `name`, in scan order
    pub fn find_all<P: AsRef<Path>>(
        &self,
        directory: P,
        name: &str,
    ) -> Result<impl Iterator<Item = CandidateRef> + '_, ModuleError> {
        let name = name.to_string();
        Ok(self
            .scan(directory)?
            .filter(move |candidate| candidate.name == name))
    }

    fn unit_paths(&self, directory: &Path) -> Result<Vec<PathBuf>, ModuleError> {
        if !directory.is_dir() {
            debug!("Module directory does not exist: {:?}", directory);
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(directory)?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    warn!("Failed to read directory entry in {:?}: {}", directory, e);
                    None
                }
            })
            .filter(|path| path.is_file() && self.has_unit_extension(path))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Read a unit's declared identity without compiling it
pub fn read_identity(path: &Path) -> Result<(String, Option<UnitManifest>), ModuleError> {
    let bytes = fs::read(path)?;
    let manifest = UnitManifest::from_unit_bytes(&bytes)?;
    let name = manifest
        .as_ref()
        .map(|m| m.name.clone())
        .unwrap_or_else(|| file_stem(path));
    Ok((name, manifest))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::registry::manifest::embed_manifest;
    use tempfile::TempDir;

    const EMPTY_UNIT: &[u8] = &[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    #[test]
    fn test_scan_reads_manifest_names() {
        let dir = TempDir::new().unwrap();
        let unit = embed_manifest(EMPTY_UNIT, &UnitManifest::named("Greeter")).unwrap();
        fs::write(dir.path().join("greeter.wasm"), unit).unwrap();
        fs::write(dir.path().join("plain.wasm"), EMPTY_UNIT).unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let scanner = CandidateScanner::new("wasm");
        let names: Vec<String> = scanner.scan(dir.path()).unwrap().map(|c| c.name).collect();
        assert_eq!(names, vec!["Greeter".to_string(), "plain".to_string()]);
    }

    #[test]
    fn test_scan_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let scanner = CandidateScanner::new("wasm");
        assert_eq!(scanner.scan(dir.path()).unwrap().count(), 0);

        fs::write(dir.path().join("late.wasm"), EMPTY_UNIT).unwrap();
        assert_eq!(scanner.scan(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_directory_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let modules = dir.path().join("modules").join("global");
        let scanner = CandidateScanner::new("wasm");
        assert_eq!(scanner.scan(&modules).unwrap().count(), 0);
        assert!(!modules.exists());
    }

    #[test]
    fn test_unreadable_identity_falls_back_to_stem() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.wasm"), b"not a unit").unwrap();

        let scanner = CandidateScanner::new("wasm");
        let found: Vec<CandidateRef> = scanner.find_all(dir.path(), "broken").unwrap().collect();
        assert_eq!(found.len(), 1);
        assert!(found[0].manifest.is_none());
    }

    #[test]
    fn test_find_all_keeps_every_declaration() {
        let dir = TempDir::new().unwrap();
        for file in ["a-dup.wasm", "b-dup.wasm"] {
            let unit = embed_manifest(EMPTY_UNIT, &UnitManifest::named("Dup")).unwrap();
            fs::write(dir.path().join(file), unit).unwrap();
        }
        fs::write(dir.path().join("other.wasm"), EMPTY_UNIT).unwrap();

        let scanner = CandidateScanner::new("wasm");
        let files: Vec<PathBuf> = scanner
            .find_all(dir.path(), "Dup")
            .unwrap()
            .map(|c| c.path)
            .collect();
        assert_eq!(
            files,
            vec![dir.path().join("a-dup.wasm"), dir.path().join("b-dup.wasm")]
        );
    }
}
