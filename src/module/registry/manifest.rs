//! Unit manifest parsing and embedding
//!
//! A unit declares its identity in a `module-manifest` custom section holding a
//! TOML document. Reading it is purely structural: no code is compiled or run.

use serde::{Deserialize, Serialize};
use std::path::Path;
use wasmparser::{Parser, Payload};

use crate::module::traits::ModuleError;

/// Custom section carrying the TOML manifest
pub const MANIFEST_SECTION: &str = "module-manifest";

/// Unit manifest (`module-manifest` section contents)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitManifest {
    /// Module name (identity within its scope)
    pub name: String,
    /// Module version
    #[serde(default)]
    pub version: Option<String>,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Module author
    #[serde(default)]
    pub author: Option<String>,
    /// External units or namespaces this unit depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Fully qualified type paths the unit refers to (`a::b::Type`)
    #[serde(default)]
    pub references: Vec<String>,
}

impl UnitManifest {
    /// Minimal manifest carrying only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load a standalone TOML manifest (`module.toml`) from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ModuleError::InvalidManifest(format!("Failed to read manifest file: {}", e))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse manifest TOML
    pub fn from_toml(contents: &str) -> Result<Self, ModuleError> {
        let manifest: UnitManifest = toml::from_str(contents)?;

        if manifest.name.trim().is_empty() {
            return Err(ModuleError::InvalidManifest(
                "Module name cannot be empty".to_string(),
            ));
        }

        Ok(manifest)
    }

    pub fn to_toml(&self) -> Result<String, ModuleError> {
        toml::to_string_pretty(self).map_err(|e| ModuleError::InvalidManifest(e.to_string()))
    }

    /// Extract the embedded manifest from unit bytes
    ///
    /// Returns `Ok(None)` for a well-formed unit without a manifest section.
    pub fn from_unit_bytes(bytes: &[u8]) -> Result<Option<Self>, ModuleError> {
        match find_manifest_section(bytes)? {
            Some(data) => {
                let text = std::str::from_utf8(data).map_err(|e| {
                    ModuleError::InvalidManifest(format!("Manifest is not UTF-8: {}", e))
                })?;
                Self::from_toml(text).map(Some)
            }
            None => Ok(None),
        }
    }
}

fn find_manifest_section(bytes: &[u8]) -> Result<Option<&[u8]>, ModuleError> {
    for payload in Parser::new(0).parse_all(bytes) {
        let payload = payload.map_err(|e| ModuleError::UnitLoad(e.to_string()))?;
        if let Payload::CustomSection(reader) = payload {
            if reader.name() == MANIFEST_SECTION {
                return Ok(Some(reader.data()));
            }
        }
    }
    Ok(None)
}

/// Append a `module-manifest` custom section to a unit
///
/// Units that already carry a manifest are rejected so that two identities can
/// never coexist in one file.
pub fn embed_manifest(bytes: &[u8], manifest: &UnitManifest) -> Result<Vec<u8>, ModuleError> {
    if find_manifest_section(bytes)?.is_some() {
        return Err(ModuleError::InvalidManifest(
            "Unit already carries a module-manifest section".to_string(),
        ));
    }

    let payload = manifest.to_toml()?;

    let mut contents = Vec::with_capacity(payload.len() + MANIFEST_SECTION.len() + 10);
    write_leb128(&mut contents, MANIFEST_SECTION.len() as u32);
    contents.extend_from_slice(MANIFEST_SECTION.as_bytes());
    contents.extend_from_slice(payload.as_bytes());

    let mut out = Vec::with_capacity(bytes.len() + contents.len() + 6);
    out.extend_from_slice(bytes);
    out.push(0x00); // custom section id
    write_leb128(&mut out, contents.len() as u32);
    out.extend_from_slice(&contents);
    Ok(out)
}

#[inline]
fn write_leb128(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `(module)` in binary form
    const EMPTY_UNIT: &[u8] = &[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    #[test]
    fn test_leb128_encoding() {
        let mut out = Vec::new();
        write_leb128(&mut out, 624485);
        assert_eq!(out, vec![0xe5, 0x8e, 0x26]);

        out.clear();
        write_leb128(&mut out, 127);
        assert_eq!(out, vec![0x7f]);
    }

    #[test]
    fn test_embed_and_read_manifest() {
        let manifest = UnitManifest {
            name: "Greeter".to_string(),
            version: Some("1.0.0".to_string()),
            dependencies: vec!["std".to_string()],
            ..Default::default()
        };

        let unit = embed_manifest(EMPTY_UNIT, &manifest).unwrap();
        let read = UnitManifest::from_unit_bytes(&unit).unwrap().unwrap();
        assert_eq!(read, manifest);
    }

    #[test]
    fn test_unit_without_manifest() {
        assert!(UnitManifest::from_unit_bytes(EMPTY_UNIT).unwrap().is_none());
    }

    #[test]
    fn test_second_manifest_rejected() {
        let unit = embed_manifest(EMPTY_UNIT, &UnitManifest::named("A")).unwrap();
        let result = embed_manifest(&unit, &UnitManifest::named("B"));
        assert!(matches!(result, Err(ModuleError::InvalidManifest(_))));
    }

    #[test]
    fn test_garbage_is_not_a_unit() {
        let result = UnitManifest::from_unit_bytes(b"MZ\x90\x00 not wasm");
        assert!(matches!(result, Err(ModuleError::UnitLoad(_))));
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = UnitManifest::from_toml("name = \"  \"");
        assert!(matches!(result, Err(ModuleError::InvalidManifest(_))));
    }
}
