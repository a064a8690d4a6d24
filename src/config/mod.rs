//! Configuration management for the module host
//!
//! Handles configuration loading (TOML or JSON) and validation.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::module::traits::Scope;

/// Module system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Directory containing global module units
    #[serde(default = "default_global_dir")]
    pub global_dir: PathBuf,

    /// Parent directory of the per-tenant unit directories
    #[serde(default = "default_tenants_dir")]
    pub tenants_dir: PathBuf,

    /// Loadable unit extension, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Name no module may take
    #[serde(default = "default_reserved_name")]
    pub reserved_name: String,

    /// Maximum module name length, in characters
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,

    /// Declared dependencies or import modules that are reported by the dependency scan
    #[serde(default)]
    pub dependency_blacklist: Vec<String>,

    /// Namespaces units must not reach into
    #[serde(default = "default_blocked_namespaces")]
    pub blocked_namespaces: Vec<String>,

    /// Fuel granted to each hook call (None = unmetered)
    #[serde(default)]
    pub hook_fuel: Option<u64>,

    /// Confirm reclamation after every unload
    #[serde(default = "default_true")]
    pub verify_reclamation: bool,
}

fn default_true() -> bool {
    true
}

fn default_global_dir() -> PathBuf {
    PathBuf::from("modules/global")
}

fn default_tenants_dir() -> PathBuf {
    PathBuf::from("modules/tenants")
}

fn default_extension() -> String {
    "wasm".to_string()
}

fn default_reserved_name() -> String {
    "Loader".to_string()
}

fn default_max_name_len() -> usize {
    32
}

fn default_blocked_namespaces() -> Vec<String> {
    vec![
        "modhost::module::global".to_string(),
        "modhost::module::tenant".to_string(),
    ]
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            global_dir: default_global_dir(),
            tenants_dir: default_tenants_dir(),
            extension: default_extension(),
            reserved_name: default_reserved_name(),
            max_name_len: default_max_name_len(),
            dependency_blacklist: Vec::new(),
            blocked_namespaces: default_blocked_namespaces(),
            hook_fuel: None,
            verify_reclamation: true,
        }
    }
}

impl ModuleConfig {
    /// Unit directory for a scope
    pub fn directory_for(&self, scope: Scope) -> PathBuf {
        match scope {
            Scope::Global => self.global_dir.clone(),
            Scope::Tenant(id) => self.tenants_dir.join(id.to_string()),
        }
    }
}

/// Reclamation confirmation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclamationConfig {
    /// Attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt (milliseconds)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for the delay (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    5
}

fn default_max_delay_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ReclamationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl ReclamationConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Validate reclamation configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "reclamation.max_attempts must be greater than 0"
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(anyhow::anyhow!(
                "reclamation.initial_delay_ms ({}) exceeds reclamation.max_delay_ms ({})",
                self.initial_delay_ms,
                self.max_delay_ms
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!(
                "reclamation.backoff_multiplier must be a finite value >= 1.0"
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "modhost::module=debug"); RUST_LOG takes precedence
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub modules: ModuleConfig,

    #[serde(default)]
    pub reclamation: ReclamationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HostConfig {
    /// Load configuration, picking the format from the file extension
    ///
    /// `.json` is parsed as JSON, anything else as TOML.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: HostConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON config {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Invalid TOML config {}", path.display()))?,
        };
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let modules = &self.modules;
        if modules.extension.is_empty() || modules.extension.starts_with('.') {
            return Err(anyhow::anyhow!(
                "modules.extension must be a non-empty extension without the leading dot"
            ));
        }
        if modules.reserved_name.is_empty() {
            return Err(anyhow::anyhow!("modules.reserved_name must not be empty"));
        }
        if modules.max_name_len == 0 {
            return Err(anyhow::anyhow!("modules.max_name_len must be greater than 0"));
        }
        if modules.hook_fuel == Some(0) {
            return Err(anyhow::anyhow!(
                "modules.hook_fuel must be greater than 0 when set"
            ));
        }

        self.reclamation.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = HostConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.modules.max_name_len, 32);
        assert_eq!(config.modules.reserved_name, "Loader");
        assert_eq!(config.reclamation.max_attempts, 10);
    }

    #[test]
    fn test_directory_for_scope() {
        let config = ModuleConfig::default();
        assert_eq!(
            config.directory_for(Scope::Global),
            PathBuf::from("modules/global")
        );
        assert_eq!(
            config.directory_for(Scope::Tenant(42)),
            PathBuf::from("modules/tenants/42")
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(
            &path,
            "[modules]\nglobal_dir = \"/srv/units\"\nhook_fuel = 1000000\n\n[logging]\nfilter = \"debug\"\n",
        )
        .unwrap();

        let config = HostConfig::from_file(&path).unwrap();
        assert_eq!(config.modules.global_dir, PathBuf::from("/srv/units"));
        assert_eq!(config.modules.hook_fuel, Some(1_000_000));
        assert_eq!(config.modules.extension, "wasm");
        assert_eq!(config.logging.filter.as_deref(), Some("debug"));
        assert_eq!(config.reclamation.max_attempts, 10);
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.json");
        let mut config = HostConfig::default();
        config.modules.dependency_blacklist = vec!["wasi_snapshot_preview1".to_string()];
        config.to_json_file(&path).unwrap();

        let loaded = HostConfig::from_file(&path).unwrap();
        assert_eq!(loaded.modules.dependency_blacklist, config.modules.dependency_blacklist);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = HostConfig::default();
        config.reclamation.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.modules.extension = String::new();
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.modules.reserved_name = String::new();
        assert!(config.validate().is_err());
    }
}
