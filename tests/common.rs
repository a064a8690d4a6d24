//! Test utilities for module system testing
//!
//! Builds unit fixtures from WebAssembly text and an isolated host layout.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use modhost::config::HostConfig;
use modhost::module::registry::manifest::{embed_manifest, UnitManifest};
use modhost::module::{ModuleManager, ModuleState, Scope};

/// Global module whose hooks return the given statuses
pub fn global_unit(type_name: &str, on_load: i32, on_ready: i32, on_unload: i32) -> String {
    format!(
        r#"(module
             (func (export "{t}.on_load") (result i32) (i32.const {l}))
             (func (export "{t}.on_ready") (result i32) (i32.const {r}))
             (func (export "{t}.on_unload") (result i32) (i32.const {u})))"#,
        t = type_name,
        l = on_load,
        r = on_ready,
        u = on_unload
    )
}

/// Well-behaved global module
pub fn greeter(type_name: &str) -> String {
    global_unit(type_name, 0, 0, 0)
}

/// Tenant module remembering the activation flag of the last tenant it saw
pub fn tenant_unit(type_name: &str) -> String {
    format!(
        r#"(module
             (global $tenant (mut i64) (i64.const -1))
             (global $active (mut i32) (i32.const 0))
             (func (export "{t}.on_load") (result i32) (i32.const 0))
             (func (export "{t}.on_ready") (result i32) (i32.const 0))
             (func (export "{t}.on_unload") (result i32) (i32.const 0))
             (func (export "{t}.is_active") (param $id i64) (result i32)
               (if (result i32) (i64.eq (local.get $id) (global.get $tenant))
                 (then (global.get $active))
                 (else (i32.const 0))))
             (func (export "{t}.set_active") (param $id i64) (param $on i32)
               (global.set $tenant (local.get $id))
               (global.set $active (local.get $on))))"#,
        t = type_name
    )
}

/// Global module that traps inside `on_load`
pub fn trapping_on_load(type_name: &str) -> String {
    format!(
        r#"(module
             (func (export "{t}.on_load") (result i32) (unreachable))
             (func (export "{t}.on_ready") (result i32) (i32.const 0))
             (func (export "{t}.on_unload") (result i32) (i32.const 0)))"#,
        t = type_name
    )
}

/// Unit exporting nothing that resembles a module
pub fn not_a_module() -> String {
    r#"(module (func (export "helper") (result i32) (i32.const 7)))"#.to_string()
}

/// Compile WebAssembly text and embed a manifest naming the module
pub fn build_unit(name: &str, wat_src: &str) -> Vec<u8> {
    let bytes = wat::parse_str(wat_src).expect("fixture must be valid WebAssembly text");
    embed_manifest(&bytes, &UnitManifest::named(name)).expect("fixture manifest")
}

/// Test fixture for module system tests
pub struct ModuleTestFixture {
    /// Temporary directory for test data
    pub temp_dir: TempDir,
    pub manager: ModuleManager,
    pub config: HostConfig,
}

impl ModuleTestFixture {
    /// Create a new test fixture with isolated directories
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut HostConfig)) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");

        let mut config = HostConfig::default();
        config.modules.global_dir = temp_dir.path().join("modules").join("global");
        config.modules.tenants_dir = temp_dir.path().join("modules").join("tenants");
        config.reclamation.initial_delay_ms = 1;
        config.reclamation.max_delay_ms = 10;
        adjust(&mut config);

        let manager = ModuleManager::new(&config).expect("module manager");
        Self {
            temp_dir,
            manager,
            config,
        }
    }

    pub fn directory(&self, scope: Scope) -> PathBuf {
        self.config.modules.directory_for(scope)
    }

    /// Install a unit named `name` into a scope's directory
    pub fn install(&self, scope: Scope, name: &str, wat_src: &str) -> PathBuf {
        let file = format!("{}.wasm", name.to_lowercase());
        self.install_bytes(scope, &file, &build_unit(name, wat_src))
    }

    /// Install raw bytes under a file name
    pub fn install_bytes(&self, scope: Scope, file: &str, bytes: &[u8]) -> PathBuf {
        let dir = self.directory(scope);
        std::fs::create_dir_all(&dir).expect("module dir");
        let path = dir.join(file);
        std::fs::write(&path, bytes).expect("write unit");
        path
    }

    /// Wait until a module reaches `state` (detached hooks finish asynchronously)
    pub async fn wait_for_state(&self, scope: Scope, name: &str, state: ModuleState) -> bool {
        self.wait_for_state_within(scope, name, state, Duration::from_secs(1))
            .await
    }

    pub async fn wait_for_state_within(
        &self,
        scope: Scope,
        name: &str,
        state: ModuleState,
        limit: Duration,
    ) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if self.manager.module_state(scope, name).await == Some(state) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}
