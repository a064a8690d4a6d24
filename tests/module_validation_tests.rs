//! Candidate validation and dependency scan tests

mod common;

use common::*;
use modhost::config::ModuleConfig;
use modhost::module::loader::build_engine;
use modhost::module::registry::manifest::{embed_manifest, UnitManifest};
use modhost::module::{
    Capability, InvalidReason, ModuleError, ModuleValidator, Scope, ValidationResult,
};
use proptest::prelude::*;

fn validator() -> ModuleValidator {
    let engine = build_engine(None).unwrap();
    ModuleValidator::new(&engine, &ModuleConfig::default())
}

#[test]
fn test_tenant_contract_accepted() {
    let fixture = ModuleTestFixture::new();
    let path = fixture.install(Scope::Tenant(1), "Bar", &tenant_unit("Bar"));

    match validator().validate(&path, Capability::TenantScoped) {
        ValidationResult::Valid {
            name, type_name, ..
        } => {
            assert_eq!(name, "Bar");
            assert_eq!(type_name, "Bar");
        }
        other => panic!("expected a valid tenant module, got {:?}", other),
    }
}

#[test]
fn test_two_satisfying_types_rejected() {
    let fixture = ModuleTestFixture::new();
    let wat_src = r#"(module
        (func $ok (result i32) (i32.const 0))
        (export "First.on_load" (func $ok))
        (export "First.on_ready" (func $ok))
        (export "First.on_unload" (func $ok))
        (export "Second.on_load" (func $ok))
        (export "Second.on_ready" (func $ok))
        (export "Second.on_unload" (func $ok)))"#;
    let path = fixture.install(Scope::Global, "Twins", wat_src);

    assert!(matches!(
        validator().validate(&path, Capability::Global),
        ValidationResult::Invalid(InvalidReason::InvalidModuleKind(_))
    ));
}

#[test]
fn test_missing_hook_rejected() {
    let fixture = ModuleTestFixture::new();
    let wat_src = r#"(module
        (func (export "Half.on_load") (result i32) (i32.const 0))
        (func (export "Half.on_unload") (result i32) (i32.const 0)))"#;
    let path = fixture.install(Scope::Global, "Half", wat_src);

    assert!(!validator().validate(&path, Capability::Global).is_valid());
}

#[test]
fn test_file_stem_identity_without_manifest() {
    let fixture = ModuleTestFixture::new();
    let bytes = wat::parse_str(&greeter("Greeter")).unwrap();
    let path = fixture.install_bytes(Scope::Global, "plain.wasm", &bytes);

    match validator().validate(&path, Capability::Global) {
        ValidationResult::Valid { name, .. } => assert_eq!(name, "plain"),
        other => panic!("expected valid, got {:?}", other),
    }
}

#[test]
fn test_empty_manifest_name_is_malformed() {
    let fixture = ModuleTestFixture::new();
    let bytes = embed_manifest(
        &wat::parse_str(&greeter("Greeter")).unwrap(),
        &UnitManifest::named(""),
    )
    .unwrap();
    let path = fixture.install_bytes(Scope::Global, "nameless.wasm", &bytes);

    assert!(matches!(
        validator().validate(&path, Capability::Global),
        ValidationResult::Invalid(InvalidReason::Malformed(_))
    ));
}

#[test]
fn test_manifest_cannot_be_embedded_twice() {
    let unit = build_unit("Greeter", &greeter("Greeter"));
    assert!(matches!(
        embed_manifest(&unit, &UnitManifest::named("Other")),
        Err(ModuleError::InvalidManifest(_))
    ));
}

#[tokio::test]
async fn test_dependency_scan_is_advisory() {
    let fixture = ModuleTestFixture::with_config(|config| {
        config.modules.dependency_blacklist = vec!["wasi_snapshot_preview1".to_string()];
    });

    let wat_src = r#"(module
        (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32)))
        (import "modhost" "log" (func (param i32 i32 i32)))
        (memory (export "memory") 1)
        (func (export "Noisy.on_load") (result i32) (i32.const 0))
        (func (export "Noisy.on_ready") (result i32) (i32.const 0))
        (func (export "Noisy.on_unload") (result i32) (i32.const 0)))"#;
    let mut manifest = UnitManifest::named("Noisy");
    manifest.references = vec!["modhost::module::global::Registry".to_string()];
    let bytes = embed_manifest(&wat::parse_str(wat_src).unwrap(), &manifest).unwrap();
    let path = fixture.install_bytes(Scope::Global, "noisy.wasm", &bytes);

    let report = fixture.manager.check_dependencies(&path).unwrap();
    assert_eq!(
        report.clone().into_vec(),
        vec![
            "modhost::module::global::Registry".to_string(),
            "wasi_snapshot_preview1::fd_write".to_string(),
        ]
    );

    // Violations are reported, the load still succeeds
    let loaded = fixture.manager.load(Scope::Global, "Noisy").await.unwrap();
    assert_eq!(loaded.dependencies, report);
}

#[tokio::test]
async fn test_host_log_import_is_callable() {
    let fixture = ModuleTestFixture::new();
    let wat_src = r#"(module
        (import "modhost" "log" (func $log (param i32 i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "hello from a unit")
        (func (export "Chatty.on_load") (result i32)
          (call $log (i32.const 2) (i32.const 0) (i32.const 17))
          (i32.const 0))
        (func (export "Chatty.on_ready") (result i32) (i32.const 0))
        (func (export "Chatty.on_unload") (result i32) (i32.const 0)))"#;
    let path = fixture.install(Scope::Global, "Chatty", wat_src);
    assert!(validator().validate(&path, Capability::Global).is_valid());
    assert!(fixture.manager.load(Scope::Global, "Chatty").await.is_ok());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_name_length_limit(name in "[A-Za-z][A-Za-z0-9_]{0,40}") {
        let result = validator().check_name(&name);
        if name.chars().count() > 32 {
            let is_too_long = matches!(result, Err(InvalidReason::NameTooLong { .. }));
            prop_assert!(is_too_long);
        } else if name == "Loader" {
            prop_assert_eq!(result, Err(InvalidReason::ReservedName(name.clone())));
        } else {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn prop_multibyte_names_counted_in_chars(len in 1usize..40) {
        let name: String = std::iter::repeat('é').take(len).collect();
        prop_assert_eq!(validator().check_name(&name).is_ok(), len <= 32);
    }
}
