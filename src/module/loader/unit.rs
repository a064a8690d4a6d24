//! Static description of a loaded unit
//!
//! Everything here is plain data copied out of a compiled unit. Holding a
//! [`LoadedUnit`] keeps nothing inside an isolation context alive.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use wasmtime::{ExternType, FuncType, Module, ValType};

use crate::module::registry::manifest::UnitManifest;
use crate::module::traits::{Capability, Hook};

/// Activation members of the tenant contract
pub const IS_ACTIVE: &str = "is_active";
pub const SET_ACTIVE: &str = "set_active";

/// Value types visible in an export signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    I32,
    I64,
    F32,
    F64,
    Other,
}

impl From<&ValType> for ValueKind {
    fn from(ty: &ValType) -> Self {
        match ty {
            ValType::I32 => ValueKind::I32,
            ValType::I64 => ValueKind::I64,
            ValType::F32 => ValueKind::F32,
            ValType::F64 => ValueKind::F64,
            _ => ValueKind::Other,
        }
    }
}

/// Function signature of an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ValueKind>,
    pub results: Vec<ValueKind>,
}

impl Signature {
    pub fn new(params: &[ValueKind], results: &[ValueKind]) -> Self {
        Self {
            params: params.to_vec(),
            results: results.to_vec(),
        }
    }

    fn from_func(ty: &FuncType) -> Self {
        Self {
            params: ty.params().map(|p| ValueKind::from(&p)).collect(),
            results: ty.results().map(|r| ValueKind::from(&r)).collect(),
        }
    }

    /// `() -> i32`
    pub fn hook() -> Self {
        Self::new(&[], &[ValueKind::I32])
    }

    /// `(i64) -> i32`
    pub fn is_active() -> Self {
        Self::new(&[ValueKind::I64], &[ValueKind::I32])
    }

    /// `(i64, i32) -> ()`
    pub fn set_active() -> Self {
        Self::new(&[ValueKind::I64, ValueKind::I32], &[])
    }
}

/// One export of a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitExport {
    Func { name: String, signature: Signature },
    Memory { name: String },
    Global { name: String },
    Table { name: String },
}

impl UnitExport {
    pub fn name(&self) -> &str {
        match self {
            UnitExport::Func { name, .. }
            | UnitExport::Memory { name }
            | UnitExport::Global { name }
            | UnitExport::Table { name } => name,
        }
    }
}

/// One import of a unit: `module::name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitImport {
    pub module: String,
    pub name: String,
}

/// An exported type: function exports sharing the `<Type>.` prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedType {
    pub name: String,
    pub members: BTreeMap<String, Signature>,
}

impl ExportedType {
    fn has_member(&self, member: &str, signature: &Signature) -> bool {
        self.members.get(member) == Some(signature)
    }

    fn has_lifecycle_hooks(&self) -> bool {
        [Hook::OnLoad, Hook::OnReady, Hook::OnUnload]
            .iter()
            .all(|hook| self.has_member(hook.member(), &Signature::hook()))
    }

    /// Structural check against a module contract
    ///
    /// A type exposing activation members is a tenant module and therefore
    /// never satisfies the global contract.
    pub fn satisfies(&self, capability: Capability) -> bool {
        if !self.has_lifecycle_hooks() {
            return false;
        }
        let activation = self.has_member(IS_ACTIVE, &Signature::is_active())
            && self.has_member(SET_ACTIVE, &Signature::set_active());
        let mentions_activation =
            self.members.contains_key(IS_ACTIVE) || self.members.contains_key(SET_ACTIVE);

        match capability {
            Capability::Global => !mentions_activation,
            Capability::TenantScoped => activation,
        }
    }
}

/// Static description of a unit loaded into an isolation context
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    /// Embedded manifest, if any
    pub manifest: Option<UnitManifest>,
    pub exports: Vec<UnitExport>,
    pub imports: Vec<UnitImport>,
    /// SHA-256 of the unit bytes (hex)
    pub digest: String,
    pub size_bytes: usize,
}

impl LoadedUnit {
    pub(crate) fn describe(module: &Module, bytes: &[u8], manifest: Option<UnitManifest>) -> Self {
        let exports = module
            .exports()
            .filter_map(|export| {
                let name = export.name().to_string();
                match export.ty() {
                    ExternType::Func(ty) => Some(UnitExport::Func {
                        name,
                        signature: Signature::from_func(&ty),
                    }),
                    ExternType::Memory(_) => Some(UnitExport::Memory { name }),
                    ExternType::Global(_) => Some(UnitExport::Global { name }),
                    ExternType::Table(_) => Some(UnitExport::Table { name }),
                    _ => None,
                }
            })
            .collect();

        let imports = module
            .imports()
            .map(|import| UnitImport {
                module: import.module().to_string(),
                name: import.name().to_string(),
            })
            .collect();

        Self {
            manifest,
            exports,
            imports,
            digest: hex::encode(Sha256::digest(bytes)),
            size_bytes: bytes.len(),
        }
    }

    /// Group function exports into types by their `<Type>.` prefix
    pub fn exported_types(&self) -> Vec<ExportedType> {
        let mut types: BTreeMap<&str, ExportedType> = BTreeMap::new();
        for export in &self.exports {
            if let UnitExport::Func { name, signature } = export {
                let Some((type_name, member)) = name.rsplit_once('.') else {
                    continue;
                };
                if type_name.is_empty() || member.is_empty() {
                    continue;
                }
                types
                    .entry(type_name)
                    .or_insert_with(|| ExportedType {
                        name: type_name.to_string(),
                        members: BTreeMap::new(),
                    })
                    .members
                    .insert(member.to_string(), signature.clone());
            }
        }
        types.into_values().collect()
    }

    /// Exported types that satisfy a module contract
    pub fn types_satisfying(&self, capability: Capability) -> Vec<ExportedType> {
        self.exported_types()
            .into_iter()
            .filter(|ty| ty.satisfies(capability))
            .collect()
    }
}
