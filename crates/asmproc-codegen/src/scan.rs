//! Scan registry generation
//!
//! A scan key is a type carrying `[AssemblyScan]`. A local type is collected
//! under a key when:
//!
//! - it carries an attribute whose class is a scan key,
//! - a type in its base chain carries such an attribute and the attribute's
//!   usage is inherited (the default), or
//! - it derives from, or implements, a scan key.
//!
//! Generated code lives in a separate compilation unit, so nested types that
//! are not at least assembly-visible are excluded with a warning.

use crate::serializer::Target;
use crate::source::GeneratedSource;
use crate::writer::SourceWriter;
use asmproc_artifact::known::{engine, system, ENGINE_CORE, MODULE_TYPE};
use asmproc_artifact::{Artifact, AttrValue, AttributeList, KnownAttribute, MethodRef, Op, TypeDef, TypeRef, TypeSig};
use asmproc_resolver::ArtifactScope;
use indexmap::IndexMap;
use tracing::{debug, warn};

/// Name of the generated registration class
pub const SCAN_REGISTRATION_TYPE: &str = "AssemblyScanRegistration";

/// Scan key to the local types collected under it
#[derive(Debug, Clone, Default)]
pub struct ScanRegistry {
    entries: IndexMap<TypeRef, Vec<TypeRef>>,
    excluded: Vec<String>,
}

impl ScanRegistry {
    /// Walk every local type
    #[must_use]
    pub fn build(scope: &ArtifactScope<'_>) -> Self {
        let mut registry = Self::default();
        let live = scope.live();

        for (name, def) in live.walk_types() {
            if name == MODULE_TYPE {
                continue;
            }
            let r = TypeRef::local(name.clone());
            let keys = scan_keys(scope, &r, def);
            if keys.is_empty() {
                continue;
            }
            if !nesting_visible(live, &name) {
                warn!(ty = %name, "nested type is not visible to generated code, excluded from scan registry");
                registry.excluded.push(name);
                continue;
            }
            for key in keys {
                let types = registry.entries.entry(key).or_default();
                if !types.contains(&r) {
                    types.push(r.clone());
                }
            }
        }
        debug!(keys = registry.entries.len(), "scan registry built");
        registry
    }

    /// Types collected under a key
    #[must_use]
    pub fn types_for(&self, key: &TypeRef) -> &[TypeRef] {
        self.entries.get(key).map_or(&[], Vec::as_slice)
    }

    /// Keys in discovery order
    pub fn keys(&self) -> impl Iterator<Item = &TypeRef> {
        self.entries.keys()
    }

    /// Types skipped because generated code could not reference them
    #[must_use]
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registration source, or `None` when the registry is empty
    #[must_use]
    pub fn generate(&self, target: &Target) -> Option<GeneratedSource> {
        if self.is_empty() {
            return None;
        }
        let handle = target.corlib_type(system::RUNTIME_TYPE_HANDLE);
        let register = MethodRef::new_static(
            TypeSig::external(ENGINE_CORE, engine::ASSEMBLY_REGISTRY),
            "RegisterScanType",
            vec![handle.clone(), handle],
            TypeSig::VOID,
        );

        let mut w = SourceWriter::new();
        w.open(format!(
            "type public sealed class {}.{SCAN_REGISTRATION_TYPE} extends {}",
            target.namespace(),
            target.object_base()
        ));
        w.open("method public static void Initialize()");
        w.line(format!("attribute {}", target.module_initializer()));
        for (key, types) in &self.entries {
            for ty in types {
                w.line(Op::Ldtoken(TypeSig::Named(key.clone())));
                w.line(Op::Ldtoken(TypeSig::Named(ty.anchored(&target.artifact))));
                w.line(Op::Call(register.clone()));
            }
        }
        w.line(Op::Ret);
        w.close();
        w.close();
        Some(GeneratedSource::new("AssemblyScan", w.finish()))
    }
}

/// Whether the type named `r` is itself a scan key
fn is_scan_key(scope: &ArtifactScope<'_>, r: &TypeRef) -> bool {
    scope
        .with_type(r, |_, def| def.has_attribute(KnownAttribute::AssemblyScan))
        .unwrap_or(false)
}

/// Whether an attribute class's usage lets it flow to derived types
fn usage_inherited(scope: &ArtifactScope<'_>, attribute: &TypeRef) -> bool {
    scope
        .with_type(attribute, |_, def| {
            def.attributes
                .find_known(KnownAttribute::AttributeUsage)
                .and_then(|usage| usage.named_arg("Inherited"))
                .and_then(AttrValue::as_bool)
                .unwrap_or(true)
        })
        .unwrap_or(true)
}

fn scan_keys(scope: &ArtifactScope<'_>, r: &TypeRef, def: &TypeDef) -> Vec<TypeRef> {
    let live = &scope.live().name;
    let mut keys: Vec<TypeRef> = Vec::new();
    let mut push = |key: TypeRef| {
        if !keys.contains(&key) {
            keys.push(key);
        }
    };

    for attr in &def.attributes {
        let ty = attr.ty().anchored(live);
        if is_scan_key(scope, &ty) {
            push(ty);
        }
    }

    let chain = scope.base_chain(r);
    for base in &chain {
        let attrs = scope
            .with_type(base, |owner, base_def| {
                base_def
                    .attributes
                    .iter()
                    .map(|a| a.ty().anchored(&owner.name))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for attr in attrs {
            if is_scan_key(scope, &attr) && usage_inherited(scope, &attr) {
                push(attr);
            }
        }
        if is_scan_key(scope, base) {
            push(base.clone());
        }
    }

    let mut interfaces: Vec<TypeRef> = def
        .interfaces
        .iter()
        .filter_map(TypeSig::type_ref)
        .map(|i| i.anchored(live))
        .collect();
    for base in &chain {
        let inherited = scope
            .with_type(base, |owner, base_def| {
                base_def
                    .interfaces
                    .iter()
                    .filter_map(TypeSig::type_ref)
                    .map(|i| i.anchored(&owner.name))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        interfaces.extend(inherited);
    }
    for interface in interfaces {
        if is_scan_key(scope, &interface) {
            push(interface);
        }
    }
    keys
}

/// Every type on the nesting path below the top level is assembly-visible
fn nesting_visible(live: &Artifact, full_name: &str) -> bool {
    let mut path = String::new();
    for (depth, segment) in full_name.split('/').enumerate() {
        if depth > 0 {
            path.push('/');
        }
        path.push_str(segment);
        if depth == 0 {
            continue;
        }
        let visible = live
            .find_type(&path)
            .is_some_and(|t| t.visibility.is_assembly_visible());
        if !visible {
            return false;
        }
    }
    true
}
