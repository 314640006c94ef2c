//! Serializable type registry
//!
//! A type is serializable when it carries `[DataContract]`, or when a type
//! in its base chain carries `[DataContract(Inherited = true)]`. Local types
//! get generated serializers. Member types that live in a dependency and are
//! serializable there are recorded too, so generation knows their serializer
//! is provided elsewhere.

use crate::members;
use asmproc_artifact::known::MODULE_TYPE;
use asmproc_artifact::{AttrValue, AttributeList, KnownAttribute, TypeDef, TypeKind, TypeRef};
use asmproc_resolver::ArtifactScope;
use indexmap::IndexMap;
use tracing::debug;

/// Where a serializable type is defined
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// The artifact being processed
    Local,
    /// A referenced artifact, by name
    Dependency(String),
}

/// How generic definitions are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericMode {
    /// Not generic
    None,
    /// Generic definition; one generic serializer serves every instantiation
    Type,
}

/// Serialization profile of one type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializableType {
    /// Type reference (scope `None` for local types)
    pub ty: TypeRef,
    pub origin: Origin,
    pub mode: GenericMode,
    /// The contract comes from a base type rather than the type itself
    pub inherited: bool,
}

impl SerializableType {
    /// Whether a serializer for this type is generated here
    #[inline]
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }
}

/// Read-only map from type to serialization profile, built once per run
#[derive(Debug, Clone, Default)]
pub struct SerializableTypeRegistry {
    entries: IndexMap<TypeRef, SerializableType>,
}

/// How `def` (named by `r`) acquires a data contract, if at all
fn contract_source(scope: &ArtifactScope<'_>, r: &TypeRef, def: &TypeDef) -> Option<bool> {
    if def.has_attribute(KnownAttribute::DataContract) {
        return Some(false);
    }
    let inherited = scope.base_chain(r).iter().any(|base| {
        scope
            .with_type(base, |_, base_def| {
                base_def
                    .attributes
                    .find_known(KnownAttribute::DataContract)
                    .and_then(|a| a.named_arg("Inherited"))
                    .and_then(AttrValue::as_bool)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    });
    inherited.then_some(true)
}

fn generic_mode(def: &TypeDef) -> GenericMode {
    if def.generic_params.is_empty() {
        GenericMode::None
    } else {
        GenericMode::Type
    }
}

impl SerializableTypeRegistry {
    /// Scan the live artifact and the dependency types its members use
    #[must_use]
    pub fn build(scope: &ArtifactScope<'_>) -> Self {
        let mut registry = Self::default();
        let live = scope.live();

        for (name, def) in live.walk_types() {
            if name == MODULE_TYPE || matches!(def.kind, TypeKind::Interface | TypeKind::Enum) {
                continue;
            }
            let r = TypeRef::local(name);
            if let Some(inherited) = contract_source(scope, &r, def) {
                registry.entries.insert(
                    r.clone(),
                    SerializableType {
                        ty: r,
                        origin: Origin::Local,
                        mode: generic_mode(def),
                        inherited,
                    },
                );
            }
        }

        let mut member_refs = Vec::new();
        for entry in registry.entries.values() {
            if let Some(def) = live.find_type(&entry.ty.full_name) {
                for member in members::collect(def) {
                    member.ty.for_each_ref(&mut |r| {
                        if let Some(scope_name) = &r.scope {
                            if scope_name != &live.name {
                                member_refs.push(r.clone());
                            }
                        }
                    });
                }
            }
        }
        for r in member_refs {
            if registry.entries.contains_key(&r) {
                continue;
            }
            let found = scope.with_type(&r, |_, def| contract_source(scope, &r, def).map(|i| (i, generic_mode(def))));
            if let Some(Some((inherited, mode))) = found {
                let origin = Origin::Dependency(r.scope.clone().unwrap_or_default());
                debug!(ty = %r, "serializable dependency type");
                registry.entries.insert(
                    r.clone(),
                    SerializableType {
                        ty: r,
                        origin,
                        mode,
                        inherited,
                    },
                );
            }
        }
        registry
    }

    /// Profile for a type
    #[inline]
    #[must_use]
    pub fn get(&self, ty: &TypeRef) -> Option<&SerializableType> {
        self.entries.get(ty)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, ty: &TypeRef) -> bool {
        self.entries.contains_key(ty)
    }

    /// Entries in discovery order
    pub fn iter(&self) -> impl Iterator<Item = &SerializableType> {
        self.entries.values()
    }

    /// Local entries in discovery order
    pub fn local(&self) -> impl Iterator<Item = &SerializableType> {
        self.entries.values().filter(|e| e.is_local())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
