//! Custom attributes
//!
//! An attribute's identity is resolved into [`AttributeKind`] once, when the
//! attribute is built or decoded. Stages match on the enum instead of comparing
//! type names.

use crate::known::{engine, system};
use crate::types::{TypeRef, TypeSig};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Attributes the processor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KnownAttribute {
    DataContract,
    DataMember,
    DataMemberIgnore,
    ModuleInitializer,
    AssemblyProcessed,
    AssemblyScan,
    RemoveInitLocals,
    AttributeUsage,
    InternalsVisibleTo,
}

impl KnownAttribute {
    const ALL: [KnownAttribute; 9] = [
        Self::DataContract,
        Self::DataMember,
        Self::DataMemberIgnore,
        Self::ModuleInitializer,
        Self::AssemblyProcessed,
        Self::AssemblyScan,
        Self::RemoveInitLocals,
        Self::AttributeUsage,
        Self::InternalsVisibleTo,
    ];

    /// Full type name of the attribute class
    #[must_use]
    pub const fn full_name(self) -> &'static str {
        match self {
            Self::DataContract => engine::DATA_CONTRACT,
            Self::DataMember => engine::DATA_MEMBER,
            Self::DataMemberIgnore => engine::DATA_MEMBER_IGNORE,
            Self::ModuleInitializer => engine::MODULE_INITIALIZER,
            Self::AssemblyProcessed => engine::ASSEMBLY_PROCESSED,
            Self::AssemblyScan => engine::ASSEMBLY_SCAN,
            Self::RemoveInitLocals => engine::REMOVE_INIT_LOCALS,
            Self::AttributeUsage => system::ATTRIBUTE_USAGE,
            Self::InternalsVisibleTo => system::INTERNALS_VISIBLE_TO,
        }
    }

    /// Lookup by full type name
    #[must_use]
    pub fn from_full_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.full_name() == name)
    }
}

/// Resolved identity of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Known(KnownAttribute),
    Other,
}

impl AttributeKind {
    fn of(ty: &TypeRef) -> Self {
        KnownAttribute::from_full_name(&ty.full_name).map_or(Self::Other, Self::Known)
    }
}

/// Constructor or named argument value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Type(TypeSig),
}

impl AttrValue {
    /// Boolean payload
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String payload
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Type(t) => write!(f, "typeof({t})"),
        }
    }
}

/// Attribute instance on an artifact, type or member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawAttribute", into = "RawAttribute")]
pub struct CustomAttribute {
    ty: TypeRef,
    kind: AttributeKind,
    pub args: Vec<AttrValue>,
    pub named: Vec<(String, AttrValue)>,
}

/// Wire form; the kind is recomputed on decode
#[derive(Serialize, Deserialize)]
struct RawAttribute {
    ty: TypeRef,
    args: Vec<AttrValue>,
    named: Vec<(String, AttrValue)>,
}

impl From<RawAttribute> for CustomAttribute {
    fn from(raw: RawAttribute) -> Self {
        Self::new(raw.ty, raw.args).with_named_args(raw.named)
    }
}

impl From<CustomAttribute> for RawAttribute {
    fn from(attr: CustomAttribute) -> Self {
        Self {
            ty: attr.ty,
            args: attr.args,
            named: attr.named,
        }
    }
}

impl CustomAttribute {
    /// Build attribute, resolving its kind
    #[must_use]
    pub fn new(ty: TypeRef, args: Vec<AttrValue>) -> Self {
        let kind = AttributeKind::of(&ty);
        Self {
            ty,
            kind,
            args,
            named: Vec::new(),
        }
    }

    /// Attach named arguments
    #[inline]
    #[must_use]
    pub fn with_named_args(mut self, named: Vec<(String, AttrValue)>) -> Self {
        self.named = named;
        self
    }

    /// Attribute class
    #[inline]
    #[must_use]
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    /// Replace the attribute class, re-resolving the kind
    pub fn set_ty(&mut self, ty: TypeRef) {
        self.kind = AttributeKind::of(&ty);
        self.ty = ty;
    }

    /// Rewrite every type reference inside the attribute, re-resolving the kind
    pub fn for_each_ref_mut(&mut self, f: &mut dyn FnMut(&mut TypeRef)) {
        f(&mut self.ty);
        self.kind = AttributeKind::of(&self.ty);
        let values = self
            .args
            .iter_mut()
            .chain(self.named.iter_mut().map(|(_, v)| v));
        for value in values {
            if let AttrValue::Type(sig) = value {
                sig.for_each_ref_mut(f);
            }
        }
    }

    /// Resolved identity
    #[inline]
    #[must_use]
    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    /// Whether this is the given known attribute
    #[inline]
    #[must_use]
    pub fn is(&self, known: KnownAttribute) -> bool {
        self.kind == AttributeKind::Known(known)
    }

    /// Named argument by name
    #[must_use]
    pub fn named_arg(&self, name: &str) -> Option<&AttrValue> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Convenience lookups over attribute lists
pub trait AttributeList {
    /// First attribute of the given kind
    fn find_known(&self, known: KnownAttribute) -> Option<&CustomAttribute>;

    /// Whether an attribute of the given kind is present
    fn has_known(&self, known: KnownAttribute) -> bool {
        self.find_known(known).is_some()
    }
}

impl AttributeList for [CustomAttribute] {
    fn find_known(&self, known: KnownAttribute) -> Option<&CustomAttribute> {
        self.iter().find(|a| a.is(known))
    }
}

impl AttributeList for Vec<CustomAttribute> {
    fn find_known(&self, known: KnownAttribute) -> Option<&CustomAttribute> {
        self.as_slice().find_known(known)
    }
}
