//! Type and member definitions

use crate::attribute::{AttributeList, CustomAttribute, KnownAttribute};
use crate::body::MethodBody;
use crate::known::{CCTOR, CTOR};
use crate::types::{TypeRef, TypeSig};
use serde::{Deserialize, Serialize};

/// Accessibility of a type or member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Visibility {
    Private,
    Family,
    Assembly,
    FamilyOrAssembly,
    Public,
}

impl Visibility {
    /// Visible to every type in the defining artifact
    #[inline]
    #[must_use]
    pub const fn is_assembly_visible(self) -> bool {
        matches!(self, Self::Assembly | Self::FamilyOrAssembly | Self::Public)
    }

    /// Keyword used in the textual syntax
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Family => "family",
            Self::Assembly => "assembly",
            Self::FamilyOrAssembly => "famorassem",
            Self::Public => "public",
        }
    }

    /// Lookup by keyword
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        [
            Self::Private,
            Self::Family,
            Self::Assembly,
            Self::FamilyOrAssembly,
            Self::Public,
        ]
        .into_iter()
        .find(|v| v.keyword() == keyword)
    }
}

/// Shape of a type definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Class,
    Struct,
    Interface,
    Enum,
}

impl TypeKind {
    /// Keyword used in the textual syntax
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Interface => "interface",
            Self::Enum => "enum",
        }
    }

    /// Lookup by keyword
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        [Self::Class, Self::Struct, Self::Interface, Self::Enum]
            .into_iter()
            .find(|k| k.keyword() == keyword)
    }
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeSig,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_init_only: bool,
    pub attributes: Vec<CustomAttribute>,
}

impl FieldDef {
    /// Instance field
    #[must_use]
    pub fn new(name: impl Into<String>, ty: TypeSig, visibility: Visibility) -> Self {
        Self {
            name: name.into(),
            ty,
            visibility,
            is_static: false,
            is_init_only: false,
            attributes: Vec::new(),
        }
    }

    /// Mark static
    #[inline]
    #[must_use]
    pub fn into_static(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// Property definition; accessor bodies live in the type's methods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub ty: TypeSig,
    pub getter: Option<Visibility>,
    pub setter: Option<Visibility>,
    pub is_static: bool,
    /// Indexer parameters; non-empty means this is an indexer
    pub params: Vec<TypeSig>,
    pub attributes: Vec<CustomAttribute>,
}

impl PropertyDef {
    /// Instance property with the given accessors
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        ty: TypeSig,
        getter: Option<Visibility>,
        setter: Option<Visibility>,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            getter,
            setter,
            is_static: false,
            params: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Whether this property takes index parameters
    #[inline]
    #[must_use]
    pub fn is_indexer(&self) -> bool {
        !self.params.is_empty()
    }
}

/// Method parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeSig,
}

impl Param {
    /// Create parameter
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, ty: TypeSig) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Method definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub params: Vec<Param>,
    pub ret: TypeSig,
    pub generic_params: Vec<String>,
    pub attributes: Vec<CustomAttribute>,
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// Bodiless method with the given signature
    #[must_use]
    pub fn new(name: impl Into<String>, visibility: Visibility, params: Vec<Param>, ret: TypeSig) -> Self {
        Self {
            name: name.into(),
            visibility,
            is_static: false,
            is_virtual: false,
            is_abstract: false,
            params,
            ret,
            generic_params: Vec::new(),
            attributes: Vec::new(),
            body: None,
        }
    }

    /// Static method
    #[inline]
    #[must_use]
    pub fn into_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Attach a body
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Whether this is an instance constructor
    #[inline]
    #[must_use]
    pub fn is_ctor(&self) -> bool {
        self.name == CTOR
    }

    /// Whether this is the static constructor
    #[inline]
    #[must_use]
    pub fn is_cctor(&self) -> bool {
        self.name == CCTOR
    }

    /// Stable key identifying the method inside its type, used for symbols
    #[must_use]
    pub fn key(&self, declaring: &str) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.ty.to_string()).collect();
        format!("{declaring}::{}({})", self.name, params.join(","))
    }
}

/// Type definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Empty for nested types
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub base: Option<TypeSig>,
    pub interfaces: Vec<TypeSig>,
    pub generic_params: Vec<String>,
    pub attributes: Vec<CustomAttribute>,
    pub fields: Vec<FieldDef>,
    pub properties: Vec<PropertyDef>,
    pub methods: Vec<MethodDef>,
    pub nested: Vec<TypeDef>,
}

impl TypeDef {
    /// Empty class
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind: TypeKind::Class,
            visibility,
            is_abstract: false,
            is_sealed: false,
            base: None,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            attributes: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// Set the base type
    #[inline]
    #[must_use]
    pub fn with_base(mut self, base: impl Into<TypeSig>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Set the kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: TypeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Name relative to the namespace (`Name`) or, when top-level, `Namespace.Name`
    #[must_use]
    pub fn top_level_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Whether this is a value type or enum
    #[inline]
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        matches!(self.kind, TypeKind::Struct | TypeKind::Enum)
    }

    /// Whether the type carries the given attribute
    #[inline]
    #[must_use]
    pub fn has_attribute(&self, known: KnownAttribute) -> bool {
        self.attributes.has_known(known)
    }

    /// Field by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Methods with the given name
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodDef> + 'a {
        self.methods.iter().filter(move |m| m.name == name)
    }

    /// Static constructor
    #[must_use]
    pub fn cctor(&self) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.is_cctor())
    }

    /// Static constructor, created with an empty `ret` body when missing
    pub fn cctor_mut_or_insert(&mut self) -> &mut MethodDef {
        let index = match self.methods.iter().position(MethodDef::is_cctor) {
            Some(index) => index,
            None => {
                let cctor = MethodDef::new(CCTOR, Visibility::Private, Vec::new(), TypeSig::VOID)
                    .into_static()
                    .with_body(MethodBody::from_ops(vec![crate::body::Op::Ret]));
                self.methods.push(cctor);
                self.methods.len() - 1
            }
        };
        &mut self.methods[index]
    }

    /// Nested type by simple name
    #[must_use]
    pub fn nested_type(&self, name: &str) -> Option<&TypeDef> {
        self.nested.iter().find(|t| t.name == name)
    }

    /// Signature referencing this type with its own generic parameters
    #[must_use]
    pub fn self_sig(&self, full_name: &str) -> TypeSig {
        if self.generic_params.is_empty() {
            TypeSig::local(full_name)
        } else {
            TypeSig::generic(
                TypeRef::local(full_name),
                self.generic_params.iter().cloned().map(TypeSig::Param).collect(),
            )
        }
    }
}
