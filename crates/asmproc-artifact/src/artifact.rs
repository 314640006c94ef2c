//! The in-memory artifact

use crate::attribute::{AttributeList, CustomAttribute, KnownAttribute};
use crate::known::MODULE_TYPE;
use crate::member::{TypeDef, Visibility};
use crate::name::{PublicKeyToken, Reference, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Output kind of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Library,
    Console,
    Windowed,
}

impl ArtifactKind {
    /// File extension conventionally used for this kind
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Library => "dll",
            Self::Console | Self::Windowed => "exe",
        }
    }
}

/// Header flags consumed by the loader
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Characteristics(u32);

impl Characteristics {
    pub const IL_ONLY: Self = Self(0x1);
    pub const REQUIRED_32BIT: Self = Self(0x2);
    pub const STRONG_NAME_SIGNED: Self = Self(0x8);
    pub const PREFERRED_32BIT: Self = Self(0x2_0000);

    /// Raw bits
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// From raw bits
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Whether all bits of `other` are set
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for Characteristics {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Characteristics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Characteristics({:#x})", self.0)
    }
}

/// One compiled binary unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub version: Version,
    pub kind: ArtifactKind,
    pub characteristics: Characteristics,
    pub public_key: Option<Vec<u8>>,
    pub references: Vec<Reference>,
    pub attributes: Vec<CustomAttribute>,
    pub types: Vec<TypeDef>,

    /// Debug-symbol data is attached to the instructions
    #[serde(skip)]
    pub has_symbols: bool,

    /// File the artifact was read from
    #[serde(skip)]
    pub location: Option<PathBuf>,
}

impl Artifact {
    /// Empty library with a `<Module>` type
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            kind: ArtifactKind::Library,
            characteristics: Characteristics::IL_ONLY,
            public_key: None,
            references: Vec::new(),
            attributes: Vec::new(),
            types: vec![TypeDef::new("", MODULE_TYPE, Visibility::Private)],
            has_symbols: false,
            location: None,
        }
    }

    /// Strong-name token of the public key
    #[must_use]
    pub fn public_key_token(&self) -> Option<PublicKeyToken> {
        self.public_key.as_deref().map(PublicKeyToken::from_public_key)
    }

    /// Reference other artifacts would use to point at this one
    #[must_use]
    pub fn as_reference(&self) -> Reference {
        Reference {
            name: self.name.clone(),
            version: self.version,
            public_key_token: self.public_key_token(),
        }
    }

    /// `Name, Version=…, PublicKeyToken=…`
    #[must_use]
    pub fn full_name(&self) -> String {
        self.as_reference().to_string()
    }

    /// Whether the artifact carries the given attribute
    #[inline]
    #[must_use]
    pub fn has_attribute(&self, known: KnownAttribute) -> bool {
        self.attributes.has_known(known)
    }

    /// Reference by artifact name
    #[must_use]
    pub fn reference(&self, name: &str) -> Option<&Reference> {
        self.references.iter().find(|r| r.name == name)
    }

    /// Type by full name; nested types use `Outer/Inner`
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDef> {
        let mut segments = full_name.split('/');
        let outer = segments.next()?;
        let mut current = self.types.iter().find(|t| t.top_level_name() == outer)?;
        for segment in segments {
            current = current.nested_type(segment)?;
        }
        Some(current)
    }

    /// Mutable type by full name
    pub fn find_type_mut(&mut self, full_name: &str) -> Option<&mut TypeDef> {
        let mut segments = full_name.split('/');
        let outer = segments.next()?;
        let mut current = self.types.iter_mut().find(|t| t.top_level_name() == outer)?;
        for segment in segments {
            current = current.nested.iter_mut().find(|t| t.name == segment)?;
        }
        Some(current)
    }

    /// Depth-first walk over all types, nested included, with full names
    #[must_use]
    pub fn walk_types(&self) -> Vec<(String, &TypeDef)> {
        fn walk<'a>(prefix: Option<&str>, ty: &'a TypeDef, out: &mut Vec<(String, &'a TypeDef)>) {
            let name = match prefix {
                Some(outer) => format!("{outer}/{}", ty.name),
                None => ty.top_level_name(),
            };
            out.push((name.clone(), ty));
            for nested in &ty.nested {
                walk(Some(&name), nested, out);
            }
        }

        let mut out = Vec::new();
        for ty in &self.types {
            walk(None, ty, &mut out);
        }
        out
    }

    /// Full names of all types, nested included, in walk order
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        self.walk_types().into_iter().map(|(name, _)| name).collect()
    }

    /// Sorted `type` and `type::member` lines describing the public shape
    #[must_use]
    pub fn manifest(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (name, ty) in self.walk_types() {
            lines.push(format!("type {name}"));
            for field in &ty.fields {
                lines.push(format!("field {name}::{} {}", field.name, field.ty));
            }
            for prop in &ty.properties {
                lines.push(format!("property {name}::{} {}", prop.name, prop.ty));
            }
            for method in &ty.methods {
                lines.push(format!("method {}", method.key(&name)));
            }
        }
        lines.sort();
        lines
    }

    /// The `<Module>` type
    #[must_use]
    pub fn module_type(&self) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.namespace.is_empty() && t.name == MODULE_TYPE)
    }

    /// The `<Module>` type, created when missing
    pub fn module_type_mut(&mut self) -> &mut TypeDef {
        let index = match self
            .types
            .iter()
            .position(|t| t.namespace.is_empty() && t.name == MODULE_TYPE)
        {
            Some(index) => index,
            None => {
                self.types.insert(0, TypeDef::new("", MODULE_TYPE, Visibility::Private));
                0
            }
        };
        &mut self.types[index]
    }
}
