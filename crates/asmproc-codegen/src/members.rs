//! Serializable member selection
//!
//! Fields qualify when they are instance fields that are public, or
//! assembly-visible and tagged `[DataMember]`. Properties qualify when they are
//! non-indexer instance properties with a readable getter (same visibility
//! rule as fields) and a setter the generated code can call. Anything tagged
//! `[DataMemberIgnore]` is skipped. Init-only fields are skipped because the
//! generated deserializer assigns members after construction.
//!
//! Structs with public fields serialize their fields only; other structs
//! serialize their properties only; classes serialize both. Each group is
//! sorted by name, fields first.

use asmproc_artifact::{AttributeList, CustomAttribute, KnownAttribute, TypeDef, TypeKind, TypeSig, Visibility};

/// How the member is read and written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Property,
}

/// A member the generated serializer reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializableMember {
    pub name: String,
    pub ty: TypeSig,
    pub kind: MemberKind,
    /// Least visible of the accessors the generated code touches
    pub visibility: Visibility,
}

impl SerializableMember {
    /// Getter method name for properties
    #[must_use]
    pub fn getter(&self) -> String {
        format!("get_{}", self.name)
    }

    /// Setter method name for properties
    #[must_use]
    pub fn setter(&self) -> String {
        format!("set_{}", self.name)
    }
}

fn readable(visibility: Visibility, attributes: &[CustomAttribute]) -> bool {
    match visibility {
        Visibility::Public => true,
        Visibility::Assembly | Visibility::FamilyOrAssembly => {
            attributes.has_known(KnownAttribute::DataMember)
        }
        Visibility::Private | Visibility::Family => false,
    }
}

/// Serializable members of `def`, in serialization order
#[must_use]
pub fn collect(def: &TypeDef) -> Vec<SerializableMember> {
    let mut fields: Vec<SerializableMember> = def
        .fields
        .iter()
        .filter(|f| !f.is_static && !f.is_init_only)
        .filter(|f| !f.attributes.has_known(KnownAttribute::DataMemberIgnore))
        .filter(|f| readable(f.visibility, &f.attributes))
        .map(|f| SerializableMember {
            name: f.name.clone(),
            ty: f.ty.clone(),
            kind: MemberKind::Field,
            visibility: f.visibility,
        })
        .collect();

    let mut properties: Vec<SerializableMember> = def
        .properties
        .iter()
        .filter(|p| !p.is_static && !p.is_indexer())
        .filter(|p| !p.attributes.has_known(KnownAttribute::DataMemberIgnore))
        .filter(|p| p.getter.is_some_and(|v| readable(v, &p.attributes)))
        .filter(|p| p.setter.is_some_and(Visibility::is_assembly_visible))
        .filter_map(|p| {
            let visibility = p.getter?.min(p.setter?);
            Some(SerializableMember {
                name: p.name.clone(),
                ty: p.ty.clone(),
                kind: MemberKind::Property,
                visibility,
            })
        })
        .collect();

    fields.sort_by(|a, b| a.name.cmp(&b.name));
    properties.sort_by(|a, b| a.name.cmp(&b.name));

    if def.kind == TypeKind::Struct {
        let has_public_fields = def
            .fields
            .iter()
            .any(|f| !f.is_static && f.visibility == Visibility::Public);
        return if has_public_fields { fields } else { properties };
    }
    fields.extend(properties);
    fields
}
