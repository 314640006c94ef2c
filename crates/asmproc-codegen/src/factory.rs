//! Serializer factories keyed by generic shape
//!
//! Built-in shapes (lists, dictionaries, pairs, nullables, tuples, enums and
//! arrays) are served by generic serializers shipped in the engine core
//! library. A factory maps the shape's definition to that serializer and
//! lists the further instantiations the serializer depends on.

use asmproc_artifact::known::{engine, system, ENGINE_CORE};
use asmproc_artifact::{TypeKind, TypeRef, TypeSig};
use asmproc_resolver::ArtifactScope;

/// Maximum tuple arity with a shipped serializer
const MAX_TUPLE_ARITY: usize = 4;

/// Shape-to-serializer table
#[derive(Debug, Clone)]
pub struct SerializerFactory {
    generic_shapes: Vec<(&'static str, &'static str)>,
}

impl Default for SerializerFactory {
    fn default() -> Self {
        Self {
            generic_shapes: vec![
                (system::ILIST_1, "ListInterfaceSerializer`1"),
                (system::LIST_1, "ListSerializer`1"),
                (system::KEY_VALUE_PAIR_2, "KeyValuePairSerializer`2"),
                (system::IDICTIONARY_2, "DictionaryInterfaceSerializer`2"),
                (system::DICTIONARY_2, "DictionarySerializer`2"),
                (system::NULLABLE_1, "NullableSerializer`1"),
            ],
        }
    }
}

fn serializer_ref(name: &str) -> TypeRef {
    TypeRef::external(ENGINE_CORE, format!("{}.{name}", engine::SERIALIZERS_NAMESPACE))
}

fn tuple_arity(def: &TypeRef) -> Option<usize> {
    let arity = def.full_name.strip_prefix(system::TUPLE_PREFIX)?.parse().ok()?;
    (1..=MAX_TUPLE_ARITY).contains(&arity).then_some(arity)
}

impl SerializerFactory {
    /// Table with the built-in shapes
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializer instantiation for `sig`, when a built-in shape covers it
    #[must_use]
    pub fn serializer_for(&self, sig: &TypeSig, scope: &ArtifactScope<'_>) -> Option<TypeSig> {
        match sig {
            TypeSig::Array(elem) => Some(TypeSig::generic(
                serializer_ref("ArraySerializer`1"),
                vec![(**elem).clone()],
            )),
            TypeSig::Generic(def, args) => {
                if let Some(arity) = tuple_arity(def) {
                    return Some(TypeSig::generic(
                        serializer_ref(&format!("TupleSerializer`{arity}")),
                        args.clone(),
                    ));
                }
                self.generic_shapes
                    .iter()
                    .find(|(shape, _)| def.full_name == *shape)
                    .map(|(_, serializer)| TypeSig::generic(serializer_ref(serializer), args.clone()))
            }
            TypeSig::Named(r) => {
                let is_enum = scope.with_type(r, |_, def| def.kind == TypeKind::Enum)?;
                is_enum.then(|| TypeSig::generic(serializer_ref("EnumSerializer`1"), vec![sig.clone()]))
            }
            TypeSig::Primitive(_) | TypeSig::Param(_) | TypeSig::MethodParam(_) => None,
        }
    }

    /// Further instantiations the serializer for `sig` needs registered
    #[must_use]
    pub fn dependencies(&self, sig: &TypeSig) -> Vec<TypeSig> {
        let TypeSig::Generic(def, args) = sig else {
            return Vec::new();
        };
        let is_dictionary = def.full_name == system::DICTIONARY_2 || def.full_name == system::IDICTIONARY_2;
        if is_dictionary && args.len() == 2 {
            let pair = TypeRef {
                scope: def.scope.clone(),
                full_name: system::KEY_VALUE_PAIR_2.to_string(),
            };
            return vec![TypeSig::generic(pair, args.clone())];
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_artifact::{Primitive, TypeDef, Visibility};
    use asmproc_resolver::Resolver;
    use asmproc_test_utils::{corlib_type, game, CORLIB};

    fn list_of(sig: TypeSig) -> TypeSig {
        TypeSig::generic(TypeRef::external(CORLIB, system::LIST_1), vec![sig])
    }

    #[test]
    fn generic_shapes_map_to_engine_serializers() {
        let art = game();
        let resolver = Resolver::new();
        let scope = ArtifactScope::new(&art, &resolver);
        let factory = SerializerFactory::new();

        let list = list_of(TypeSig::Primitive(Primitive::I32));
        assert_eq!(
            factory.serializer_for(&list, &scope).unwrap().to_string(),
            "[Engine.Core]Engine.Core.Serialization.Serializers.ListSerializer`1<i32>"
        );
        let tuple = TypeSig::generic(
            TypeRef::external(CORLIB, "System.Tuple`2"),
            vec![TypeSig::Primitive(Primitive::I32), TypeSig::Primitive(Primitive::String)],
        );
        assert!(factory
            .serializer_for(&tuple, &scope)
            .unwrap()
            .to_string()
            .contains("TupleSerializer`2<i32, string>"));
        let array = TypeSig::Primitive(Primitive::F32).array_of();
        assert!(factory.serializer_for(&array, &scope).unwrap().to_string().contains("ArraySerializer`1<f32>"));
        assert!(factory.serializer_for(&corlib_type("System.Int32"), &scope).is_none());
    }

    #[test]
    fn enums_resolved_through_scope() {
        let mut art = game();
        art.types
            .push(TypeDef::new("Game", "Team", Visibility::Public).with_kind(TypeKind::Enum));
        let resolver = Resolver::new();
        let scope = ArtifactScope::new(&art, &resolver);
        let serializer = SerializerFactory::new()
            .serializer_for(&TypeSig::local("Game.Team"), &scope)
            .unwrap();
        assert_eq!(serializer.generic_args(), &[TypeSig::local("Game.Team")]);
    }

    #[test]
    fn dictionaries_depend_on_pairs() {
        let dict = TypeSig::generic(
            TypeRef::external(CORLIB, system::DICTIONARY_2),
            vec![TypeSig::Primitive(Primitive::String), TypeSig::Primitive(Primitive::I32)],
        );
        let deps = SerializerFactory::new().dependencies(&dict);
        assert_eq!(
            deps,
            vec![TypeSig::generic(
                TypeRef::external(CORLIB, system::KEY_VALUE_PAIR_2),
                vec![TypeSig::Primitive(Primitive::String), TypeSig::Primitive(Primitive::I32)]
            )]
        );
        assert!(SerializerFactory::new().dependencies(&list_of(TypeSig::Primitive(Primitive::I32))).is_empty());
    }
}
