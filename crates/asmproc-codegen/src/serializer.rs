//! Serializer source generation
//!
//! One serializer class is emitted per local serializable type, plus a
//! `DataSerializersRegistration` class whose module-initializer method hands
//! every (data type, serializer type) pair to the engine's serializer factory.
//! Factory instantiations needed by member types (lists, dictionaries, enums
//! and so on) are registered alongside.

use crate::factory::SerializerFactory;
use crate::members::{self, MemberKind, SerializableMember};
use crate::registry::{GenericMode, SerializableTypeRegistry};
use crate::source::GeneratedSource;
use crate::writer::SourceWriter;
use asmproc_artifact::known::{engine, system, ENGINE_CORE};
use asmproc_artifact::{FieldRef, KnownAttribute, MethodRef, Op, TypeDef, TypeRef, TypeSig, Visibility};
use asmproc_resolver::ArtifactScope;
use indexmap::IndexMap;
use tracing::debug;

/// Name of the generated registration class
pub const REGISTRATION_TYPE: &str = "DataSerializersRegistration";

/// Names shared by every generated unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Artifact the generated code serves
    pub artifact: String,
    /// Core runtime library it builds against
    pub corlib: String,
}

impl Target {
    #[inline]
    #[must_use]
    pub fn new(artifact: impl Into<String>, corlib: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            corlib: corlib.into(),
        }
    }

    /// Namespace holding generated types
    #[must_use]
    pub fn namespace(&self) -> String {
        format!("{}.DataSerializers", self.artifact)
    }

    pub(crate) fn corlib_type(&self, full_name: &str) -> TypeSig {
        TypeSig::external(self.corlib.clone(), full_name)
    }

    pub(crate) fn module_initializer(&self) -> TypeRef {
        TypeRef::external(ENGINE_CORE, engine::MODULE_INITIALIZER)
    }

    pub(crate) fn object_base(&self) -> TypeSig {
        self.corlib_type(system::OBJECT)
    }
}

/// Generated class name for a serializable type
///
/// `Game.World.Player` becomes `GameWorld_PlayerSerializer`; nested types join
/// their declaring chain with `_`; generic arity is kept as a suffix.
#[must_use]
pub fn serializer_type_name(ty: &TypeRef) -> String {
    let namespace: String = ty.namespace().chars().filter(|c| *c != '.').collect();
    let outer = ty.full_name.split('/').next().unwrap_or_default();
    let outer_name = outer.rsplit_once('.').map_or(outer, |(_, n)| n);
    let mut path: Vec<&str> = vec![outer_name];
    path.extend(ty.full_name.split('/').skip(1));

    let mut arity = 0usize;
    let segments: Vec<&str> = path
        .into_iter()
        .map(|segment| match segment.split_once('`') {
            Some((name, n)) => {
                arity += n.parse::<usize>().unwrap_or(0);
                name
            }
            None => segment,
        })
        .collect();

    let mut name = String::new();
    if !namespace.is_empty() {
        name.push_str(&namespace);
        name.push('_');
    }
    name.push_str(&segments.join("_"));
    name.push_str("Serializer");
    if arity > 0 {
        name.push_str(&format!("`{arity}"));
    }
    name
}

/// `sig` with every local reference pinned to `owner`
#[must_use]
pub fn anchor_sig(sig: &TypeSig, owner: &str) -> TypeSig {
    let mut anchored = sig.clone();
    anchored.for_each_ref_mut(&mut |r| *r = r.anchored(owner));
    anchored
}

fn data_serializer(data: &TypeSig) -> TypeSig {
    TypeSig::generic(
        TypeRef::external(ENGINE_CORE, engine::DATA_SERIALIZER_1),
        vec![data.clone()],
    )
}

fn stream_sig() -> TypeSig {
    TypeSig::external(ENGINE_CORE, engine::SERIALIZATION_STREAM)
}

/// Member plus the type declaring it, as seen from generated code
struct BoundMember {
    member: SerializableMember,
    declaring: TypeSig,
    value_type: bool,
}

/// Serializer source generator for one artifact
pub struct SerializerGenerator<'a> {
    scope: ArtifactScope<'a>,
    registry: &'a SerializableTypeRegistry,
    factory: &'a SerializerFactory,
    target: Target,
    /// compiled artifact name, for accessibility of dependency members
    compiled_name: String,
    registrations: IndexMap<TypeSig, TypeSig>,
}

impl<'a> SerializerGenerator<'a> {
    #[must_use]
    pub fn new(
        scope: ArtifactScope<'a>,
        registry: &'a SerializableTypeRegistry,
        factory: &'a SerializerFactory,
        target: Target,
        compiled_name: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            registry,
            factory,
            target,
            compiled_name: compiled_name.into(),
            registrations: IndexMap::new(),
        }
    }

    /// Serializer source, or `None` when nothing needs registering
    #[must_use]
    pub fn generate(mut self) -> Option<GeneratedSource> {
        let live = self.scope.live();
        let mut w = SourceWriter::new();

        let locals: Vec<_> = self.registry.local().cloned().collect();
        for entry in &locals {
            let Some(def) = live.find_type(&entry.ty.full_name) else {
                continue;
            };
            let data = anchor_sig(&def.self_sig(&entry.ty.full_name), &live.name);
            let serializer_name = format!("{}.{}", self.target.namespace(), serializer_type_name(&entry.ty));
            let bound = self.bound_members(&entry.ty, def);
            self.emit_serializer(&mut w, &serializer_name, def, &data, &bound);

            let (key, value) = match entry.mode {
                GenericMode::None => (data.clone(), TypeSig::local(serializer_name)),
                GenericMode::Type => (
                    TypeSig::Named(entry.ty.anchored(&live.name)),
                    TypeSig::local(serializer_name),
                ),
            };
            self.registrations.insert(key, value);
            for member in &bound {
                self.require(&member.member.ty);
            }
        }

        if self.registrations.is_empty() {
            return None;
        }
        self.emit_registration(&mut w);
        debug!(count = self.registrations.len(), "serializer registrations generated");
        Some(GeneratedSource::new("DataSerializers", w.finish()))
    }

    /// Inherited contract members (root first) followed by the type's own
    fn bound_members(&self, ty: &TypeRef, def: &TypeDef) -> Vec<BoundMember> {
        let live = self.scope.live();
        let mut bound = Vec::new();
        for base in self.scope.base_chain(ty).into_iter().rev() {
            let owner = base.scope.clone().unwrap_or_else(|| live.name.clone());
            let members = self.scope.with_type(&base, |owner_artifact, base_def| {
                if !base_def.has_attribute(KnownAttribute::DataContract) || !base_def.generic_params.is_empty() {
                    return Vec::new();
                }
                members::collect(base_def)
                    .into_iter()
                    .filter(|m| {
                        self.scope
                            .is_accessible_from(owner_artifact, m.visibility, &self.compiled_name)
                    })
                    .map(|member| BoundMember {
                        member: SerializableMember {
                            ty: anchor_sig(&member.ty, &owner),
                            ..member
                        },
                        declaring: TypeSig::Named(base.clone()),
                        value_type: base_def.is_value_type(),
                    })
                    .collect()
            });
            bound.extend(members.unwrap_or_default());
        }

        let declaring = anchor_sig(&def.self_sig(&ty.full_name), &live.name);
        bound.extend(members::collect(def).into_iter().map(|member| BoundMember {
            member: SerializableMember {
                ty: anchor_sig(&member.ty, &live.name),
                ..member
            },
            declaring: declaring.clone(),
            value_type: def.is_value_type(),
        }));
        bound
    }

    /// Register the serializer a member type needs, recursively
    fn require(&mut self, sig: &TypeSig) {
        if sig.contains_generic_param() || self.registrations.contains_key(sig) {
            return;
        }
        if let Some(serializer) = self.factory.serializer_for(sig, &self.scope) {
            self.registrations.insert(sig.clone(), serializer);
            if let TypeSig::Array(elem) = sig {
                self.require(elem);
            }
            for arg in sig.generic_args() {
                self.require(arg);
            }
            for dependency in self.factory.dependencies(sig) {
                self.require(&dependency);
            }
            return;
        }
        if let TypeSig::Generic(def, args) = sig {
            let local = def.relative_to(&self.scope.live().name);
            let is_local_generic = self
                .registry
                .get(&local)
                .is_some_and(|e| e.is_local() && e.mode == GenericMode::Type);
            if is_local_generic {
                let serializer = TypeRef::local(format!(
                    "{}.{}",
                    self.target.namespace(),
                    serializer_type_name(&local)
                ));
                self.registrations
                    .insert(sig.clone(), TypeSig::generic(serializer, args.clone()));
                for arg in args {
                    self.require(arg);
                }
            }
        }
    }

    fn emit_serializer(
        &self,
        w: &mut SourceWriter,
        name: &str,
        def: &TypeDef,
        data: &TypeSig,
        members: &[BoundMember],
    ) {
        let base = data_serializer(data);
        let stream = stream_sig();
        w.open(format!("type public sealed class {name} extends {base}"));
        if !def.generic_params.is_empty() {
            w.line(format!("generic {}", def.generic_params.join(" ")));
        }

        w.open("method public void .ctor()");
        w.line(Op::Ldarg(0));
        w.line(Op::Call(MethodRef::ctor(base.clone(), Vec::new())));
        w.line(Op::Ret);
        w.close();

        w.open(format!("method public virtual void Serialize({data} obj, {stream} stream)"));
        for bound in members {
            let member = &bound.member;
            w.line(Op::Ldarg(2));
            w.line(Op::Ldarg(1));
            match member.kind {
                MemberKind::Field => w.line(Op::Ldfld(FieldRef::new(
                    bound.declaring.clone(),
                    member.name.clone(),
                    member.ty.clone(),
                ))),
                MemberKind::Property => {
                    let getter = MethodRef::new_instance(
                        bound.declaring.clone(),
                        member.getter(),
                        Vec::new(),
                        member.ty.clone(),
                    );
                    w.line(accessor_call(getter, bound.value_type));
                }
            }
            let write = MethodRef::new_instance(
                stream.clone(),
                "Write",
                vec![TypeSig::MethodParam("T".into())],
                TypeSig::VOID,
            )
            .with_generic_args(vec![member.ty.clone()]);
            w.line(Op::Callvirt(write));
        }
        w.line(Op::Ret);
        w.close();

        if is_constructible(def) {
            w.open(format!("method public virtual {data} Deserialize({stream} stream)"));
            w.line(format!("local {data}"));
            w.line(Op::Newobj(MethodRef::ctor(data.clone(), Vec::new())));
            w.line(Op::Stloc(0));
            for bound in members {
                let member = &bound.member;
                w.line(Op::Ldloc(0));
                w.line(Op::Ldarg(1));
                let read = MethodRef::new_instance(stream.clone(), "Read", Vec::new(), TypeSig::MethodParam("T".into()))
                    .with_generic_args(vec![member.ty.clone()]);
                w.line(Op::Callvirt(read));
                match member.kind {
                    MemberKind::Field => w.line(Op::Stfld(FieldRef::new(
                        bound.declaring.clone(),
                        member.name.clone(),
                        member.ty.clone(),
                    ))),
                    MemberKind::Property => {
                        let setter = MethodRef::new_instance(
                            bound.declaring.clone(),
                            member.setter(),
                            vec![member.ty.clone()],
                            TypeSig::VOID,
                        );
                        w.line(accessor_call(setter, bound.value_type));
                    }
                }
            }
            w.line(Op::Ldloc(0));
            w.line(Op::Ret);
            w.close();
        }
        w.close();
        w.blank();
    }

    fn emit_registration(&self, w: &mut SourceWriter) {
        let handle = self.target.corlib_type(system::RUNTIME_TYPE_HANDLE);
        let register = MethodRef::new_static(
            TypeSig::external(ENGINE_CORE, engine::SERIALIZER_FACTORY),
            "Register",
            vec![handle.clone(), handle],
            TypeSig::VOID,
        );
        w.open(format!(
            "type public sealed class {}.{REGISTRATION_TYPE} extends {}",
            self.target.namespace(),
            self.target.object_base()
        ));
        w.open("method public static void Initialize()");
        w.line(format!("attribute {}", self.target.module_initializer()));
        for (data, serializer) in &self.registrations {
            w.line(Op::Ldtoken(data.clone()));
            w.line(Op::Ldtoken(serializer.clone()));
            w.line(Op::Call(register.clone()));
        }
        w.line(Op::Ret);
        w.close();
        w.close();
    }
}

fn accessor_call(method: MethodRef, value_type: bool) -> Op {
    if value_type {
        Op::Call(method)
    } else {
        Op::Callvirt(method)
    }
}

/// Concrete class with a parameterless constructor the generated code may call
fn is_constructible(def: &TypeDef) -> bool {
    !def.is_abstract
        && !def.is_value_type()
        && def
            .methods
            .iter()
            .any(|m| m.is_ctor() && m.params.is_empty() && m.visibility >= Visibility::Assembly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_artifact::{FieldDef, Primitive};
    use asmproc_resolver::Resolver;
    use asmproc_test_utils::{add_property, data_contract, game, generic, CORLIB};

    fn generate(art: &asmproc_artifact::Artifact) -> Option<GeneratedSource> {
        let resolver = Resolver::new();
        let scope = ArtifactScope::new(art, &resolver);
        let registry = SerializableTypeRegistry::build(&scope);
        let factory = SerializerFactory::new();
        SerializerGenerator::new(scope, &registry, &factory, Target::new("Game", CORLIB), "Game.Serializers")
            .generate()
    }

    #[test]
    fn serializer_names_flatten_namespace() {
        assert_eq!(serializer_type_name(&TypeRef::local("Game.World.Player")), "GameWorld_PlayerSerializer");
        assert_eq!(serializer_type_name(&TypeRef::local("Game.Outer/Inner")), "Game_Outer_InnerSerializer");
        assert_eq!(serializer_type_name(&TypeRef::local("Game.Box`1")), "Game_BoxSerializer`1");
    }

    #[test]
    fn no_contracts_no_source() {
        assert!(generate(&game()).is_none());
    }

    #[test]
    fn serializer_reads_and_writes_members() {
        let mut art = game();
        let mut player = data_contract("Game.Player");
        player
            .fields
            .push(FieldDef::new("Health", TypeSig::Primitive(Primitive::I32), Visibility::Public));
        add_property(
            &mut player,
            "Name",
            TypeSig::Primitive(Primitive::String),
            Some(Visibility::Public),
            Some(Visibility::Public),
        );
        art.types.push(player);

        let source = generate(&art).unwrap();
        let text = &source.text;
        assert!(text.contains("type public sealed class Game.DataSerializers.Game_PlayerSerializer extends"));
        assert!(text.contains("ldfld i32 [Game]Game.Player::Health"));
        assert!(text.contains("callvirt instance string [Game]Game.Player::get_Name()"));
        assert!(text.contains("stfld i32 [Game]Game.Player::Health"));
        assert!(text.contains("newobj instance void [Game]Game.Player::.ctor()"));
        assert!(text.contains(&format!("attribute [Engine.Core]{}", engine::MODULE_INITIALIZER)));
        assert!(text.contains("ldtoken Game.DataSerializers.Game_PlayerSerializer"));
    }

    #[test]
    fn member_shapes_register_factory_serializers() {
        let mut art = game();
        let mut inventory = data_contract("Game.Inventory");
        let dict = TypeSig::generic(
            TypeRef::external(CORLIB, system::DICTIONARY_2),
            vec![TypeSig::Primitive(Primitive::String), TypeSig::Primitive(Primitive::I32)],
        );
        inventory.fields.push(FieldDef::new("Counts", dict, Visibility::Public));
        art.types.push(inventory);

        let text = generate(&art).unwrap().text;
        assert!(text.contains("Serializers.DictionarySerializer`2<string, i32>"));
        assert!(text.contains("Serializers.KeyValuePairSerializer`2<string, i32>"));
    }

    #[test]
    fn generic_contracts_get_generic_serializers() {
        let mut art = game();
        let mut boxed = generic(data_contract("Game.Box`1"), &["T"]);
        boxed
            .fields
            .push(FieldDef::new("Value", TypeSig::Param("T".into()), Visibility::Public));
        art.types.push(boxed);
        let mut holder = data_contract("Game.Holder");
        holder.fields.push(FieldDef::new(
            "Ints",
            TypeSig::generic(TypeRef::local("Game.Box`1"), vec![TypeSig::Primitive(Primitive::I32)]),
            Visibility::Public,
        ));
        art.types.push(holder);

        let text = generate(&art).unwrap().text;
        assert!(text.contains("generic T"));
        assert!(text.contains("ldfld !T [Game]Game.Box`1<!T>::Value"));
        assert!(text.contains("ldtoken [Game]Game.Box`1\n"));
        assert!(text.contains("ldtoken Game.DataSerializers.Game_BoxSerializer`1<i32>"));
    }
}
