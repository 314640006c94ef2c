//! Testing utilities for asmproc workspace
//!
//! Reference artifacts shaped like the runtime and engine libraries the
//! processor knows about, builders for the game artifacts under test, and a
//! temp-dir fixture that writes everything to disk for resolver lookups.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc, clippy::must_use_candidate)]

use asmproc_artifact::codec::{self, WriteOptions};
use asmproc_artifact::known::{engine, rendering, system, updater, CTOR, ENGINE_CORE, ENGINE_RENDERING, ENGINE_RUNTIME};
use asmproc_artifact::{
    Artifact, AttrValue, CustomAttribute, FieldDef, KnownAttribute, MethodBody, MethodDef, Op, Param,
    Primitive, PropertyDef, TypeDef, TypeKind, TypeRef, TypeSig, Version, Visibility,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Name of the fixture core runtime library
pub const CORLIB: &str = "System.Runtime";

/// Name of the default artifact under test
pub const GAME: &str = "Game";

pub fn corlib_type(full_name: &str) -> TypeSig {
    TypeSig::external(CORLIB, full_name)
}

pub fn core_type(full_name: &str) -> TypeSig {
    TypeSig::external(ENGINE_CORE, full_name)
}

pub fn rendering_type(full_name: &str) -> TypeSig {
    TypeSig::external(ENGINE_RENDERING, full_name)
}

pub fn prim(p: Primitive) -> TypeSig {
    TypeSig::Primitive(p)
}

fn split(full_name: &str) -> (&str, &str) {
    full_name.rsplit_once('.').unwrap_or(("", full_name))
}

/// Public class with the given base
pub fn class_with_base(full_name: &str, base: TypeSig) -> TypeDef {
    let (ns, name) = split(full_name);
    TypeDef::new(ns, name, Visibility::Public).with_base(base)
}

/// Public class deriving from the fixture `System.Object`
pub fn class(full_name: &str) -> TypeDef {
    class_with_base(full_name, corlib_type(system::OBJECT))
}

/// Public struct deriving from the fixture `System.ValueType`
pub fn struct_type(full_name: &str) -> TypeDef {
    class_with_base(full_name, corlib_type(system::VALUE_TYPE)).with_kind(TypeKind::Struct)
}

pub fn generic(mut ty: TypeDef, params: &[&str]) -> TypeDef {
    ty.generic_params = params.iter().map(|p| (*p).to_string()).collect();
    ty
}

/// Public instance constructor with an empty body
pub fn ctor(params: Vec<Param>) -> MethodDef {
    MethodDef::new(CTOR, Visibility::Public, params, TypeSig::VOID).with_body(MethodBody::from_ops(vec![Op::Ret]))
}

/// Public instance method with an empty body
pub fn method(name: &str, params: Vec<Param>, ret: TypeSig) -> MethodDef {
    let body = if ret == TypeSig::VOID {
        vec![Op::Ret]
    } else {
        vec![Op::Ldnull, Op::Ret]
    };
    MethodDef::new(name, Visibility::Public, params, ret).with_body(MethodBody::from_ops(body))
}

/// Public static method with an empty body
pub fn static_method(name: &str, params: Vec<Param>, ret: TypeSig) -> MethodDef {
    method(name, params, ret).into_static()
}

pub fn param(name: &str, ty: TypeSig) -> Param {
    Param::new(name, ty)
}

/// Attribute instance pointing at the fixture library that defines it
pub fn attribute(known: KnownAttribute) -> CustomAttribute {
    let scope = match known {
        KnownAttribute::AttributeUsage | KnownAttribute::InternalsVisibleTo => CORLIB,
        _ => ENGINE_CORE,
    };
    CustomAttribute::new(TypeRef::external(scope, known.full_name()), Vec::new())
}

/// Add a property with accessor methods `get_X` / `set_X`
pub fn add_property(
    ty: &mut TypeDef,
    name: &str,
    sig: TypeSig,
    getter: Option<Visibility>,
    setter: Option<Visibility>,
) {
    if let Some(vis) = getter {
        let mut get = method(&format!("get_{name}"), Vec::new(), sig.clone());
        get.visibility = vis;
        ty.methods.push(get);
    }
    if let Some(vis) = setter {
        let mut set = method(&format!("set_{name}"), vec![param("value", sig.clone())], TypeSig::VOID);
        set.visibility = vis;
        ty.methods.push(set);
    }
    ty.properties.push(PropertyDef::new(name, sig, getter, setter));
}

/// Public class carrying `[DataContract]` with a public parameterless constructor
pub fn data_contract(full_name: &str) -> TypeDef {
    let mut ty = class(full_name);
    ty.attributes.push(attribute(KnownAttribute::DataContract));
    ty.methods.push(ctor(Vec::new()));
    ty
}

fn attribute_class(full_name: &str, ctors: Vec<MethodDef>) -> TypeDef {
    let mut ty = class_with_base(full_name, corlib_type(system::ATTRIBUTE));
    ty.methods = ctors;
    ty
}

/// Core runtime library: object model roots, attributes and generic collections
pub fn corlib() -> Artifact {
    let local = |n: &str| TypeSig::local(n);
    let sub = |full: &str, base: &str| class_with_base(full, local(base));
    let mut art = Artifact::new(CORLIB, Version::new(4, 0, 0, 0));

    let mut object = TypeDef::new("System", "Object", Visibility::Public);
    object.methods.push(ctor(Vec::new()));
    art.types.push(object);
    art.types.push(sub(system::VALUE_TYPE, system::OBJECT));
    art.types.push(sub(system::ENUM, system::VALUE_TYPE));
    art.types.push(sub(system::STRING, system::OBJECT));
    art.types
        .push(sub("System.Int32", system::VALUE_TYPE).with_kind(TypeKind::Struct));
    art.types
        .push(sub(system::RUNTIME_TYPE_HANDLE, system::VALUE_TYPE).with_kind(TypeKind::Struct));

    let mut attr = sub(system::ATTRIBUTE, system::OBJECT);
    attr.is_abstract = true;
    attr.methods.push(ctor(Vec::new()));
    art.types.push(attr);

    let mut usage = sub(system::ATTRIBUTE_USAGE, system::ATTRIBUTE);
    usage.methods.push(ctor(vec![param("validOn", prim(Primitive::I32))]));
    add_property(
        &mut usage,
        "Inherited",
        prim(Primitive::Bool),
        Some(Visibility::Public),
        Some(Visibility::Public),
    );
    art.types.push(usage);

    let mut ivt = sub(system::INTERNALS_VISIBLE_TO, system::ATTRIBUTE);
    ivt.methods.push(ctor(vec![param("assemblyName", prim(Primitive::String))]));
    art.types.push(ivt);

    let delegate_ctor = || {
        ctor(vec![
            param("object", prim(Primitive::Object)),
            param("method", prim(Primitive::NativeInt)),
        ])
    };
    let mut func = generic(sub(system::FUNC_1, system::OBJECT), &["T"]);
    func.methods.push(delegate_ctor());
    func.methods.push(method("Invoke", Vec::new(), TypeSig::Param("T".into())));
    art.types.push(func);

    let mut action = generic(sub(system::ACTION_1, system::OBJECT), &["T"]);
    action.methods.push(delegate_ctor());
    action
        .methods
        .push(method("Invoke", vec![param("obj", TypeSig::Param("T".into()))], TypeSig::VOID));
    art.types.push(action);

    let mut list = generic(sub(system::LIST_1, system::OBJECT), &["T"]);
    list.methods.push(ctor(Vec::new()));
    art.types.push(list);
    art.types
        .push(generic(sub(system::ILIST_1, system::OBJECT), &["T"]).with_kind(TypeKind::Interface));
    let mut dict = generic(sub(system::DICTIONARY_2, system::OBJECT), &["TKey", "TValue"]);
    dict.methods.push(ctor(Vec::new()));
    art.types.push(dict);
    art.types.push(
        generic(sub(system::IDICTIONARY_2, system::OBJECT), &["TKey", "TValue"])
            .with_kind(TypeKind::Interface),
    );
    art.types.push(
        generic(sub(system::KEY_VALUE_PAIR_2, system::VALUE_TYPE), &["TKey", "TValue"])
            .with_kind(TypeKind::Struct),
    );
    art.types
        .push(generic(sub(system::NULLABLE_1, system::VALUE_TYPE), &["T"]).with_kind(TypeKind::Struct));

    let tuple_params = ["T1", "T2", "T3", "T4"];
    for arity in 1..=4 {
        let name = format!("{}{arity}", system::TUPLE_PREFIX);
        art.types
            .push(generic(sub(&name, system::OBJECT), &tuple_params[..arity]));
    }
    art
}

/// Engine core library: attributes, serialization, reflection and threading
pub fn engine_core() -> Artifact {
    let mut art = Artifact::new(ENGINE_CORE, Version::new(1, 0, 0, 0));
    art.references.push(corlib().as_reference());

    let mut contract = attribute_class(engine::DATA_CONTRACT, vec![ctor(Vec::new())]);
    add_property(
        &mut contract,
        "Inherited",
        prim(Primitive::Bool),
        Some(Visibility::Public),
        Some(Visibility::Public),
    );
    art.types.push(contract);
    for name in [
        engine::DATA_MEMBER,
        engine::DATA_MEMBER_IGNORE,
        engine::ASSEMBLY_PROCESSED,
        engine::ASSEMBLY_SCAN,
        engine::REMOVE_INIT_LOCALS,
    ] {
        art.types.push(attribute_class(name, vec![ctor(Vec::new())]));
    }
    art.types.push(attribute_class(
        engine::MODULE_INITIALIZER,
        vec![ctor(Vec::new()), ctor(vec![param("order", prim(Primitive::I32))])],
    ));

    let stream = TypeSig::local(engine::SERIALIZATION_STREAM);
    let t = TypeSig::Param("T".into());
    let mut serializer = generic(class(engine::DATA_SERIALIZER_1), &["T"]);
    serializer.is_abstract = true;
    serializer.methods.push(ctor(Vec::new()));
    let mut serialize = method(
        "Serialize",
        vec![param("obj", t.clone()), param("stream", stream.clone())],
        TypeSig::VOID,
    );
    serialize.is_virtual = true;
    serializer.methods.push(serialize);
    let mut deserialize = method("Deserialize", vec![param("stream", stream.clone())], t.clone());
    deserialize.is_virtual = true;
    serializer.methods.push(deserialize);
    art.types.push(serializer);

    let mut stream_ty = class(engine::SERIALIZATION_STREAM);
    let mut write = method("Write", vec![param("value", TypeSig::MethodParam("T".into()))], TypeSig::VOID);
    write.generic_params = vec!["T".into()];
    stream_ty.methods.push(write);
    let mut read = method("Read", Vec::new(), TypeSig::MethodParam("T".into()));
    read.generic_params = vec!["T".into()];
    stream_ty.methods.push(read);
    art.types.push(stream_ty);

    let handle = corlib_type(system::RUNTIME_TYPE_HANDLE);
    let mut factory = class(engine::SERIALIZER_FACTORY);
    factory.methods.push(static_method(
        "Register",
        vec![param("dataType", handle.clone()), param("serializerType", handle.clone())],
        TypeSig::VOID,
    ));
    art.types.push(factory);

    let mut registry = class(engine::ASSEMBLY_REGISTRY);
    registry.methods.push(static_method(
        "RegisterScanType",
        vec![param("scanType", handle.clone()), param("type", handle)],
        TypeSig::VOID,
    ));
    art.types.push(registry);

    for (name, params) in [
        ("ListSerializer`1", &["T"][..]),
        ("ListInterfaceSerializer`1", &["T"]),
        ("DictionarySerializer`2", &["TKey", "TValue"]),
        ("DictionaryInterfaceSerializer`2", &["TKey", "TValue"]),
        ("KeyValuePairSerializer`2", &["TKey", "TValue"]),
        ("NullableSerializer`1", &["T"]),
        ("EnumSerializer`1", &["T"]),
        ("ArraySerializer`1", &["T"]),
        ("TupleSerializer`1", &["T1"]),
        ("TupleSerializer`2", &["T1", "T2"]),
        ("TupleSerializer`3", &["T1", "T2", "T3"]),
        ("TupleSerializer`4", &["T1", "T2", "T3", "T4"]),
    ] {
        let mut ty = generic(class(&format!("{}.{name}", engine::SERIALIZERS_NAMESPACE)), params);
        ty.methods.push(ctor(Vec::new()));
        art.types.push(ty);
    }

    let item = TypeSig::MethodParam("T".into());
    let mut dispatcher = class(engine::DISPATCHER);
    let mut for_each = static_method(
        "ForEach",
        vec![
            param(
                "items",
                TypeSig::generic(TypeRef::external(CORLIB, system::LIST_1), vec![item.clone()]),
            ),
            param(
                "action",
                TypeSig::generic(TypeRef::external(CORLIB, system::ACTION_1), vec![item]),
            ),
        ],
        TypeSig::VOID,
    );
    for_each.generic_params = vec!["T".into()];
    dispatcher.methods.push(for_each);
    art.types.push(dispatcher);

    let mut pool = generic(class(engine::CONCURRENT_POOL_1), &["T"]);
    pool.methods.push(ctor(vec![param(
        "factory",
        TypeSig::generic(TypeRef::external(CORLIB, system::FUNC_1), vec![t.clone()]),
    )]));
    pool.methods.push(method("Acquire", Vec::new(), t.clone()));
    pool.methods.push(method("Release", vec![param("item", t)], TypeSig::VOID));
    art.types.push(pool);

    art
}

/// Engine rendering library: the parameter key family and merge helper
pub fn engine_rendering() -> Artifact {
    let mut art = Artifact::new(ENGINE_RENDERING, Version::new(1, 0, 0, 0));
    art.references.push(corlib().as_reference());
    art.references.push(engine_core().as_reference());

    let mut key = class(rendering::PARAMETER_KEY);
    key.is_abstract = true;
    art.types.push(key);
    for (i, name) in rendering::KEY_FAMILY.iter().enumerate() {
        let base = if i == 0 {
            TypeSig::local(rendering::PARAMETER_KEY)
        } else {
            TypeSig::generic(TypeRef::local(rendering::KEY_FAMILY[0]), vec![TypeSig::Param("T".into())])
        };
        let mut ty = generic(class_with_base(name, base), &["T"]);
        ty.methods.push(ctor(Vec::new()));
        art.types.push(ty);
    }

    let key_sig = TypeSig::local(rendering::PARAMETER_KEY);
    let mut keys = class(rendering::PARAMETER_KEYS);
    keys.methods.push(static_method(
        "Merge",
        vec![
            param("key", key_sig.clone()),
            param("owner", corlib_type(system::RUNTIME_TYPE_HANDLE)),
            param("name", prim(Primitive::String)),
        ],
        key_sig,
    ));
    art.types.push(keys);
    art
}

/// Engine runtime library: the update engine and its member accessors
pub fn engine_runtime() -> Artifact {
    let mut art = Artifact::new(ENGINE_RUNTIME, Version::new(1, 0, 0, 0));
    art.references.push(corlib().as_reference());
    art.references.push(engine_core().as_reference());

    let local = |n: &str| TypeSig::local(n);
    let abstract_class = |full: &str| {
        let mut ty = class(full);
        ty.is_abstract = true;
        ty.methods.push(ctor(Vec::new()));
        ty
    };
    art.types.push(abstract_class(updater::UPDATABLE_MEMBER));
    art.types.push(abstract_class(updater::UPDATE_MEMBER_RESOLVER));

    let native = prim(Primitive::NativeInt);
    let accessors = [
        (updater::UPDATABLE_FIELD_1, updater::UPDATABLE_MEMBER, vec![param("offset", prim(Primitive::I32))]),
        (
            updater::UPDATABLE_PROPERTY_1,
            updater::UPDATABLE_MEMBER,
            vec![param("getter", native.clone()), param("setter", native.clone())],
        ),
        (
            updater::UPDATABLE_PROPERTY_OBJECT_1,
            updater::UPDATABLE_MEMBER,
            vec![param("getter", native.clone()), param("setter", native)],
        ),
        (updater::LIST_UPDATE_RESOLVER_1, updater::UPDATE_MEMBER_RESOLVER, Vec::new()),
        (updater::ARRAY_UPDATE_RESOLVER_1, updater::UPDATE_MEMBER_RESOLVER, Vec::new()),
    ];
    for (name, base, params) in accessors {
        let mut ty = generic(class_with_base(name, local(base)), &["T"]);
        ty.methods.push(ctor(params));
        art.types.push(ty);
    }

    let mut engine = class(updater::UPDATE_ENGINE);
    engine.methods.push(static_method(
        "RegisterMember",
        vec![
            param("owner", corlib_type(system::RUNTIME_TYPE_HANDLE)),
            param("name", prim(Primitive::String)),
            param("member", local(updater::UPDATABLE_MEMBER)),
        ],
        TypeSig::VOID,
    ));
    engine.methods.push(static_method(
        "RegisterMemberResolver",
        vec![param("resolver", local(updater::UPDATE_MEMBER_RESOLVER))],
        TypeSig::VOID,
    ));
    art.types.push(engine);
    art
}

/// Empty game library referencing the fixture runtime and engine core
pub fn game() -> Artifact {
    let mut art = Artifact::new(GAME, Version::new(1, 0, 0, 0));
    art.references.push(corlib().as_reference());
    art.references.push(engine_core().as_reference());
    art
}

/// Field with `[DataMember]`
pub fn data_member(name: &str, ty: TypeSig, visibility: Visibility) -> FieldDef {
    let mut field = FieldDef::new(name, ty, visibility);
    field.attributes.push(attribute(KnownAttribute::DataMember));
    field
}

/// `[ModuleInitializer]` / `[ModuleInitializer(order)]`
pub fn module_initializer(order: Option<i64>) -> CustomAttribute {
    let mut attr = attribute(KnownAttribute::ModuleInitializer);
    attr.args = order.map(AttrValue::Int).into_iter().collect();
    attr
}

/// Directory holding the fixture libraries, ready to be used as a search path
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    /// Runtime and every engine library written to a fresh directory
    pub fn new() -> Self {
        let fixture = Self::empty();
        fixture.write(&corlib());
        fixture.write(&engine_core());
        fixture.write(&engine_rendering());
        fixture.write(&engine_runtime());
        fixture
    }

    /// Runtime and engine core only (no rendering library)
    pub fn without_rendering() -> Self {
        let fixture = Self::empty();
        fixture.write(&corlib());
        fixture.write(&engine_core());
        fixture
    }

    /// Fresh directory with nothing in it
    pub fn empty() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `artifact` as `<name>.dll`
    pub fn write(&self, artifact: &Artifact) -> PathBuf {
        self.write_as(artifact, &format!("{}.dll", artifact.name))
    }

    pub fn write_as(&self, artifact: &Artifact, file_name: &str) -> PathBuf {
        let path = self.dir.path().join(file_name);
        codec::write(artifact, &path, WriteOptions::default()).expect("write fixture artifact");
        path
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
