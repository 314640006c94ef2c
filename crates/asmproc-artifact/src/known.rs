//! Well-known artifact and type names
//!
//! The processor recognizes a handful of runtime and engine types by name.
//! They are collected here so the rest of the workspace never spells them
//! out inline.

/// Artifact names that may act as the core runtime library
pub const CORLIB_NAMES: &[&str] = &["System.Runtime", "mscorlib"];

/// Engine core library (serialization, threading, reflection helpers)
pub const ENGINE_CORE: &str = "Engine.Core";

/// Engine rendering library (parameter keys)
pub const ENGINE_RENDERING: &str = "Engine.Rendering";

/// Engine runtime library (update engine)
pub const ENGINE_RUNTIME: &str = "Engine.Runtime";

/// Name of the type hosting module-level code
pub const MODULE_TYPE: &str = "<Module>";

/// Static constructor name
pub const CCTOR: &str = ".cctor";

/// Instance constructor name
pub const CTOR: &str = ".ctor";

/// Suffix appended to the artifact name for the generated serializer companion
pub const SERIALIZERS_SUFFIX: &str = ".Serializers";

/// Runtime types
pub mod system {
    pub const OBJECT: &str = "System.Object";
    pub const VALUE_TYPE: &str = "System.ValueType";
    pub const ENUM: &str = "System.Enum";
    pub const ATTRIBUTE: &str = "System.Attribute";
    pub const ATTRIBUTE_USAGE: &str = "System.AttributeUsageAttribute";
    pub const INTERNALS_VISIBLE_TO: &str =
        "System.Runtime.CompilerServices.InternalsVisibleToAttribute";
    pub const STRING: &str = "System.String";
    pub const FUNC_1: &str = "System.Func`1";
    pub const ACTION_1: &str = "System.Action`1";
    pub const RUNTIME_TYPE_HANDLE: &str = "System.RuntimeTypeHandle";
    pub const LIST_1: &str = "System.Collections.Generic.List`1";
    pub const ILIST_1: &str = "System.Collections.Generic.IList`1";
    pub const DICTIONARY_2: &str = "System.Collections.Generic.Dictionary`2";
    pub const IDICTIONARY_2: &str = "System.Collections.Generic.IDictionary`2";
    pub const KEY_VALUE_PAIR_2: &str = "System.Collections.Generic.KeyValuePair`2";
    pub const NULLABLE_1: &str = "System.Nullable`1";
    pub const TUPLE_PREFIX: &str = "System.Tuple`";
}

/// Engine core types
pub mod engine {
    pub const DATA_CONTRACT: &str = "Engine.Core.DataContractAttribute";
    pub const DATA_MEMBER: &str = "Engine.Core.DataMemberAttribute";
    pub const DATA_MEMBER_IGNORE: &str = "Engine.Core.DataMemberIgnoreAttribute";
    pub const MODULE_INITIALIZER: &str = "Engine.Core.ModuleInitializerAttribute";
    pub const ASSEMBLY_PROCESSED: &str = "Engine.Core.AssemblyProcessedAttribute";
    pub const ASSEMBLY_SCAN: &str = "Engine.Core.Reflection.AssemblyScanAttribute";
    pub const REMOVE_INIT_LOCALS: &str = "Engine.Core.RemoveInitLocalsAttribute";

    pub const DATA_SERIALIZER_1: &str = "Engine.Core.Serialization.DataSerializer`1";
    pub const SERIALIZATION_STREAM: &str = "Engine.Core.Serialization.SerializationStream";
    pub const SERIALIZER_FACTORY: &str = "Engine.Core.Serialization.DataSerializerFactory";
    pub const SERIALIZERS_NAMESPACE: &str = "Engine.Core.Serialization.Serializers";
    pub const ASSEMBLY_REGISTRY: &str = "Engine.Core.Reflection.AssemblyRegistry";

    pub const DISPATCHER: &str = "Engine.Core.Threading.Dispatcher";
    pub const CONCURRENT_POOL_1: &str = "Engine.Core.Threading.ConcurrentPool`1";
}

/// Engine rendering types
pub mod rendering {
    pub const PARAMETER_KEYS: &str = "Engine.Rendering.ParameterKeys";

    /// Generic definitions forming the parameter key family
    pub const KEY_FAMILY: &[&str] = &[
        "Engine.Rendering.ParameterKey`1",
        "Engine.Rendering.ValueParameterKey`1",
        "Engine.Rendering.ObjectParameterKey`1",
        "Engine.Rendering.PermutationParameterKey`1",
    ];

    /// Non-generic base of the family
    pub const PARAMETER_KEY: &str = "Engine.Rendering.ParameterKey";
}

/// Engine runtime update engine types
pub mod updater {
    pub const UPDATE_ENGINE: &str = "Engine.Runtime.Updater.UpdateEngine";
    pub const UPDATABLE_MEMBER: &str = "Engine.Runtime.Updater.UpdatableMember";
    pub const UPDATABLE_FIELD_1: &str = "Engine.Runtime.Updater.UpdatableField`1";
    pub const UPDATABLE_PROPERTY_1: &str = "Engine.Runtime.Updater.UpdatableProperty`1";
    pub const UPDATABLE_PROPERTY_OBJECT_1: &str = "Engine.Runtime.Updater.UpdatablePropertyObject`1";
    pub const UPDATE_MEMBER_RESOLVER: &str = "Engine.Runtime.Updater.UpdateMemberResolver";
    pub const LIST_UPDATE_RESOLVER_1: &str = "Engine.Runtime.Updater.ListUpdateResolver`1";
    pub const ARRAY_UPDATE_RESOLVER_1: &str = "Engine.Runtime.Updater.ArrayUpdateResolver`1";
}
