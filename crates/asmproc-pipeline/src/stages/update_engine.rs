use super::grant_internals;
use crate::context::ProcessorContext;
use crate::error::StageError;
use crate::stage::{Access, Facts, Stage};
use asmproc_artifact::known::{system, updater, CORLIB_NAMES, ENGINE_CORE, ENGINE_RUNTIME, SERIALIZERS_SUFFIX};
use asmproc_artifact::{
    Artifact, CustomAttribute, KnownAttribute, MethodBody, MethodDef, MethodRef, Op, Primitive, TypeDef, TypeRef,
    TypeSig, Visibility,
};
use asmproc_codegen::{serializable_members, MemberKind, Origin, SerializableTypeRegistry};
use asmproc_resolver::{ArtifactScope, Resolver};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::debug;

/// Name of the generated type, placed in the root namespace
pub const UPDATE_TYPE: &str = "UpdateEngineAutoGenerated";

/// Module initializer registering non-generic types and instantiations
const UPDATE_MAIN: &str = "UpdateMain";

/// Registers the members of serializable types with the update engine
///
/// Artifacts that depend on the engine runtime get an `UpdateMain` module
/// initializer registering one accessor per serializable member, and one
/// `UpdateGeneric_*` method per generic type, called from `UpdateMain` for
/// every closed instantiation the members use. List and array member types
/// register a member resolver.
///
/// Libraries the runtime itself depends on get no code; they grant the
/// runtime's serializers access to their internals instead, since those
/// serializers cover the runtime's dependencies too.
#[derive(Debug, Clone, Default)]
pub struct UpdateEngineStage {
    sign_key: Option<Vec<u8>>,
}

impl UpdateEngineStage {
    /// `sign_key` holds the public key used for strong-named artifacts
    #[must_use]
    pub fn new(sign_key: Option<Vec<u8>>) -> Self {
        Self { sign_key }
    }

    fn grant_runtime_serializers(&self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        let Some(runtime) = ctx.resolver.try_resolve(ENGINE_RUNTIME) else {
            return Ok(false);
        };
        if !reaches(&runtime, &ctx.artifact.name, &ctx.resolver) {
            return Ok(false);
        }
        let corlib = ctx.resolver.find_corlib(&ctx.artifact)?.name.clone();
        let grantee = format!("{ENGINE_RUNTIME}{SERIALIZERS_SUFFIX}");
        grant_internals(ctx, &grantee, &corlib, self.sign_key.as_deref())
    }
}

/// `UpdateGeneric_Game_Box` for `Game.Box`1`
fn update_method_name(full_name: &str) -> String {
    let base = full_name.split('`').next().unwrap_or(full_name);
    format!("UpdateGeneric_{}", base.replace(['.', '/'], "_"))
}

fn is_system(name: &str) -> bool {
    CORLIB_NAMES.contains(&name) || name.starts_with("System")
}

/// Whether `name` is `from` or reachable through its references
///
/// System libraries are not followed; references that do not resolve are
/// skipped.
fn reaches(from: &Artifact, name: &str, resolver: &Resolver) -> bool {
    if from.name == name {
        return true;
    }
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<String> = from.references.iter().map(|r| r.name.clone()).collect();
    while let Some(next) = queue.pop_front() {
        if next == name {
            return true;
        }
        if is_system(&next) || !seen.insert(next.clone()) {
            continue;
        }
        if let Some(artifact) = resolver.try_resolve(&next) {
            queue.extend(artifact.references.iter().map(|r| r.name.clone()));
        }
    }
    false
}

/// Same signature as seen from `live`, for a member declared in `owner`
fn rebase(sig: &TypeSig, owner: Option<&str>, live: &str) -> TypeSig {
    let mut sig = sig.clone();
    if let Some(owner) = owner {
        sig.for_each_ref_mut(&mut |r| *r = r.anchored(owner).relative_to(live));
    }
    sig
}

/// Closed array and generic instance shapes inside `sig`, outermost first
fn collect_shapes(sig: &TypeSig, out: &mut Vec<TypeSig>) {
    if sig.contains_generic_param() {
        return;
    }
    match sig {
        TypeSig::Array(elem) => {
            if !out.contains(sig) {
                out.push(sig.clone());
            }
            collect_shapes(elem, out);
        }
        TypeSig::Generic(_, args) => {
            if !out.contains(sig) {
                out.push(sig.clone());
            }
            for arg in args {
                collect_shapes(arg, out);
            }
        }
        _ => {}
    }
}

fn runtime_generic(definition: &str, arg: TypeSig) -> TypeSig {
    TypeSig::generic(TypeRef::external(ENGINE_RUNTIME, definition), vec![arg])
}

/// Registration code for one artifact, built before anything is mutated
struct Plan<'a> {
    scope: ArtifactScope<'a>,
    register_member: MethodRef,
    register_resolver: MethodRef,
    main: Vec<Op>,
    generic_methods: Vec<MethodDef>,
    shapes: Vec<TypeSig>,
    members: usize,
}

impl<'a> Plan<'a> {
    fn new(scope: ArtifactScope<'a>, corlib: &str) -> Self {
        let engine = TypeSig::external(ENGINE_RUNTIME, updater::UPDATE_ENGINE);
        let register_member = MethodRef::new_static(
            engine.clone(),
            "RegisterMember",
            vec![
                TypeSig::external(corlib, system::RUNTIME_TYPE_HANDLE),
                TypeSig::Primitive(Primitive::String),
                TypeSig::external(ENGINE_RUNTIME, updater::UPDATABLE_MEMBER),
            ],
            TypeSig::VOID,
        );
        let register_resolver = MethodRef::new_static(
            engine,
            "RegisterMemberResolver",
            vec![TypeSig::external(ENGINE_RUNTIME, updater::UPDATE_MEMBER_RESOLVER)],
            TypeSig::VOID,
        );
        Self {
            scope,
            register_member,
            register_resolver,
            main: Vec::new(),
            generic_methods: Vec::new(),
            shapes: Vec::new(),
            members: 0,
        }
    }

    fn is_value_type(&self, sig: &TypeSig) -> bool {
        match sig {
            TypeSig::Primitive(p) => p.is_value_type(),
            TypeSig::Named(r) | TypeSig::Generic(r, _) => {
                self.scope.with_type(r, |_, def| def.is_value_type()).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Emit registrations for the members of `def`, named `r` from the live
    /// artifact and declared in `owner` (`None` when local)
    fn add_type(&mut self, r: &TypeRef, def: &TypeDef, owner: Option<&str>) {
        let members = serializable_members(def);
        if members.is_empty() {
            return;
        }
        let live = self.scope.live().name.as_str();
        let generic = !def.generic_params.is_empty();
        let args: Vec<TypeSig> = def.generic_params.iter().cloned().map(TypeSig::MethodParam).collect();
        let bindings: HashMap<String, TypeSig> = def.generic_params.iter().cloned().zip(args.iter().cloned()).collect();
        let target = if generic {
            TypeSig::generic(r.clone(), args)
        } else {
            TypeSig::Named(r.clone())
        };
        let instance_fields: Vec<&str> = def.fields.iter().filter(|f| !f.is_static).map(|f| f.name.as_str()).collect();

        let mut ops = Vec::with_capacity(members.len() * 6 + 1);
        for member in &members {
            let declared = rebase(&member.ty, owner, live);
            let ty = declared.substitute(&bindings);
            if !generic {
                collect_shapes(&ty, &mut self.shapes);
            }
            ops.push(Op::Ldtoken(target.clone()));
            ops.push(Op::Ldstr(member.name.clone()));
            let accessor = match member.kind {
                MemberKind::Field => {
                    let slot = instance_fields.iter().position(|f| *f == member.name).unwrap_or_default();
                    ops.push(Op::LdcI4(i32::try_from(slot).unwrap_or(i32::MAX)));
                    MethodRef::ctor(
                        runtime_generic(updater::UPDATABLE_FIELD_1, ty),
                        vec![TypeSig::Primitive(Primitive::I32)],
                    )
                }
                MemberKind::Property => {
                    ops.push(Op::Ldftn(MethodRef::new_instance(
                        target.clone(),
                        member.getter(),
                        Vec::new(),
                        declared.clone(),
                    )));
                    let public_setter = def
                        .properties
                        .iter()
                        .any(|p| p.name == member.name && p.setter == Some(Visibility::Public));
                    if public_setter {
                        ops.push(Op::Ldftn(MethodRef::new_instance(
                            target.clone(),
                            member.setter(),
                            vec![declared.clone()],
                            TypeSig::VOID,
                        )));
                    } else {
                        ops.push(Op::LdcI4(0));
                    }
                    let accessor = if self.is_value_type(&ty) {
                        updater::UPDATABLE_PROPERTY_1
                    } else {
                        updater::UPDATABLE_PROPERTY_OBJECT_1
                    };
                    let native = TypeSig::Primitive(Primitive::NativeInt);
                    MethodRef::ctor(runtime_generic(accessor, ty), vec![native.clone(), native])
                }
            };
            ops.push(Op::Newobj(accessor));
            ops.push(Op::Call(self.register_member.clone()));
        }
        self.members += members.len();

        if generic {
            ops.push(Op::Ret);
            let mut method = MethodDef::new(update_method_name(&r.full_name), Visibility::Public, Vec::new(), TypeSig::VOID)
                .into_static()
                .with_body(MethodBody::from_ops(ops));
            method.generic_params = def.generic_params.clone();
            self.generic_methods.push(method);
        } else {
            self.main.extend(ops);
        }
    }

    /// Update method for a closed instance of the generic type `r`
    ///
    /// Looked up in this run's output first, then in the generated type of
    /// the artifact defining `r`, then in the engine runtime.
    fn update_call(&self, r: &TypeRef, args: &[TypeSig]) -> Option<MethodRef> {
        let name = update_method_name(&r.full_name);
        let matches = |m: &MethodDef| m.name == name && m.generic_params.len() == args.len();
        let live = self.scope.live();
        let local = MethodRef::new_static(TypeSig::local(UPDATE_TYPE), name.clone(), Vec::new(), TypeSig::VOID);
        if self.generic_methods.iter().any(|m| matches(m)) {
            return Some(local.with_generic_args(args.to_vec()));
        }
        for scope in r.scope.iter().map(String::as_str).chain([ENGINE_RUNTIME]) {
            if scope == live.name {
                continue;
            }
            let Some(artifact) = self.scope.resolver().try_resolve(scope) else {
                continue;
            };
            let found = artifact
                .find_type(UPDATE_TYPE)
                .is_some_and(|ty| ty.methods.iter().any(|m| matches(m)));
            if found {
                return Some(
                    MethodRef::new_static(TypeSig::external(scope, UPDATE_TYPE), name, Vec::new(), TypeSig::VOID)
                        .with_generic_args(args.to_vec()),
                );
            }
        }
        None
    }

    /// Resolver registrations and generic instantiation calls, in discovery order
    fn add_shapes(&mut self) {
        let shapes = std::mem::take(&mut self.shapes);
        for shape in &shapes {
            match shape {
                TypeSig::Array(elem) => {
                    let resolver = runtime_generic(updater::ARRAY_UPDATE_RESOLVER_1, elem.as_ref().clone());
                    self.main.push(Op::Newobj(MethodRef::ctor(resolver, Vec::new())));
                    self.main.push(Op::Call(self.register_resolver.clone()));
                }
                TypeSig::Generic(r, args) if [system::LIST_1, system::ILIST_1].contains(&r.full_name.as_str()) => {
                    let resolver = runtime_generic(updater::LIST_UPDATE_RESOLVER_1, args[0].clone());
                    self.main.push(Op::Newobj(MethodRef::ctor(resolver, Vec::new())));
                    self.main.push(Op::Call(self.register_resolver.clone()));
                }
                TypeSig::Generic(r, args) => {
                    if let Some(call) = self.update_call(r, args) {
                        debug!(instance = %shape, "update method instantiated");
                        self.main.push(Op::Call(call));
                    }
                }
                _ => {}
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.main.is_empty() && self.generic_methods.is_empty()
    }
}

impl Stage for UpdateEngineStage {
    fn name(&self) -> &'static str {
        "update-engine"
    }

    fn access(&self) -> Access {
        Access::new(Facts::REFERENCES, Facts::INITIALIZERS)
    }

    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        if !reaches(&ctx.artifact, ENGINE_RUNTIME, &ctx.resolver) {
            return self.grant_runtime_serializers(ctx);
        }
        if ctx.artifact.find_type(UPDATE_TYPE).is_some() {
            debug!(artifact = %ctx.artifact.name, "update engine code already generated");
            return Ok(false);
        }
        let runtime = ctx.resolver.resolve(ENGINE_RUNTIME)?;
        if runtime.find_type(updater::UPDATE_ENGINE).is_none() {
            return Err(StageError::invariant(format!(
                "{ENGINE_RUNTIME} does not define {}",
                updater::UPDATE_ENGINE
            )));
        }
        let corlib = ctx.resolver.find_corlib(&ctx.artifact)?.name.clone();

        let (main, generic_methods, members) = {
            let scope = ctx.scope();
            let is_runtime = scope.live().name == ENGINE_RUNTIME;
            let registry = SerializableTypeRegistry::build(&scope);
            let mut plan = Plan::new(scope, &corlib);
            for entry in registry.iter() {
                let owner = match &entry.origin {
                    Origin::Local => None,
                    // the runtime registers the types of its dependencies too
                    Origin::Dependency(name) if is_runtime => Some(name.as_str()),
                    Origin::Dependency(_) => continue,
                };
                let Some(def) = plan.scope.with_type(&entry.ty, |_, def| def.clone()) else {
                    continue;
                };
                plan.add_type(&entry.ty, &def, owner);
            }
            plan.add_shapes();
            if plan.is_empty() {
                debug!(artifact = %ctx.artifact.name, "no updatable members");
                return Ok(false);
            }
            (plan.main, plan.generic_methods, plan.members)
        };

        ctx.ensure_reference(ENGINE_RUNTIME)?;
        ctx.ensure_reference(ENGINE_CORE)?;

        let mut main_ops = main;
        main_ops.push(Op::Ret);
        let mut update_main = MethodDef::new(UPDATE_MAIN, Visibility::Assembly, Vec::new(), TypeSig::VOID)
            .into_static()
            .with_body(MethodBody::from_ops(main_ops));
        update_main.attributes.push(CustomAttribute::new(
            TypeRef::external(ENGINE_CORE, KnownAttribute::ModuleInitializer.full_name()),
            Vec::new(),
        ));

        let mut ty = TypeDef::new("", UPDATE_TYPE, Visibility::Public).with_base(TypeSig::external(corlib, system::OBJECT));
        ty.methods.push(update_main);
        ty.methods.extend(generic_methods);
        ctx.artifact.types.push(ty);
        ctx.info(&format!("registered {members} updatable member(s) with the update engine"));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests::context_with;
    use asmproc_artifact::{AttrValue, FieldDef};
    use asmproc_test_utils::{
        add_property, attribute, corlib, data_contract, engine_core, engine_rendering, engine_runtime, generic, prim,
        struct_type, CORLIB,
    };
    use pretty_assertions::assert_eq;

    fn runtime_context() -> ProcessorContext {
        let (mut ctx, _) = context_with(vec![corlib(), engine_core(), engine_rendering(), engine_runtime()]);
        ctx.artifact.references.push(engine_runtime().as_reference());
        ctx.resolver.register(std::sync::Arc::new(ctx.artifact.clone()));
        ctx
    }

    fn player() -> TypeDef {
        let mut player = data_contract("Game.Player");
        player
            .fields
            .push(FieldDef::new("Cache", prim(Primitive::I32), Visibility::Public).into_static());
        player
            .fields
            .push(FieldDef::new("Health", prim(Primitive::F32), Visibility::Public));
        add_property(
            &mut player,
            "Name",
            prim(Primitive::String),
            Some(Visibility::Public),
            Some(Visibility::Public),
        );
        player
    }

    fn method<'a>(ctx: &'a ProcessorContext, name: &'a str) -> &'a MethodDef {
        ctx.artifact
            .find_type(UPDATE_TYPE)
            .and_then(|ty| ty.methods_named(name).next())
            .unwrap()
    }

    fn ops(method: &MethodDef) -> Vec<Op> {
        method.body.as_ref().unwrap().instructions.iter().map(|i| i.op.clone()).collect()
    }

    fn mnemonics(method: &MethodDef) -> Vec<&'static str> {
        method.body.as_ref().unwrap().instructions.iter().map(|i| i.op.mnemonic()).collect()
    }

    #[test]
    fn update_method_names_flatten_namespace() {
        assert_eq!(update_method_name("Game.Box`1"), "UpdateGeneric_Game_Box");
        assert_eq!(update_method_name("Game.Outer/Inner`2"), "UpdateGeneric_Game_Outer_Inner");
    }

    #[test]
    fn members_registered_from_module_initializer() {
        let mut ctx = runtime_context();
        ctx.artifact.types.push(player());

        assert!(UpdateEngineStage::default().process(&mut ctx).unwrap());
        let main = method(&ctx, UPDATE_MAIN);
        assert!(main.is_static);
        assert!(main.attributes[0].is(KnownAttribute::ModuleInitializer));
        assert_eq!(
            mnemonics(main),
            vec![
                "ldtoken", "ldstr", "ldc.i4", "newobj", "call", //
                "ldtoken", "ldstr", "ldftn", "ldftn", "newobj", "call", //
                "ret",
            ]
        );
        let ops = ops(main);
        assert_eq!(ops[1], Op::Ldstr("Health".into()));
        // the static field does not take a slot
        assert_eq!(ops[2], Op::LdcI4(0));
        let Op::Newobj(field) = &ops[3] else { panic!("expected newobj") };
        assert_eq!(field.declaring, runtime_generic(updater::UPDATABLE_FIELD_1, prim(Primitive::F32)));
        let Op::Newobj(property) = &ops[9] else { panic!("expected newobj") };
        assert_eq!(
            property.declaring,
            runtime_generic(updater::UPDATABLE_PROPERTY_OBJECT_1, prim(Primitive::String))
        );
    }

    #[test]
    fn value_type_property_and_missing_setter() {
        let mut ctx = runtime_context();
        let mut vector = struct_type("Game.Vector");
        vector.attributes.push(attribute(KnownAttribute::DataContract));
        ctx.artifact.types.push(vector);
        let mut camera = data_contract("Game.Camera");
        add_property(
            &mut camera,
            "Position",
            TypeSig::local("Game.Vector"),
            Some(Visibility::Public),
            Some(Visibility::Assembly),
        );
        ctx.artifact.types.push(camera);

        assert!(UpdateEngineStage::default().process(&mut ctx).unwrap());
        let ops = ops(method(&ctx, UPDATE_MAIN));
        assert_eq!(ops[3], Op::LdcI4(0));
        let Op::Newobj(property) = &ops[4] else { panic!("expected newobj") };
        assert_eq!(
            property.declaring,
            runtime_generic(updater::UPDATABLE_PROPERTY_1, TypeSig::local("Game.Vector"))
        );
    }

    #[test]
    fn generic_types_get_update_methods_called_per_instance() {
        let mut ctx = runtime_context();
        let mut boxed = generic(data_contract("Game.Box`1"), &["T"]);
        boxed
            .fields
            .push(FieldDef::new("Value", TypeSig::Param("T".into()), Visibility::Public));
        ctx.artifact.types.push(boxed);
        let int_box = TypeSig::generic(TypeRef::local("Game.Box`1"), vec![prim(Primitive::I32)]);
        let list = TypeSig::generic(TypeRef::external(CORLIB, system::LIST_1), vec![prim(Primitive::F32)]);
        let mut inventory = data_contract("Game.Inventory");
        inventory.fields.push(FieldDef::new("Count", int_box, Visibility::Public));
        inventory.fields.push(FieldDef::new("Weights", list, Visibility::Public));
        inventory
            .fields
            .push(FieldDef::new("Slots", prim(Primitive::I32).array_of(), Visibility::Public));
        ctx.artifact.types.push(inventory);

        assert!(UpdateEngineStage::default().process(&mut ctx).unwrap());
        let update = method(&ctx, "UpdateGeneric_Game_Box");
        assert_eq!(update.generic_params, vec!["T".to_string()]);
        let ops_generic = ops(update);
        assert_eq!(
            ops_generic[0],
            Op::Ldtoken(TypeSig::generic(TypeRef::local("Game.Box`1"), vec![TypeSig::MethodParam("T".into())]))
        );

        let main = ops(method(&ctx, UPDATE_MAIN));
        let calls: Vec<String> = main
            .iter()
            .filter_map(|op| match op {
                Op::Call(m) if m.name != "RegisterMember" => Some(m.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            calls,
            vec!["UpdateGeneric_Game_Box", "RegisterMemberResolver", "RegisterMemberResolver"]
        );
        let instance = main
            .iter()
            .find_map(|op| match op {
                Op::Call(m) if m.name == "UpdateGeneric_Game_Box" => Some(m.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(instance.generic_args, vec![prim(Primitive::I32)]);
        assert!(main.contains(&Op::Newobj(MethodRef::ctor(
            runtime_generic(updater::LIST_UPDATE_RESOLVER_1, prim(Primitive::F32)),
            Vec::new()
        ))));
        assert!(main.contains(&Op::Newobj(MethodRef::ctor(
            runtime_generic(updater::ARRAY_UPDATE_RESOLVER_1, prim(Primitive::I32)),
            Vec::new()
        ))));
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut ctx = runtime_context();
        ctx.artifact.types.push(player());
        assert!(UpdateEngineStage::default().process(&mut ctx).unwrap());
        assert!(!UpdateEngineStage::default().process(&mut ctx).unwrap());
        assert_eq!(ctx.artifact.type_names().iter().filter(|n| *n == UPDATE_TYPE).count(), 1);
    }

    #[test]
    fn nothing_updatable_leaves_artifact_alone() {
        let mut ctx = runtime_context();
        assert!(!UpdateEngineStage::default().process(&mut ctx).unwrap());
        assert!(ctx.artifact.find_type(UPDATE_TYPE).is_none());
    }

    #[test]
    fn artifact_outside_the_runtime_graph_is_untouched() {
        let (mut ctx, _) = context_with(vec![corlib(), engine_core(), engine_runtime()]);
        ctx.artifact.types.push(player());
        assert!(!UpdateEngineStage::default().process(&mut ctx).unwrap());
        assert!(ctx.artifact.find_type(UPDATE_TYPE).is_none());
        assert!(ctx.artifact.attributes.is_empty());
    }

    #[test]
    fn runtime_dependency_grants_runtime_serializers() {
        let (mut ctx, _) = context_with(vec![corlib(), engine_core(), engine_runtime()]);
        ctx.artifact = engine_core();
        ctx.resolver.register(std::sync::Arc::new(ctx.artifact.clone()));

        assert!(UpdateEngineStage::default().process(&mut ctx).unwrap());
        let grants: Vec<&str> = ctx
            .artifact
            .attributes
            .iter()
            .filter(|a| a.is(KnownAttribute::InternalsVisibleTo))
            .filter_map(|a| a.args.first().and_then(AttrValue::as_str))
            .collect();
        assert_eq!(grants, vec!["Engine.Runtime.Serializers"]);
        assert!(!UpdateEngineStage::default().process(&mut ctx).unwrap());
    }

    #[test]
    fn signed_runtime_dependency_needs_a_key() {
        let (mut ctx, _) = context_with(vec![corlib(), engine_core(), engine_runtime()]);
        ctx.artifact = engine_core();
        ctx.artifact.public_key = Some(vec![0xab; 4]);
        let err = UpdateEngineStage::default().process(&mut ctx).unwrap_err();
        assert!(matches!(err, StageError::MissingSignKey(name) if name == ENGINE_CORE));
    }
}
