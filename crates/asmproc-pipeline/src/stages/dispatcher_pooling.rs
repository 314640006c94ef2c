use crate::context::ProcessorContext;
use crate::error::StageError;
use crate::pattern::{
    dispatcher_calls, match_site, PoolSite, SiteMatch, ACQUIRE_METHOD, CREATE_ITEM_METHOD, DELEGATE_FIELD,
    POOL_FIELD, RELEASE_METHOD,
};
use crate::stage::{Access, Facts, Stage};
use asmproc_artifact::known::{engine, system, ENGINE_CORE};
use asmproc_artifact::{
    Artifact, FieldDef, FieldRef, MethodBody, MethodDef, MethodRef, Op, Primitive, TypeRef, TypeSig, Visibility,
};
use asmproc_resolver::ResolveError;
use tracing::debug;

/// Pools closures passed to `Dispatcher.ForEach`
///
/// Each rewritten call site acquires its closure from a static pool hosted
/// on the closure class, reuses a delegate cached on the closure instead of
/// allocating one per call, and releases the closure once the dispatcher
/// returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherPoolingStage;

fn pool_type(item: TypeSig) -> TypeSig {
    TypeSig::generic(TypeRef::external(ENGINE_CORE, engine::CONCURRENT_POOL_1), vec![item])
}

fn delegate_ctor_params() -> Vec<TypeSig> {
    vec![Primitive::Object.into(), Primitive::NativeInt.into()]
}

/// Express a call-site signature in terms of the closure's own generic
/// parameters
fn rebase(sig: &TypeSig, bindings: &[(TypeSig, String)]) -> TypeSig {
    if let Some((_, param)) = bindings.iter().find(|(arg, _)| arg == sig) {
        return TypeSig::Param(param.clone());
    }
    match sig {
        TypeSig::Generic(def, args) => TypeSig::Generic(def.clone(), args.iter().map(|a| rebase(a, bindings)).collect()),
        TypeSig::Array(elem) => rebase(elem, bindings).array_of(),
        other => other.clone(),
    }
}

/// Members the rewritten call site uses, as seen from the call site
struct ClosureMembers {
    delegate: FieldRef,
    pool: FieldRef,
}

/// Add the pool, cached delegate and factory to the closure class
///
/// Returns the member references for the call site. Members already added
/// by an earlier site sharing the closure are reused.
fn extend_closure(artifact: &mut Artifact, corlib: &str, site: &PoolSite) -> Result<ClosureMembers, StageError> {
    let closure_ref = site
        .closure
        .type_ref()
        .ok_or_else(|| StageError::invariant("closure is not a named type"))?
        .clone();
    let closure = artifact
        .find_type_mut(&closure_ref.full_name)
        .ok_or_else(|| StageError::invariant(format!("closure type {closure_ref} not found")))?;
    let own = closure.self_sig(&closure_ref.full_name);

    let bindings: Vec<(TypeSig, String)> = site
        .closure
        .generic_args()
        .iter()
        .cloned()
        .zip(closure.generic_params.iter().cloned())
        .collect();
    let delegate_ty = rebase(&site.delegate.declaring, &bindings);
    if has_method_param(&delegate_ty) {
        return Err(StageError::invariant(format!(
            "delegate type {} cannot be expressed on closure {closure_ref}",
            site.delegate.declaring
        )));
    }
    let pool_ty = pool_type(own.clone());

    if closure.field(POOL_FIELD).is_none() {
        debug!(closure = %closure_ref, "adding closure pool");
        closure
            .fields
            .push(FieldDef::new(DELEGATE_FIELD, delegate_ty.clone(), Visibility::Public));
        closure
            .fields
            .push(FieldDef::new(POOL_FIELD, pool_ty.clone(), Visibility::Public).into_static());

        let own_delegate = FieldRef::new(own.clone(), DELEGATE_FIELD, delegate_ty.clone());
        let own_lambda = MethodRef {
            declaring: own.clone(),
            ..site.lambda.clone()
        };
        let mut create = MethodDef::new(CREATE_ITEM_METHOD, Visibility::Private, Vec::new(), own.clone())
            .into_static()
            .with_body(MethodBody::from_ops(vec![
                Op::Newobj(MethodRef::ctor(own.clone(), Vec::new())),
                Op::Stloc(0),
                Op::Ldloc(0),
                Op::Ldloc(0),
                Op::Ldftn(own_lambda),
                Op::Newobj(MethodRef::ctor(delegate_ty.clone(), delegate_ctor_params())),
                Op::Stfld(own_delegate),
                Op::Ldloc(0),
                Op::Ret,
            ]));
        if let Some(body) = create.body.as_mut() {
            body.locals.push(own.clone());
        }
        closure.methods.push(create);

        let factory_ty = TypeSig::generic(TypeRef::external(corlib, system::FUNC_1), vec![own.clone()]);
        let init = vec![
            Op::Ldnull,
            Op::Ldftn(MethodRef::new_static(own.clone(), CREATE_ITEM_METHOD, Vec::new(), own.clone())),
            Op::Newobj(MethodRef::ctor(factory_ty, delegate_ctor_params())),
            Op::Newobj(MethodRef::ctor(
                pool_ty.clone(),
                vec![TypeSig::generic(
                    TypeRef::external(corlib, system::FUNC_1),
                    vec![TypeSig::Param("T".into())],
                )],
            )),
            Op::Stsfld(FieldRef::new(own.clone(), POOL_FIELD, pool_ty.clone())),
        ];
        let body = closure
            .cctor_mut_or_insert()
            .body
            .as_mut()
            .ok_or_else(|| StageError::invariant(format!("static constructor of {closure_ref} has no body")))?;
        let ret = body
            .last_ret()
            .ok_or_else(|| StageError::invariant(format!("static constructor of {closure_ref} does not return")))?;
        body.insert_before(ret, init);
        body.max_stack = body.compute_max_stack();
    }

    Ok(ClosureMembers {
        delegate: FieldRef::new(site.closure.clone(), DELEGATE_FIELD, delegate_ty),
        pool: FieldRef::new(site.closure.clone(), POOL_FIELD, pool_ty),
    })
}

fn has_method_param(sig: &TypeSig) -> bool {
    match sig {
        TypeSig::MethodParam(_) => true,
        TypeSig::Generic(_, args) => args.iter().any(has_method_param),
        TypeSig::Array(elem) => has_method_param(elem),
        _ => false,
    }
}

/// Rewrite one call site; edits run from the highest index down so earlier
/// indices stay valid
fn rewrite_site(body: &mut MethodBody, site: &PoolSite, members: &ClosureMembers) {
    let pool_at_site = pool_type(site.closure.clone());
    let item = TypeSig::Param("T".into());

    body.insert_after(
        site.call,
        vec![
            Op::Ldsfld(members.pool.clone()),
            Op::Ldloc(site.local),
            Op::Callvirt(MethodRef::new_instance(pool_at_site.clone(), RELEASE_METHOD, vec![item.clone()], TypeSig::VOID)),
        ],
    );
    body.replace(site.delegate_ctor, Op::Ldfld(members.delegate.clone()));
    body.remove(site.ldftn);
    body.insert_after(
        site.alloc,
        vec![Op::Callvirt(MethodRef::new_instance(pool_at_site, ACQUIRE_METHOD, Vec::new(), item))],
    );
    body.replace(site.alloc, Op::Ldsfld(members.pool.clone()));
    body.max_stack = body.compute_max_stack();
}

/// Methods containing at least one dispatcher call
fn candidates(artifact: &Artifact) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    for (owner, ty) in artifact.walk_types() {
        for (index, method) in ty.methods.iter().enumerate() {
            if method.body.as_ref().is_some_and(|b| !dispatcher_calls(b).is_empty()) {
                out.push((owner.clone(), index));
            }
        }
    }
    out
}

fn method_body<'a>(artifact: &'a Artifact, owner: &str, index: usize) -> Option<&'a MethodBody> {
    artifact.find_type(owner)?.methods.get(index)?.body.as_ref()
}

fn method_body_mut<'a>(artifact: &'a mut Artifact, owner: &str, index: usize) -> Option<&'a mut MethodBody> {
    artifact.find_type_mut(owner)?.methods.get_mut(index)?.body.as_mut()
}

impl Stage for DispatcherPoolingStage {
    fn name(&self) -> &'static str {
        "dispatcher-pooling"
    }

    fn access(&self) -> Access {
        Access::new(Facts::REFERENCES, Facts::NONE)
    }

    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        let methods = candidates(&ctx.artifact);
        if methods.is_empty() {
            return Ok(false);
        }
        let corlib = ctx.resolver.find_corlib(&ctx.artifact).map_err(|e| match e {
            ResolveError::UnresolvedReference { .. } => StageError::invariant("missing corlib"),
            other => StageError::Resolve(other),
        })?;
        let corlib = corlib.name.clone();

        let mut changed = false;
        for (owner, index) in methods {
            let key = ctx
                .artifact
                .find_type(&owner)
                .and_then(|t| t.methods.get(index))
                .map(|m| m.key(&owner))
                .unwrap_or_default();
            loop {
                let Some(body) = method_body(&ctx.artifact, &owner, index) else {
                    break;
                };
                let live = &ctx.artifact;
                let is_local = |r: &TypeRef| r.scope.is_none() && live.find_type(&r.full_name).is_some();
                let matches: Vec<SiteMatch> = dispatcher_calls(body)
                    .into_iter()
                    .map(|call| match_site(body, call, is_local))
                    .collect();

                let site = matches.iter().find_map(|m| match m {
                    SiteMatch::Rewrite(site) => Some(site.clone()),
                    _ => None,
                });
                let Some(site) = site else {
                    for m in &matches {
                        if let SiteMatch::Unrecognized(reason) = m {
                            ctx.warn(&format!("dispatcher call in {key} is not pooled: {reason}"));
                        }
                    }
                    break;
                };

                let members = extend_closure(&mut ctx.artifact, &corlib, &site)?;
                let body = method_body_mut(&mut ctx.artifact, &owner, index)
                    .ok_or_else(|| StageError::invariant(format!("method {key} lost its body")))?;
                rewrite_site(body, &site, &members);

                let live = &ctx.artifact;
                let body = method_body(live, &owner, index)
                    .ok_or_else(|| StageError::invariant(format!("method {key} lost its body")))?;
                let is_local = |r: &TypeRef| r.scope.is_none() && live.find_type(&r.full_name).is_some();
                if match_site(body, site.call, is_local) != SiteMatch::AlreadyPooled {
                    return Err(StageError::invariant(format!(
                        "dispatcher call in {key} did not reach the pooled shape"
                    )));
                }
                debug!(method = %key, closure = %site.closure, "dispatcher closure pooled");
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Level;
    use crate::stages::tests::{body, context_with_sink};
    use asmproc_artifact::TypeDef;
    use asmproc_test_utils::{class, corlib_type, ctor, generic, method, param, CORLIB};
    use pretty_assertions::assert_eq;

    const WORKER: &str = "Game.Worker";
    const CLOSURE: &str = "Game.Worker/<>c__DisplayClass0";

    fn for_each(item: TypeSig) -> MethodRef {
        let t = TypeSig::MethodParam("T".into());
        MethodRef::new_static(
            TypeSig::external(ENGINE_CORE, engine::DISPATCHER),
            "ForEach",
            vec![
                TypeSig::generic(TypeRef::external(CORLIB, system::LIST_1), vec![t.clone()]),
                TypeSig::generic(TypeRef::external(CORLIB, system::ACTION_1), vec![t]),
            ],
            TypeSig::VOID,
        )
        .with_generic_args(vec![item])
    }

    fn action(item: TypeSig) -> TypeSig {
        TypeSig::generic(TypeRef::external(CORLIB, system::ACTION_1), vec![item])
    }

    /// Worker with a nested closure whose lambda is passed to `ForEach`
    fn worker(closure_params: &[&str], closure_at_site: TypeSig, item: TypeSig) -> TypeDef {
        let mut closure = TypeDef::new("", "<>c__DisplayClass0", Visibility::Private);
        closure = generic(closure, closure_params);
        closure.base = Some(corlib_type(system::OBJECT));
        closure.methods.push(ctor(Vec::new()));
        closure
            .methods
            .push(method("<Run>b__0", vec![param("x", TypeSig::Primitive(Primitive::I32))], TypeSig::VOID));

        let lambda = MethodRef::new_instance(
            closure_at_site.clone(),
            "<Run>b__0",
            vec![TypeSig::Primitive(Primitive::I32)],
            TypeSig::VOID,
        );
        let mut run = method("Run", Vec::new(), TypeSig::VOID).with_body(body(vec![
            Op::Newobj(MethodRef::ctor(closure_at_site, Vec::new())),
            Op::Stloc(0),
            Op::Ldarg(1),
            Op::Ldloc(0),
            Op::Ldftn(lambda),
            Op::Newobj(MethodRef::ctor(action(item.clone()), delegate_ctor_params())),
            Op::Call(for_each(item)),
            Op::Ret,
        ]));
        run.generic_params = closure_params.iter().map(|p| (*p).to_string()).collect();

        let mut ty = class(WORKER);
        ty.methods.push(run);
        ty.nested.push(closure);
        ty
    }

    fn mnemonics(ctx: &ProcessorContext) -> Vec<&'static str> {
        method_body(&ctx.artifact, WORKER, 0)
            .unwrap()
            .instructions
            .iter()
            .map(|i| i.op.mnemonic())
            .collect()
    }

    #[test]
    fn call_site_rewritten_to_pool() {
        let (mut ctx, _) = context_with_sink();
        let i32_ty = TypeSig::Primitive(Primitive::I32);
        ctx.artifact
            .types
            .push(worker(&[], TypeSig::local(CLOSURE), i32_ty));

        assert!(DispatcherPoolingStage.process(&mut ctx).unwrap());
        assert_eq!(
            mnemonics(&ctx),
            vec!["ldsfld", "callvirt", "stloc", "ldarg", "ldloc", "ldfld", "call", "ldsfld", "ldloc", "callvirt", "ret"]
        );

        let closure = ctx.artifact.find_type(CLOSURE).unwrap();
        assert!(closure.field(DELEGATE_FIELD).is_some_and(|f| !f.is_static));
        assert!(closure.field(POOL_FIELD).is_some_and(|f| f.is_static));
        assert_eq!(closure.methods_named(CREATE_ITEM_METHOD).count(), 1);
        let cctor_ops: Vec<&str> = closure
            .cctor()
            .and_then(|c| c.body.as_ref())
            .unwrap()
            .instructions
            .iter()
            .map(|i| i.op.mnemonic())
            .collect();
        assert_eq!(cctor_ops, vec!["ldnull", "ldftn", "newobj", "newobj", "stsfld", "ret"]);
    }

    #[test]
    fn second_run_changes_nothing() {
        let (mut ctx, sink) = context_with_sink();
        ctx.artifact
            .types
            .push(worker(&[], TypeSig::local(CLOSURE), TypeSig::Primitive(Primitive::I32)));

        assert!(DispatcherPoolingStage.process(&mut ctx).unwrap());
        let once = ctx.artifact.clone();
        assert!(!DispatcherPoolingStage.process(&mut ctx).unwrap());
        assert_eq!(ctx.artifact, once);
        assert!(sink.at(Level::Warn).is_empty());
    }

    #[test]
    fn generic_closure_delegate_rebased() {
        let (mut ctx, _) = context_with_sink();
        let t = TypeSig::MethodParam("T".into());
        let at_site = TypeSig::generic(TypeRef::local(CLOSURE), vec![t.clone()]);
        ctx.artifact.types.push(worker(&["T"], at_site.clone(), t));

        assert!(DispatcherPoolingStage.process(&mut ctx).unwrap());
        let closure = ctx.artifact.find_type(CLOSURE).unwrap();
        assert_eq!(
            closure.field(DELEGATE_FIELD).unwrap().ty,
            action(TypeSig::Param("T".into()))
        );
        let ops = &method_body(&ctx.artifact, WORKER, 0).unwrap().instructions;
        assert_eq!(ops[0].op.field().unwrap().declaring, at_site);
    }

    #[test]
    fn unrecognized_site_warns_and_is_left_alone() {
        let (mut ctx, sink) = context_with_sink();
        let mut ty = class(WORKER);
        ty.methods.push(method("Run", Vec::new(), TypeSig::VOID).with_body(body(vec![
            Op::Ldarg(1),
            Op::Ldarg(2),
            Op::Call(for_each(TypeSig::Primitive(Primitive::I32))),
            Op::Ret,
        ])));
        ctx.artifact.types.push(ty);
        let before = ctx.artifact.clone();

        assert!(!DispatcherPoolingStage.process(&mut ctx).unwrap());
        assert_eq!(ctx.artifact, before);
        assert!(sink.contains(Level::Warn, "Game.Worker::Run()"));
    }
}
