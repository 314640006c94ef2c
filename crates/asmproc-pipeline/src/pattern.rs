//! Call-site shape recognition for dispatcher closure pooling
//!
//! A pooling candidate is a call to `Dispatcher.ForEach` whose delegate
//! argument wraps a lambda hosted on a compiler-generated closure class that
//! was freshly allocated into a local:
//!
//! ```text
//! newobj   Closure::.ctor()          <- alloc
//! stloc    n
//! ...
//! ldloc    n
//! ldftn    Closure::Lambda
//! newobj   Action`1<T>::.ctor(object, native int)
//! call     Dispatcher::ForEach<T>(...)
//! ```
//!
//! After rewriting, the allocation becomes a pool acquire and the delegate is
//! read from a field cached on the closure, which the matcher reports as
//! [`SiteMatch::AlreadyPooled`].

use asmproc_artifact::known::{engine, ENGINE_CORE};
use asmproc_artifact::{MethodBody, MethodRef, Op, TypeRef, TypeSig};

/// Cached delegate field added to pooled closures
pub const DELEGATE_FIELD: &str = "<delegate>";

/// Static pool field added to pooled closures
pub const POOL_FIELD: &str = "<pool>";

/// Factory method the pool uses to create closure instances
pub const CREATE_ITEM_METHOD: &str = "<CreatePoolItem>";

/// Pool method that replaces the closure allocation
pub const ACQUIRE_METHOD: &str = "Acquire";

/// Pool method called once the dispatcher is done with the closure
pub const RELEASE_METHOD: &str = "Release";

/// Rewritable call site; indices point into the method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSite {
    /// `call Dispatcher::ForEach`
    pub call: usize,
    /// `newobj` of the delegate
    pub delegate_ctor: usize,
    /// `ldftn` of the lambda
    pub ldftn: usize,
    /// `newobj` of the closure
    pub alloc: usize,
    /// Local holding the closure
    pub local: u16,
    /// Closure type as instantiated at the call site
    pub closure: TypeSig,
    pub lambda: MethodRef,
    pub delegate: MethodRef,
}

/// Outcome of matching one dispatcher call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteMatch {
    Rewrite(PoolSite),
    AlreadyPooled,
    /// The lambda captures nothing; the compiler caches its delegate
    StaticLambda,
    /// Any other shape, with the reason it was rejected
    Unrecognized(&'static str),
}

/// Whether `method` is the dispatcher's `ForEach`
#[must_use]
pub fn is_dispatcher_for_each(method: &MethodRef) -> bool {
    method.name == "ForEach"
        && method
            .declaring
            .type_ref()
            .is_some_and(|r| r.scope.as_deref() == Some(ENGINE_CORE) && r.full_name == engine::DISPATCHER)
}

/// Indices of every dispatcher `ForEach` call in `body`
#[must_use]
pub fn dispatcher_calls(body: &MethodBody) -> Vec<usize> {
    body.instructions
        .iter()
        .enumerate()
        .filter(|(_, ins)| matches!(&ins.op, Op::Call(m) if is_dispatcher_for_each(m)))
        .map(|(i, _)| i)
        .collect()
}

/// Match the call at `call` against the pooling shape
///
/// `is_local` reports whether a type is defined by the artifact being
/// processed; closures from elsewhere cannot be extended.
#[must_use]
pub fn match_site(body: &MethodBody, call: usize, is_local: impl Fn(&TypeRef) -> bool) -> SiteMatch {
    let op = |i: usize| body.instructions.get(i).map(|ins| &ins.op);
    let Some(delegate_ctor) = call.checked_sub(1) else {
        return SiteMatch::Unrecognized("no delegate argument before the call");
    };

    let delegate = match op(delegate_ctor) {
        Some(Op::Ldfld(field)) if field.name == DELEGATE_FIELD => return SiteMatch::AlreadyPooled,
        Some(Op::Newobj(ctor)) if ctor.params.len() == 2 => ctor.clone(),
        _ => return SiteMatch::Unrecognized("delegate is not constructed at the call site"),
    };

    let Some(ldftn) = delegate_ctor.checked_sub(1) else {
        return SiteMatch::Unrecognized("delegate target is not a method pointer");
    };
    let Some(Op::Ldftn(lambda)) = op(ldftn) else {
        return SiteMatch::Unrecognized("delegate target is not a method pointer");
    };

    let local = match ldftn.checked_sub(1).and_then(op) {
        Some(Op::Ldnull) => return SiteMatch::StaticLambda,
        Some(Op::Ldloc(n)) => *n,
        _ => return SiteMatch::Unrecognized("delegate target object is not a local"),
    };

    if !lambda.has_this || !lambda.declaring.type_ref().is_some_and(&is_local) {
        return SiteMatch::Unrecognized("lambda is not an instance method of a local closure");
    }

    let Some(store) = (0..ldftn - 1)
        .rev()
        .find(|&i| matches!(op(i), Some(Op::Stloc(n)) if *n == local))
    else {
        return SiteMatch::Unrecognized("closure local is never assigned");
    };

    match store.checked_sub(1).and_then(op) {
        Some(Op::Newobj(ctor)) if ctor.params.is_empty() && ctor.declaring == lambda.declaring => {
            SiteMatch::Rewrite(PoolSite {
                call,
                delegate_ctor,
                ldftn,
                alloc: store - 1,
                local,
                closure: lambda.declaring.clone(),
                lambda: lambda.clone(),
                delegate,
            })
        }
        Some(Op::Callvirt(m)) if m.name == ACQUIRE_METHOD => SiteMatch::AlreadyPooled,
        _ => SiteMatch::Unrecognized("closure local is not assigned a new closure"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_artifact::known::system;
    use asmproc_artifact::{FieldRef, Primitive};
    use asmproc_test_utils::CORLIB;
    use proptest::prelude::*;

    fn for_each() -> MethodRef {
        let item = TypeSig::MethodParam("T".into());
        MethodRef::new_static(
            TypeSig::external(ENGINE_CORE, engine::DISPATCHER),
            "ForEach",
            vec![
                TypeSig::generic(TypeRef::external(CORLIB, system::LIST_1), vec![item.clone()]),
                TypeSig::generic(TypeRef::external(CORLIB, system::ACTION_1), vec![item]),
            ],
            TypeSig::VOID,
        )
        .with_generic_args(vec![TypeSig::Primitive(Primitive::I32)])
    }

    fn closure() -> TypeSig {
        TypeSig::local("Game.Worker/<>c__DisplayClass0")
    }

    fn lambda() -> MethodRef {
        MethodRef::new_instance(closure(), "<Run>b__0", vec![TypeSig::Primitive(Primitive::I32)], TypeSig::VOID)
    }

    fn action_ctor() -> MethodRef {
        MethodRef::ctor(
            TypeSig::generic(
                TypeRef::external(CORLIB, system::ACTION_1),
                vec![TypeSig::Primitive(Primitive::I32)],
            ),
            vec![TypeSig::Primitive(Primitive::Object), TypeSig::Primitive(Primitive::NativeInt)],
        )
    }

    fn site_ops(padding: usize) -> Vec<Op> {
        let mut ops = vec![Op::Newobj(MethodRef::ctor(closure(), Vec::new())), Op::Stloc(0)];
        ops.extend(std::iter::repeat(Op::Nop).take(padding));
        ops.extend([
            Op::Ldarg(1),
            Op::Ldloc(0),
            Op::Ldftn(lambda()),
            Op::Newobj(action_ctor()),
            Op::Call(for_each()),
            Op::Ret,
        ]);
        ops
    }

    fn local(r: &TypeRef) -> bool {
        r.scope.is_none()
    }

    #[test]
    fn canonical_site_matches() {
        let body = MethodBody::from_ops(site_ops(0));
        assert_eq!(dispatcher_calls(&body), vec![6]);
        let SiteMatch::Rewrite(site) = match_site(&body, 6, local) else {
            panic!("expected a rewritable site");
        };
        assert_eq!((site.alloc, site.ldftn, site.delegate_ctor, site.local), (0, 4, 5, 0));
        assert_eq!(site.closure, closure());
    }

    #[test]
    fn static_lambda_recognized() {
        let body = MethodBody::from_ops(vec![
            Op::Ldarg(0),
            Op::Ldnull,
            Op::Ldftn(lambda()),
            Op::Newobj(action_ctor()),
            Op::Call(for_each()),
            Op::Ret,
        ]);
        assert_eq!(match_site(&body, 4, local), SiteMatch::StaticLambda);
    }

    #[test]
    fn cached_delegate_is_already_pooled() {
        let body = MethodBody::from_ops(vec![
            Op::Ldarg(0),
            Op::Ldloc(0),
            Op::Ldfld(FieldRef::new(closure(), DELEGATE_FIELD, action_ctor().declaring)),
            Op::Call(for_each()),
            Op::Ret,
        ]);
        assert_eq!(match_site(&body, 3, local), SiteMatch::AlreadyPooled);
    }

    #[test]
    fn foreign_closure_unrecognized() {
        let body = MethodBody::from_ops(site_ops(0));
        assert!(matches!(match_site(&body, 6, |_| false), SiteMatch::Unrecognized(_)));
    }

    #[test]
    fn delegate_from_elsewhere_unrecognized() {
        let body = MethodBody::from_ops(vec![Op::Ldarg(0), Op::Ldarg(1), Op::Call(for_each()), Op::Ret]);
        assert_eq!(
            match_site(&body, 2, local),
            SiteMatch::Unrecognized("delegate is not constructed at the call site")
        );
    }

    proptest! {
        #[test]
        fn unrelated_code_between_alloc_and_call_is_tolerated(padding in 0usize..16) {
            let body = MethodBody::from_ops(site_ops(padding));
            let call = 6 + padding;
            prop_assert!(matches!(match_site(&body, call, local), SiteMatch::Rewrite(site) if site.alloc == 0));
        }
    }
}
