use crate::context::ProcessorContext;
use crate::error::StageError;
use crate::stage::{Access, Facts, Stage};
use asmproc_artifact::{Artifact, AttrValue, AttributeList, KnownAttribute, MethodRef, Op, TypeSig};
use tracing::debug;

/// Calls every `[ModuleInitializer]` method from the module static
/// constructor
///
/// Calls are ordered by the attribute's optional `order` argument, then by
/// declaration order. A method already called from the module constructor is
/// not called twice, so running the stage again is a no-op. Calls to local
/// static methods that no longer exist are dropped, so removing an
/// initializer and running again leaves one call fewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleInitializerStage;

impl ModuleInitializerStage {
    /// Initializer calls in execution order
    fn collect(ctx: &ProcessorContext) -> Result<Vec<MethodRef>, StageError> {
        let mut found: Vec<(i64, MethodRef)> = Vec::new();
        for (owner, ty) in ctx.artifact.walk_types() {
            for method in &ty.methods {
                let Some(attr) = method.attributes.find_known(KnownAttribute::ModuleInitializer) else {
                    continue;
                };
                let key = method.key(&owner);
                if !method.is_static || !method.params.is_empty() {
                    return Err(StageError::invariant(format!(
                        "module initializer {key} must be static and parameterless"
                    )));
                }
                if !ty.generic_params.is_empty() || !method.generic_params.is_empty() {
                    return Err(StageError::invariant(format!(
                        "module initializer {key} cannot be generic or declared on a generic type"
                    )));
                }
                let order = attr.args.first().and_then(AttrValue::as_int).unwrap_or(0);
                found.push((
                    order,
                    MethodRef::new_static(TypeSig::local(owner.clone()), method.name.clone(), Vec::new(), method.ret.clone()),
                ));
            }
        }
        found.sort_by_key(|(order, _)| *order);
        Ok(found.into_iter().map(|(_, m)| m).collect())
    }

    /// Call to a parameterless static method of this artifact that is gone
    fn is_dangling(artifact: &Artifact, m: &MethodRef) -> bool {
        let Some(owner) = m.declaring.type_ref() else {
            return false;
        };
        if owner.scope.as_deref().is_some_and(|s| s != artifact.name) || m.has_this || !m.params.is_empty() {
            return false;
        }
        artifact.find_type(&owner.full_name).map_or(true, |ty| {
            !ty.methods_named(&m.name).any(|d| d.is_static && d.params.is_empty())
        })
    }

    /// Remove dangling calls from the module constructor; returns how many
    fn drop_stale_calls(ctx: &mut ProcessorContext) -> usize {
        let artifact = &ctx.artifact;
        let stale: Vec<usize> = artifact
            .module_type()
            .and_then(|module| module.cctor())
            .and_then(|cctor| cctor.body.as_ref())
            .map(|body| {
                body.instructions
                    .iter()
                    .enumerate()
                    .filter_map(|(index, i)| match &i.op {
                        Op::Call(m) if Self::is_dangling(artifact, m) => Some(index),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if stale.is_empty() {
            return 0;
        }
        let Some(body) = ctx.artifact.module_type_mut().cctor_mut_or_insert().body.as_mut() else {
            return 0;
        };
        for index in stale.iter().rev() {
            if let Op::Call(m) = body.remove(*index) {
                debug!(initializer = %m, "stale module initializer call removed");
            }
        }
        body.max_stack = body.compute_max_stack();
        stale.len()
    }
}

impl Stage for ModuleInitializerStage {
    fn name(&self) -> &'static str {
        "module-initializer"
    }

    fn access(&self) -> Access {
        Access::new(Facts::INITIALIZERS, Facts::NONE)
    }

    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        let initializers = Self::collect(ctx)?;
        let removed = Self::drop_stale_calls(ctx);
        let existing: Vec<&MethodRef> = ctx
            .artifact
            .module_type()
            .and_then(|module| module.cctor())
            .and_then(|cctor| cctor.body.as_ref())
            .map(|body| {
                body.instructions
                    .iter()
                    .filter_map(|i| match &i.op {
                        Op::Call(m) => Some(m),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let calls: Vec<Op> = initializers
            .iter()
            .filter(|m| !existing.contains(m))
            .cloned()
            .map(Op::Call)
            .collect();
        if calls.is_empty() {
            return Ok(removed > 0);
        }
        for call in &calls {
            if let Some(m) = call.method() {
                debug!(initializer = %m, "module initializer registered");
            }
        }

        let cctor = ctx.artifact.module_type_mut().cctor_mut_or_insert();
        let body = cctor
            .body
            .as_mut()
            .ok_or_else(|| StageError::invariant("module static constructor has no body"))?;
        let ret = body
            .last_ret()
            .ok_or_else(|| StageError::invariant("module static constructor does not return"))?;
        body.insert_before(ret, calls);
        body.max_stack = body.compute_max_stack();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests::{body, context};
    use asmproc_artifact::known::MODULE_TYPE;
    use asmproc_test_utils::{class, generic, module_initializer, param, prim, static_method};
    use asmproc_artifact::Primitive;
    use pretty_assertions::assert_eq;

    fn initializer(name: &str, order: Option<i64>) -> asmproc_artifact::MethodDef {
        let mut m = static_method(name, Vec::new(), TypeSig::VOID).with_body(body(vec![Op::Ret]));
        m.attributes.push(module_initializer(order));
        m
    }

    fn called(ctx: &ProcessorContext) -> Vec<String> {
        ctx.artifact
            .find_type(MODULE_TYPE)
            .and_then(|m| m.cctor())
            .and_then(|c| c.body.as_ref())
            .map(|b| {
                b.instructions
                    .iter()
                    .filter_map(|i| i.op.method())
                    .map(|m| format!("{}::{}", m.declaring, m.name))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn calls_ordered_then_declared() {
        let mut ctx = context();
        let mut a = class("Game.A");
        a.methods.push(initializer("Late", Some(10)));
        a.methods.push(initializer("First", None));
        let mut b = class("Game.B");
        b.methods.push(initializer("Early", Some(-1)));
        b.methods.push(initializer("Second", None));
        ctx.artifact.types.push(a);
        ctx.artifact.types.push(b);

        assert!(ModuleInitializerStage.process(&mut ctx).unwrap());
        assert_eq!(
            called(&ctx),
            vec!["Game.B::Early", "Game.A::First", "Game.B::Second", "Game.A::Late"]
        );
        let body = ctx.artifact.find_type(MODULE_TYPE).unwrap().cctor().unwrap().body.as_ref().unwrap();
        assert!(matches!(body.instructions.last().map(|i| &i.op), Some(Op::Ret)));
    }

    #[test]
    fn second_run_adds_nothing() {
        let mut ctx = context();
        let mut a = class("Game.A");
        a.methods.push(initializer("Init", None));
        ctx.artifact.types.push(a);

        assert!(ModuleInitializerStage.process(&mut ctx).unwrap());
        assert!(!ModuleInitializerStage.process(&mut ctx).unwrap());
        assert_eq!(called(&ctx).len(), 1);
    }

    #[test]
    fn removed_initializer_drops_its_call_on_rerun() {
        let mut ctx = context();
        let mut a = class("Game.A");
        a.methods.push(initializer("Input", Some(1)));
        a.methods.push(initializer("Physics", Some(2)));
        a.methods.push(initializer("Audio", Some(3)));
        ctx.artifact.types.push(a);
        let module = ctx.artifact.module_type_mut();
        module.cctor_mut_or_insert().body = Some(body(vec![Op::Nop, Op::Ret]));

        assert!(ModuleInitializerStage.process(&mut ctx).unwrap());
        assert_eq!(called(&ctx).len(), 3);

        let a = ctx.artifact.find_type_mut("Game.A").unwrap();
        a.methods.retain(|m| m.name != "Physics");
        assert!(ModuleInitializerStage.process(&mut ctx).unwrap());
        assert_eq!(called(&ctx), vec!["Game.A::Input", "Game.A::Audio"]);

        let body = ctx.artifact.module_type().unwrap().cctor().unwrap().body.as_ref().unwrap();
        let mnemonics: Vec<&str> = body.instructions.iter().map(|i| i.op.mnemonic()).collect();
        assert_eq!(mnemonics, vec!["nop", "call", "call", "ret"]);
        assert!(!ModuleInitializerStage.process(&mut ctx).unwrap());
    }

    #[test]
    fn calls_into_other_artifacts_are_kept() {
        let mut ctx = context();
        let external = MethodRef::new_static(
            TypeSig::Named(asmproc_artifact::TypeRef::external("Engine.Core", "Engine.Core.Missing")),
            "Init",
            Vec::new(),
            TypeSig::VOID,
        );
        let module = ctx.artifact.module_type_mut();
        module.cctor_mut_or_insert().body = Some(body(vec![Op::Call(external), Op::Ret]));

        assert!(!ModuleInitializerStage.process(&mut ctx).unwrap());
        assert_eq!(called(&ctx), vec!["[Engine.Core]Engine.Core.Missing::Init"]);
    }

    #[test]
    fn no_initializers_leaves_module_alone() {
        let mut ctx = context();
        assert!(!ModuleInitializerStage.process(&mut ctx).unwrap());
        assert!(ctx.artifact.find_type(MODULE_TYPE).unwrap().cctor().is_none());
    }

    #[test]
    fn existing_module_code_runs_first() {
        let mut ctx = context();
        let mut a = class("Game.A");
        a.methods.push(initializer("Init", None));
        ctx.artifact.types.push(a);
        let module = ctx.artifact.module_type_mut();
        module.cctor_mut_or_insert().body = Some(body(vec![Op::Nop, Op::Ret]));

        assert!(ModuleInitializerStage.process(&mut ctx).unwrap());
        let body = ctx.artifact.module_type().unwrap().cctor().unwrap().body.as_ref().unwrap();
        let mnemonics: Vec<&str> = body.instructions.iter().map(|i| i.op.mnemonic()).collect();
        assert_eq!(mnemonics, vec!["nop", "call", "ret"]);
    }

    #[test]
    fn instance_or_parameterized_initializer_rejected() {
        let mut ctx = context();
        let mut a = class("Game.A");
        let mut bad = static_method("Init", vec![param("x", prim(Primitive::I32))], TypeSig::VOID);
        bad.attributes.push(module_initializer(None));
        a.methods.push(bad);
        ctx.artifact.types.push(a);
        let err = ModuleInitializerStage.process(&mut ctx).unwrap_err();
        assert!(matches!(err, StageError::InvariantViolation(m) if m.contains("parameterless")));
    }

    #[test]
    fn generic_owner_rejected() {
        let mut ctx = context();
        let mut g = generic(class("Game.Cache`1"), &["T"]);
        g.methods.push(initializer("Init", None));
        ctx.artifact.types.push(g);
        let err = ModuleInitializerStage.process(&mut ctx).unwrap_err();
        assert!(matches!(err, StageError::InvariantViolation(m) if m.contains("generic")));
    }
}
