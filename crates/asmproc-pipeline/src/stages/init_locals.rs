use crate::context::ProcessorContext;
use crate::error::StageError;
use crate::stage::Stage;
use asmproc_artifact::{AttributeList, KnownAttribute, TypeDef};
use tracing::debug;

/// Clears the zero-initialization flag on methods tagged
/// `[RemoveInitLocals]`, directly or through their declaring type
#[derive(Debug, Clone, Copy, Default)]
pub struct InitLocalsStage;

impl Stage for InitLocalsStage {
    fn name(&self) -> &'static str {
        "init-locals"
    }

    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        let mut changed = false;
        for ty in &mut ctx.artifact.types {
            changed |= clear_flags(ty, "")?;
        }
        Ok(changed)
    }
}

fn clear_flags(ty: &mut TypeDef, outer: &str) -> Result<bool, StageError> {
    let full_name = if outer.is_empty() {
        ty.top_level_name()
    } else {
        format!("{outer}/{}", ty.name)
    };
    let whole_type = ty.has_attribute(KnownAttribute::RemoveInitLocals);
    let mut changed = false;

    for method in &mut ty.methods {
        if !whole_type && !method.attributes.has_known(KnownAttribute::RemoveInitLocals) {
            continue;
        }
        let key = method.key(&full_name);
        let body = method.body.as_mut().ok_or_else(|| {
            StageError::invariant(format!("method {key} has no body to clear local initialization on"))
        })?;
        if body.init_locals {
            body.init_locals = false;
            debug!(method = %key, "local initialization removed");
            changed = true;
        }
    }
    for nested in &mut ty.nested {
        changed |= clear_flags(nested, &full_name)?;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests::{body, context};
    use asmproc_artifact::{Op, TypeSig};
    use asmproc_test_utils::{attribute, class, method};

    fn tagged(name: &str) -> asmproc_artifact::MethodDef {
        let mut m = method(name, Vec::new(), TypeSig::VOID).with_body(body(vec![Op::Ret]));
        m.attributes.push(attribute(KnownAttribute::RemoveInitLocals));
        m
    }

    #[test]
    fn tagged_methods_cleared() {
        let mut ctx = context();
        let mut ty = class("Game.Math");
        ty.methods.push(tagged("Fast"));
        ty.methods
            .push(method("Slow", Vec::new(), TypeSig::VOID).with_body(body(vec![Op::Ret])));
        ctx.artifact.types.push(ty);

        assert!(InitLocalsStage.process(&mut ctx).unwrap());
        let ty = ctx.artifact.find_type("Game.Math").unwrap();
        assert!(!ty.methods[0].body.as_ref().unwrap().init_locals);
        assert!(ty.methods[1].body.as_ref().unwrap().init_locals);
        assert!(!InitLocalsStage.process(&mut ctx).unwrap());
    }

    #[test]
    fn type_attribute_covers_all_methods() {
        let mut ctx = context();
        let mut ty = class("Game.Math");
        ty.attributes.push(attribute(KnownAttribute::RemoveInitLocals));
        ty.methods
            .push(method("A", Vec::new(), TypeSig::VOID).with_body(body(vec![Op::Ret])));
        ctx.artifact.types.push(ty);

        assert!(InitLocalsStage.process(&mut ctx).unwrap());
        let ty = ctx.artifact.find_type("Game.Math").unwrap();
        assert!(!ty.methods[0].body.as_ref().unwrap().init_locals);
    }

    #[test]
    fn bodyless_method_is_an_error() {
        let mut ctx = context();
        let mut ty = class("Game.Native");
        let mut m = method("Extern", Vec::new(), TypeSig::VOID);
        m.attributes.push(attribute(KnownAttribute::RemoveInitLocals));
        ty.methods.push(m);
        ctx.artifact.types.push(ty);

        let err = InitLocalsStage.process(&mut ctx).unwrap_err();
        assert!(matches!(err, StageError::InvariantViolation(m) if m.contains("Game.Native::Extern")));
    }
}
