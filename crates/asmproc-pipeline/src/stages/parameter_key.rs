use crate::context::ProcessorContext;
use crate::error::StageError;
use crate::stage::{Access, Facts, Stage};
use asmproc_artifact::known::{engine, rendering, system, ENGINE_CORE, ENGINE_RENDERING};
use asmproc_artifact::{CustomAttribute, FieldRef, MethodBody, MethodDef, MethodRef, Op, TypeDef, TypeRef, TypeSig, Visibility};
use tracing::debug;

/// Name of the generated type, placed in the artifact's root namespace
pub const INITIALIZER_TYPE: &str = "ParameterKeysInitializer";

/// Registers statically assigned parameter keys with the rendering engine
///
/// Every static field of the parameter key family assigned in its type's
/// static constructor gets merged through `ParameterKeys.Merge`, which
/// names the key after its owner and field. The merge code runs from a
/// generated module initializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterKeyStage;

/// Static key field assigned in a type initializer
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyField {
    owner: String,
    field: FieldRef,
}

fn is_parameter_key(sig: &TypeSig) -> bool {
    sig.type_ref().is_some_and(|r| {
        r.scope.as_deref() == Some(ENGINE_RENDERING)
            && (r.full_name == rendering::PARAMETER_KEY || rendering::KEY_FAMILY.contains(&r.full_name.as_str()))
    })
}

fn key_fields(ctx: &ProcessorContext) -> Vec<KeyField> {
    let mut found: Vec<KeyField> = Vec::new();
    for (owner, ty) in ctx.artifact.walk_types() {
        if !ty.generic_params.is_empty() {
            continue;
        }
        let Some(body) = ty.cctor().and_then(|c| c.body.as_ref()) else {
            continue;
        };
        let own = TypeSig::local(owner.clone());
        for ins in &body.instructions {
            let Op::Stsfld(field) = &ins.op else {
                continue;
            };
            let declared = ty.field(&field.name).is_some_and(|f| f.is_static);
            if field.declaring != own || !declared || !is_parameter_key(&field.ty) {
                continue;
            }
            let key = KeyField {
                owner: owner.clone(),
                field: field.clone(),
            };
            if !found.contains(&key) {
                found.push(key);
            }
        }
    }
    found
}

impl Stage for ParameterKeyStage {
    fn name(&self) -> &'static str {
        "parameter-key"
    }

    fn access(&self) -> Access {
        Access::new(Facts::REFERENCES, Facts::INITIALIZERS)
    }

    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        let keys = key_fields(ctx);
        if keys.is_empty() {
            return Ok(false);
        }
        let generated = format!("{}.{INITIALIZER_TYPE}", ctx.artifact.name);
        if ctx.artifact.find_type(&generated).is_some() {
            return Ok(false);
        }
        // Key fields typed against the rendering library should imply it
        // resolves. When it does not, skip registration instead of failing
        // the build; whether this deserves a hard error is still undecided.
        if ctx.resolver.try_resolve(ENGINE_RENDERING).is_none() {
            ctx.warn(&format!(
                "{ENGINE_RENDERING} could not be resolved, parameter keys are not registered"
            ));
            return Ok(false);
        }
        ctx.ensure_reference(ENGINE_RENDERING)?;
        ctx.ensure_reference(ENGINE_CORE)?;
        let corlib = ctx
            .corlib_name()
            .ok_or_else(|| StageError::invariant("missing corlib"))?
            .to_string();

        let key_sig = TypeSig::external(ENGINE_RENDERING, rendering::PARAMETER_KEY);
        let merge = MethodRef::new_static(
            TypeSig::external(ENGINE_RENDERING, rendering::PARAMETER_KEYS),
            "Merge",
            vec![
                key_sig.clone(),
                TypeSig::external(corlib.as_str(), system::RUNTIME_TYPE_HANDLE),
                TypeSig::Primitive(asmproc_artifact::Primitive::String),
            ],
            key_sig,
        );

        let mut ops = Vec::with_capacity(keys.len() * 6 + 1);
        for key in &keys {
            debug!(owner = %key.owner, field = %key.field.name, "parameter key registered");
            ops.push(Op::Ldsfld(key.field.clone()));
            ops.push(Op::Ldtoken(TypeSig::local(key.owner.clone())));
            ops.push(Op::Ldstr(format!("{}.{}", key.owner.replace('/', "."), key.field.name)));
            ops.push(Op::Call(merge.clone()));
            ops.push(Op::Castclass(key.field.ty.clone()));
            ops.push(Op::Stsfld(key.field.clone()));
        }
        ops.push(Op::Ret);

        let mut initialize = MethodDef::new("Initialize", Visibility::Assembly, Vec::new(), TypeSig::VOID)
            .into_static()
            .with_body(MethodBody::from_ops(ops));
        initialize.attributes.push(CustomAttribute::new(
            TypeRef::external(ENGINE_CORE, engine::MODULE_INITIALIZER),
            Vec::new(),
        ));

        let mut ty = TypeDef::new(ctx.artifact.name.clone(), INITIALIZER_TYPE, Visibility::Assembly)
            .with_base(TypeSig::external(corlib, system::OBJECT));
        ty.is_abstract = true;
        ty.is_sealed = true;
        ty.methods.push(initialize);
        ctx.artifact.types.push(ty);
        ctx.info(&format!("registered {} parameter key(s)", keys.len()));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Level;
    use crate::stages::tests::{body, context, context_with};
    use asmproc_artifact::{FieldDef, KnownAttribute};
    use asmproc_test_utils::{class, corlib, engine_core, rendering_type};
    use pretty_assertions::assert_eq;

    fn material(ctx: &mut ProcessorContext) {
        let key_ty = TypeSig::generic(
            TypeRef::external(ENGINE_RENDERING, rendering::KEY_FAMILY[1]),
            vec![TypeSig::Primitive(asmproc_artifact::Primitive::F32)],
        );
        let field = FieldRef::new(TypeSig::local("Game.MaterialKeys"), "Roughness", key_ty.clone());
        let mut ty = class("Game.MaterialKeys");
        ty.fields
            .push(FieldDef::new("Roughness", key_ty.clone(), Visibility::Public).into_static());
        ty.fields
            .push(FieldDef::new("Name", rendering_type(rendering::PARAMETER_KEY), Visibility::Public));
        ty.cctor_mut_or_insert().body = Some(body(vec![
            Op::Newobj(MethodRef::ctor(key_ty, Vec::new())),
            Op::Stsfld(field),
            Op::Ret,
        ]));
        ctx.artifact.types.push(ty);
    }

    #[test]
    fn assigned_keys_merged_in_module_initializer() {
        let mut ctx = context();
        material(&mut ctx);

        assert!(ParameterKeyStage.process(&mut ctx).unwrap());
        let generated = ctx.artifact.find_type("Game.ParameterKeysInitializer").unwrap();
        let init = &generated.methods[0];
        assert!(init.is_static);
        assert!(init.attributes[0].is(KnownAttribute::ModuleInitializer));
        let mnemonics: Vec<&str> = init
            .body
            .as_ref()
            .unwrap()
            .instructions
            .iter()
            .map(|i| i.op.mnemonic())
            .collect();
        assert_eq!(
            mnemonics,
            vec!["ldsfld", "ldtoken", "ldstr", "call", "castclass", "stsfld", "ret"]
        );
        let ops = &init.body.as_ref().unwrap().instructions;
        assert_eq!(ops[2].op, Op::Ldstr("Game.MaterialKeys.Roughness".into()));
        assert!(ctx.artifact.reference(ENGINE_RENDERING).is_some());
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut ctx = context();
        material(&mut ctx);
        assert!(ParameterKeyStage.process(&mut ctx).unwrap());
        assert!(!ParameterKeyStage.process(&mut ctx).unwrap());
    }

    #[test]
    fn no_keys_no_change() {
        let mut ctx = context();
        assert!(!ParameterKeyStage.process(&mut ctx).unwrap());
        assert!(ctx.artifact.find_type("Game.ParameterKeysInitializer").is_none());
    }

    #[test]
    fn missing_rendering_library_only_warns() {
        let (mut ctx, sink) = context_with(vec![corlib(), engine_core()]);
        material(&mut ctx);

        assert!(!ParameterKeyStage.process(&mut ctx).unwrap());
        assert!(sink.contains(Level::Warn, ENGINE_RENDERING));
        assert!(ctx.artifact.find_type("Game.ParameterKeysInitializer").is_none());
    }
}
