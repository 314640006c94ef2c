//! Merging a compiled artifact into the original

use crate::error::MergeError;
use asmproc_artifact::known::MODULE_TYPE;
use asmproc_artifact::visit::rescope;
use asmproc_artifact::{Artifact, TypeDef};
use tracing::{debug, info};

/// Fold `compiled` into a copy of `original`
///
/// The result keeps the original's identity (name, version, kind,
/// characteristics, signing state, symbols and location). References from the
/// compiled code to the original become local, its types are appended, its
/// module-level members join the original `<Module>`, and references and
/// artifact attributes are unioned. Every method body gets fresh offsets.
///
/// # Errors
/// - [`MergeError::DuplicateType`] if a compiled type already exists
/// - [`MergeError::DuplicateMember`] if a module-level member collides
pub fn merge(original: &Artifact, compiled: &Artifact) -> Result<Artifact, MergeError> {
    let mut incoming = compiled.clone();
    rescope(&mut incoming, Some(&original.name), None);
    rescope(&mut incoming, Some(&compiled.name), None);

    let mut merged = original.clone();
    let mut added = 0usize;
    for ty in incoming.types {
        if ty.namespace.is_empty() && ty.name == MODULE_TYPE {
            merge_module(&mut merged, ty)?;
            continue;
        }
        let name = ty.top_level_name();
        if merged.find_type(&name).is_some() {
            return Err(MergeError::DuplicateType(name));
        }
        debug!(ty = %name, "merged type");
        merged.types.push(ty);
        added += 1;
    }

    for reference in incoming.references {
        if reference.name == original.name || merged.reference(&reference.name).is_some() {
            continue;
        }
        merged.references.push(reference);
    }
    for attr in incoming.attributes {
        if !merged.attributes.contains(&attr) {
            merged.attributes.push(attr);
        }
    }

    recompute_layout(&mut merged);
    info!(artifact = %merged.name, from = %compiled.name, types = added, "merged compiled artifact");
    Ok(merged)
}

fn merge_module(merged: &mut Artifact, module: TypeDef) -> Result<(), MergeError> {
    let target = merged.module_type_mut();
    for field in module.fields {
        if target.field(&field.name).is_some() {
            return Err(MergeError::DuplicateMember(format!("{MODULE_TYPE}::{}", field.name)));
        }
        target.fields.push(field);
    }
    for method in module.methods {
        let key = method.key(MODULE_TYPE);
        if target.methods.iter().any(|m| m.key(MODULE_TYPE) == key) {
            return Err(MergeError::DuplicateMember(key));
        }
        target.methods.push(method);
    }
    target.nested.extend(module.nested);
    Ok(())
}

fn recompute_layout(artifact: &mut Artifact) {
    fn walk(ty: &mut TypeDef) {
        for method in &mut ty.methods {
            if let Some(body) = &mut method.body {
                body.recompute_offsets();
                body.max_stack = body.compute_max_stack();
            }
        }
        for nested in &mut ty.nested {
            walk(nested);
        }
    }
    for ty in &mut artifact.types {
        walk(ty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_artifact::{Characteristics, MethodBody, MethodDef, MethodRef, Op, Reference, TypeSig, Version, Visibility};
    use asmproc_test_utils::{class, corlib, game, static_method};
    use pretty_assertions::assert_eq;

    fn original() -> Artifact {
        let mut art = game();
        art.public_key = Some(vec![7; 16]);
        art.characteristics.insert(Characteristics::STRONG_NAME_SIGNED);
        art.types.push(class("Game.Player"));
        art
    }

    fn compiled() -> Artifact {
        let mut art = Artifact::new("Game.Serializers", Version::default());
        art.references.push(original().as_reference());
        art.references.push(corlib().as_reference());
        art.references.push(Reference::new("Engine.Audio", Version::default()));
        let mut ty = class("Game.DataSerializers.Registration");
        let touch = MethodRef::new_static(TypeSig::external("Game", "Game.Player"), "Touch", vec![], TypeSig::VOID);
        ty.methods.push(
            MethodDef::new("Initialize", Visibility::Public, Vec::new(), TypeSig::VOID)
                .into_static()
                .with_body(MethodBody::from_ops(vec![Op::Call(touch), Op::Ret])),
        );
        art.types.push(ty);
        art
    }

    #[test]
    fn merged_keeps_identity_and_rescopes() {
        let original = original();
        let merged = merge(&original, &compiled()).unwrap();

        assert_eq!(merged.name, original.name);
        assert_eq!(merged.public_key, original.public_key);
        assert_eq!(merged.characteristics, original.characteristics);
        let names: Vec<&str> = merged.references.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["System.Runtime", "Engine.Core", "Engine.Audio"]);

        let init = &merged.find_type("Game.DataSerializers.Registration").unwrap().methods[0];
        let call = init.body.as_ref().unwrap().instructions[0].op.method().unwrap();
        assert_eq!(call.declaring, TypeSig::local("Game.Player"));
    }

    #[test]
    fn duplicate_types_rejected() {
        let mut compiled = compiled();
        compiled.types.push(class("Game.Player"));
        assert_eq!(
            merge(&original(), &compiled),
            Err(MergeError::DuplicateType("Game.Player".into()))
        );
    }

    #[test]
    fn module_members_join_original_module() {
        let mut original = original();
        original
            .module_type_mut()
            .methods
            .push(static_method("Existing", Vec::new(), TypeSig::VOID));
        let mut compiled = compiled();
        compiled
            .module_type_mut()
            .methods
            .push(static_method("Added", Vec::new(), TypeSig::VOID));

        let merged = merge(&original, &compiled).unwrap();
        let module = merged.module_type().unwrap();
        let names: Vec<&str> = module.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Existing", "Added"]);
        assert_eq!(merged.types.iter().filter(|t| t.name == MODULE_TYPE).count(), 1);

        compiled
            .module_type_mut()
            .methods
            .push(static_method("Existing", Vec::new(), TypeSig::VOID));
        assert!(matches!(merge(&original, &compiled), Err(MergeError::DuplicateMember(_))));
    }

    #[test]
    fn offsets_recomputed() {
        let mut compiled = compiled();
        let body = compiled.types[1].methods[0].body.as_mut().unwrap();
        body.instructions[1].offset = 99;
        body.max_stack = 0;
        let merged = merge(&original(), &compiled).unwrap();
        let body = merged.find_type("Game.DataSerializers.Registration").unwrap().methods[0]
            .body
            .as_ref()
            .unwrap();
        assert_eq!(body.instructions[1].offset, 5);
    }
}
