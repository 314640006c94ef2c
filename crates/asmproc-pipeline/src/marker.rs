//! Completion marker
//!
//! A processed artifact carries `[AssemblyProcessed]` so later runs leave it
//! alone. The attribute class is taken from the engine core library when it
//! resolves; otherwise an internal copy is synthesized inside the artifact.

use crate::error::StageError;
use asmproc_artifact::known::{engine, system, CORLIB_NAMES, ENGINE_CORE};
use asmproc_artifact::{Artifact, CustomAttribute, KnownAttribute, MethodBody, MethodDef, MethodRef, Op, TypeDef, TypeRef, TypeSig, Visibility};
use asmproc_resolver::Resolver;
use tracing::debug;

/// Whether the artifact was already processed
#[inline]
#[must_use]
pub fn is_processed(artifact: &Artifact) -> bool {
    artifact.has_attribute(KnownAttribute::AssemblyProcessed)
}

/// Tag the artifact as processed
///
/// Returns `false` when the marker was already present.
///
/// # Errors
/// Fails with [`StageError::InvariantViolation`] when the attribute has to be
/// synthesized and the artifact references no core runtime library.
pub fn mark_processed(artifact: &mut Artifact, resolver: &Resolver) -> Result<bool, StageError> {
    if is_processed(artifact) {
        return Ok(false);
    }

    let engine_defines_marker = resolver
        .try_resolve(ENGINE_CORE)
        .filter(|core| core.find_type(engine::ASSEMBLY_PROCESSED).is_some());

    let attribute_ty = if let Some(core) = engine_defines_marker {
        if artifact.reference(ENGINE_CORE).is_none() {
            artifact.references.push(core.as_reference());
        }
        TypeRef::external(ENGINE_CORE, engine::ASSEMBLY_PROCESSED)
    } else {
        if artifact.find_type(engine::ASSEMBLY_PROCESSED).is_none() {
            let corlib = artifact
                .references
                .iter()
                .map(|r| r.name.clone())
                .find(|name| CORLIB_NAMES.contains(&name.as_str()))
                .ok_or_else(|| StageError::invariant("missing corlib"))?;
            debug!(artifact = %artifact.name, "synthesizing processed marker attribute");
            artifact.types.push(synthesized_marker(&corlib));
        }
        TypeRef::local(engine::ASSEMBLY_PROCESSED)
    };

    artifact.attributes.push(CustomAttribute::new(attribute_ty, Vec::new()));
    Ok(true)
}

/// Internal attribute class deriving from the runtime's `System.Attribute`
fn synthesized_marker(corlib: &str) -> TypeDef {
    let attribute_base = TypeSig::external(corlib, system::ATTRIBUTE);
    let ctor = MethodDef::new(asmproc_artifact::known::CTOR, Visibility::Public, Vec::new(), TypeSig::VOID)
        .with_body(MethodBody::from_ops(vec![
            Op::Ldarg(0),
            Op::Call(MethodRef::ctor(attribute_base.clone(), Vec::new())),
            Op::Ret,
        ]));
    let (namespace, name) = engine::ASSEMBLY_PROCESSED
        .rsplit_once('.')
        .unwrap_or(("", engine::ASSEMBLY_PROCESSED));
    let mut ty = TypeDef::new(namespace, name, Visibility::Assembly).with_base(attribute_base);
    ty.is_sealed = true;
    ty.methods.push(ctor);
    ty
}
