//! Built-in stages, listed in their default order

mod add_reference;
mod compile_merge;
mod dispatcher_pooling;
mod init_locals;
mod module_initializer;
mod open_source_sign;
mod parameter_key;
mod rename;
mod serialization;
mod update_engine;

pub use add_reference::AddReferenceStage;
pub use compile_merge::CompileMergeStage;
pub use dispatcher_pooling::DispatcherPoolingStage;
pub use init_locals::InitLocalsStage;
pub use module_initializer::ModuleInitializerStage;
pub use open_source_sign::OpenSourceSignStage;
pub use parameter_key::{ParameterKeyStage, INITIALIZER_TYPE};
pub use rename::RenameStage;
pub use serialization::SerializationStage;
pub use update_engine::{UpdateEngineStage, UPDATE_TYPE};

use crate::context::ProcessorContext;
use crate::error::StageError;
use asmproc_artifact::known::{system, SERIALIZERS_SUFFIX};
use asmproc_artifact::{Artifact, AttrValue, CustomAttribute, TypeRef};
use asmproc_resolver::grants_internals_to;
use tracing::debug;

/// Name of the artifact generated code is compiled into
///
/// Derived from the artifact's current name, so it follows a rename done
/// earlier in the pipeline.
#[must_use]
pub fn compiled_artifact_name(artifact: &Artifact) -> String {
    format!("{}{SERIALIZERS_SUFFIX}", artifact.name)
}

/// Grant `grantee` access to the artifact's internal members
///
/// A strong-named artifact names the grantee with the public key in
/// `sign_key`. Returns whether a grant was added.
///
/// # Errors
/// Fails with [`StageError::MissingSignKey`] for a strong-named artifact
/// when no key was given.
pub(crate) fn grant_internals(
    ctx: &mut ProcessorContext,
    grantee: &str,
    corlib: &str,
    sign_key: Option<&[u8]>,
) -> Result<bool, StageError> {
    if grants_internals_to(&ctx.artifact, grantee) {
        return Ok(false);
    }
    let grant = match (&ctx.artifact.public_key, sign_key) {
        (None, _) => grantee.to_string(),
        (Some(_), Some(key)) => format!("{grantee}, PublicKey={}", hex::encode(key)),
        (Some(_), None) => return Err(StageError::MissingSignKey(ctx.artifact.name.clone())),
    };
    debug!(grant = %grant, "granting internals visibility");
    ctx.artifact.attributes.push(CustomAttribute::new(
        TypeRef::external(corlib, system::INTERNALS_VISIBLE_TO),
        vec![AttrValue::Str(grant)],
    ));
    Ok(true)
}
