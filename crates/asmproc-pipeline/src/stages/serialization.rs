use super::{compiled_artifact_name, grant_internals};
use crate::context::ProcessorContext;
use crate::error::StageError;
use crate::stage::{Access, Facts, Stage};
use asmproc_codegen::{generate, Target};
use tracing::debug;

/// Generates serializer and scan registration sources
///
/// The generated code is compiled as a separate unit before being merged,
/// so the artifact grants that unit access to its internal members. A
/// strong-named artifact needs the public key of the sign key to name the
/// grantee.
#[derive(Debug, Clone, Default)]
pub struct SerializationStage {
    sign_key: Option<Vec<u8>>,
}

impl SerializationStage {
    /// `sign_key` holds the public key used for strong-named artifacts
    #[must_use]
    pub fn new(sign_key: Option<Vec<u8>>) -> Self {
        Self { sign_key }
    }
}

impl Stage for SerializationStage {
    fn name(&self) -> &'static str {
        "serialization"
    }

    fn access(&self) -> Access {
        Access::new(Facts::REFERENCES, Facts::SOURCES)
    }

    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        let compiled = compiled_artifact_name(&ctx.artifact);
        let corlib = ctx.resolver.find_corlib(&ctx.artifact)?.name.clone();
        let target = Target::new(ctx.artifact.name.clone(), corlib.clone());
        let generated = generate(ctx.scope(), &target, &compiled);

        for excluded in &generated.excluded {
            ctx.warn(&format!("type {excluded} is not visible to generated code and is not registered"));
        }
        if generated.sources.is_empty() {
            debug!(artifact = %ctx.artifact.name, "nothing to serialize or register");
            return Ok(false);
        }

        grant_internals(ctx, &compiled, &corlib, self.sign_key.as_deref())?;
        ctx.info(&format!(
            "generated {} source unit(s) for {} serializable type(s)",
            generated.sources.len(),
            generated.serializable
        ));
        ctx.generated_sources.extend(generated.sources);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests::context;
    use asmproc_artifact::{AttrValue, FieldDef, KnownAttribute, Primitive, Visibility};
    use asmproc_test_utils::{data_contract, prim};

    fn with_contract(ctx: &mut ProcessorContext) {
        let mut player = data_contract("Game.Player");
        player
            .fields
            .push(FieldDef::new("Health", prim(Primitive::I32), Visibility::Public));
        ctx.artifact.types.push(player);
    }

    fn grants(ctx: &ProcessorContext) -> Vec<String> {
        ctx.artifact
            .attributes
            .iter()
            .filter(|a| a.is(KnownAttribute::InternalsVisibleTo))
            .filter_map(|a| a.args.first().and_then(AttrValue::as_str).map(str::to_string))
            .collect()
    }

    #[test]
    fn contract_types_produce_sources_and_grant() {
        let mut ctx = context();
        with_contract(&mut ctx);

        assert!(SerializationStage::new(None).process(&mut ctx).unwrap());
        assert!(!ctx.generated_sources.is_empty());
        assert_eq!(grants(&ctx), vec!["Game.Serializers".to_string()]);
    }

    #[test]
    fn nothing_serializable_means_no_sources() {
        let mut ctx = context();
        assert!(!SerializationStage::new(None).process(&mut ctx).unwrap());
        assert!(ctx.generated_sources.is_empty());
        assert!(grants(&ctx).is_empty());
    }

    #[test]
    fn signed_artifact_grant_carries_public_key() {
        let mut ctx = context();
        with_contract(&mut ctx);
        ctx.artifact.public_key = Some(vec![0xab; 4]);

        assert!(SerializationStage::new(Some(vec![0x01, 0xff])).process(&mut ctx).unwrap());
        assert_eq!(grants(&ctx), vec!["Game.Serializers, PublicKey=01ff".to_string()]);
    }

    #[test]
    fn signed_artifact_without_key_fails() {
        let mut ctx = context();
        with_contract(&mut ctx);
        ctx.artifact.public_key = Some(vec![0xab; 4]);

        let err = SerializationStage::new(None).process(&mut ctx).unwrap_err();
        assert!(matches!(err, StageError::MissingSignKey(name) if name == "Game"));
    }
}
