use crate::context::ProcessorContext;
use crate::error::StageError;
use crate::stage::{Access, Facts, Stage};
use asmproc_artifact::Characteristics;
use tracing::debug;

/// Marks an artifact carrying a public key as strong-name signed
///
/// Public-key-only signing leaves the flag unset; setting it lets the
/// runtime load the artifact without the private key having been applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSourceSignStage;

impl Stage for OpenSourceSignStage {
    fn name(&self) -> &'static str {
        "open-source-sign"
    }

    fn access(&self) -> Access {
        Access::new(Facts::MERGED, Facts::NONE)
    }

    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        let characteristics = &mut ctx.artifact.characteristics;
        if ctx.artifact.public_key.is_none() || characteristics.contains(Characteristics::STRONG_NAME_SIGNED) {
            return Ok(false);
        }
        characteristics.insert(Characteristics::STRONG_NAME_SIGNED);
        debug!(artifact = %ctx.artifact.name, "strong-name signed flag set");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests::context;

    #[test]
    fn flag_set_only_with_public_key() {
        let mut ctx = context();
        assert!(!OpenSourceSignStage.process(&mut ctx).unwrap());

        ctx.artifact.public_key = Some(vec![7; 16]);
        assert!(OpenSourceSignStage.process(&mut ctx).unwrap());
        assert!(ctx
            .artifact
            .characteristics
            .contains(Characteristics::STRONG_NAME_SIGNED));
        assert!(!OpenSourceSignStage.process(&mut ctx).unwrap());
    }
}
