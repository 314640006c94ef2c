use super::compiled_artifact_name;
use crate::context::ProcessorContext;
use crate::error::StageError;
use crate::stage::{Access, Facts, Stage};
use asmproc_compiler::{merge, Compiler};

/// Compiles generated sources and merges the result into the artifact
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileMergeStage;

impl Stage for CompileMergeStage {
    fn name(&self) -> &'static str {
        "compile-merge"
    }

    fn access(&self) -> Access {
        Access::new(Facts::SOURCES, Facts::MERGED | Facts::INITIALIZERS)
    }

    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        if ctx.generated_sources.is_empty() {
            return Ok(false);
        }
        let sources = ctx.take_sources();
        let compiler = Compiler::new(compiled_artifact_name(&ctx.artifact)).with_version(ctx.artifact.version);
        let compiled = compiler.compile(&sources, ctx.scope())?;
        let merged = merge(&ctx.artifact, &compiled)?;
        ctx.info(&format!(
            "merged {} generated type(s) from {}",
            compiled.types.len().saturating_sub(1),
            compiler.name()
        ));
        ctx.replace_artifact(merged);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests::context;
    use crate::stages::SerializationStage;
    use asmproc_artifact::{FieldDef, Primitive, Visibility};
    use asmproc_codegen::GeneratedSource;
    use asmproc_test_utils::{data_contract, prim};

    #[test]
    fn no_sources_no_change() {
        let mut ctx = context();
        let before = ctx.artifact.clone();
        assert!(!CompileMergeStage.process(&mut ctx).unwrap());
        assert_eq!(ctx.artifact, before);
    }

    #[test]
    fn generated_serializers_merged() {
        let mut ctx = context();
        let mut player = data_contract("Game.Player");
        player
            .fields
            .push(FieldDef::new("Health", prim(Primitive::I32), Visibility::Public));
        ctx.artifact.types.push(player);
        let before = ctx.artifact.types.len();

        assert!(SerializationStage::new(None).process(&mut ctx).unwrap());
        assert!(CompileMergeStage.process(&mut ctx).unwrap());
        assert!(ctx.generated_sources.is_empty());
        assert!(ctx.artifact.types.len() > before);
        assert!(ctx.artifact.reference("Game.Serializers").is_none());
        let snapshot = ctx.resolver.resolve("Game").unwrap();
        assert_eq!(snapshot.types.len(), ctx.artifact.types.len());
    }

    #[test]
    fn invalid_source_fails_the_stage() {
        let mut ctx = context();
        ctx.generated_sources.push(GeneratedSource::new("broken", "garbage\n"));
        let err = CompileMergeStage.process(&mut ctx).unwrap_err();
        assert!(matches!(err, StageError::Compile(_)));
    }
}
