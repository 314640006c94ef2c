//! Ordered stage execution

use crate::context::ProcessorContext;
use crate::error::PipelineError;
use crate::stage::{Facts, Stage};
use tracing::{debug, info};

/// Validated, ordered list of stages
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

/// Collects stages before ordering is validated
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineBuilder {
    /// Append a stage
    #[must_use]
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append a boxed stage
    #[must_use]
    pub fn boxed(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Check that no stage runs before a stage providing what it requires
    ///
    /// A requirement nothing provides is accepted: the fact may already
    /// hold for the input artifact.
    ///
    /// # Errors
    /// Returns [`PipelineError::Ordering`] naming the first offending pair.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        for (i, stage) in self.stages.iter().enumerate() {
            let requires = stage.access().requires;
            if requires.is_empty() {
                continue;
            }
            if let Some(provider) = self.stages[i + 1..]
                .iter()
                .find(|later| later.access().provides.intersects(requires))
            {
                return Err(PipelineError::Ordering {
                    stage: stage.name(),
                    provider: provider.name(),
                    facts: provider.access().provides.intersection(requires).to_string(),
                });
            }
        }
        Ok(Pipeline { stages: self.stages })
    }
}

impl Pipeline {
    #[inline]
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Stage names in execution order
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order
    ///
    /// Returns whether any stage modified the artifact.
    ///
    /// # Errors
    /// Stops at the first failing stage and returns
    /// [`PipelineError::Stage`].
    pub fn run(&mut self, ctx: &mut ProcessorContext) -> Result<bool, PipelineError> {
        let mut established = Facts::NONE;
        let mut modified = false;
        for stage in &mut self.stages {
            let name = stage.name();
            debug!(stage = name, "running stage");
            let changed = stage
                .process(ctx)
                .map_err(|source| PipelineError::Stage { stage: name, source })?;
            if changed {
                info!(stage = name, artifact = %ctx.artifact.name, "stage modified artifact");
                established = established | stage.access().provides;
            }
            modified |= changed;
        }
        debug!(facts = %established, modified, "pipeline finished");
        Ok(modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::sink::CollectingSink;
    use crate::stage::Access;
    use asmproc_resolver::{Platform, Resolver};
    use asmproc_test_utils::game;
    use std::sync::Arc;

    #[derive(Debug)]
    struct FakeStage {
        name: &'static str,
        access: Access,
        result: Option<bool>,
    }

    impl FakeStage {
        fn new(name: &'static str, requires: Facts, provides: Facts) -> Self {
            Self {
                name,
                access: Access::new(requires, provides),
                result: Some(false),
            }
        }

        fn returning(mut self, result: Option<bool>) -> Self {
            self.result = result;
            self
        }
    }

    impl Stage for FakeStage {
        fn name(&self) -> &'static str {
            self.name
        }

        fn access(&self) -> Access {
            self.access
        }

        fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
            ctx.log.info(self.name);
            self.result.ok_or_else(|| StageError::invariant("stage failed"))
        }
    }

    fn context(sink: Arc<CollectingSink>) -> ProcessorContext {
        ProcessorContext::new(game(), Resolver::new(), Platform::default(), sink)
    }

    #[test]
    fn provider_after_requirer_rejected() {
        let err = Pipeline::builder()
            .stage(FakeStage::new("init", Facts::INITIALIZERS, Facts::NONE))
            .stage(FakeStage::new("keys", Facts::NONE, Facts::INITIALIZERS))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Ordering { stage: "init", provider: "keys", .. }
        ));
        assert!(err.to_string().contains("initializers"));
    }

    #[test]
    fn unprovided_requirement_accepted() {
        let pipeline = Pipeline::builder()
            .stage(FakeStage::new("sign", Facts::MERGED, Facts::NONE))
            .build()
            .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["sign"]);
    }

    #[test]
    fn run_reports_any_modification() {
        let sink = Arc::new(CollectingSink::new());
        let mut ctx = context(sink.clone());
        let mut pipeline = Pipeline::builder()
            .stage(FakeStage::new("a", Facts::NONE, Facts::NONE))
            .stage(FakeStage::new("b", Facts::NONE, Facts::NONE).returning(Some(true)))
            .stage(FakeStage::new("c", Facts::NONE, Facts::NONE))
            .build()
            .unwrap();
        assert!(pipeline.run(&mut ctx).unwrap());
        assert_eq!(sink.messages().len(), 3);
    }

    #[test]
    fn failing_stage_aborts_run() {
        let sink = Arc::new(CollectingSink::new());
        let mut ctx = context(sink.clone());
        let mut pipeline = Pipeline::builder()
            .stage(FakeStage::new("bad", Facts::NONE, Facts::NONE).returning(None))
            .stage(FakeStage::new("never", Facts::NONE, Facts::NONE))
            .build()
            .unwrap();
        let err = pipeline.run(&mut ctx).unwrap_err();
        assert!(matches!(err, PipelineError::Stage { stage: "bad", .. }));
        assert!(matches!(err.stage_error(), Some(StageError::InvariantViolation(_))));
        assert!(!sink.contains(crate::sink::Level::Info, "never"));
    }
}
