use crate::context::ProcessorContext;
use crate::error::StageError;
use crate::stage::{Access, Facts, Stage};
use tracing::debug;

/// Adds references to named artifacts
///
/// Each name must resolve; a missing artifact fails the run.
#[derive(Debug, Clone, Default)]
pub struct AddReferenceStage {
    references: Vec<String>,
}

impl AddReferenceStage {
    #[must_use]
    pub fn new(references: Vec<String>) -> Self {
        Self { references }
    }
}

impl Stage for AddReferenceStage {
    fn name(&self) -> &'static str {
        "add-reference"
    }

    fn access(&self) -> Access {
        Access::new(Facts::NONE, Facts::REFERENCES)
    }

    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        let mut changed = false;
        for name in &self.references {
            if ctx.ensure_reference(name)? {
                debug!(reference = %name, "reference added");
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests::context;
    use asmproc_artifact::known::ENGINE_RENDERING;

    #[test]
    fn adds_missing_references_once() {
        let mut ctx = context();
        let mut stage = AddReferenceStage::new(vec![ENGINE_RENDERING.into(), "Engine.Core".into()]);
        assert!(stage.process(&mut ctx).unwrap());
        assert!(ctx.artifact.reference(ENGINE_RENDERING).is_some());
        assert!(!stage.process(&mut ctx).unwrap());
    }

    #[test]
    fn unresolvable_reference_fails() {
        let mut ctx = context();
        let mut stage = AddReferenceStage::new(vec!["Engine.Audio".into()]);
        let err = stage.process(&mut ctx).unwrap_err();
        assert!(matches!(err, StageError::Resolve(e) if e.is_unresolved()));
    }
}
