use crate::context::ProcessorContext;
use crate::error::StageError;
use crate::stage::Stage;
use asmproc_artifact::visit::rescope;
use tracing::info;

/// Gives the artifact a new identity
///
/// Type references scoped to the old name are made local so they keep
/// pointing at the artifact's own types.
#[derive(Debug, Clone)]
pub struct RenameStage {
    new_name: String,
}

impl RenameStage {
    #[must_use]
    pub fn new(new_name: impl Into<String>) -> Self {
        Self { new_name: new_name.into() }
    }
}

impl Stage for RenameStage {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError> {
        if ctx.artifact.name == self.new_name {
            return Ok(false);
        }
        let old = std::mem::replace(&mut ctx.artifact.name, self.new_name.clone());
        rescope(&mut ctx.artifact, Some(&old), None);
        info!(from = %old, to = %self.new_name, "artifact renamed");
        Ok(true)
    }
}
