//! Stage and pipeline errors

use asmproc_codegen::CodegenError;
use asmproc_compiler::{CompileError, MergeError};
use asmproc_resolver::ResolveError;

/// Errors raised by a single stage
///
/// Soft conditions never surface here: a stage that can continue without
/// doing its work logs a warning and reports no mutation instead.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// A stage contract was breached (missing body, unexpected shape, ...)
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A required reference could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Generated source naming failed
    #[error(transparent)]
    Codegen(#[from] CodegenError),

    /// Generated code did not compile
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Compiled code could not be merged
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// The artifact carries a public key but no sign key was supplied
    #[error("artifact '{0}' has a public key but no sign key file was given")]
    MissingSignKey(String),
}

impl StageError {
    /// Create invariant violation
    #[inline]
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}

/// Errors building or running a pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage runs before a stage it depends on
    #[error("stage '{stage}' requires {facts} but runs before '{provider}' provides it")]
    Ordering {
        stage: &'static str,
        provider: &'static str,
        facts: String,
    },

    /// A stage failed; the run is aborted
    #[error("stage '{stage}' failed")]
    Stage {
        stage: &'static str,
        #[source]
        source: StageError,
    },
}

impl PipelineError {
    /// Stage error behind a failed run
    #[must_use]
    pub fn stage_error(&self) -> Option<&StageError> {
        match self {
            Self::Stage { source, .. } => Some(source),
            Self::Ordering { .. } => None,
        }
    }
}
