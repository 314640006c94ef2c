//! Orchestrator errors

use asmproc_artifact::CodecError;
use asmproc_pipeline::{PipelineError, StageError};
use asmproc_resolver::ResolveError;
use std::path::PathBuf;

/// Top-level error for one processing run
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Reading or writing the artifact failed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Building the resolver or registering references failed
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A stage failed or the stage order is invalid
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Marking the artifact as processed failed
    #[error("cannot mark the artifact as processed")]
    Marker(#[from] StageError),

    /// An auxiliary file (sign key, configuration) could not be read
    #[error("cannot read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for the options
    #[error("invalid configuration {}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Warnings were reported while warnings are treated as errors
    #[error("{count} warning(s) reported while warnings are treated as errors")]
    WarningsAsErrors { count: usize },
}

impl ProcessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
