//! Compiler and merge errors

use asmproc_artifact::SigParseError;
use asmproc_resolver::ResolveError;
use std::fmt::{self, Display, Formatter};

/// Malformed source text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Line does not fit the grammar
    #[error("{source_name}:{line}: {message}")]
    Syntax {
        source_name: String,
        line: usize,
        message: String,
    },

    /// Type or member signature could not be parsed
    #[error("{source_name}:{line}: invalid signature")]
    Signature {
        source_name: String,
        line: usize,
        #[source]
        source: SigParseError,
    },

    /// Source ended inside a block
    #[error("{source_name}: unterminated {block} block")]
    Unterminated { source_name: String, block: &'static str },
}

/// One semantic problem found while checking compiled code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Source unit that declared the type, file name when it has one
    pub source: Option<String>,
    /// Type or member the problem was found in
    pub location: String,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "{source}: ")?;
        }
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Errors compiling generated sources
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Every diagnostic found, in discovery order
    #[error("compilation failed with {} error(s)", diagnostics.len())]
    Compilation { diagnostics: Vec<Diagnostic> },

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl CompileError {
    /// Diagnostics of a failed compilation, empty for other errors
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Compilation { diagnostics } => diagnostics,
            _ => &[],
        }
    }
}

/// Errors merging compiled code into the original artifact
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// Compiled code defines a type the original already has
    #[error("duplicate type '{0}'")]
    DuplicateType(String),

    /// Compiled module-level method collides with an existing one
    #[error("duplicate member '{0}'")]
    DuplicateMember(String),
}
