//! Code generation errors

use std::path::PathBuf;

/// Errors raised while generating source text
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// The artifact path does not end in a recognized extension
    #[error("cannot derive serializer artifact location from '{}'", .0.display())]
    InvalidArtifactPath(PathBuf),

    /// Naming pattern failed to build
    #[error("invalid naming pattern")]
    Pattern(#[from] regex::Error),
}
