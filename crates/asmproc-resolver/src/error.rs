//! Resolver errors

use asmproc_artifact::CodecError;
use std::path::PathBuf;

/// Errors raised while locating referenced artifacts
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No registered artifact or search directory provides the reference
    #[error("unresolved reference '{name}' (searched {} location(s))", searched.len())]
    UnresolvedReference { name: String, searched: Vec<PathBuf> },

    /// A candidate file exists but could not be read
    #[error("failed to load reference")]
    Codec(#[from] CodecError),

    /// Mobile and store platforms need an explicit target framework
    #[error("platform {platform} requires a target framework")]
    MissingTargetFramework { platform: String },

    /// Unknown platform name
    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),
}

impl ResolveError {
    /// Whether this is a plain not-found condition (soft for optional references)
    #[inline]
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::UnresolvedReference { .. })
    }
}
