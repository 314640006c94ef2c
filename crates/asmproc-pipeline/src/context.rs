//! Per-run processing context

use crate::sink::LogSink;
use asmproc_artifact::known::CORLIB_NAMES;
use asmproc_artifact::Artifact;
use asmproc_codegen::GeneratedSource;
use asmproc_resolver::{ArtifactScope, Platform, ResolveError, Resolver};
use std::sync::Arc;
use tracing::{info, warn};

/// State shared by the stages of one run
///
/// The context owns the artifact being processed. The resolver holds a
/// snapshot of it under its own name so dependencies that refer back to it
/// resolve; stages that rebuild the artifact wholesale refresh that snapshot
/// through [`ProcessorContext::replace_artifact`].
#[derive(Debug)]
pub struct ProcessorContext {
    pub artifact: Artifact,
    pub resolver: Resolver,
    pub platform: Platform,
    pub log: Arc<dyn LogSink>,

    /// Sources produced by generation stages, consumed by compilation
    pub generated_sources: Vec<GeneratedSource>,
}

impl ProcessorContext {
    #[must_use]
    pub fn new(artifact: Artifact, resolver: Resolver, platform: Platform, log: Arc<dyn LogSink>) -> Self {
        Self {
            artifact,
            resolver,
            platform,
            log,
            generated_sources: Vec::new(),
        }
    }

    /// Live artifact paired with the resolver
    #[inline]
    #[must_use]
    pub fn scope(&self) -> ArtifactScope<'_> {
        ArtifactScope::new(&self.artifact, &self.resolver)
    }

    /// Swap in a rebuilt artifact and refresh the resolver snapshot
    pub fn replace_artifact(&mut self, artifact: Artifact) {
        self.artifact = artifact;
        self.resolver.register(Arc::new(self.artifact.clone()));
    }

    /// Drain the generated sources
    pub fn take_sources(&mut self) -> Vec<GeneratedSource> {
        std::mem::take(&mut self.generated_sources)
    }

    /// Add a reference to `name` unless already present
    ///
    /// Returns whether a reference was added.
    ///
    /// # Errors
    /// Fails when `name` cannot be resolved.
    pub fn ensure_reference(&mut self, name: &str) -> Result<bool, ResolveError> {
        if name == self.artifact.name || self.artifact.reference(name).is_some() {
            return Ok(false);
        }
        let target = self.resolver.resolve(name)?;
        self.artifact.references.push(target.as_reference());
        Ok(true)
    }

    /// Name of the core runtime library the artifact references
    #[must_use]
    pub fn corlib_name(&self) -> Option<&str> {
        self.artifact
            .references
            .iter()
            .map(|r| r.name.as_str())
            .find(|name| CORLIB_NAMES.contains(name))
    }

    /// Report to the sink and the trace log
    pub fn info(&self, message: &str) {
        info!(artifact = %self.artifact.name, "{message}");
        self.log.info(message);
    }

    /// Report a warning to the sink and the trace log
    pub fn warn(&self, message: &str) {
        warn!(artifact = %self.artifact.name, "{message}");
        self.log.warn(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CollectingSink;
    use asmproc_test_utils::{corlib, engine_core, game, CORLIB};

    fn context() -> ProcessorContext {
        let resolver = Resolver::new();
        resolver.register(Arc::new(corlib()));
        resolver.register(Arc::new(engine_core()));
        ProcessorContext::new(game(), resolver, Platform::default(), Arc::new(CollectingSink::new()))
    }

    #[test]
    fn ensure_reference_adds_once() {
        let mut ctx = context();
        ctx.artifact.references.retain(|r| r.name == CORLIB);
        assert!(ctx.ensure_reference("Engine.Core").unwrap());
        assert!(!ctx.ensure_reference("Engine.Core").unwrap());
        assert!(!ctx.ensure_reference("Game").unwrap());
        assert!(ctx.ensure_reference("Missing").unwrap_err().is_unresolved());
    }

    #[test]
    fn replace_artifact_refreshes_snapshot() {
        let mut ctx = context();
        let mut rebuilt = ctx.artifact.clone();
        rebuilt.types.push(asmproc_test_utils::class("Game.Added"));
        ctx.replace_artifact(rebuilt);
        let snapshot = ctx.resolver.resolve("Game").unwrap();
        assert!(snapshot.find_type("Game.Added").is_some());
    }

    #[test]
    fn corlib_name_from_references() {
        assert_eq!(context().corlib_name(), Some(CORLIB));
    }
}
