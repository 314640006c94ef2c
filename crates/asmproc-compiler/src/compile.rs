//! Source compilation

use crate::check::Checker;
use crate::error::CompileError;
use crate::parse::parse;
use asmproc_artifact::{Artifact, Version};
use asmproc_codegen::GeneratedSource;
use asmproc_resolver::ArtifactScope;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Compiles generated sources into a standalone artifact
#[derive(Debug, Clone)]
pub struct Compiler {
    name: String,
    version: Version,
}

impl Compiler {
    /// Compiler producing an artifact called `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Version::default(),
        }
    }

    /// Version stamped on the compiled artifact
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Name of the compiled artifact
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse and check `sources` against the live artifact and the resolver
    ///
    /// The compiled artifact references every artifact its code uses plus
    /// those named by `reference` lines.
    ///
    /// # Errors
    /// - [`CompileError::Parse`] on malformed source text
    /// - [`CompileError::Compilation`] with every semantic diagnostic found
    /// - [`CompileError::Resolve`] if a used artifact cannot be resolved
    pub fn compile(&self, sources: &[GeneratedSource], scope: ArtifactScope<'_>) -> Result<Artifact, CompileError> {
        let mut artifact = Artifact::new(self.name.clone(), self.version);
        let mut requested = Vec::new();
        let mut origins = HashMap::new();
        for source in sources {
            let unit = parse(source)?;
            debug!(source = %source.display_name(), types = unit.types.len(), "parsed source");
            requested.extend(unit.references);
            for ty in &unit.types {
                origins.insert(ty.top_level_name(), source.display_name());
            }
            artifact.types.extend(unit.types);
        }

        let (mut diagnostics, used) = Checker::new(&artifact, scope).run();
        for diagnostic in &mut diagnostics {
            let top = diagnostic.location.split("::").next().and_then(|l| l.split('/').next());
            diagnostic.source = top.and_then(|t| origins.get(t)).cloned();
        }
        if !diagnostics.is_empty() {
            for diagnostic in &diagnostics {
                warn!(%diagnostic, "compilation error");
            }
            return Err(CompileError::Compilation { diagnostics });
        }

        let live = scope.live();
        for name in used.into_iter().chain(requested) {
            if name == artifact.name || artifact.reference(&name).is_some() {
                continue;
            }
            let reference = if name == live.name {
                live.as_reference()
            } else {
                scope.resolver().resolve(&name)?.as_reference()
            };
            artifact.references.push(reference);
        }

        info!(
            artifact = %artifact.name,
            types = artifact.types.len() - 1,
            references = artifact.references.len(),
            "compiled generated sources"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_resolver::Resolver;
    use asmproc_test_utils::{corlib, engine_core, game};
    use std::sync::Arc;

    const SOURCE: &str = "\
reference Engine.Core
type public class Game.Generated.Hello extends [System.Runtime]System.Object
  method public static void Run()
    ret
  end
end
";

    fn resolver() -> Resolver {
        let resolver = Resolver::new();
        resolver.register(Arc::new(corlib()));
        resolver.register(Arc::new(engine_core()));
        resolver
    }

    #[test]
    fn references_follow_usage_and_requests() {
        let resolver = resolver();
        let live = game();
        let compiled = Compiler::new("Game.Serializers")
            .with_version(Version::new(1, 2, 0, 0))
            .compile(&[GeneratedSource::new("hello", SOURCE)], ArtifactScope::new(&live, &resolver))
            .unwrap();
        assert_eq!(compiled.version, Version::new(1, 2, 0, 0));
        let names: Vec<&str> = compiled.references.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["System.Runtime", "Engine.Core"]);
        assert!(compiled.find_type("Game.Generated.Hello").is_some());
    }

    #[test]
    fn diagnostics_collected_not_first_only() {
        let resolver = resolver();
        let live = game();
        let source = "type public class A extends [Game]Game.Missing\n  method public static void M()\n    ldtoken [Nowhere]X\n    ret\n  end\nend\n";
        let err = Compiler::new("Game.Serializers")
            .compile(&[GeneratedSource::new("bad", source)], ArtifactScope::new(&live, &resolver))
            .unwrap_err();
        assert_eq!(err.diagnostics().len(), 2);
        assert_eq!(err.to_string(), "compilation failed with 2 error(s)");
    }

    #[test]
    fn unresolvable_requested_reference_fails() {
        let resolver = resolver();
        let live = game();
        let err = Compiler::new("Game.Serializers")
            .compile(&[GeneratedSource::new("req", "reference Engine.Audio\n")], ArtifactScope::new(&live, &resolver))
            .unwrap_err();
        assert!(matches!(err, CompileError::Resolve(_)));
    }

    #[test]
    fn parse_errors_name_the_source() {
        let resolver = resolver();
        let live = game();
        let err = Compiler::new("Game.Serializers")
            .compile(&[GeneratedSource::new("broken", "garbage\n")], ArtifactScope::new(&live, &resolver))
            .unwrap_err();
        assert!(err.to_string().contains("broken:1"));
    }

    #[test]
    fn diagnostics_name_the_source_file() {
        let resolver = resolver();
        let live = game();
        let source = "type public class Game.Generated.Bad extends [Game]Game.Missing\nend\n";
        let sources = [
            GeneratedSource::new("hello", SOURCE),
            GeneratedSource::new("bad", source).with_file_name("/out/Game.Serializers.bad.src"),
        ];
        let err = Compiler::new("Game.Serializers")
            .compile(&sources, ArtifactScope::new(&live, &resolver))
            .unwrap_err();
        let diagnostic = &err.diagnostics()[0];
        assert_eq!(diagnostic.source.as_deref(), Some("/out/Game.Serializers.bad.src"));
        assert!(diagnostic
            .to_string()
            .starts_with("/out/Game.Serializers.bad.src: Game.Generated.Bad: "));
    }

    #[test]
    fn parse_errors_prefer_the_file_name() {
        let resolver = resolver();
        let live = game();
        let source = GeneratedSource::new("broken", "garbage\n").with_file_name("/out/broken.src");
        let err = Compiler::new("Game.Serializers")
            .compile(&[source], ArtifactScope::new(&live, &resolver))
            .unwrap_err();
        assert!(err.to_string().starts_with("/out/broken.src:1"));
    }
}
