//! asmproc Code Generator
//!
//! Synthesizes source text, in the compiler's textual syntax, for code the
//! processed artifact needs but does not carry: per-type serializers with their
//! factory registration, and scan registries keyed by marker type.
//!
//! # Core Concepts
//!
//! - [`SerializableTypeRegistry`]: which types serialize, and where they live
//! - [`SerializerFactory`]: built-in generic shapes and their dependencies
//! - [`SerializerGenerator`]: one serializer class per local type
//! - [`ScanRegistry`]: marker type → collected local types
//! - [`GeneratedSource`]: a named source unit queued for compilation
//!
//! # Example
//!
//! ```rust,ignore
//! use asmproc_codegen::{generate, Target};
//!
//! let output = generate(scope, &Target::new("Game", "System.Runtime"), "Game.Serializers");
//! for source in &output.sources {
//!     println!("{}: {} lines", source.name, source.line_count());
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod factory;
mod members;
mod registry;
mod scan;
mod serializer;
mod source;
mod writer;

pub use error::CodegenError;
pub use factory::SerializerFactory;
pub use members::{collect as serializable_members, MemberKind, SerializableMember};
pub use registry::{GenericMode, Origin, SerializableType, SerializableTypeRegistry};
pub use scan::{ScanRegistry, SCAN_REGISTRATION_TYPE};
pub use serializer::{anchor_sig, serializer_type_name, SerializerGenerator, Target, REGISTRATION_TYPE};
pub use source::{serialization_artifact_location, source_file_name, GeneratedSource, SOURCE_EXTENSION};

use asmproc_resolver::ArtifactScope;
use tracing::{debug, info};

/// Result of one generation pass
#[derive(Debug, Clone, Default)]
pub struct Generated {
    /// Source units, empty when there is nothing to register
    pub sources: Vec<GeneratedSource>,

    /// Number of local serializable types
    pub serializable: usize,

    /// Types left out of the scan registry
    pub excluded: Vec<String>,
}

/// Build both registries and generate their sources
///
/// `compiled_name` is the name the generated code will be compiled under; it
/// decides which internal members of dependencies the serializers may touch.
/// When the live artifact was loaded from disk every unit is given a file
/// name beside its serializers companion.
#[must_use]
pub fn generate(scope: ArtifactScope<'_>, target: &Target, compiled_name: &str) -> Generated {
    let registry = SerializableTypeRegistry::build(&scope);
    let factory = SerializerFactory::new();
    let scan = ScanRegistry::build(&scope);

    let mut sources = Vec::new();
    sources.extend(SerializerGenerator::new(scope, &registry, &factory, target.clone(), compiled_name).generate());
    sources.extend(scan.generate(target));
    if let Some(location) = scope.live().location.as_deref() {
        match serialization_artifact_location(location) {
            Ok(companion) => {
                for source in &mut sources {
                    source.file_name = Some(source_file_name(&companion, &source.name));
                }
            }
            Err(err) => debug!(%err, "generated sources keep their unit names"),
        }
    }

    let serializable = registry.local().count();
    info!(
        serializable,
        scan_keys = scan.keys().count(),
        sources = sources.len(),
        "generated serialization sources"
    );
    Generated {
        sources,
        serializable,
        excluded: scan.excluded().to_vec(),
    }
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_artifact::{FieldDef, Primitive, TypeSig, Visibility};
    use asmproc_resolver::Resolver;
    use asmproc_test_utils::{data_contract, game, CORLIB};
    use std::path::PathBuf;

    fn game_with_contract() -> asmproc_artifact::Artifact {
        let mut art = game();
        let mut player = data_contract("Game.Player");
        player
            .fields
            .push(FieldDef::new("Health", TypeSig::Primitive(Primitive::I32), Visibility::Public));
        art.types.push(player);
        art
    }

    #[test]
    fn units_named_after_companion_when_loaded_from_disk() {
        let mut art = game_with_contract();
        art.location = Some(PathBuf::from("/build/out/Game.dll"));
        let resolver = Resolver::new();
        let generated = generate(ArtifactScope::new(&art, &resolver), &Target::new("Game", CORLIB), "Game.Serializers");
        assert!(!generated.sources.is_empty());
        for source in &generated.sources {
            let expected = PathBuf::from(format!("/build/out/Game.Serializers.{}.src", source.name));
            assert_eq!(source.file_name.as_ref(), Some(&expected));
        }
    }

    #[test]
    fn units_keep_their_names_without_a_usable_location() {
        let mut art = game_with_contract();
        let resolver = Resolver::new();
        let target = Target::new("Game", CORLIB);
        let generated = generate(ArtifactScope::new(&art, &resolver), &target, "Game.Serializers");
        assert!(generated.sources.iter().all(|s| s.file_name.is_none()));

        art.location = Some(PathBuf::from("/build/out/Game.bin"));
        let generated = generate(ArtifactScope::new(&art, &resolver), &target, "Game.Serializers");
        assert!(generated.sources.iter().all(|s| s.display_name() == s.name));
    }
}
