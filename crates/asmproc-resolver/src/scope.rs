//! Type lookup across the live artifact and its resolved references

use crate::resolver::Resolver;
use asmproc_artifact::{Artifact, KnownAttribute, TypeDef, TypeRef, Visibility};
use std::ops::Deref;
use std::sync::Arc;

/// Base chains longer than this are treated as cyclic
const MAX_BASE_DEPTH: usize = 64;

/// Either the artifact being processed or a resolved reference
#[derive(Debug, Clone)]
pub enum ArtifactHandle<'a> {
    Live(&'a Artifact),
    Resolved(Arc<Artifact>),
}

impl Deref for ArtifactHandle<'_> {
    type Target = Artifact;

    fn deref(&self) -> &Artifact {
        match self {
            Self::Live(artifact) => artifact,
            Self::Resolved(artifact) => artifact,
        }
    }
}

impl ArtifactHandle<'_> {
    /// Whether this is the artifact being processed
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

/// View pairing the live artifact with the resolver
///
/// The live artifact always answers for its own name, so references from
/// generated code back into the artifact see its in-progress state.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactScope<'a> {
    live: &'a Artifact,
    resolver: &'a Resolver,
}

impl<'a> ArtifactScope<'a> {
    /// Create scope
    #[inline]
    #[must_use]
    pub fn new(live: &'a Artifact, resolver: &'a Resolver) -> Self {
        Self { live, resolver }
    }

    /// The artifact being processed
    #[inline]
    #[must_use]
    pub fn live(&self) -> &'a Artifact {
        self.live
    }

    /// The resolver
    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &'a Resolver {
        self.resolver
    }

    /// Artifact for a reference scope (`None` is the live artifact)
    #[must_use]
    pub fn artifact_for(&self, scope: Option<&str>) -> Option<ArtifactHandle<'a>> {
        match scope {
            None => Some(ArtifactHandle::Live(self.live)),
            Some(name) if name == self.live.name => Some(ArtifactHandle::Live(self.live)),
            Some(name) => self.resolver.try_resolve(name).map(ArtifactHandle::Resolved),
        }
    }

    /// Run `f` against the definition behind `r`
    pub fn with_type<R>(&self, r: &TypeRef, f: impl FnOnce(&Artifact, &TypeDef) -> R) -> Option<R> {
        let handle = self.artifact_for(r.scope.as_deref())?;
        let def = handle.find_type(&r.full_name)?;
        Some(f(&handle, def))
    }

    /// Whether `r` names an existing type
    #[inline]
    #[must_use]
    pub fn type_exists(&self, r: &TypeRef) -> bool {
        self.with_type(r, |_, _| ()).is_some()
    }

    /// `r` with its scope made explicit (`None` becomes the live artifact name)
    #[must_use]
    pub fn anchor(&self, r: &TypeRef) -> TypeRef {
        r.anchored(&self.live.name)
    }

    /// Base types of `r`, nearest first, each anchored to its defining artifact
    ///
    /// Stops at the first base that cannot be resolved.
    #[must_use]
    pub fn base_chain(&self, r: &TypeRef) -> Vec<TypeRef> {
        let mut chain = Vec::new();
        let mut current = self.anchor(r);
        while chain.len() < MAX_BASE_DEPTH {
            let owner = current.scope.clone().unwrap_or_default();
            let next = self.with_type(&current, |_, def| {
                def.base
                    .as_ref()
                    .and_then(|b| b.type_ref())
                    .map(|b| b.anchored(&owner))
            });
            match next.flatten() {
                Some(base) => {
                    chain.push(base.clone());
                    current = base;
                }
                None => break,
            }
        }
        chain
    }

    /// Whether `r` is `ancestor` or derives from it
    #[must_use]
    pub fn derives_from(&self, r: &TypeRef, ancestor: &TypeRef) -> bool {
        let target = self.anchor(ancestor);
        let start = self.anchor(r);
        start == target || self.base_chain(&start).contains(&target)
    }

    /// Whether a member with `visibility`, defined in `owner`, may be used by
    /// code compiled into an artifact named `from`
    #[must_use]
    pub fn is_accessible_from(&self, owner: &Artifact, visibility: Visibility, from: &str) -> bool {
        if owner.name == from {
            return true;
        }
        match visibility {
            Visibility::Public => true,
            Visibility::Assembly | Visibility::FamilyOrAssembly => grants_internals_to(owner, from),
            Visibility::Private | Visibility::Family => false,
        }
    }
}

/// Whether `artifact` carries an internals-visible-to grant for `name`
#[must_use]
pub fn grants_internals_to(artifact: &Artifact, name: &str) -> bool {
    artifact
        .attributes
        .iter()
        .filter(|a| a.is(KnownAttribute::InternalsVisibleTo))
        .filter_map(|a| a.args.first().and_then(|v| v.as_str()))
        .any(|grant| grant_name(grant) == name)
}

/// Artifact name part of an internals-visible-to grant (`Name, PublicKey=…`)
#[must_use]
pub fn grant_name(grant: &str) -> &str {
    grant.split(',').next().unwrap_or(grant).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_artifact::{AttrValue, CustomAttribute, TypeSig, Version};

    fn live() -> Artifact {
        let mut game = Artifact::new("Game", Version::default());
        game.types.push(TypeDef::new("Game", "Base", Visibility::Public));
        game.types
            .push(TypeDef::new("Game", "Derived", Visibility::Public).with_base(TypeSig::local("Game.Base")));
        game
    }

    #[test]
    fn live_artifact_answers_for_own_name() {
        let resolver = Resolver::new();
        let game = live();
        let scope = ArtifactScope::new(&game, &resolver);
        assert!(scope.type_exists(&TypeRef::local("Game.Base")));
        assert!(scope.type_exists(&TypeRef::external("Game", "Game.Base")));
        assert!(!scope.type_exists(&TypeRef::external("Other", "Game.Base")));
    }

    #[test]
    fn base_chain_anchors_scopes() {
        let resolver = Resolver::new();
        let game = live();
        let scope = ArtifactScope::new(&game, &resolver);
        assert_eq!(
            scope.base_chain(&TypeRef::local("Game.Derived")),
            vec![TypeRef::external("Game", "Game.Base")]
        );
        assert!(scope.derives_from(&TypeRef::local("Game.Derived"), &TypeRef::local("Game.Base")));
    }

    #[test]
    fn internals_require_grant() {
        let resolver = Resolver::new();
        let mut game = live();
        let scope = ArtifactScope::new(&game, &resolver);
        assert!(!scope.is_accessible_from(&game, Visibility::Assembly, "Game.Serializers"));
        assert!(scope.is_accessible_from(&game, Visibility::Public, "Game.Serializers"));
        assert!(scope.is_accessible_from(&game, Visibility::Private, "Game"));

        game.attributes.push(CustomAttribute::new(
            TypeRef::external("System.Runtime", asmproc_artifact::known::system::INTERNALS_VISIBLE_TO),
            vec![AttrValue::Str("Game.Serializers, PublicKey=00aa".into())],
        ));
        let scope = ArtifactScope::new(&game, &resolver);
        assert!(scope.is_accessible_from(&game, Visibility::Assembly, "Game.Serializers"));
    }
}
