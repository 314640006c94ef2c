//! Memoizing dependency resolver
//!
//! Lookup order for a reference:
//!
//! 1. memo by [`ReferenceKey`] (name + strong-name token)
//! 2. the in-memory registry (e.g. the artifact currently being processed)
//! 3. each search directory in order, trying `<name>.dll` then `<name>.exe`
//!
//! Files are additionally memoized by canonical path so that two references
//! reaching the same file (a diamond) share one [`Arc<Artifact>`].

use crate::error::ResolveError;
use asmproc_artifact::codec::{self, ReadOptions};
use asmproc_artifact::known::CORLIB_NAMES;
use asmproc_artifact::{Artifact, Reference, ReferenceKey};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Candidate file extensions, in lookup order
const CANDIDATE_EXTENSIONS: [&str; 2] = ["dll", "exe"];

/// Resolves artifact references; one instance per processing run
#[derive(Debug, Default)]
pub struct Resolver {
    search_directories: Vec<PathBuf>,

    /// Priority registry by artifact name
    registered: DashMap<String, Arc<Artifact>>,

    /// Memo by reference identity
    by_key: DashMap<ReferenceKey, Arc<Artifact>>,

    /// Memo by canonical file path
    by_path: DashMap<PathBuf, Arc<Artifact>>,
}

impl Resolver {
    /// Resolver with no search directories
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a search directory (duplicates ignored)
    pub fn add_search_directory(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.search_directories.contains(&dir) {
            self.search_directories.push(dir);
        }
    }

    /// Remove a search directory
    pub fn remove_search_directory(&mut self, dir: &Path) {
        self.search_directories.retain(|d| d != dir);
    }

    /// Search directories in lookup order
    #[inline]
    #[must_use]
    pub fn search_directories(&self) -> &[PathBuf] {
        &self.search_directories
    }

    /// Register an in-memory artifact; it wins over anything on disk with the
    /// same name
    pub fn register(&self, artifact: Arc<Artifact>) {
        let name = artifact.name.clone();
        self.by_key.retain(|key, _| key.name != name);
        debug!(artifact = %name, "registered artifact");
        self.registered.insert(name, artifact);
    }

    /// Read and register an explicit reference file
    ///
    /// # Errors
    /// Returns [`ResolveError::Codec`] if the file cannot be read
    pub fn register_file(&self, path: &Path) -> Result<Arc<Artifact>, ResolveError> {
        let artifact = self.load(path)?;
        self.register(Arc::clone(&artifact));
        Ok(artifact)
    }

    /// Whether an artifact with this name is registered
    #[inline]
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.contains_key(name)
    }

    /// Resolve by name, ignoring strong-name tokens
    ///
    /// # Errors
    /// Returns [`ResolveError::UnresolvedReference`] if nothing provides it
    pub fn resolve(&self, name: &str) -> Result<Arc<Artifact>, ResolveError> {
        self.resolve_key(&ReferenceKey {
            name: name.to_string(),
            token: None,
        })
    }

    /// Resolve a reference, honouring its token when present
    ///
    /// # Errors
    /// Returns [`ResolveError::UnresolvedReference`] if nothing provides it
    pub fn resolve_reference(&self, reference: &Reference) -> Result<Arc<Artifact>, ResolveError> {
        self.resolve_key(&reference.key())
    }

    /// Resolve, treating absence as a soft skip
    ///
    /// Corrupt candidates are still reported as absent here; callers that need
    /// the distinction use [`Resolver::resolve`].
    #[must_use]
    pub fn try_resolve(&self, name: &str) -> Option<Arc<Artifact>> {
        match self.resolve(name) {
            Ok(artifact) => Some(artifact),
            Err(err) => {
                debug!(reference = name, error = %err, "optional reference skipped");
                None
            }
        }
    }

    /// The core runtime library the artifact builds against
    ///
    /// # Errors
    /// Returns [`ResolveError::UnresolvedReference`] when no corlib is found
    pub fn find_corlib(&self, artifact: &Artifact) -> Result<Arc<Artifact>, ResolveError> {
        for name in CORLIB_NAMES {
            if let Some(reference) = artifact.reference(name) {
                return self.resolve_reference(reference);
            }
        }
        for name in CORLIB_NAMES {
            if let Some(found) = self.try_resolve(name) {
                return Ok(found);
            }
        }
        Err(ResolveError::UnresolvedReference {
            name: CORLIB_NAMES.join("|"),
            searched: self.search_directories.clone(),
        })
    }

    fn resolve_key(&self, key: &ReferenceKey) -> Result<Arc<Artifact>, ResolveError> {
        if let Some(hit) = self.by_key.get(key) {
            trace!(reference = %key, "resolver memo hit");
            return Ok(Arc::clone(hit.value()));
        }
        if let Some(registered) = self.registered.get(&key.name) {
            return Ok(Arc::clone(registered.value()));
        }

        let mut searched = Vec::new();
        for dir in &self.search_directories {
            for ext in CANDIDATE_EXTENSIONS {
                let candidate = dir.join(format!("{}.{ext}", key.name));
                searched.push(candidate.clone());
                if !candidate.is_file() {
                    continue;
                }
                let artifact = self.load(&candidate)?;
                if let Some(token) = key.token {
                    if artifact.public_key_token() != Some(token) {
                        debug!(candidate = %candidate.display(), "token mismatch, skipping");
                        continue;
                    }
                }
                self.by_key.insert(key.clone(), Arc::clone(&artifact));
                return Ok(artifact);
            }
        }

        Err(ResolveError::UnresolvedReference {
            name: key.name.clone(),
            searched,
        })
    }

    /// Read a file once per canonical path
    fn load(&self, path: &Path) -> Result<Arc<Artifact>, ResolveError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if let Some(hit) = self.by_path.get(&canonical) {
            return Ok(Arc::clone(hit.value()));
        }
        let artifact = Arc::new(codec::read(path, ReadOptions::default())?);
        debug!(artifact = %artifact.name, path = %path.display(), "loaded reference");
        self.by_path.insert(canonical, Arc::clone(&artifact));
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_artifact::Version;

    #[test]
    fn search_directories_deduplicated() {
        let mut resolver = Resolver::new();
        resolver.add_search_directory("/a");
        resolver.add_search_directory("/b");
        resolver.add_search_directory("/a");
        assert_eq!(resolver.search_directories().len(), 2);
        resolver.remove_search_directory(Path::new("/a"));
        assert_eq!(resolver.search_directories(), &[PathBuf::from("/b")]);
    }

    #[test]
    fn registered_artifact_resolves_without_disk() {
        let resolver = Resolver::new();
        let game = Arc::new(Artifact::new("Game", Version::default()));
        resolver.register(Arc::clone(&game));
        assert!(Arc::ptr_eq(&resolver.resolve("Game").unwrap(), &game));
    }

    #[test]
    fn unresolved_reports_searched_candidates() {
        let mut resolver = Resolver::new();
        resolver.add_search_directory("/nowhere");
        match resolver.resolve("Missing") {
            Err(ResolveError::UnresolvedReference { name, searched }) => {
                assert_eq!(name, "Missing");
                assert_eq!(
                    searched,
                    vec![
                        PathBuf::from("/nowhere/Missing.dll"),
                        PathBuf::from("/nowhere/Missing.exe")
                    ]
                );
            }
            other => panic!("expected unresolved reference, got {other:?}"),
        }
        assert!(resolver.try_resolve("Missing").is_none());
    }
}
