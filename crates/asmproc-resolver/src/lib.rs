//! asmproc Dependency Resolver
//!
//! Locates referenced artifacts through an in-memory registry and an ordered
//! list of search directories, memoizing every hit for the lifetime of one
//! [`Resolver`].
//!
//! # Example
//!
//! ```rust,ignore
//! use asmproc_resolver::Resolver;
//!
//! let mut resolver = Resolver::new();
//! resolver.add_search_directory("bin/Release");
//! let core = resolver.resolve("Engine.Core")?;
//! assert!(Arc::ptr_eq(&core, &resolver.resolve("Engine.Core")?));
//! ```

#![warn(unreachable_pub)]

mod error;
mod platform;
mod resolver;
mod scope;

pub use error::ResolveError;
pub use platform::Platform;
pub use resolver::Resolver;
pub use scope::{grant_name, grants_internals_to, ArtifactHandle, ArtifactScope};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
