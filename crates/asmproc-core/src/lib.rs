//! asmproc Orchestrator
//!
//! Runs the whole post-build pass over one artifact: builds the resolver,
//! reads the artifact, skips it when already processed, runs the stage
//! pipeline, marks and writes the result.
//!
//! # Core Concepts
//!
//! - [`ProcessorOptions`]: every switch of a run, loadable from TOML
//! - [`ProcessorApp`]: one configured processor; `run` reports pass/fail
//! - [`Outcome`]: how a successful run ended
//! - [`LogSink`]: where user-visible messages go
//!
//! # Example
//!
//! ```rust,ignore
//! use asmproc_core::{ProcessorApp, ProcessorOptions};
//!
//! let options = ProcessorOptions::new()
//!     .with_search_directory("bin/Debug")
//!     .with_serialization(true);
//! let ok = ProcessorApp::new(options).run("bin/Debug/Game.dll".as_ref(), "out/Game.dll".as_ref());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod app;
mod error;
mod options;

pub use app::{Outcome, ProcessorApp};
pub use error::ProcessError;
pub use options::ProcessorOptions;

pub use asmproc_pipeline::{format_error_chain, CollectingSink, Level, LogSink, StdoutSink};
pub use asmproc_resolver::Platform;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
