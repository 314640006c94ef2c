//! asmproc Processor Pipeline
//!
//! Ordered transformation stages applied to one loaded artifact.
//!
//! # Core Concepts
//!
//! - [`ProcessorContext`]: the artifact, the resolver and the log sink of
//!   one run
//! - [`Stage`]: one transformation reporting whether it changed anything
//! - [`Access`]: facts a stage requires and provides, checked when the
//!   [`Pipeline`] is built
//! - [`LogSink`]: user-visible messages, separate from `tracing` diagnostics
//! - [`mark_processed`]: the marker that makes a second run a no-op
//!
//! # Example
//!
//! ```rust,ignore
//! use asmproc_pipeline::{stages, Pipeline};
//!
//! let mut pipeline = Pipeline::builder()
//!     .stage(stages::SerializationStage::new(None))
//!     .stage(stages::CompileMergeStage)
//!     .stage(stages::ModuleInitializerStage)
//!     .build()?;
//! let modified = pipeline.run(&mut ctx)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod context;
mod error;
mod marker;
mod pipeline;
mod sink;
mod stage;

pub mod pattern;
pub mod stages;

pub use context::ProcessorContext;
pub use error::{PipelineError, StageError};
pub use marker::{is_processed, mark_processed};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use sink::{format_error_chain, CollectingSink, Level, LogSink, StdoutSink};
pub use stage::{Access, Facts, Stage};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
