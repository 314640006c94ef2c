//! asmproc Compiler/Merger
//!
//! Turns generated source text into a standalone artifact, checking every
//! type and member it touches against the live artifact and the resolver,
//! then folds that artifact back into the original.
//!
//! # Core Concepts
//!
//! - [`parse_text`]: line-oriented source to type definitions
//! - [`Compiler`]: parse, check and collect references
//! - [`Diagnostic`]: one semantic problem; all of them are reported together
//! - [`merge`]: re-scope, append and re-layout
//!
//! # Example
//!
//! ```rust,ignore
//! use asmproc_compiler::{merge, Compiler};
//!
//! let compiled = Compiler::new("Game.Serializers").compile(&sources, scope)?;
//! let merged = merge(&original, &compiled)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod check;
mod compile;
mod error;
mod merge;
mod parse;

pub use compile::Compiler;
pub use error::{CompileError, Diagnostic, MergeError, ParseError};
pub use merge::merge;
pub use parse::{parse, parse_text, Unit};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
