//! asmproc Artifact Model
//!
//! Typed in-memory model of a compiled binary unit, plus its on-disk
//! container and debug-symbol companion.
//!
//! # Core Concepts
//!
//! - [`Artifact`]: one module with its references, attributes and types
//! - [`TypeSig`] / [`TypeRef`]: tagged-variant type descriptions
//! - [`CustomAttribute`]: attributes with identity resolved to [`KnownAttribute`]
//! - [`MethodBody`]: lowered instruction list with offset-preserving edits
//! - [`codec`]: checksummed container Reader/Writer
//!
//! # Example
//!
//! ```rust,ignore
//! use asmproc_artifact::codec::{self, ReadOptions, WriteOptions};
//!
//! let artifact = codec::read(path, ReadOptions { read_symbols: true })?;
//! println!("{} has {} types", artifact.full_name(), artifact.type_names().len());
//! codec::write(&artifact, out, WriteOptions::default())?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod attribute;
mod body;
mod hash;
mod member;
mod name;
mod types;

pub mod codec;
pub mod known;
pub mod visit;

pub use artifact::{Artifact, ArtifactKind, Characteristics};
pub use attribute::{AttrValue, AttributeKind, AttributeList, CustomAttribute, KnownAttribute};
pub use body::{Instruction, MethodBody, Op, SequencePoint};
pub use codec::{CodecError, ReadOptions, WriteOptions};
pub use hash::{Digest, DigestError};
pub use member::{FieldDef, MethodDef, Param, PropertyDef, TypeDef, TypeKind, Visibility};
pub use name::{NameError, PublicKeyToken, Reference, ReferenceKey, Version};
pub use types::{FieldRef, MethodRef, Primitive, SigParseError, TypeRef, TypeSig};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
