//! Reader/Writer for the artifact container and its symbol companion
//!
//! Container layout (little endian):
//!
//! ```text
//! "ASMA" | u16 format | u16 flags | [32-byte debug id] | u64 len | payload | 32-byte checksum
//! ```
//!
//! The payload is the `bincode` encoding of [`Artifact`]; the checksum is the
//! Blake3 [`Digest`] of the payload. When `flags` carries
//! [`HAS_DEBUG_HEADER`], the debug id names the companion symbol file
//! (same path, `.pdb` extension):
//!
//! ```text
//! "ASMS" | u16 format | 32-byte debug id | payload
//! ```
//!
//! whose payload maps method keys to per-instruction sequence points. The
//! debug id is the digest of that payload, so a stale companion is detected.

use crate::artifact::{Artifact, ArtifactKind, Characteristics};
use crate::body::{Instruction, SequencePoint};
use crate::hash::Digest;
use crate::member::TypeDef;
use crate::name::{PublicKeyToken, Reference, Version};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ARTIFACT_MAGIC: &[u8; 4] = b"ASMA";
const SYMBOLS_MAGIC: &[u8; 4] = b"ASMS";
const FORMAT_VERSION: u16 = 1;

/// Container flag: a debug id follows the flags
pub const HAS_DEBUG_HEADER: u16 = 0x1;

/// Extension of the symbol companion
pub const SYMBOLS_EXTENSION: &str = "pdb";

/// Reader/Writer errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// File system failure
    #[error("i/o error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The container could not be parsed
    #[error("corrupt artifact {path}: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    /// Symbols were expected but are absent or do not match
    #[error("missing symbols for {path}: {reason}")]
    MissingSymbols { path: PathBuf, reason: String },

    /// Payload could not be encoded
    #[error("cannot encode artifact payload")]
    Encode(#[from] bincode::Error),
}

impl CodecError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    fn missing_symbols(path: &Path, reason: impl Into<String>) -> Self {
        Self::MissingSymbols {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Options for [`read`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Attach sequence points from the companion file
    pub read_symbols: bool,
}

/// Options for [`write`]
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Emit the companion file (only honoured when symbols were read)
    pub write_symbols: bool,
}

/// Identity fields readable without decoding types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub name: String,
    pub version: Version,
    pub public_key_token: Option<PublicKeyToken>,
}

/// Prefix of the [`Artifact`] field order
#[derive(Deserialize)]
struct HeaderView {
    name: String,
    version: Version,
    _kind: ArtifactKind,
    _characteristics: Characteristics,
    public_key: Option<Vec<u8>>,
}

type SymbolTable = BTreeMap<String, Vec<(u32, SequencePoint)>>;

/// Sibling symbol path (`Game.dll` → `Game.pdb`)
#[must_use]
pub fn symbols_path(path: &Path) -> PathBuf {
    path.with_extension(SYMBOLS_EXTENSION)
}

/// Backup path used by [`keep_original`] (`Game.dll` → `Game.old.dll`)
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => path.with_extension(format!("old.{ext}")),
        None => path.with_extension("old"),
    }
}

/// Encode the container bytes for `artifact`, optionally with a debug id
///
/// # Errors
/// Returns [`CodecError::Encode`] if the payload cannot be serialized
pub fn encode(artifact: &Artifact, debug_id: Option<Digest>) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(artifact)?;
    let mut out = Vec::with_capacity(payload.len() + 80);
    out.extend_from_slice(ARTIFACT_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    let flags = if debug_id.is_some() { HAS_DEBUG_HEADER } else { 0 };
    out.extend_from_slice(&flags.to_le_bytes());
    if let Some(id) = debug_id {
        out.extend_from_slice(id.as_bytes());
    }
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(Digest::of(&payload).as_bytes());
    Ok(out)
}

/// Cursor over container bytes
struct Cursor<'a, 'p> {
    bytes: &'a [u8],
    pos: usize,
    path: &'p Path,
}

impl<'a> Cursor<'a, '_> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| CodecError::corrupt(self.path, format!("truncated {what}")))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self, what: &str) -> Result<u16, CodecError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u64(&mut self, what: &str) -> Result<u64, CodecError> {
        let b = self.take(8, what)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn digest(&mut self, what: &str) -> Result<Digest, CodecError> {
        let b = self.take(Digest::LEN, what)?;
        Digest::from_slice(b).map_err(|e| CodecError::corrupt(self.path, e.to_string()))
    }
}

/// Container split into its parts, checksum verified
struct Container<'a> {
    debug_id: Option<Digest>,
    payload: &'a [u8],
}

fn split<'a>(bytes: &'a [u8], path: &Path) -> Result<Container<'a>, CodecError> {
    let mut cur = Cursor { bytes, pos: 0, path };
    if cur.take(4, "magic")? != ARTIFACT_MAGIC {
        return Err(CodecError::corrupt(path, "bad magic"));
    }
    let format = cur.u16("format version")?;
    if format != FORMAT_VERSION {
        return Err(CodecError::corrupt(path, format!("unsupported format version {format}")));
    }
    let flags = cur.u16("flags")?;
    let debug_id = if flags & HAS_DEBUG_HEADER != 0 {
        Some(cur.digest("debug header")?)
    } else {
        None
    };
    let len = usize::try_from(cur.u64("payload length")?)
        .map_err(|_| CodecError::corrupt(path, "payload length overflow"))?;
    let payload = cur.take(len, "payload")?;
    let checksum = cur.digest("checksum")?;
    if cur.pos != bytes.len() {
        return Err(CodecError::corrupt(path, "trailing bytes after checksum"));
    }
    let actual = Digest::of(payload);
    if actual != checksum {
        return Err(CodecError::corrupt(
            path,
            format!("checksum mismatch: expected {}, got {}", checksum.short(), actual.short()),
        ));
    }
    Ok(Container { debug_id, payload })
}

/// Decode container bytes (no symbols)
///
/// # Errors
/// Returns [`CodecError::CorruptArtifact`] for any structural problem
pub fn decode(bytes: &[u8], path: &Path) -> Result<Artifact, CodecError> {
    let container = split(bytes, path)?;
    bincode::deserialize(container.payload).map_err(|e| CodecError::corrupt(path, e.to_string()))
}

/// Load an artifact
///
/// Missing or stale symbols are not fatal: they are logged and the artifact
/// comes back with `has_symbols == false`.
///
/// # Errors
/// Returns [`CodecError::Io`] if the file cannot be read and
/// [`CodecError::CorruptArtifact`] if it cannot be parsed
pub fn read(path: &Path, options: ReadOptions) -> Result<Artifact, CodecError> {
    let bytes = fs::read(path).map_err(|e| CodecError::io(path, e))?;
    let container = split(&bytes, path)?;
    let mut artifact: Artifact = bincode::deserialize(container.payload)
        .map_err(|e| CodecError::corrupt(path, e.to_string()))?;
    artifact.location = Some(path.to_path_buf());

    if options.read_symbols {
        match attach_symbols(&mut artifact, path, container.debug_id) {
            Ok(()) => artifact.has_symbols = true,
            Err(err) => warn!(error = %err, "continuing without symbols"),
        }
    }
    debug!(artifact = %artifact.name, path = %path.display(), symbols = artifact.has_symbols, "read artifact");
    Ok(artifact)
}

fn attach_symbols(artifact: &mut Artifact, path: &Path, debug_id: Option<Digest>) -> Result<(), CodecError> {
    let expected = debug_id.ok_or_else(|| CodecError::missing_symbols(path, "artifact has no debug header"))?;
    let pdb = symbols_path(path);
    let bytes = fs::read(&pdb)
        .map_err(|e| CodecError::missing_symbols(path, format!("{}: {e}", pdb.display())))?;

    let mut cur = Cursor { bytes: &bytes, pos: 0, path: &pdb };
    let bad = |reason: &str| CodecError::missing_symbols(path, reason.to_string());
    if cur.take(4, "magic").map_err(|_| bad("truncated symbol file"))? != SYMBOLS_MAGIC {
        return Err(bad("bad symbol file magic"));
    }
    if cur.u16("format").map_err(|_| bad("truncated symbol file"))? != FORMAT_VERSION {
        return Err(bad("unsupported symbol format"));
    }
    let id = cur.digest("debug id").map_err(|_| bad("truncated symbol file"))?;
    let payload = &bytes[cur.pos..];
    if id != expected || Digest::of(payload) != expected {
        return Err(bad("symbol file does not match artifact"));
    }
    let table: SymbolTable =
        bincode::deserialize(payload).map_err(|e| CodecError::missing_symbols(path, e.to_string()))?;

    for_each_method_body(artifact, &mut |key, instructions| {
        if let Some(points) = table.get(key) {
            for (offset, point) in points {
                if let Some(ins) = instructions.iter_mut().find(|i| i.offset == *offset) {
                    ins.sequence_point = Some(point.clone());
                }
            }
        }
    });
    Ok(())
}

fn collect_symbols(artifact: &mut Artifact) -> SymbolTable {
    let mut table = SymbolTable::new();
    for_each_method_body(artifact, &mut |key, instructions| {
        let points: Vec<_> = instructions
            .iter()
            .filter_map(|i| i.sequence_point.clone().map(|p| (i.offset, p)))
            .collect();
        if !points.is_empty() {
            table.insert(key.to_string(), points);
        }
    });
    table
}

fn for_each_method_body(
    artifact: &mut Artifact,
    f: &mut dyn FnMut(&str, &mut Vec<Instruction>),
) {
    fn walk(prefix: Option<&str>, ty: &mut TypeDef, f: &mut dyn FnMut(&str, &mut Vec<Instruction>)) {
        let name = match prefix {
            Some(outer) => format!("{outer}/{}", ty.name),
            None => ty.top_level_name(),
        };
        for method in &mut ty.methods {
            let key = method.key(&name);
            if let Some(body) = &mut method.body {
                f(&key, &mut body.instructions);
            }
        }
        for nested in &mut ty.nested {
            walk(Some(&name), nested, f);
        }
    }
    for ty in &mut artifact.types {
        walk(None, ty, f);
    }
}

/// Copy the file at `path` to its [`backup_path`], replacing an older backup
///
/// # Errors
/// Returns [`CodecError::Io`] if the copy fails
pub fn keep_original(path: &Path) -> Result<PathBuf, CodecError> {
    let backup = backup_path(path);
    fs::copy(path, &backup).map_err(|e| CodecError::io(&backup, e))?;
    debug!(backup = %backup.display(), "kept original");
    Ok(backup)
}

/// Save an artifact
///
/// Symbols are written only when requested and previously read, so offsets
/// in the companion always describe the bodies they were captured from.
///
/// # Errors
/// Returns [`CodecError::Io`] on file system failures
pub fn write(artifact: &Artifact, path: &Path, options: WriteOptions) -> Result<(), CodecError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CodecError::io(parent, e))?;
    }

    let with_symbols = options.write_symbols && artifact.has_symbols;
    let bytes = if with_symbols {
        let mut owned = artifact.clone();
        let table = collect_symbols(&mut owned);
        let payload = bincode::serialize(&table)?;
        let id = Digest::of(&payload);

        let mut pdb = Vec::with_capacity(payload.len() + 38);
        pdb.extend_from_slice(SYMBOLS_MAGIC);
        pdb.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        pdb.extend_from_slice(id.as_bytes());
        pdb.extend_from_slice(&payload);
        let pdb_path = symbols_path(path);
        fs::write(&pdb_path, pdb).map_err(|e| CodecError::io(&pdb_path, e))?;

        encode(artifact, Some(id))?
    } else {
        encode(artifact, None)?
    };

    fs::write(path, bytes).map_err(|e| CodecError::io(path, e))?;
    debug!(artifact = %artifact.name, path = %path.display(), symbols = with_symbols, "wrote artifact");
    Ok(())
}

/// Read name, version and token without decoding types
///
/// # Errors
/// Same as [`read`]
pub fn read_header(path: &Path) -> Result<ArtifactHeader, CodecError> {
    let bytes = fs::read(path).map_err(|e| CodecError::io(path, e))?;
    let container = split(&bytes, path)?;
    // legacy bincode options accept the trailing fields
    let view: HeaderView =
        bincode::deserialize(container.payload).map_err(|e| CodecError::corrupt(path, e.to_string()))?;
    Ok(ArtifactHeader {
        name: view.name,
        version: view.version,
        public_key_token: view.public_key.as_deref().map(PublicKeyToken::from_public_key),
    })
}

impl ArtifactHeader {
    /// Reference pointing at the described artifact
    #[must_use]
    pub fn to_reference(&self) -> Reference {
        Reference {
            name: self.name.clone(),
            version: self.version,
            public_key_token: self.public_key_token,
        }
    }
}
