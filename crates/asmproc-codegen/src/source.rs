//! Generated source units and companion naming

use crate::error::CodegenError;
use asmproc_artifact::known::SERIALIZERS_SUFFIX;
use regex::RegexBuilder;
use std::path::{Path, PathBuf};

/// Trailing artifact extension, matched case-insensitively
const ARTIFACT_EXTENSION: &str = r"\.(dll|exe)$";

/// Extension of source units written next to the companion
pub const SOURCE_EXTENSION: &str = "src";

/// A named unit of synthesized source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    /// Unit name, used in diagnostics
    pub name: String,

    /// Source text in the compiler's textual syntax
    pub text: String,

    /// Where the unit should be written when kept on disk
    pub file_name: Option<PathBuf>,
}

impl GeneratedSource {
    /// Create source unit
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            file_name: None,
        }
    }

    /// Designate an output file
    #[inline]
    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<PathBuf>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// File name when designated, unit name otherwise
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.file_name {
            Some(path) => path.display().to_string(),
            None => self.name.clone(),
        }
    }

    /// Number of non-empty lines
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.text.lines().filter(|l| !l.trim().is_empty()).count()
    }
}

/// Location of the serializers companion for the artifact at `path`
///
/// `Game.dll` becomes `Game.Serializers.dll`; `Tool.EXE` becomes
/// `Tool.Serializers.dll`.
///
/// # Errors
/// Returns [`CodegenError::InvalidArtifactPath`] when the path has neither
/// extension
pub fn serialization_artifact_location(path: &Path) -> Result<PathBuf, CodegenError> {
    let pattern = RegexBuilder::new(ARTIFACT_EXTENSION).case_insensitive(true).build()?;
    let text = path.to_string_lossy();
    if !pattern.is_match(&text) {
        return Err(CodegenError::InvalidArtifactPath(path.to_path_buf()));
    }
    let replacement = format!("{SERIALIZERS_SUFFIX}.dll");
    Ok(PathBuf::from(pattern.replace(&text, replacement.as_str()).into_owned()))
}

/// File for unit `unit` beside the companion at `companion`
///
/// `out/Game.Serializers.dll` and `DataSerializers` give
/// `out/Game.Serializers.DataSerializers.src`.
#[must_use]
pub fn source_file_name(companion: &Path, unit: &str) -> PathBuf {
    let stem = companion.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    companion.with_file_name(format!("{stem}.{unit}.{SOURCE_EXTENSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn companion_location_replaces_extension() {
        assert_eq!(
            serialization_artifact_location(Path::new("/out/Game.dll")).unwrap(),
            PathBuf::from("/out/Game.Serializers.dll")
        );
        assert_eq!(
            serialization_artifact_location(Path::new("Tool.EXE")).unwrap(),
            PathBuf::from("Tool.Serializers.dll")
        );
    }

    #[test]
    fn companion_location_requires_extension() {
        assert!(matches!(
            serialization_artifact_location(Path::new("Game.so")),
            Err(CodegenError::InvalidArtifactPath(_))
        ));
        // extension must be trailing
        assert!(serialization_artifact_location(Path::new("Game.dll.bak")).is_err());
    }

    #[test]
    fn source_files_sit_beside_the_companion() {
        let companion = serialization_artifact_location(Path::new("/out/Game.dll")).unwrap();
        assert_eq!(
            source_file_name(&companion, "AssemblyScan"),
            PathBuf::from("/out/Game.Serializers.AssemblyScan.src")
        );
    }

    #[test]
    fn display_name_prefers_file_name() {
        let source = GeneratedSource::new("unit", "");
        assert_eq!(source.display_name(), "unit");
        assert_eq!(source.with_file_name("/out/unit.src").display_name(), "/out/unit.src");
    }

    #[test]
    fn line_count_skips_blank_lines() {
        let source = GeneratedSource::new("unit", "type a\n\n  end\n");
        assert_eq!(source.line_count(), 2);
    }
}
