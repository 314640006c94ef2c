//! Processor options
//!
//! Options come from command-line flags, optionally layered over a TOML file:
//!
//! ```toml
//! platform = "Android"
//! target-framework = "v13.0"
//! framework-root = "/opt/frameworks"
//! search-directories = ["bin/Debug"]
//! add-references = ["Engine.Rendering"]
//! serialization = true
//! use-symbols = true
//! ```

use crate::error::ProcessError;
use asmproc_resolver::Platform;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};

/// Settings for one processing run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProcessorOptions {
    #[serde(serialize_with = "serialize_platform", deserialize_with = "deserialize_platform")]
    pub platform: Platform,
    pub target_framework: Option<String>,

    /// Root holding per-platform framework reference folders
    pub framework_root: Option<PathBuf>,
    pub search_directories: Vec<PathBuf>,

    /// Artifact files registered ahead of the search directories
    pub references: Vec<PathBuf>,

    /// Artifact names the processed artifact must reference
    pub add_references: Vec<String>,

    /// File holding the public key of a strong-named artifact
    pub sign_key_file: Option<PathBuf>,
    pub serialization: bool,
    pub parameter_key: bool,
    pub module_initializer: bool,
    /// Register serializable members with the update engine; only used
    /// together with `serialization`
    pub update_engine: bool,

    /// New artifact name
    pub rename: Option<String>,
    pub use_symbols: bool,
    /// Copy the input to `<stem>.old.<ext>` whenever the output is written
    pub keep_original: bool,
    pub delete_output_on_error: bool,
    pub treat_warnings_as_errors: bool,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            target_framework: None,
            framework_root: None,
            search_directories: Vec::new(),
            references: Vec::new(),
            add_references: Vec::new(),
            sign_key_file: None,
            serialization: false,
            parameter_key: false,
            module_initializer: true,
            update_engine: true,
            rename: None,
            use_symbols: false,
            keep_original: false,
            delete_output_on_error: false,
            treat_warnings_as_errors: false,
        }
    }
}

impl ProcessorOptions {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a TOML file; missing keys keep their defaults
    ///
    /// # Errors
    /// Returns [`ProcessError::Io`] if the file cannot be read and
    /// [`ProcessError::Config`] if it is not valid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ProcessError> {
        let text = std::fs::read_to_string(path).map_err(|e| ProcessError::io(path, e))?;
        toml::from_str(&text).map_err(|source| ProcessError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_search_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_directories.push(dir.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_serialization(mut self, enabled: bool) -> Self {
        self.serialization = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_parameter_key(mut self, enabled: bool) -> Self {
        self.parameter_key = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_update_engine(mut self, enabled: bool) -> Self {
        self.update_engine = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_sign_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sign_key_file = Some(path.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_rename(mut self, name: impl Into<String>) -> Self {
        self.rename = Some(name.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_symbols(mut self, enabled: bool) -> Self {
        self.use_symbols = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_keep_original(mut self, enabled: bool) -> Self {
        self.keep_original = enabled;
        self
    }
}

fn serialize_platform<S: Serializer>(platform: &Platform, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(platform.as_str())
}

fn deserialize_platform<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Platform, D::Error> {
    let name = String::deserialize(deserializer)?;
    name.parse().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn module_initializer_on_by_default() {
        let options = ProcessorOptions::default();
        assert!(options.module_initializer);
        assert!(options.update_engine);
        assert!(!options.serialization);
        assert_eq!(options.platform, Platform::Windows);
    }

    #[test]
    fn toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "platform = \"ios\"\ntarget-framework = \"v1.0\"\nsearch-directories = [\"lib\"]\nserialization = true\nmodule-initializer = false\nupdate-engine = false"
        )
        .unwrap();

        let options = ProcessorOptions::from_toml_file(file.path()).unwrap();
        assert_eq!(options.platform, Platform::Ios);
        assert_eq!(options.target_framework.as_deref(), Some("v1.0"));
        assert_eq!(options.search_directories, vec![PathBuf::from("lib")]);
        assert!(options.serialization);
        assert!(!options.module_initializer);
        assert!(!options.update_engine);
        assert!(!options.keep_original);
    }

    #[test]
    fn unknown_keys_and_platforms_rejected() {
        for text in ["platfrom = \"Linux\"", "platform = \"Amiga\""] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            write!(file, "{text}").unwrap();
            let err = ProcessorOptions::from_toml_file(file.path()).unwrap_err();
            assert!(matches!(err, ProcessError::Config { .. }), "{text}");
        }
    }

    #[test]
    fn options_survive_toml_round_trip() {
        let options = ProcessorOptions::new()
            .with_platform(Platform::Linux)
            .with_serialization(true)
            .with_rename("Game.Client");
        let text = toml::to_string(&options).unwrap();
        assert_eq!(toml::from_str::<ProcessorOptions>(&text).unwrap(), options);
    }
}
