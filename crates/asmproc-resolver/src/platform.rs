//! Target platforms and their framework reference directories

use crate::error::ResolveError;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Platform the processed artifact targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    #[default]
    Windows,
    Linux,
    MacOS,
    Android,
    Ios,
    WindowsStore,
}

impl Platform {
    const ALL: [Platform; 6] = [
        Self::Windows,
        Self::Linux,
        Self::MacOS,
        Self::Android,
        Self::Ios,
        Self::WindowsStore,
    ];

    /// Canonical name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Linux => "Linux",
            Self::MacOS => "MacOS",
            Self::Android => "Android",
            Self::Ios => "iOS",
            Self::WindowsStore => "WindowsStore",
        }
    }

    /// Whether reference assemblies come from a versioned framework folder
    #[inline]
    #[must_use]
    pub const fn requires_target_framework(self) -> bool {
        matches!(self, Self::Android | Self::Ios | Self::WindowsStore)
    }

    /// Directories holding the platform's reference artifacts, in search order
    ///
    /// Desktop platforms resolve everything through the configured search
    /// directories and contribute nothing here.
    ///
    /// # Errors
    /// Returns [`ResolveError::MissingTargetFramework`] for mobile and store
    /// platforms when `target_framework` is empty
    pub fn framework_directories(
        self,
        root: &Path,
        target_framework: Option<&str>,
    ) -> Result<Vec<PathBuf>, ResolveError> {
        if !self.requires_target_framework() {
            return Ok(Vec::new());
        }
        let framework = target_framework
            .filter(|tf| !tf.is_empty())
            .ok_or_else(|| ResolveError::MissingTargetFramework {
                platform: self.to_string(),
            })?;

        Ok(match self {
            Self::Android => {
                let base = root.join("MonoAndroid");
                vec![base.join(framework), base.join("v1.0")]
            }
            Self::Ios => {
                let base = root.join("Xamarin.iOS");
                vec![base.join(framework), base.join("v1.0")]
            }
            _ => vec![root.join(".NETCore").join(framework)],
        })
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ResolveError::UnknownPlatform(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parse_case_insensitive() {
        assert_eq!("ios".parse::<Platform>().unwrap(), Platform::Ios);
        assert_eq!("windowsstore".parse::<Platform>().unwrap(), Platform::WindowsStore);
        assert!(matches!(
            "amiga".parse::<Platform>(),
            Err(ResolveError::UnknownPlatform(_))
        ));
    }

    #[test]
    fn desktop_platforms_add_nothing() {
        let dirs = Platform::Linux
            .framework_directories(Path::new("/ref"), None)
            .unwrap();
        assert!(dirs.is_empty());
    }

    #[test]
    fn mobile_platforms_require_target_framework() {
        for platform in [Platform::Android, Platform::Ios, Platform::WindowsStore] {
            let err = platform
                .framework_directories(Path::new("/ref"), Some(""))
                .unwrap_err();
            assert!(matches!(err, ResolveError::MissingTargetFramework { .. }));
        }
    }

    #[test]
    fn android_directories_in_search_order() {
        let dirs = Platform::Android
            .framework_directories(Path::new("/ref"), Some("v5.0"))
            .unwrap();
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/ref/MonoAndroid/v5.0"),
                PathBuf::from("/ref/MonoAndroid/v1.0")
            ]
        );
    }
}
