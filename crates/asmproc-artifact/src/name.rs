//! Artifact identity: versions, strong-name tokens and references

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Four-part version number (`major.minor.build.revision`)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl Version {
    /// Create version
    #[inline]
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for Version {
    type Err = NameError;

    /// Accepts one to four dot-separated parts; missing parts are zero
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u16; 4];
        let mut count = 0;
        for piece in s.split('.') {
            if count == 4 {
                return Err(NameError::InvalidVersion(s.to_string()));
            }
            parts[count] = piece
                .trim()
                .parse()
                .map_err(|_| NameError::InvalidVersion(s.to_string()))?;
            count += 1;
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

/// Eight-byte strong-name token
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKeyToken([u8; 8]);

impl PublicKeyToken {
    /// Wrap raw token bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Derive the token of a public key: last eight bytes of its SHA-256, reversed
    #[must_use]
    pub fn from_public_key(key: &[u8]) -> Self {
        let hash = Sha256::digest(key);
        let mut token = [0u8; 8];
        token.copy_from_slice(&hash[hash.len() - 8..]);
        token.reverse();
        Self(token)
    }

    /// Raw bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl Display for PublicKeyToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PublicKeyToken {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| NameError::InvalidToken(s.to_string()))?;
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| NameError::InvalidToken(s.to_string()))?;
        Ok(Self(arr))
    }
}

/// Pointer from one artifact to another
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    pub version: Version,
    pub public_key_token: Option<PublicKeyToken>,
}

impl Reference {
    /// Unsigned reference
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            public_key_token: None,
        }
    }

    /// Attach a strong-name token
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: PublicKeyToken) -> Self {
        self.public_key_token = Some(token);
        self
    }

    /// Memoization identity
    #[inline]
    #[must_use]
    pub fn key(&self) -> ReferenceKey {
        ReferenceKey {
            name: self.name.clone(),
            token: self.public_key_token,
        }
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Version={}, PublicKeyToken=", self.name, self.version)?;
        match &self.public_key_token {
            Some(token) => write!(f, "{token}"),
            None => f.write_str("null"),
        }
    }
}

/// Identity used to memoize resolution: name plus strong-name token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceKey {
    pub name: String,
    pub token: Option<PublicKeyToken>,
}

impl Display for ReferenceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.token {
            Some(token) => write!(f, "{} ({token})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Name parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// Not `a[.b[.c[.d]]]` with u16 parts
    #[error("invalid version: '{0}'")]
    InvalidVersion(String),

    /// Not sixteen hex characters
    #[error("invalid public key token: '{0}'")]
    InvalidToken(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parse_pads_missing_parts() {
        assert_eq!("1.2".parse::<Version>().unwrap(), Version::new(1, 2, 0, 0));
        assert_eq!(Version::new(1, 2, 3, 4).to_string(), "1.2.3.4");
        assert!("1.2.3.4.5".parse::<Version>().is_err());
        assert!("1.x".parse::<Version>().is_err());
    }

    #[test]
    fn public_key_token_deterministic() {
        let key = vec![7u8; 160];
        let a = PublicKeyToken::from_public_key(&key);
        let b = PublicKeyToken::from_public_key(&key);
        assert_eq!(a, b);
        assert_ne!(a, PublicKeyToken::from_public_key(&[1u8; 160]));
    }

    #[test]
    fn public_key_token_hex_round_trip() {
        let token = PublicKeyToken::new([0xde, 0xad, 0xbe, 0xef, 0, 1, 2, 3]);
        assert_eq!(token.to_string(), "deadbeef00010203");
        assert_eq!(token.to_string().parse::<PublicKeyToken>().unwrap(), token);
        assert!("abcd".parse::<PublicKeyToken>().is_err());
    }

    #[test]
    fn reference_display_and_key() {
        let r = Reference::new("Engine.Core", Version::new(1, 0, 0, 0));
        assert_eq!(r.to_string(), "Engine.Core, Version=1.0.0.0, PublicKeyToken=null");

        let token = PublicKeyToken::new([1; 8]);
        let signed = r.clone().with_token(token);
        assert_ne!(r.key(), signed.key());
        assert_eq!(signed.key().name, "Engine.Core");
    }
}
