//! Stage contract

use crate::context::ProcessorContext;
use crate::error::StageError;
use std::fmt::{self, Debug, Display};
use std::ops::BitOr;

/// Facts a stage establishes about the artifact and that later stages
/// depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Facts(u8);

impl Facts {
    pub const NONE: Self = Self(0);

    /// The artifact references the libraries later stages emit calls into
    pub const REFERENCES: Self = Self(1);

    /// Module initializer methods exist on local types
    pub const INITIALIZERS: Self = Self(1 << 1);

    /// Generated sources are waiting in the context
    pub const SOURCES: Self = Self(1 << 2);

    /// Compiled code has been merged into the artifact
    pub const MERGED: Self = Self(1 << 3);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::REFERENCES, "references"),
        (Self::INITIALIZERS, "initializers"),
        (Self::SOURCES, "sources"),
        (Self::MERGED, "merged"),
    ];

    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Facts {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Display for Facts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(fact, _)| self.contains(*fact))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// What a stage reads and establishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Access {
    pub requires: Facts,
    pub provides: Facts,
}

impl Access {
    #[inline]
    #[must_use]
    pub const fn new(requires: Facts, provides: Facts) -> Self {
        Self { requires, provides }
    }
}

/// One transformation applied to the artifact
///
/// A stage reports whether it mutated the artifact. Conditions it can work
/// around are logged through the context and reported as `Ok(false)`; an
/// `Err` aborts the whole run.
pub trait Stage: Debug {
    /// Stable stage name used in logs and errors
    fn name(&self) -> &'static str;

    /// Facts consumed and produced, checked when the pipeline is built
    fn access(&self) -> Access {
        Access::default()
    }

    /// Apply the transformation
    ///
    /// # Errors
    /// Returns a [`StageError`] when the artifact cannot be processed.
    fn process(&mut self, ctx: &mut ProcessorContext) -> Result<bool, StageError>;
}
