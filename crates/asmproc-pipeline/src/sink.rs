//! User-visible log sink
//!
//! Every message a run wants the user to see goes through one [`LogSink`].
//! Stages still emit `tracing` events for diagnostics; the sink is the
//! channel whose output decides what a build log shows.

use std::error::Error;
use std::fmt::{self, Debug, Write as _};
use std::sync::Mutex;

/// Severity of a sink message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warn => "warning",
            Self::Error => "error",
        })
    }
}

/// Destination for user-visible messages
pub trait LogSink: Send + Sync + Debug {
    /// Record one message
    fn log(&self, level: Level, message: &str);

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// Message followed by every source in the error chain, indented one level
/// per cause
#[must_use]
pub fn format_error_chain(error: &dyn Error) -> String {
    let mut out = error.to_string();
    let mut depth = 1;
    let mut source = error.source();
    while let Some(cause) = source {
        out.push('\n');
        for _ in 0..depth {
            out.push_str("  ");
        }
        let _ = write!(out, "caused by: {cause}");
        depth += 1;
        source = cause.source();
    }
    out
}

/// Prints every message to standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::Info => println!("{message}"),
            Level::Warn | Level::Error => println!("{level}: {message}"),
        }
    }
}

/// Keeps messages in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<(Level, String)>>,
}

impl CollectingSink {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything logged so far
    #[must_use]
    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Messages at one level
    #[must_use]
    pub fn at(&self, level: Level) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    /// Whether any message at `level` contains `needle`
    #[must_use]
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.at(level).iter().any(|m| m.contains(needle))
    }
}

impl LogSink for CollectingSink {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, message.to_string()));
        }
    }
}
