//! Directive parsing.
//!
//! Build instructions live in tagged comments inside the sources:
//!
//! ```cpp
//! //i target name calculator
//! //i target type lib static
//! /*i
//!  qt core network
//!  define USE_FAST_PATH
//! */
//! ```
//!
//! The parser turns those lines (and local `#include`s) into a stream of
//! [`DirectiveEvent`]s. It knows nothing about build units or tasks; the
//! owning unit pulls the events and applies them.

mod command;
mod file;

pub use command::{parse_command, parse_commands};
pub use file::{DirectiveReader, ParseOptions};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const TAG_ONE_LINE: &str = "//i ";
pub const TAG_BLOCK_BEGIN: &str = "/*i";
pub const TAG_BLOCK_END: &str = "*/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetKind {
    #[default]
    Application,
    Library,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Linkage {
    Static,
    #[default]
    Dynamic,
}

/// Result of scanning one file, sent last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub path: PathBuf,
    /// Companion source set with the `source` command
    pub source_override: Option<String>,
    pub checksum: String,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    /// Whole file, only kept in pipe mode
    pub contents: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveEvent {
    TargetName(String),
    TargetType(TargetKind, Option<Linkage>),
    ModulesEnabled(Vec<String>),
    DefinesAdded(Vec<String>),
    IncludesAdded(Vec<String>),
    LibsAdded(Vec<String>),
    ToolRequested { tool: String, args: Vec<String> },
    SubprojectRequested(String),
    VersionSet(Version),
    FeatureDeclared { name: String, default_enabled: bool },
    /// A local include (or companion source) that should be parsed too.
    IncludeRequested { file: String, force: bool },
    Parsed(ParsedFile),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("file {0} does not exist")]
    NotFound(PathBuf),

    #[error("file {path} could not be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid target type: {0}")]
    InvalidTargetType(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("command '{0}' is missing its argument")]
    MissingArgument(String),
}

/// Parses a version leniently: `2`, `2.1` and `2.1.3` are all accepted.
pub fn parse_version(text: &str) -> Result<Version, ParseError> {
    if let Ok(version) = Version::parse(text) {
        return Ok(version);
    }

    let mut parts = [0u64; 3];
    let pieces: Vec<&str> = text.split('.').collect();
    if pieces.is_empty() || pieces.len() > 3 {
        return Err(ParseError::InvalidVersion(text.to_string()));
    }
    for (slot, piece) in parts.iter_mut().zip(&pieces) {
        *slot = piece
            .parse()
            .map_err(|_| ParseError::InvalidVersion(text.to_string()))?;
    }
    Ok(Version::new(parts[0], parts[1], parts[2]))
}
