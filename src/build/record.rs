//! Per-file incremental state.

use crate::config::ChecksumPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileKind {
    #[default]
    CompilationUnit,
    Resource,
}

/// What the build knows about one file of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub kind: FileKind,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub checksum: String,
    #[serde(skip)]
    pub contents: Option<Vec<u8>>,
    pub object_file: Option<String>,
    pub generated_file: Option<String>,
    pub generated_object_file: Option<String>,
}

impl FileRecord {
    /// Placeholder stored as soon as a parse is requested.
    pub fn requested(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..Default::default()
        }
    }

    /// Every object that goes into the link step.
    pub fn objects(&self) -> impl Iterator<Item = &str> {
        self.object_file
            .iter()
            .chain(self.generated_object_file.iter())
            .map(String::as_str)
    }
}

pub type FileStore = BTreeMap<PathBuf, FileRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Clean,
    Dirty,
    Missing,
}

/// Compares a record against the file on disk.
pub fn file_state(record: &FileRecord, policy: ChecksumPolicy) -> FileState {
    let Ok(meta) = fs::metadata(&record.path) else {
        return FileState::Missing;
    };

    let (modified, created) = file_times(&meta);
    if modified != record.modified || created != record.created {
        return FileState::Dirty;
    }

    if policy == ChecksumPolicy::Content {
        match fs::read(&record.path) {
            Ok(bytes) if checksum(&bytes) == record.checksum => {}
            _ => return FileState::Dirty,
        }
    }

    FileState::Clean
}

/// True when the file changed (or vanished) since it was recorded.
pub fn is_dirty(record: &FileRecord, policy: ChecksumPolicy) -> bool {
    file_state(record, policy) != FileState::Clean
}

/// SHA-256 of the content, lowercase hex.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// (modified, created); filesystems without birth times give `None`.
pub fn file_times(meta: &Metadata) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    (
        meta.modified().ok().map(DateTime::<Utc>::from),
        meta.created().ok().map(DateTime::<Utc>::from),
    )
}
