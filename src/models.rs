//! Core data models shared by the scanner, fingerprint store, mirror
//! client, generator, and conversion driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where a tracked file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Local,
    RemoteCached,
}

/// A text file observed by the scanner or downloaded by the mirror client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// Absolute path on disk (for remote files, the cache copy).
    pub path: PathBuf,
    /// Directory the file was found under, used for grouping.
    pub root: PathBuf,
    /// Path relative to `root`, `/`-separated.
    pub relative: String,
    /// Logical document name (file name including extension).
    pub name: String,
    pub size: u64,
    /// Modification time in seconds since the epoch.
    pub modified: i64,
    /// Hex SHA-256 of the content, when computed.
    pub hash: Option<String>,
    pub kind: SourceKind,
    /// Remote file id for [`SourceKind::RemoteCached`] files.
    pub remote_id: Option<String>,
}

impl TrackedFile {
    /// Key under which the fingerprint store records this file.
    pub fn identity(&self) -> String {
        match (&self.kind, &self.remote_id) {
            (SourceKind::RemoteCached, Some(id)) => format!("remote:{}", id),
            _ => self.path.to_string_lossy().to_string(),
        }
    }

    /// Current signature of this file.
    pub fn signature(&self) -> Signature {
        Signature {
            size: self.size,
            modified: self.modified,
            hash: self.hash.clone(),
        }
    }
}

/// The comparable part of a [`Fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub size: u64,
    pub modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Persisted signature of a file plus the time it was last committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(flatten)]
    pub signature: Signature,
    pub last_seen: DateTime<Utc>,
}

/// Outcome of comparing a file against its stored fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Unchanged,
    New,
    Modified,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Unchanged => write!(f, "unchanged"),
            Classification::New => write!(f, "new"),
            Classification::Modified => write!(f, "modified"),
        }
    }
}

/// Metadata for a file or document in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileMeta {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: DateTime<Utc>,
    /// Size in bytes; native documents report none.
    #[serde(default)]
    pub size: Option<u64>,
    /// Provider content checksum, when available.
    #[serde(default)]
    pub checksum: Option<String>,
}

impl RemoteFileMeta {
    /// Signature built only from remote-side values, so it is never
    /// compared against local filesystem timestamps.
    pub fn signature(&self) -> Signature {
        Signature {
            size: self.size.unwrap_or(0),
            modified: self.modified_time.timestamp(),
            hash: self.checksum.clone(),
        }
    }
}

/// A file that failed during a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub name: String,
    pub cause: String,
}

/// Counts produced by a conversion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub converted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<FileError>,
}

impl RunSummary {
    pub fn errored(&self) -> u64 {
        self.errors.len() as u64
    }

    /// Process exit code: zero only for a run without errors.
    pub fn exit_code(&self) -> i32 {
        if self.errors.is_empty() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Converted: {}, Updated: {}, Skipped (unchanged): {}, Errors: {}",
            self.converted,
            self.updated,
            self.skipped,
            self.errored()
        )
    }
}
