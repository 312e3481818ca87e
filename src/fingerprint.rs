//! Persisted per-file signatures used to classify files as new, modified,
//! or unchanged since the last successful pass.
//!
//! The store is a single JSON file keyed by [`TrackedFile::identity`].
//! Writes go to a temp file in the same directory and are then renamed
//! over the target, so an interrupted write leaves the previous store intact.
//! A missing or unparsable store loads as empty: every file is then
//! classified as new and reprocessed.
//!
//! Local files are classified on size and modification time first. Content
//! is only read when the size agrees but the time does not, and the stored
//! entry carries a hash to compare against.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::{Classification, Fingerprint, Signature, SourceKind, TrackedFile};
use crate::scanner::hash_file;

#[derive(Debug, Default)]
pub struct FingerprintStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, Fingerprint>,
}

impl FingerprintStore {
    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store at `path`. Corruption is logged, not returned.
    pub fn load(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            entries: read_entries(path),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-read the persisted state, picking up commits made by another
    /// process since this store was loaded.
    pub fn refresh(&mut self) {
        if let Some(path) = &self.path {
            self.entries = read_entries(path);
        }
    }

    pub fn classify(&self, file: &TrackedFile) -> Classification {
        let current = file.signature();
        let Some(stored) = self.entries.get(&file.identity()) else {
            return Classification::New;
        };
        if signatures_match(&stored.signature, &current) {
            return Classification::Unchanged;
        }
        // Touched but possibly identical: let the content decide.
        match (&stored.signature.hash, &current.hash) {
            (Some(expected), None)
                if file.kind == SourceKind::Local && stored.signature.size == current.size =>
            {
                match hash_file(&file.path) {
                    Ok(actual) if actual == *expected => Classification::Unchanged,
                    _ => Classification::Modified,
                }
            }
            _ => Classification::Modified,
        }
    }

    pub fn classify_signature(&self, identity: &str, current: &Signature) -> Classification {
        match self.entries.get(identity) {
            None => Classification::New,
            Some(stored) if signatures_match(&stored.signature, current) => {
                Classification::Unchanged
            }
            Some(_) => Classification::Modified,
        }
    }

    /// Record `file`'s current signature. Call only after the action the
    /// classification triggered has succeeded.
    pub fn commit(&mut self, file: &TrackedFile) -> Result<()> {
        self.commit_signature(&file.identity(), file.signature())
    }

    pub fn commit_signature(&mut self, identity: &str, signature: Signature) -> Result<()> {
        // Merge onto the latest persisted state so concurrent runs do not
        // drop each other's commits.
        self.refresh();
        self.entries.insert(
            identity.to_string(),
            Fingerprint {
                signature,
                last_seen: Utc::now(),
            },
        );
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.entries)?;
        write_atomic(path, json.as_bytes())
            .with_context(|| format!("Failed to write fingerprint store {}", path.display()))
    }
}

/// Size must always agree. When both sides carry a content hash the hash
/// decides; otherwise fall back to the modification time.
fn signatures_match(stored: &Signature, current: &Signature) -> bool {
    if stored.size != current.size {
        return false;
    }
    match (&stored.hash, &current.hash) {
        (Some(a), Some(b)) => a == b,
        _ => stored.modified == current.modified,
    }
}

fn read_entries(path: &Path) -> BTreeMap<String, Fingerprint> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "fingerprint store unreadable, treating all files as new"
            );
            return BTreeMap::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "fingerprint store corrupt, treating all files as new"
            );
            BTreeMap::new()
        }
    }
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    // The temp file is created owner-only; give the result the target's
    // existing mode, or the usual one for a new file.
    match std::fs::metadata(path) {
        Ok(existing) => tmp.as_file().set_permissions(existing.permissions())?,
        Err(_) => set_new_file_mode(tmp.as_file())?,
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_new_file_mode(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_new_file_mode(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}
