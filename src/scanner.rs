//! Local scanner: walk the monitored directories for text files.
//!
//! Unreadable entries are skipped and reported in [`ScanReport::skipped`];
//! they never abort the scan. Output is sorted by path so that repeated
//! scans of an unchanged tree produce identical documents.
//!
//! A scan only reads metadata. Content hashes are computed on demand by
//! the fingerprint store, when size and modification time disagree.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{Config, WatchConfig};
use crate::models::{SourceKind, TrackedFile};

/// Result of a scan: files found plus entries that could not be read.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub files: Vec<TrackedFile>,
    pub skipped: Vec<(PathBuf, String)>,
}

pub struct Scanner {
    extensions: Vec<String>,
    exclude_set: GlobSet,
    /// Absolute paths (files or directory trees) never reported.
    excluded_paths: Vec<PathBuf>,
    follow_symlinks: bool,
}

impl Scanner {
    pub fn new(watch: &WatchConfig) -> Result<Self> {
        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(watch.exclude_globs.clone());

        Ok(Self {
            extensions: normalize_extensions(&watch.extensions),
            exclude_set: build_globset(&default_excludes)?,
            excluded_paths: Vec::new(),
            follow_symlinks: watch.follow_symlinks,
        })
    }

    /// Scanner for `config`'s watch settings that never reports the
    /// generated document or anything under the cache directory.
    pub fn for_config(config: &Config) -> Result<Self> {
        Ok(Self::new(&config.watch)?
            .with_excluded_paths([config.output.path.clone(), config.cache.dir.clone()]))
    }

    pub fn with_excluded_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.excluded_paths.extend(paths.into_iter().map(|p| absolute(&p)));
        self
    }

    /// Whether `path` has a monitored extension and is not excluded.
    pub fn matches(&self, path: &Path) -> bool {
        matches_extension(path, &self.extensions)
            && !self.exclude_set.is_match(path)
            && !self.is_excluded_path(&absolute(path))
    }

    fn is_excluded_path(&self, path: &Path) -> bool {
        self.excluded_paths.iter().any(|p| path.starts_with(p))
    }

    pub fn scan(&self, dirs: &[PathBuf]) -> ScanReport {
        let mut report = ScanReport::default();

        for root in dirs {
            let root = absolute(root);
            if !root.is_dir() {
                tracing::warn!(dir = %root.display(), "monitored directory not found, skipping");
                report
                    .skipped
                    .push((root.clone(), "directory not found".to_string()));
                continue;
            }

            let walker = WalkDir::new(&root)
                .follow_links(self.follow_symlinks)
                .into_iter()
                .filter_entry(|e| !self.is_excluded_path(e.path()));
            for entry in walker {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "skipping unreadable entry"
                        );
                        report.skipped.push((path, e.to_string()));
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }

                let path = entry.path();
                let relative = path.strip_prefix(&root).unwrap_or(path);
                let rel_str = relative.to_string_lossy().replace('\\', "/");

                if self.exclude_set.is_match(&rel_str) || !self.matches(path) {
                    continue;
                }

                match file_to_tracked(path, &root, &rel_str) {
                    Ok(file) => report.files.push(file),
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "skipping unreadable file"
                        );
                        report.skipped.push((path.to_path_buf(), e.to_string()));
                    }
                }
            }
        }

        report.files.sort_by(|a, b| a.path.cmp(&b.path));
        report
    }
}

/// Builds the tracked entry from metadata alone; `hash` stays empty.
fn file_to_tracked(path: &Path, root: &Path, relative: &str) -> Result<TrackedFile> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(TrackedFile {
        path: path.to_path_buf(),
        root: root.to_path_buf(),
        relative: relative.to_string(),
        name,
        size: metadata.len(),
        modified,
        hash: None,
        kind: SourceKind::Local,
        remote_id: None,
    })
}

/// Hex SHA-256 of file content.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hex SHA-256 of the file at `path`.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    Ok(content_hash(&std::fs::read(path)?))
}

/// Keep one file per logical name; the last one scanned wins. Survivors
/// keep their relative order.
pub fn dedupe_by_name(files: Vec<TrackedFile>) -> Vec<TrackedFile> {
    let mut last: HashMap<String, usize> = HashMap::new();
    for (i, f) in files.iter().enumerate() {
        last.insert(f.name.clone(), i);
    }
    files
        .into_iter()
        .enumerate()
        .filter(|(i, f)| last.get(&f.name) == Some(i))
        .map(|(_, f)| f)
        .collect()
}

pub fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|e| *e == ext)
        })
        .unwrap_or(false)
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect()
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
