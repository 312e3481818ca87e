//! One regeneration pass: refresh the remote cache (when configured),
//! scan the monitored directories, and rewrite the context document.
//!
//! Used directly by `ctxsync generate` and as the [`WatchHandler`] behind
//! `ctxsync watch`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::drive::DriveClient;
use crate::fingerprint::{write_atomic, FingerprintStore};
use crate::generator;
use crate::mirror::MirrorClient;
use crate::models::TrackedFile;
use crate::remote::RetryPolicy;
use crate::scanner::{dedupe_by_name, Scanner};
use crate::watch::WatchHandler;

/// Outcome of a regeneration, reported on the summary line.
#[derive(Debug, Clone)]
pub struct Regeneration {
    pub output: PathBuf,
    pub files: usize,
    pub skipped: usize,
}

struct RemoteSource {
    mirror: MirrorClient,
    folder_id: String,
    cache_dir: PathBuf,
    fingerprints: FingerprintStore,
}

pub struct Regenerator {
    config: Config,
    scanner: Scanner,
    base: PathBuf,
    remote: Option<RemoteSource>,
    remote_files: Vec<TrackedFile>,
}

impl Regenerator {
    /// Build from config, connecting to Drive when a source folder is set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mirror = match (&config.remote, config.source_folder_id()) {
            (Some(remote), Some(_)) => Some(MirrorClient::new(
                Arc::new(DriveClient::from_config(remote)?),
                RetryPolicy::from_config(remote),
            )),
            _ => None,
        };
        Self::new(config, mirror)
    }

    /// Build with an explicit mirror client (or none).
    pub fn new(config: &Config, mirror: Option<MirrorClient>) -> Result<Self> {
        let base = std::env::current_dir().context("Failed to read current directory")?;
        let remote = match (mirror, config.source_folder_id()) {
            (Some(mirror), Some(folder)) => Some(RemoteSource {
                mirror,
                folder_id: folder.to_string(),
                cache_dir: config.cache.remote_dir(),
                fingerprints: FingerprintStore::load(&config.cache.remote_fingerprints()),
            }),
            _ => None,
        };
        Ok(Self {
            config: config.clone(),
            scanner: Scanner::for_config(config)?,
            base,
            remote,
            remote_files: Vec::new(),
        })
    }

    /// Paths whose display in the document is made relative.
    pub fn with_base(mut self, base: &Path) -> Self {
        self.base = base.to_path_buf();
        self
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Pull changed remote files into the cache. Returns the names that
    /// were downloaded.
    pub async fn refresh_remote(&mut self) -> Result<Vec<String>> {
        let Some(remote) = self.remote.as_mut() else {
            return Ok(Vec::new());
        };
        let refresh = remote
            .mirror
            .refresh_cache(&remote.folder_id, &remote.cache_dir, &mut remote.fingerprints)
            .await?;
        for (name, cause) in &refresh.failed {
            println!("⚠ Error fetching remote file {}: {}", name, cause);
        }
        self.remote_files = refresh.files;
        Ok(refresh.changed)
    }

    /// Scan, render, and atomically replace the output document.
    pub fn regenerate(&mut self) -> Result<Regeneration> {
        let report = self.scanner.scan(&self.config.watch.dirs);
        let mut files = report.files;
        files.extend(self.remote_files.iter().cloned());
        let files = dedupe_by_name(files);

        let document = generator::generate(&files, &self.base, Local::now());
        let output = &self.config.output.path;
        write_atomic(output, document.as_bytes())
            .with_context(|| format!("Failed to write {}", output.display()))?;

        Ok(Regeneration {
            output: output.clone(),
            files: files.len(),
            skipped: report.skipped.len(),
        })
    }

    /// Remote refresh (best effort unless fatal) followed by regeneration.
    pub async fn run_once(&mut self) -> Result<Regeneration> {
        if let Err(e) = self.refresh_remote().await {
            if crate::remote::is_fatal(&e) {
                return Err(e);
            }
            println!("⚠ Error fetching remote files: {:#}", e);
        }
        self.regenerate()
    }
}

#[async_trait]
impl WatchHandler for Regenerator {
    async fn regenerate(&mut self, changes: BTreeSet<String>) -> Result<Regeneration> {
        tracing::debug!(count = changes.len(), "regenerating after changes");
        Regenerator::regenerate(self)
    }

    async fn poll_remote(&mut self) -> Result<Vec<String>> {
        self.refresh_remote().await
    }
}

/// `ctxsync generate`: one regeneration, then exit.
pub async fn run_generate(config: &Config) -> Result<()> {
    println!("🔍 Scanning for text files...");
    let mut regenerator = Regenerator::from_config(config)?;
    let result = regenerator.run_once().await?;
    print_regeneration(&result);
    println!(
        "\n✓ One-time update complete. Use `ctxsync watch` to monitor for changes continuously."
    );
    Ok(())
}

pub fn print_regeneration(result: &Regeneration) {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S");
    if result.skipped > 0 {
        println!(
            "[{}] ✓ Updated {} with {} files ({} skipped)",
            now,
            result.output.display(),
            result.files,
            result.skipped
        );
    } else {
        println!(
            "[{}] ✓ Updated {} with {} files",
            now,
            result.output.display(),
            result.files
        );
    }
    tracing::info!(
        output = %result.output.display(),
        files = result.files,
        skipped = result.skipped,
        "context document regenerated"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, OutputConfig, RemoteConfig};
    use crate::remote::memory::InMemoryStore;
    use crate::remote::{RemoteStore, MIME_TEXT};
    use chrono::Utc;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(root: &Path, remote: bool) -> Config {
        let mut cfg = Config {
            output: OutputConfig {
                path: root.join("CONTEXT.md"),
            },
            cache: CacheConfig {
                dir: root.join(".cache"),
            },
            ..Default::default()
        };
        cfg.watch.dirs = vec![root.join("docs")];
        if remote {
            cfg.remote = Some(RemoteConfig {
                source_folder_id: Some("src".to_string()),
                ..Default::default()
            });
        }
        cfg
    }

    #[tokio::test]
    async fn merges_local_and_remote_files() {
        let tmp = TempDir::new().unwrap();
        let root = std::path::absolute(tmp.path()).unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/local.txt"), "from disk").unwrap();

        let store = Arc::new(InMemoryStore::new());
        store.insert_file("src", "cloud.txt", MIME_TEXT, b"from cloud", Utc::now());
        let mirror = MirrorClient::new(store, RetryPolicy::new(1, Duration::from_millis(1)));

        let cfg = config(&root, true);
        let mut regen = Regenerator::new(&cfg, Some(mirror)).unwrap().with_base(&root);
        let changed = regen.refresh_remote().await.unwrap();
        assert_eq!(changed, vec!["cloud.txt"]);

        let result = regen.regenerate().unwrap();
        assert_eq!(result.files, 2);
        let doc = fs::read_to_string(root.join("CONTEXT.md")).unwrap();
        assert!(doc.contains("from disk"));
        assert!(doc.contains("from cloud"));
        assert!(doc.contains("@.cache/remote/cloud.txt"));

        assert!(regen.refresh_remote().await.unwrap().is_empty());
    }

    #[test]
    fn deleted_file_drops_out_of_next_document() {
        let tmp = TempDir::new().unwrap();
        let root = std::path::absolute(tmp.path()).unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/a.txt"), "alpha").unwrap();
        fs::write(root.join("docs/b.txt"), "beta").unwrap();

        let cfg = config(&root, false);
        let mut regen = Regenerator::new(&cfg, None).unwrap().with_base(&root);
        assert_eq!(regen.regenerate().unwrap().files, 2);

        fs::remove_file(root.join("docs/b.txt")).unwrap();
        assert_eq!(regen.regenerate().unwrap().files, 1);
        let doc = fs::read_to_string(root.join("CONTEXT.md")).unwrap();
        assert!(!doc.contains("beta"));
    }

    #[tokio::test]
    async fn cached_copy_of_deleted_remote_file_is_not_rescanned() {
        let tmp = TempDir::new().unwrap();
        let root = std::path::absolute(tmp.path()).unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/local.txt"), "from disk").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let id = store.insert_file("src", "cloud.txt", MIME_TEXT, b"from cloud", Utc::now());
        let retry = RetryPolicy::new(1, Duration::from_millis(1));
        let mirror = MirrorClient::new(store.clone(), retry);

        // The cache lives inside the monitored tree.
        let mut cfg = config(&root, true);
        cfg.watch.dirs = vec![root.clone()];
        let mut regen = Regenerator::new(&cfg, Some(mirror)).unwrap().with_base(&root);
        assert_eq!(regen.run_once().await.unwrap().files, 2);

        store.delete(&id).await.unwrap();
        assert_eq!(regen.run_once().await.unwrap().files, 1);
        let doc = fs::read_to_string(root.join("CONTEXT.md")).unwrap();
        assert!(!doc.contains("from cloud"));
        assert!(doc.contains("from disk"));
    }

    #[test]
    fn output_inside_monitored_dir_is_not_fed_back() {
        let tmp = TempDir::new().unwrap();
        let root = std::path::absolute(tmp.path()).unwrap();
        fs::write(root.join("a.txt"), "alpha").unwrap();

        let mut cfg = config(&root, false);
        cfg.watch.dirs = vec![root.clone()];
        cfg.output.path = root.join("context.txt");
        let mut regen = Regenerator::new(&cfg, None).unwrap().with_base(&root);

        let first = regen.regenerate().unwrap();
        let first_len = fs::metadata(root.join("context.txt")).unwrap().len();
        for _ in 0..2 {
            assert_eq!(regen.regenerate().unwrap().files, first.files);
            assert_eq!(fs::metadata(root.join("context.txt")).unwrap().len(), first_len);
        }
        assert_eq!(first.files, 1);
    }
}
