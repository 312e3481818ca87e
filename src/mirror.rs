//! Remote mirror client.
//!
//! Sits between the fingerprint store and a [`RemoteStore`]:
//!
//! - **Pull**: list plain-text files in a source folder and download the
//!   ones whose remote signature changed into a local cache keyed by name.
//! - **Push**: create-or-update one document per logical name. The
//!   by-name lookup runs on every attempt, so a retry after a create whose
//!   response was lost updates the document instead of duplicating it.
//! - **Cleanup**: remove residual duplicates left by concurrent creators,
//!   keeping the most recently modified document per name.
//!
//! Every remote call goes through the configured [`RetryPolicy`].

use anyhow::{bail, Context, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::drive::DriveClient;
use crate::fingerprint::{write_atomic, FingerprintStore};
use crate::models::{Classification, RemoteFileMeta, SourceKind, TrackedFile};
use crate::remote::{RemoteError, RemoteStore, RetryPolicy, MIME_TEXT};

#[derive(Clone)]
pub struct MirrorClient {
    store: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
}

/// Result of [`MirrorClient::create_or_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    pub document_id: String,
    pub created: bool,
}

/// Result of [`MirrorClient::refresh_cache`].
#[derive(Debug, Default)]
pub struct CacheRefresh {
    /// Every cached remote file, changed or not, sorted by name.
    pub files: Vec<TrackedFile>,
    /// Names downloaded during this refresh.
    pub changed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Result of [`MirrorClient::cleanup_duplicates`].
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub total: usize,
    pub unique_names: usize,
    pub duplicates: Vec<RemoteFileMeta>,
    pub deleted: usize,
    pub errors: Vec<(String, String)>,
}

impl MirrorClient {
    pub fn new(store: Arc<dyn RemoteStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Every plain-text file in `folder_id`, sorted by name then id.
    pub async fn list_remote_text_files(
        &self,
        folder_id: &str,
    ) -> Result<Vec<RemoteFileMeta>, RemoteError> {
        let mut files = self
            .retry
            .run("list", || self.store.list_files(folder_id, Some(MIME_TEXT)))
            .await?;
        files.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(files)
    }

    /// Download `meta` into `cache_dir` unless its remote signature matches
    /// the stored fingerprint and the cached copy still exists. Returns the
    /// tracked cache file and whether it was downloaded.
    pub async fn download_if_changed(
        &self,
        meta: &RemoteFileMeta,
        cache_dir: &Path,
        fingerprints: &mut FingerprintStore,
    ) -> Result<(TrackedFile, bool)> {
        let path = cache_dir.join(cache_file_name(&meta.name));
        let identity = remote_identity(&meta.id);
        let signature = meta.signature();

        let unchanged = fingerprints.classify_signature(&identity, &signature)
            == Classification::Unchanged
            && path.is_file();

        if !unchanged {
            let bytes = self
                .retry
                .run("download", || self.store.download(&meta.id))
                .await
                .with_context(|| format!("Failed to download {}", meta.name))?;
            write_atomic(&path, &bytes)
                .with_context(|| format!("Failed to cache {}", path.display()))?;
            fingerprints.commit_signature(&identity, signature)?;
            tracing::info!(name = %meta.name, "downloaded remote file");
        }

        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let file = TrackedFile {
            path: path.clone(),
            root: cache_dir.to_path_buf(),
            relative: cache_file_name(&meta.name),
            name: meta.name.clone(),
            size,
            modified: meta.modified_time.timestamp(),
            hash: None,
            kind: SourceKind::RemoteCached,
            remote_id: Some(meta.id.clone()),
        };
        Ok((file, !unchanged))
    }

    /// Pull every text file in `folder_id` into `cache_dir`. Per-file
    /// download failures are collected; listing failures are returned.
    /// When several files share a name only the newest is cached.
    pub async fn refresh_cache(
        &self,
        folder_id: &str,
        cache_dir: &Path,
        fingerprints: &mut FingerprintStore,
    ) -> Result<CacheRefresh> {
        let metas = self
            .list_remote_text_files(folder_id)
            .await
            .with_context(|| format!("Failed to list remote folder {}", folder_id))?;
        let metas = newest_per_name(metas);

        let mut refresh = CacheRefresh::default();
        for meta in &metas {
            match self.download_if_changed(meta, cache_dir, fingerprints).await {
                Ok((file, changed)) => {
                    if changed {
                        refresh.changed.push(meta.name.clone());
                    }
                    refresh.files.push(file);
                }
                Err(e) if crate::remote::is_fatal(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(name = %meta.name, error = %e, "remote file skipped");
                    refresh.failed.push((meta.name.clone(), format!("{:#}", e)));
                }
            }
        }
        Ok(refresh)
    }

    /// The document currently named `name` in `folder_id`. If duplicates
    /// exist, the most recently modified one is returned.
    pub async fn find_existing_document(
        &self,
        folder_id: &str,
        name: &str,
    ) -> Result<Option<String>, RemoteError> {
        self.retry.run("find", || self.lookup(folder_id, name)).await
    }

    /// One unretried by-name lookup.
    async fn lookup(&self, folder_id: &str, name: &str) -> Result<Option<String>, RemoteError> {
        let matches = self.store.find_by_name(folder_id, name).await?;
        Ok(pick_existing(matches, name))
    }

    /// Overwrite the document named `name` if one exists, otherwise create
    /// it. Safe to call again after any failure.
    pub async fn create_or_update(
        &self,
        folder_id: &str,
        name: &str,
        content: &str,
    ) -> Result<Upsert, RemoteError> {
        self.retry
            .run("upsert", || async move {
                match self.lookup(folder_id, name).await? {
                    Some(id) => {
                        self.store.update_document(&id, content).await?;
                        Ok(Upsert {
                            document_id: id,
                            created: false,
                        })
                    }
                    None => {
                        let id = self.store.create_document(folder_id, name, content).await?;
                        Ok(Upsert {
                            document_id: id,
                            created: true,
                        })
                    }
                }
            })
            .await
    }

    /// Find documents sharing a base name (after stripping a trailing
    /// ` (N)` copy suffix and `.gdoc`) and, when `delete` is set, remove
    /// all but the most recently modified one in each group.
    pub async fn cleanup_duplicates(
        &self,
        folder_id: &str,
        delete: bool,
    ) -> Result<CleanupReport, RemoteError> {
        let files = self
            .retry
            .run("list", || self.store.list_files(folder_id, None))
            .await?;

        let mut groups: BTreeMap<String, Vec<RemoteFileMeta>> = BTreeMap::new();
        for f in &files {
            groups.entry(base_name(&f.name)).or_default().push(f.clone());
        }

        let mut report = CleanupReport {
            total: files.len(),
            unique_names: groups.len(),
            ..Default::default()
        };

        for (_, mut group) in groups {
            if group.len() < 2 {
                continue;
            }
            group.sort_by(newest_first);
            report.duplicates.extend(group.into_iter().skip(1));
        }

        if !delete {
            return Ok(report);
        }

        for dup in &report.duplicates {
            match self.retry.run("delete", || self.store.delete(&dup.id)).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => report.deleted += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(name = %dup.name, error = %e, "failed to delete duplicate");
                    report.errors.push((dup.name.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }
}

fn pick_existing(mut matches: Vec<RemoteFileMeta>, name: &str) -> Option<String> {
    if matches.len() > 1 {
        tracing::warn!(
            name,
            count = matches.len(),
            "duplicate remote documents; run `ctxsync cleanup` to remove them"
        );
    }
    matches.sort_by(newest_first);
    matches.into_iter().next().map(|m| m.id)
}

/// Most recently modified first; ties keep the lowest id.
fn newest_first(a: &RemoteFileMeta, b: &RemoteFileMeta) -> Ordering {
    b.modified_time
        .cmp(&a.modified_time)
        .then_with(|| a.id.cmp(&b.id))
}

/// One file per cache name, the newest winning. Output is sorted by name.
fn newest_per_name(metas: Vec<RemoteFileMeta>) -> Vec<RemoteFileMeta> {
    let mut by_name: BTreeMap<String, RemoteFileMeta> = BTreeMap::new();
    for meta in metas {
        let key = cache_file_name(&meta.name);
        let (kept, dropped) = match by_name.remove(&key) {
            Some(prev) if newest_first(&prev, &meta) == Ordering::Less => (prev, meta),
            Some(prev) => (meta, prev),
            None => {
                by_name.insert(key, meta);
                continue;
            }
        };
        tracing::warn!(
            name = %dropped.name,
            id = %dropped.id,
            "duplicate remote file name, keeping the newest"
        );
        by_name.insert(key, kept);
    }
    by_name.into_values().collect()
}

fn remote_identity(id: &str) -> String {
    format!("remote:{}", id)
}

/// File name used for a remote file in the local cache.
pub fn cache_file_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Name with a `.gdoc` extension and a trailing ` (N)` copy suffix removed.
pub fn base_name(name: &str) -> String {
    let name = name.strip_suffix(".gdoc").unwrap_or(name);
    if let Some(open) = name.rfind(" (") {
        let tail = &name[open + 2..];
        if let Some(digits) = tail.strip_suffix(')') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return name[..open].to_string();
            }
        }
    }
    name.to_string()
}

/// `ctxsync cleanup`: report (and with `delete`, remove) duplicate
/// documents in `folder`, defaulting to the configured mirror folder.
pub async fn run_cleanup(config: &Config, folder: Option<String>, delete: bool) -> Result<()> {
    let folder = match folder.or_else(|| config.mirror_folder_id().map(str::to_string)) {
        Some(f) => f,
        None => bail!("No folder to clean up. Pass --folder or set remote.mirror_folder_id."),
    };
    let remote = config.remote.clone().unwrap_or_default();
    let client = MirrorClient::new(
        Arc::new(DriveClient::from_config(&remote)?),
        RetryPolicy::from_config(&remote),
    );

    let report = client.cleanup_duplicates(&folder, delete).await?;
    println!("Total files: {}", report.total);
    println!("Unique names: {}", report.unique_names);
    println!("Duplicates: {}", report.duplicates.len());
    if report.duplicates.is_empty() {
        println!("✓ No duplicates found");
        return Ok(());
    }

    if !delete {
        println!("\nSample of duplicates to delete:");
        for dup in report.duplicates.iter().take(10) {
            println!("  - {} ({})", dup.name, dup.id);
        }
        if report.duplicates.len() > 10 {
            println!("  ... and {} more", report.duplicates.len() - 10);
        }
        println!("\nRun with --delete to remove them.");
        return Ok(());
    }

    println!("Deleted: {}", report.deleted);
    for (name, cause) in &report.errors {
        println!("  ✗ {}: {}", name, cause);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{InMemoryStore, InjectedFailure};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use tempfile::TempDir;

    fn client(store: Arc<InMemoryStore>) -> MirrorClient {
        MirrorClient::new(store, RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[test]
    fn base_name_strips_copy_suffix() {
        assert_eq!(base_name("Episode 12 (1)"), "Episode 12");
        assert_eq!(base_name("Episode 12 (23).gdoc"), "Episode 12");
        assert_eq!(base_name("Episode (draft)"), "Episode (draft)");
        assert_eq!(base_name("a.txt"), "a.txt");
    }

    #[tokio::test]
    async fn create_or_update_twice_leaves_one_document() {
        let store = Arc::new(InMemoryStore::new());
        let mirror = client(store.clone());

        let first = mirror.create_or_update("f", "a.txt", "hello").await.unwrap();
        let second = mirror.create_or_update("f", "a.txt", "hello").await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.document_id, second.document_id);
        assert_eq!(store.names_in("f"), vec!["a.txt"]);
        assert_eq!(
            mirror.find_existing_document("f", "a.txt").await.unwrap(),
            Some(first.document_id)
        );
    }

    #[tokio::test]
    async fn create_or_update_retries_transient_errors() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_writes("a.txt", InjectedFailure::Transient(2));
        let mirror = client(store.clone());

        let upsert = mirror.create_or_update("f", "a.txt", "x").await.unwrap();
        assert!(upsert.created);
        assert_eq!(store.names_in("f"), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn download_skips_unchanged_files() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::new());
        store.insert_file("src", "r.txt", MIME_TEXT, b"remote", Utc::now());
        let mirror = client(store.clone());
        let mut fps = FingerprintStore::in_memory();

        let first = mirror.refresh_cache("src", tmp.path(), &mut fps).await.unwrap();
        assert_eq!(first.changed, vec!["r.txt"]);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("r.txt")).unwrap(),
            "remote"
        );

        let second = mirror.refresh_cache("src", tmp.path(), &mut fps).await.unwrap();
        assert!(second.changed.is_empty());
        assert_eq!(second.files.len(), 1);
        assert_eq!(second.files[0].kind, SourceKind::RemoteCached);
    }

    #[tokio::test]
    async fn download_repeats_when_cache_file_missing() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::new());
        store.insert_file("src", "r.txt", MIME_TEXT, b"remote", Utc::now());
        let mirror = client(store);
        let mut fps = FingerprintStore::in_memory();

        mirror.refresh_cache("src", tmp.path(), &mut fps).await.unwrap();
        std::fs::remove_file(tmp.path().join("r.txt")).unwrap();
        let again = mirror.refresh_cache("src", tmp.path(), &mut fps).await.unwrap();
        assert_eq!(again.changed, vec!["r.txt"]);
    }

    #[tokio::test]
    async fn cleanup_keeps_most_recent_per_name() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store.insert_file("f", "Ep 1", "doc", b"", now - ChronoDuration::hours(2));
        let newest = store.insert_file("f", "Ep 1 (1)", "doc", b"", now);
        store.insert_file("f", "Ep 1 (2)", "doc", b"", now - ChronoDuration::hours(1));
        store.insert_file("f", "Ep 2", "doc", b"", now);
        let mirror = client(store.clone());

        let dry = mirror.cleanup_duplicates("f", false).await.unwrap();
        assert_eq!(dry.total, 4);
        assert_eq!(dry.unique_names, 2);
        assert_eq!(dry.duplicates.len(), 2);
        assert_eq!(store.write_count(), 0);

        let done = mirror.cleanup_duplicates("f", true).await.unwrap();
        assert_eq!(done.deleted, 2);
        assert_eq!(store.names_in("f"), vec!["Ep 1 (1)", "Ep 2"]);
        assert!(store.content_of(&newest).is_some());

        let again = mirror.cleanup_duplicates("f", true).await.unwrap();
        assert!(again.duplicates.is_empty());
    }

    #[tokio::test]
    async fn duplicate_source_names_cache_the_newest() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store.insert_file("src", "ep.txt", MIME_TEXT, b"new", now);
        store.insert_file("src", "ep.txt", MIME_TEXT, b"old", now - ChronoDuration::hours(1));
        let mirror = client(store);
        let mut fps = FingerprintStore::in_memory();

        for _ in 0..2 {
            let refresh = mirror.refresh_cache("src", tmp.path(), &mut fps).await.unwrap();
            assert_eq!(refresh.files.len(), 1);
            assert_eq!(
                std::fs::read_to_string(tmp.path().join("ep.txt")).unwrap(),
                "new"
            );
        }
        let again = mirror.refresh_cache("src", tmp.path(), &mut fps).await.unwrap();
        assert!(again.changed.is_empty(), "no download churn between duplicates");
    }

    #[tokio::test]
    async fn find_and_upsert_agree_on_newest_duplicate() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store.insert_file("f", "a.txt", "doc", b"old", now - ChronoDuration::hours(1));
        let newest = store.insert_file("f", "a.txt", "doc", b"new", now);
        let mirror = client(store.clone());

        let found = mirror.find_existing_document("f", "a.txt").await.unwrap();
        assert_eq!(found.as_deref(), Some(newest.as_str()));

        let upsert = mirror.create_or_update("f", "a.txt", "updated").await.unwrap();
        assert_eq!(upsert.document_id, newest);
        assert!(!upsert.created);
        assert_eq!(store.content_of(&newest).as_deref(), Some("updated"));
    }
}
