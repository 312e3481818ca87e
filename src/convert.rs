//! Conversion driver (`ctxsync convert`).
//!
//! Mirrors every new or modified local text file into the remote mirror
//! folder as one document per logical name:
//!
//! 1. scan the monitored directories and collapse duplicate names;
//! 2. classify each file against the mirror fingerprint store and skip
//!    the unchanged ones;
//! 3. for each remaining file, re-read the store (another run may have
//!    finished it meanwhile), create-or-update the document, and commit
//!    the fingerprint only after the remote write succeeded.
//!
//! Per-file failures are collected in the [`RunSummary`]; an
//! authentication failure aborts the run. The process exit code is
//! non-zero when any file errored, regardless of how many changed.

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::drive::DriveClient;
use crate::fingerprint::FingerprintStore;
use crate::mirror::MirrorClient;
use crate::models::{Classification, FileError, RunSummary, TrackedFile};
use crate::progress::{ConvertProgressEvent, ProgressReporter};
use crate::remote::RetryPolicy;
use crate::scanner::{content_hash, dedupe_by_name, Scanner};

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Classify and report without remote writes or commits.
    pub dry_run: bool,
    /// Ignore stored fingerprints and convert everything.
    pub full: bool,
    /// Process at most this many new/modified files.
    pub limit: Option<usize>,
}

/// Files needing work, with the skipped count.
#[derive(Debug, Default)]
pub struct Plan {
    pub work: Vec<(TrackedFile, Classification)>,
    pub skipped: u64,
}

/// Classify `files` against the store.
pub fn plan(
    files: Vec<TrackedFile>,
    fingerprints: &FingerprintStore,
    opts: &ConvertOptions,
) -> Plan {
    let mut plan = Plan::default();
    for file in files {
        let class = match fingerprints.classify(&file) {
            Classification::Unchanged if opts.full => Classification::Modified,
            Classification::Unchanged => {
                tracing::debug!(file = %file.relative, "unchanged");
                plan.skipped += 1;
                continue;
            }
            other => other,
        };
        plan.work.push((file, class));
    }
    if let Some(limit) = opts.limit {
        plan.work.truncate(limit);
    }
    plan
}

/// Push every planned file through `mirror`. Returns the run summary.
pub async fn convert_files(
    plan: Plan,
    folder_id: &str,
    mirror: &MirrorClient,
    fingerprints: &mut FingerprintStore,
    opts: &ConvertOptions,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let mut summary = RunSummary {
        skipped: plan.skipped,
        ..Default::default()
    };
    let total = plan.work.len() as u64;

    for (n, (mut file, planned)) in plan.work.into_iter().enumerate() {
        progress.report(ConvertProgressEvent::Converting {
            n: n as u64 + 1,
            total,
        });

        let class = if opts.full {
            planned
        } else {
            fingerprints.refresh();
            fingerprints.classify(&file)
        };
        if class == Classification::Unchanged {
            tracing::info!(file = %file.relative, "already converted by another run");
            summary.skipped += 1;
            continue;
        }

        let content = match read_utf8(&file) {
            Ok(c) => c,
            Err(cause) => {
                tracing::warn!(
                    file = %file.path.display(),
                    error = %cause,
                    "skipping unreadable file"
                );
                summary.errors.push(FileError {
                    name: file.name.clone(),
                    cause,
                });
                continue;
            }
        };
        // Commit the hash of what was uploaded, not of what is on disk later.
        file.hash = Some(content_hash(content.as_bytes()));

        match mirror.create_or_update(folder_id, &file.name, &content).await {
            Ok(upsert) => {
                if let Err(e) = fingerprints.commit(&file) {
                    summary.errors.push(FileError {
                        name: file.name.clone(),
                        cause: format!("converted but fingerprint not saved: {:#}", e),
                    });
                    continue;
                }
                tracing::info!(
                    file = %file.relative,
                    document = %upsert.document_id,
                    created = upsert.created,
                    "{}", class
                );
                match class {
                    Classification::New => summary.converted += 1,
                    _ => summary.updated += 1,
                }
            }
            Err(e) if e.is_fatal() => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Aborting: cannot write {}", file.name)));
            }
            Err(e) => {
                tracing::warn!(file = %file.relative, error = %e, "conversion failed");
                summary.errors.push(FileError {
                    name: file.name.clone(),
                    cause: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        converted = summary.converted,
        updated = summary.updated,
        skipped = summary.skipped,
        errored = summary.errored(),
        "conversion run finished"
    );
    Ok(summary)
}

fn read_utf8(file: &TrackedFile) -> std::result::Result<String, String> {
    let bytes = std::fs::read(&file.path).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|_| "file is not valid UTF-8".to_string())
}

/// `ctxsync convert`: scan, convert, print the summary.
pub async fn run_convert(
    config: &Config,
    opts: &ConvertOptions,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let Some(folder_id) = config.mirror_folder_id() else {
        bail!("No mirror folder configured. Set remote.mirror_folder_id in the config file.");
    };
    let folder_id = folder_id.to_string();

    progress.report(ConvertProgressEvent::Scanning {
        dirs: config.watch.dirs.len(),
    });
    let scanner = Scanner::for_config(config)?;
    let report = scanner.scan(&config.watch.dirs);
    for (path, cause) in &report.skipped {
        println!("⚠ Skipped {}: {}", path.display(), cause);
    }
    let files = dedupe_by_name(report.files);

    let mut fingerprints = FingerprintStore::load(&config.cache.mirror_fingerprints());
    let plan = plan(files, &fingerprints, opts);

    if opts.dry_run {
        println!("convert (dry-run)");
        let mut summary = RunSummary {
            skipped: plan.skipped,
            ..Default::default()
        };
        for (file, class) in &plan.work {
            println!("  {:<10} {}", class.to_string(), file.relative);
            match class {
                Classification::New => summary.converted += 1,
                _ => summary.updated += 1,
            }
        }
        println!("{}", summary);
        return Ok(summary);
    }

    if plan.work.is_empty() {
        println!("✓ Nothing to convert ({} unchanged)", plan.skipped);
        return Ok(RunSummary {
            skipped: plan.skipped,
            ..Default::default()
        });
    }

    let remote = config
        .remote
        .as_ref()
        .context("Remote section missing from config")?;
    let mirror = MirrorClient::new(
        Arc::new(DriveClient::from_config(remote)?),
        RetryPolicy::from_config(remote),
    );

    let summary =
        convert_files(plan, &folder_id, &mirror, &mut fingerprints, opts, progress).await?;
    println!("{}", summary);
    for error in &summary.errors {
        println!("  ✗ {}: {}", error.name, error.cause);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use crate::progress::NoProgress;
    use crate::remote::memory::{InMemoryStore, InjectedFailure};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    const FOLDER: &str = "mirror";

    fn write_files(root: &Path, names: &[&str]) -> Vec<TrackedFile> {
        let dir = root.join("transcripts");
        fs::create_dir_all(&dir).unwrap();
        for name in names {
            fs::write(dir.join(name), format!("contents of {}", name)).unwrap();
        }
        Scanner::new(&WatchConfig::default())
            .unwrap()
            .scan(&[dir])
            .files
    }

    fn mirror(store: &Arc<InMemoryStore>) -> MirrorClient {
        MirrorClient::new(store.clone(), RetryPolicy::new(2, Duration::from_millis(1)))
    }

    fn store_path(root: &Path) -> PathBuf {
        root.join("fingerprints.json")
    }

    async fn run(
        root: &Path,
        store: &Arc<InMemoryStore>,
        opts: &ConvertOptions,
    ) -> Result<RunSummary> {
        let files = write_files(root, &[]);
        let mut fps = FingerprintStore::load(&store_path(root));
        let plan = plan(files, &fps, opts);
        convert_files(plan, FOLDER, &mirror(store), &mut fps, opts, &NoProgress).await
    }

    #[tokio::test]
    async fn converts_new_then_skips_unchanged() {
        let tmp = TempDir::new().unwrap();
        write_files(tmp.path(), &["a.txt", "b.txt"]);
        let store = Arc::new(InMemoryStore::new());
        let opts = ConvertOptions::default();

        let first = run(tmp.path(), &store, &opts).await.unwrap();
        assert_eq!(first.converted, 2);
        assert_eq!(first.exit_code(), 0);
        assert_eq!(store.write_count(), 2);

        let second = run(tmp.path(), &store, &opts).await.unwrap();
        assert_eq!(second.skipped, 2);
        assert_eq!(second.converted + second.updated, 0);
        assert_eq!(second.exit_code(), 0);
        assert_eq!(store.write_count(), 2, "unchanged files cause no remote writes");
    }

    #[tokio::test]
    async fn modified_file_updates_existing_document() {
        let tmp = TempDir::new().unwrap();
        write_files(tmp.path(), &["a.txt"]);
        let store = Arc::new(InMemoryStore::new());
        let opts = ConvertOptions::default();
        run(tmp.path(), &store, &opts).await.unwrap();

        fs::write(tmp.path().join("transcripts/a.txt"), "rewritten and longer").unwrap();
        let summary = run(tmp.path(), &store, &opts).await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(store.names_in(FOLDER), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn permanent_failure_is_isolated() {
        let tmp = TempDir::new().unwrap();
        write_files(tmp.path(), &["1.txt", "2.txt", "3.txt", "4.txt", "5.txt"]);
        let store = Arc::new(InMemoryStore::new());
        store.fail_writes("3.txt", InjectedFailure::Permanent);

        let summary = run(tmp.path(), &store, &ConvertOptions::default()).await.unwrap();
        assert_eq!(summary.converted, 4);
        assert_eq!(summary.errored(), 1);
        assert_eq!(summary.errors[0].name, "3.txt");
        assert_ne!(summary.exit_code(), 0);

        let fps = FingerprintStore::load(&store_path(tmp.path()));
        assert_eq!(fps.len(), 4, "failed file is not committed");
    }

    #[tokio::test]
    async fn auth_failure_aborts_run() {
        let tmp = TempDir::new().unwrap();
        write_files(tmp.path(), &["a.txt", "b.txt"]);
        let store = Arc::new(InMemoryStore::new());
        store.fail_writes("a.txt", InjectedFailure::Auth);

        let err = run(tmp.path(), &store, &ConvertOptions::default())
            .await
            .unwrap_err();
        assert!(crate::remote::is_fatal(&err));
        assert_eq!(store.write_count(), 1, "b.txt never attempted");
        assert!(store.names_in(FOLDER).is_empty());
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let tmp = TempDir::new().unwrap();
        write_files(tmp.path(), &["a.txt"]);
        let store = Arc::new(InMemoryStore::new());
        store.fail_writes("a.txt", InjectedFailure::Transient(2));

        let summary = run(tmp.path(), &store, &ConvertOptions::default()).await.unwrap();
        assert_eq!(summary.converted, 1);
        assert_eq!(store.names_in(FOLDER), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn non_utf8_file_is_a_per_file_error() {
        let tmp = TempDir::new().unwrap();
        write_files(tmp.path(), &["good.txt"]);
        fs::write(tmp.path().join("transcripts/bad.txt"), [0xff, 0xfe, 0xfd]).unwrap();
        let store = Arc::new(InMemoryStore::new());

        let summary = run(tmp.path(), &store, &ConvertOptions::default()).await.unwrap();
        assert_eq!(summary.converted, 1);
        assert_eq!(summary.errors[0].name, "bad.txt");
    }

    #[tokio::test]
    async fn full_and_limit_options() {
        let tmp = TempDir::new().unwrap();
        write_files(tmp.path(), &["a.txt", "b.txt", "c.txt"]);
        let store = Arc::new(InMemoryStore::new());

        let limited = ConvertOptions {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(run(tmp.path(), &store, &limited).await.unwrap().converted, 2);

        let full = ConvertOptions {
            full: true,
            ..Default::default()
        };
        let summary = run(tmp.path(), &store, &full).await.unwrap();
        assert_eq!(summary.converted, 1);
        assert_eq!(summary.updated, 2);
        assert_eq!(store.names_in(FOLDER).len(), 3);
    }

    #[tokio::test]
    async fn overlapping_runs_do_not_duplicate() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(tmp.path(), &["a.txt", "b.txt"]);
        let store = Arc::new(InMemoryStore::new());
        let opts = ConvertOptions::default();

        // Both runs plan against the same empty store.
        let mut fps_one = FingerprintStore::load(&store_path(tmp.path()));
        let mut fps_two = FingerprintStore::load(&store_path(tmp.path()));
        let plan_one = plan(files.clone(), &fps_one, &opts);
        let plan_two = plan(files, &fps_two, &opts);

        convert_files(plan_one, FOLDER, &mirror(&store), &mut fps_one, &opts, &NoProgress)
            .await
            .unwrap();
        let second = convert_files(
            plan_two,
            FOLDER,
            &mirror(&store),
            &mut fps_two,
            &opts,
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(second.skipped, 2);
        assert_eq!(store.names_in(FOLDER), vec!["a.txt", "b.txt"]);
        assert_eq!(FingerprintStore::load(&store_path(tmp.path())).len(), 2);
    }

    #[tokio::test]
    async fn touched_but_identical_file_is_skipped() {
        let tmp = TempDir::new().unwrap();
        write_files(tmp.path(), &["a.txt"]);
        let store = Arc::new(InMemoryStore::new());
        let opts = ConvertOptions::default();
        run(tmp.path(), &store, &opts).await.unwrap();

        let later = std::time::SystemTime::now() + Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(tmp.path().join("transcripts/a.txt"))
            .unwrap()
            .set_modified(later)
            .unwrap();

        let summary = run(tmp.path(), &store, &opts).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.write_count(), 1);
    }
}
