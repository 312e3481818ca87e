use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::fingerprint::FingerprintStore;
use crate::scanner::Scanner;

/// One row of `ctxsync sources`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHealth {
    pub kind: &'static str,
    pub location: String,
    pub status: String,
    pub healthy: bool,
}

pub fn check_sources(config: &Config) -> Vec<SourceHealth> {
    let mut rows: Vec<SourceHealth> = config
        .watch
        .dirs
        .iter()
        .map(|dir| {
            let (status, healthy) = if dir.is_dir() {
                ("OK", true)
            } else {
                ("MISSING", false)
            };
            SourceHealth {
                kind: "directory",
                location: dir.display().to_string(),
                status: status.to_string(),
                healthy,
            }
        })
        .collect();

    let token_set = config
        .remote
        .as_ref()
        .map(|r| std::env::var(&r.token_env).is_ok_and(|t| !t.trim().is_empty()))
        .unwrap_or(false);

    for (kind, folder) in [
        ("remote-source", config.source_folder_id()),
        ("remote-mirror", config.mirror_folder_id()),
    ] {
        let row = match folder {
            Some(id) if token_set => SourceHealth {
                kind,
                location: id.to_string(),
                status: "OK".to_string(),
                healthy: true,
            },
            Some(id) => SourceHealth {
                kind,
                location: id.to_string(),
                status: "NO TOKEN".to_string(),
                healthy: false,
            },
            None => SourceHealth {
                kind,
                location: "-".to_string(),
                status: "NOT CONFIGURED".to_string(),
                healthy: false,
            },
        };
        rows.push(row);
    }
    rows
}

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<14} {:<16} {:<8} LOCATION", "SOURCE", "STATUS", "HEALTHY");
    for row in check_sources(config) {
        println!(
            "{:<14} {:<16} {:<8} {}",
            row.kind, row.status, row.healthy, row.location
        );
    }
    Ok(())
}

/// Per-directory counts for `ctxsync status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirStatus {
    pub dir: String,
    pub files: usize,
    /// Files whose current content is recorded as mirrored.
    pub mirrored: usize,
}

pub fn dir_status(config: &Config) -> Result<Vec<DirStatus>> {
    let scanner = Scanner::for_config(config)?;
    let mirror = FingerprintStore::load(&config.cache.mirror_fingerprints());
    Ok(config
        .watch
        .dirs
        .iter()
        .map(|dir| {
            let files = scanner.scan(std::slice::from_ref(dir)).files;
            let mirrored = files
                .iter()
                .filter(|f| mirror.classify(f) == crate::models::Classification::Unchanged)
                .count();
            DirStatus {
                dir: dir.display().to_string(),
                files: files.len(),
                mirrored,
            }
        })
        .collect())
}

pub fn show_status(config: &Config) -> Result<()> {
    let rows = dir_status(config)?;
    println!("{:<40} {:>8} {:>9}", "DIRECTORY", "FILES", "MIRRORED");
    for row in &rows {
        println!("{:<40} {:>8} {:>9}", row.dir, row.files, row.mirrored);
    }

    let mirror = FingerprintStore::load(&config.cache.mirror_fingerprints());
    let remote = FingerprintStore::load(&config.cache.remote_fingerprints());
    println!();
    println!("tracked mirror fingerprints: {}", mirror.len());
    println!("cached remote files:         {}", count_files(&config.cache.remote_dir()));
    println!("remote fingerprints:         {}", remote.len());
    println!("output:                      {}", config.output.path.display());
    Ok(())
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn reports_missing_dirs_and_unconfigured_remote() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.watch.dirs = vec![tmp.path().to_path_buf(), tmp.path().join("nope")];

        let rows = check_sources(&config);
        assert_eq!(rows.len(), 4);
        assert!(rows[0].healthy);
        assert_eq!(rows[1].status, "MISSING");
        assert_eq!(rows[2].status, "NOT CONFIGURED");
        assert_eq!(rows[3].status, "NOT CONFIGURED");
    }

    #[test]
    fn remote_without_token_is_unhealthy() {
        let mut config = Config::default();
        config.remote = Some(RemoteConfig {
            mirror_folder_id: Some("m".to_string()),
            token_env: "CTXSYNC_TEST_UNSET_TOKEN".to_string(),
            ..Default::default()
        });
        let rows = check_sources(&config);
        let mirror = rows.iter().find(|r| r.kind == "remote-mirror").unwrap();
        assert_eq!(mirror.status, "NO TOKEN");
        assert!(!mirror.healthy);
    }

    #[test]
    fn status_counts_mirrored_files() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("transcripts");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.txt"), "a").unwrap();
        fs::write(dir.join("b.txt"), "b").unwrap();

        let mut config = Config::default();
        config.watch.dirs = vec![dir.clone()];
        config.cache.dir = tmp.path().join(".cache");

        let scanned = Scanner::new(&config.watch).unwrap().scan(&[dir]).files;
        let mut fps = FingerprintStore::load(&config.cache.mirror_fingerprints());
        fps.commit(&scanned[0]).unwrap();

        let rows = dir_status(&config).unwrap();
        assert_eq!(rows[0].files, 2);
        assert_eq!(rows[0].mirrored, 1);
    }
}
