//! TOML configuration parsing and validation.
//!
//! ```toml
//! [output]
//! path = "CLAUDE.md"
//!
//! [watch]
//! dirs = ["./docs", "./notes"]
//! extensions = ["txt"]
//! quiet_period_ms = 2000
//! poll_interval_secs = 60
//!
//! [cache]
//! dir = ".ctxsync"
//!
//! [remote]
//! source_folder_id = "1AbC..."
//! mirror_folder_id = "1XyZ..."
//! ```
//!
//! Every section is optional; a config built purely from CLI flags goes
//! through the same [`Config::validate`] checks as one read from disk.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("CLAUDE.md")
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            extensions: default_extensions(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            quiet_period_ms: default_quiet_period_ms(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl WatchConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_extensions() -> Vec<String> {
    vec!["txt".to_string()]
}
fn default_quiet_period_ms() -> u64 {
    2000
}
fn default_poll_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

impl CacheConfig {
    /// Local copies of remote source files, keyed by name.
    pub fn remote_dir(&self) -> PathBuf {
        self.dir.join("remote")
    }

    /// Fingerprints of local files mirrored by `convert`.
    pub fn mirror_fingerprints(&self) -> PathBuf {
        self.dir.join("fingerprints.json")
    }

    /// Fingerprints of remote files downloaded into [`Self::remote_dir`].
    pub fn remote_fingerprints(&self) -> PathBuf {
        self.dir.join("remote-fingerprints.json")
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".ctxsync")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// Folder polled for plain-text source files.
    #[serde(default)]
    pub source_folder_id: Option<String>,
    /// Folder receiving one document per local transcript.
    #[serde(default)]
    pub mirror_folder_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            source_folder_id: None,
            mirror_folder_id: None,
            api_base: default_api_base(),
            token_env: default_token_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_api_base() -> String {
    "https://www.googleapis.com".to_string()
}
fn default_token_env() -> String {
    "CTXSYNC_ACCESS_TOKEN".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    500
}

/// Values supplied on the command line; each one replaces the file value.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub dirs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub remote_folder: Option<String>,
}

impl Config {
    pub fn source_folder_id(&self) -> Option<&str> {
        self.remote
            .as_ref()
            .and_then(|r| r.source_folder_id.as_deref())
    }

    pub fn mirror_folder_id(&self) -> Option<&str> {
        self.remote
            .as_ref()
            .and_then(|r| r.mirror_folder_id.as_deref())
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if !overrides.dirs.is_empty() {
            self.watch.dirs = overrides.dirs;
        }
        if let Some(output) = overrides.output {
            self.output.path = output;
        }
        if let Some(folder) = overrides.remote_folder {
            self.remote
                .get_or_insert_with(RemoteConfig::default)
                .source_folder_id = Some(folder);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.watch.dirs.is_empty() && self.source_folder_id().is_none() {
            bail!("nothing to monitor: set watch.dirs or remote.source_folder_id");
        }
        if self.watch.quiet_period_ms == 0 {
            bail!("watch.quiet_period_ms must be > 0");
        }
        if self.watch.poll_interval_secs == 0 {
            bail!("watch.poll_interval_secs must be > 0");
        }
        if self.watch.extensions.is_empty() {
            bail!("watch.extensions must list at least one extension");
        }
        if let Some(remote) = &self.remote {
            if remote.max_retries > 10 {
                bail!("remote.max_retries must be <= 10");
            }
            if remote.api_base.trim().is_empty() {
                bail!("remote.api_base must not be empty");
            }
        }
        Ok(())
    }
}

/// Load the config file, tolerating its absence when the CLI supplies
/// enough to run on its own.
pub fn load_config(path: &Path, overrides: Overrides) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&content).with_context(|| "Failed to parse config file")?
    } else if overrides.dirs.is_empty() && overrides.remote_folder.is_none() {
        bail!(
            "Config file not found: {} (pass --dirs to run without one)",
            path.display()
        );
    } else {
        Config::default()
    };

    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}
