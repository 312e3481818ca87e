//! # Context Sync CLI (`ctxsync`)
//!
//! ## Usage
//!
//! ```bash
//! ctxsync --config ./config/ctxsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxsync generate` | Regenerate the context document once |
//! | `ctxsync watch` | Regenerate on every (debounced) local or remote change |
//! | `ctxsync convert` | Mirror new/modified text files to the remote folder |
//! | `ctxsync cleanup` | Find (and delete) duplicate remote documents |
//! | `ctxsync sources` | List monitored directories and remote folders with health |
//! | `ctxsync status` | Tracked and mirrored file counts per directory |
//!
//! ## Examples
//!
//! ```bash
//! # One document from two directories, no config file needed
//! ctxsync generate --dirs ./docs --dirs ./notes
//!
//! # Keep CLAUDE.md current while editing
//! ctxsync watch --config ./config/ctxsync.toml
//!
//! # Preview, then run a mirror pass
//! ctxsync convert --dry-run
//! ctxsync convert
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use context_sync::config::{self, Overrides};
use context_sync::convert::{self, ConvertOptions};
use context_sync::progress::ProgressMode;
use context_sync::{mirror, regenerate, sources, watch};

/// Context Sync: keep an AI context document in step with plain-text
/// sources, and mirror those sources to a remote document store.
#[derive(Parser)]
#[command(
    name = "ctxsync",
    about = "Aggregate text files into an AI context document and mirror them remotely",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ctxsync.toml`. May be absent when `--dirs` or
    /// `--remote-folder` supply the sources.
    #[arg(long, global = true, default_value = "./config/ctxsync.toml")]
    config: PathBuf,

    /// Monitored directory (repeatable). Replaces `watch.dirs`.
    #[arg(long = "dirs", global = true)]
    dirs: Vec<PathBuf>,

    /// Output document path. Replaces `output.path`.
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Remote source folder id. Replaces `remote.source_folder_id`.
    #[arg(long, global = true)]
    remote_folder: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Regenerate the context document once and exit.
    Generate,

    /// Watch local directories (and poll the remote folder) and regenerate
    /// after each burst of changes.
    ///
    /// Changes are debounced: regeneration starts once no change has arrived
    /// for `watch.quiet_period_ms`. Stop with Ctrl+C.
    Watch,

    /// Mirror new or modified text files into the remote mirror folder.
    ///
    /// Unchanged files (per the fingerprint store) are skipped. Exits
    /// non-zero when any file failed.
    Convert {
        /// Classify and report without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Ignore fingerprints and convert every file.
        #[arg(long)]
        full: bool,

        /// Maximum number of files to convert.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output on stderr. Defaults to human when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Find duplicate documents (same base name) and keep the newest.
    ///
    /// Dry run unless `--delete` is given.
    Cleanup {
        /// Actually delete the duplicates.
        #[arg(long)]
        delete: bool,

        /// Folder to clean. Defaults to `remote.mirror_folder_id`.
        #[arg(long)]
        folder: Option<String>,
    },

    /// List monitored directories and remote folders with health status.
    Sources,

    /// Show per-directory file and mirrored counts.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = Overrides {
        dirs: cli.dirs,
        output: cli.output,
        remote_folder: cli.remote_folder,
    };
    let cfg = config::load_config(&cli.config, overrides)?;

    match cli.command {
        Commands::Generate => {
            regenerate::run_generate(&cfg).await?;
        }
        Commands::Watch => {
            watch::run_watch(&cfg).await?;
        }
        Commands::Convert {
            dry_run,
            full,
            limit,
            progress,
        } => {
            let opts = ConvertOptions {
                dry_run,
                full,
                limit,
            };
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let summary = convert::run_convert(&cfg, &opts, reporter.as_ref()).await?;
            std::process::exit(summary.exit_code());
        }
        Commands::Cleanup { delete, folder } => {
            mirror::run_cleanup(&cfg, folder, delete).await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Status => {
            sources::show_status(&cfg)?;
        }
    }

    Ok(())
}
