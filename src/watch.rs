//! Watch mode: filesystem events and remote polls feed the debounce
//! coordinator, which triggers regenerations.
//!
//! Event sources push [`Signal`]s into one unbounded channel:
//!
//! - a `notify` watcher over the monitored directories, for create,
//!   modify and remove events on matching files;
//! - a ticker firing every `watch.poll_interval_secs` when a remote
//!   source folder is configured.
//!
//! [`run_dispatch`] is the single consumer. It owns the
//! [`DebounceCoordinator`], so at most one regeneration runs at a time and
//! signals arriving during a run are queued for one follow-up pass. The
//! remote poll only signals when it actually downloaded something.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::debounce::DebounceCoordinator;
use crate::regenerate::{print_regeneration, Regeneration, Regenerator};
use crate::scanner::Scanner;

/// A change notification delivered to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A matching local file was created, modified or removed.
    Local(PathBuf),
    /// Time to ask the remote source for changes.
    RemotePoll,
}

/// What the dispatcher drives.
#[async_trait]
pub trait WatchHandler: Send {
    /// Rebuild the output document.
    async fn regenerate(&mut self, changes: BTreeSet<String>) -> Result<Regeneration>;

    /// Refresh remote state. Returns the names of files that changed.
    async fn poll_remote(&mut self) -> Result<Vec<String>>;
}

/// Coordinator time that follows tokio's clock, so paused-time tests
/// drive deadlines deterministically.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending().await,
    }
}

/// Consume signals until `shutdown` resolves or every sender is gone and
/// nothing is pending. Fatal (authentication) errors end the loop with an
/// error; other failures are reported and watching continues.
pub async fn run_dispatch<H, S>(
    mut rx: UnboundedReceiver<Signal>,
    mut coordinator: DebounceCoordinator,
    handler: &mut H,
    shutdown: S,
) -> Result<()>
where
    H: WatchHandler + ?Sized,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut open = true;

    loop {
        if !open && !coordinator.is_pending() {
            tracing::debug!("signal channel closed, dispatcher exiting");
            return Ok(());
        }

        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested");
                return Ok(());
            }
            signal = rx.recv(), if open => match signal {
                Some(Signal::Local(path)) => coordinator.signal(path.display().to_string(), now()),
                Some(Signal::RemotePoll) => {
                    poll_remote(handler, &mut coordinator).await?;
                    // Polls requested while this one ran are answered by it.
                    drain(&mut rx, &mut coordinator, &mut open);
                }
                None => open = false,
            },
            _ = sleep_until(coordinator.deadline()) => {}
        }

        let Some(changes) = coordinator.poll(now()) else {
            continue;
        };

        match handler.regenerate(changes).await {
            Ok(result) => print_regeneration(&result),
            Err(e) if crate::remote::is_fatal(&e) => return Err(e),
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "regeneration failed");
                println!(
                    "[{}] ✗ Regeneration failed: {:#}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    e
                );
            }
        }

        // Anything that arrived during the run is queued behind it.
        let poll_due = drain(&mut rx, &mut coordinator, &mut open);
        coordinator.complete(now());
        if poll_due {
            poll_remote(handler, &mut coordinator).await?;
            drain(&mut rx, &mut coordinator, &mut open);
        }
    }
}

/// Take every queued signal without waiting. Local changes go to the
/// coordinator; returns whether a remote poll was requested.
fn drain(
    rx: &mut UnboundedReceiver<Signal>,
    coordinator: &mut DebounceCoordinator,
    open: &mut bool,
) -> bool {
    let mut poll_due = false;
    loop {
        match rx.try_recv() {
            Ok(Signal::Local(path)) => coordinator.signal(path.display().to_string(), now()),
            Ok(Signal::RemotePoll) => poll_due = true,
            Err(TryRecvError::Empty) => return poll_due,
            Err(TryRecvError::Disconnected) => {
                *open = false;
                return poll_due;
            }
        }
    }
}

async fn poll_remote<H>(handler: &mut H, coordinator: &mut DebounceCoordinator) -> Result<()>
where
    H: WatchHandler + ?Sized,
{
    match handler.poll_remote().await {
        Ok(changed) => {
            for name in changed {
                tracing::info!(name = %name, "remote change detected");
                coordinator.signal(format!("remote:{}", name), now());
            }
            Ok(())
        }
        Err(e) if crate::remote::is_fatal(&e) => Err(e),
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "remote poll failed");
            println!("⚠ Error polling remote files: {:#}", e);
            Ok(())
        }
    }
}

/// Filter for raw filesystem events: matching extension, not excluded, and
/// not one of our own outputs.
struct EventFilter {
    scanner: Scanner,
}

impl EventFilter {
    fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            scanner: Scanner::for_config(config)?,
        })
    }

    fn wants(&self, kind: &EventKind, path: &Path) -> bool {
        matches!(
            kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && self.scanner.matches(path)
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Start a recursive watcher over every existing monitored directory.
fn spawn_fs_watcher(config: &Config, tx: UnboundedSender<Signal>) -> Result<RecommendedWatcher> {
    let filter = EventFilter::new(config)?;
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                for path in event.paths {
                    if filter.wants(&event.kind, &path) {
                        let _ = tx.send(Signal::Local(path));
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "file watcher error"),
        }
    })
    .context("Failed to start file watcher")?;

    for dir in &config.watch.dirs {
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "not watching missing directory");
            continue;
        }
        watcher
            .watch(&absolute(dir), RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        println!("📁 Monitoring: {}", dir.display());
    }
    Ok(watcher)
}

/// Ticks late after a stall are delayed, never fired in a burst.
fn poll_ticker(interval: std::time::Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn spawn_poll_ticker(interval: std::time::Duration, tx: UnboundedSender<Signal>) {
    tokio::spawn(async move {
        let mut ticker = poll_ticker(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(Signal::RemotePoll).is_err() {
                break;
            }
        }
    });
}

/// Open the signal channel and start the file watcher, then run the
/// initial pass. Edits made while that pass runs are already queued.
async fn start_watching<H>(
    config: &Config,
    handler: &mut H,
) -> Result<(RecommendedWatcher, UnboundedSender<Signal>, UnboundedReceiver<Signal>)>
where
    H: WatchHandler + ?Sized,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = spawn_fs_watcher(config, tx.clone())?;

    println!("🔍 Scanning for text files...");
    if let Err(e) = handler.poll_remote().await {
        if crate::remote::is_fatal(&e) {
            return Err(e);
        }
        println!("⚠ Error fetching remote files: {:#}", e);
    }
    match handler.regenerate(BTreeSet::new()).await {
        Ok(result) => print_regeneration(&result),
        Err(e) if crate::remote::is_fatal(&e) => return Err(e),
        Err(e) => println!("✗ Initial regeneration failed: {:#}", e),
    }
    Ok((watcher, tx, rx))
}

/// `ctxsync watch`: regenerate once, then on every debounced change until
/// Ctrl+C.
pub async fn run_watch(config: &Config) -> Result<()> {
    let mut regenerator = Regenerator::from_config(config)?;
    let (_watcher, tx, rx) = start_watching(config, &mut regenerator).await?;
    if regenerator.has_remote() {
        let interval = config.watch.poll_interval();
        println!("☁ Polling remote folder every {}s", interval.as_secs());
        spawn_poll_ticker(interval, tx.clone());
    }
    drop(tx);

    println!("\n👀 Watching for changes... Press Ctrl+C to stop");
    let coordinator = DebounceCoordinator::new(config.watch.quiet_period());
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    run_dispatch(rx, coordinator, &mut regenerator, shutdown).await?;
    println!("\n👋 Stopped watching");
    Ok(())
}
