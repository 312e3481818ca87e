//! Conversion progress reporting.
//!
//! Reports observable progress during `ctxsync convert` so users see what
//! is being scanned and how much is left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a conversion run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConvertProgressEvent {
    /// Scanning the monitored directories. Total unknown.
    Scanning { dirs: usize },
    /// `n` files processed out of `total` needing work.
    Converting { n: u64, total: u64 },
}

/// Reports conversion progress. Implementations write to stderr.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ConvertProgressEvent);
}

/// Human-friendly progress on stderr: "convert  12 / 1,204 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ConvertProgressEvent) {
        let line = match &event {
            ConvertProgressEvent::Scanning { dirs } => {
                format!("convert  scanning {} director{}...\n", dirs, plural(*dirs))
            }
            ConvertProgressEvent::Converting { n, total } => format!(
                "convert  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ConvertProgressEvent) {
        let obj = match &event {
            ConvertProgressEvent::Scanning { dirs } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "dirs": dirs
            }),
            ConvertProgressEvent::Converting { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "converting",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ConvertProgressEvent) {}
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
