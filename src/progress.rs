//! Scan progress reporting.
//!
//! Reports observable progress during `lsi scan` so users see which
//! location is being walked, how many files were seen, and how long it has
//! taken. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts. Logs go through `tracing`; this is the separate
//! human-facing channel.

use std::io::Write;
use std::time::Duration;

/// A single progress event for a scan.
#[derive(Clone, Debug)]
pub enum ScanProgressEvent {
    /// Walking a location; `files_scanned` counts container files seen so far.
    Walking {
        location: String,
        files_scanned: u64,
        current_path: String,
        elapsed: Duration,
    },
    /// Walk finished; reconciliation of `files_scanned` paths is starting.
    Reconciling {
        location: String,
        files_scanned: u64,
        elapsed: Duration,
    },
}

/// Reports scan progress. Implementations write to stderr (human or JSON).
pub trait ScanProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the scan orchestrator.
    fn report(&self, event: ScanProgressEvent);
}

/// Human-friendly progress on stderr: "scan Studio  1,234 files  3.2s  /music/Song.als".
pub struct StderrProgress;

impl ScanProgressReporter for StderrProgress {
    fn report(&self, event: ScanProgressEvent) {
        let line = match &event {
            ScanProgressEvent::Walking {
                location,
                files_scanned,
                current_path,
                elapsed,
            } => format!(
                "scan {}  {} files  {:.1}s  {}\n",
                location,
                format_number(*files_scanned),
                elapsed.as_secs_f64(),
                current_path
            ),
            ScanProgressEvent::Reconciling {
                location,
                files_scanned,
                elapsed,
            } => format!(
                "scan {}  reconciling {} files  {:.1}s\n",
                location,
                format_number(*files_scanned),
                elapsed.as_secs_f64()
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ScanProgressReporter for JsonProgress {
    fn report(&self, event: ScanProgressEvent) {
        let obj = match &event {
            ScanProgressEvent::Walking {
                location,
                files_scanned,
                current_path,
                elapsed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "walking",
                "location": location,
                "files_scanned": files_scanned,
                "current_path": current_path,
                "elapsed_ms": elapsed.as_millis() as u64
            }),
            ScanProgressEvent::Reconciling {
                location,
                files_scanned,
                elapsed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "reconciling",
                "location": location,
                "files_scanned": files_scanned,
                "elapsed_ms": elapsed.as_millis() as u64
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ScanProgressReporter for NoProgress {
    fn report(&self, _event: ScanProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
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

    pub fn reporter(&self) -> Box<dyn ScanProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
