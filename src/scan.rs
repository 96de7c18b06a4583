//! Full scans.
//!
//! Each active location is walked with `walkdir`, then the discovered
//! container paths are reconciled as one batch. Scans of the same location
//! are serialized by the indexer's location lock; different locations run
//! in parallel up to `scan.workers`. Cancellation is checked when the walk
//! enters a directory, never in the middle of a file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use liveset_core::models::{Location, LocationId};

use crate::error::LookupError;
use crate::filters::{PathClass, PathFilter};
use crate::indexer::{Indexer, ReconcileScope, ScanSummary};
use crate::linker;
use crate::progress::{ScanProgressEvent, ScanProgressReporter};

const PROGRESS_EVERY: u64 = 100;

/// Paths found by one walk.
#[derive(Debug, Default)]
pub struct WalkResult {
    pub paths: Vec<PathBuf>,
    pub cancelled: bool,
}

/// Walks `filter.root()` and returns every path the filter would index.
pub fn walk_location(
    filter: &PathFilter,
    follow_symlinks: bool,
    cancel: &CancellationToken,
    on_file: impl FnMut(&Path, u64),
) -> Result<WalkResult> {
    walk_tree(filter, filter.root(), follow_symlinks, cancel, on_file)
}

/// Walks the subtree at `root`, which must lie inside the filter's location.
pub fn walk_tree(
    filter: &PathFilter,
    root: &Path,
    follow_symlinks: bool,
    cancel: &CancellationToken,
    mut on_file: impl FnMut(&Path, u64),
) -> Result<WalkResult> {
    if !root.is_dir() {
        bail!("location root is not a readable directory: {}", root.display());
    }

    let mut result = WalkResult::default();
    let walker = WalkDir::new(root)
        .follow_links(follow_symlinks)
        .into_iter()
        .filter_entry(|e| !e.file_type().is_dir() || filter.descend(e.path()));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                if e.depth() == 0 {
                    bail!("cannot read location root {}: {}", root.display(), e);
                }
                debug!(error = %e, "walk entry skipped");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            continue;
        }
        if !entry.file_type().is_file() && !(follow_symlinks && entry.path().is_file()) {
            continue;
        }
        if filter.classify(entry.path()) == PathClass::Excluded {
            continue;
        }
        result.paths.push(entry.into_path());
        if let Some(last) = result.paths.last() {
            on_file(last, result.paths.len() as u64);
        }
    }
    result.paths.sort();
    Ok(result)
}

/// Per-location result of a scan.
#[derive(Debug, Clone, Serialize)]
pub struct LocationScan {
    pub location: String,
    pub summary: ScanSummary,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub locations: Vec<LocationScan>,
    pub total: ScanSummary,
}

/// Walks and reconciles one location, then relinks its exports.
pub async fn scan_location(
    indexer: &Indexer,
    location: &Location,
    reporter: Arc<dyn ScanProgressReporter>,
    cancel: &CancellationToken,
) -> Result<ScanSummary> {
    let lock = indexer.location_lock(location.id);
    let _guard = lock.lock().await;

    let started = Instant::now();
    info!(location = %location.name, root = %location.root.display(), "scan started");

    let filter = indexer.path_filter(location)?;
    let follow = indexer.config().scan.follow_symlinks;
    let walk_cancel = cancel.clone();
    let walk_reporter = reporter.clone();
    let name = location.name.clone();
    let walked = tokio::task::spawn_blocking(move || {
        walk_location(&filter, follow, &walk_cancel, |path, n| {
            if n % PROGRESS_EVERY == 1 {
                walk_reporter.report(ScanProgressEvent::Walking {
                    location: name.clone(),
                    files_scanned: n,
                    current_path: path.display().to_string(),
                    elapsed: started.elapsed(),
                });
            }
        })
    })
    .await??;

    if walked.cancelled {
        warn!(location = %location.name, "scan cancelled during walk");
        return Ok(ScanSummary {
            cancelled: true,
            elapsed_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        });
    }

    reporter.report(ScanProgressEvent::Reconciling {
        location: location.name.clone(),
        files_scanned: walked.paths.len() as u64,
        elapsed: started.elapsed(),
    });

    let mut summary = indexer
        .reconcile(ReconcileScope::Location(location.clone()), walked.paths, cancel)
        .await?;
    summary.elapsed_ms = started.elapsed().as_millis() as u64;

    if !summary.cancelled {
        linker::link_location(indexer, location).await?;
    }

    info!(
        location = %location.name,
        added = summary.added,
        changed = summary.changed,
        unchanged = summary.unchanged,
        removed = summary.removed,
        failed = summary.failed,
        moved = summary.moved,
        cancelled = summary.cancelled,
        elapsed = ?Duration::from_millis(summary.elapsed_ms),
        "scan finished"
    );
    Ok(summary)
}

/// Scans every active location, or only the one named.
pub async fn scan(
    indexer: &Indexer,
    only: Option<&str>,
    reporter: Arc<dyn ScanProgressReporter>,
    cancel: &CancellationToken,
) -> Result<ScanReport> {
    let locations: Vec<Location> = indexer
        .locations()
        .into_iter()
        .filter(|l| l.active && only.map_or(true, |n| n == l.name))
        .collect();
    if let Some(name) = only {
        if locations.is_empty() {
            bail!("no active location named '{}'", name);
        }
    }

    let slots = Arc::new(Semaphore::new(indexer.config().scan.workers.max(1)));
    let mut tasks = JoinSet::new();
    for location in locations {
        let indexer = indexer.clone();
        let reporter = reporter.clone();
        let cancel = cancel.clone();
        let slots = slots.clone();
        tasks.spawn(async move {
            let _permit = slots.acquire_owned().await;
            let result = scan_location(&indexer, &location, reporter, &cancel).await;
            (location.name, result)
        });
    }

    let mut report = ScanReport::default();
    while let Some(joined) = tasks.join_next().await {
        let (name, result) = joined?;
        match result {
            Ok(summary) => {
                report.total.absorb(&summary);
                report.locations.push(LocationScan {
                    location: name,
                    summary,
                    error: None,
                });
            }
            Err(e) => {
                error!(location = %name, error = %e, "location scan aborted");
                report.locations.push(LocationScan {
                    location: name,
                    summary: ScanSummary::default(),
                    error: Some(format!("{:#}", e)),
                });
            }
        }
    }
    report.locations.sort_by(|a, b| a.location.cmp(&b.location));
    Ok(report)
}

/// `rescan(locationId)`: a full scan of one location by id.
pub async fn rescan_location(
    indexer: &Indexer,
    id: LocationId,
    reporter: Arc<dyn ScanProgressReporter>,
    cancel: &CancellationToken,
) -> Result<ScanSummary> {
    let Some(location) = indexer.location(id) else {
        return Err(LookupError::UnknownLocation(id).into());
    };
    if !location.active {
        return Err(LookupError::InactiveLocation(location.name).into());
    }
    scan_location(indexer, &location, reporter, cancel).await
}
