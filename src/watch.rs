//! Live change watching.
//!
//! `notify` callbacks only normalise events and push them into a bounded
//! queue. A single consumer task drains the queue, waits for the debounce
//! window to go quiet, and applies the batch through
//! [`Indexer::reconcile`], the same entry point full scans use. A full
//! queue drops the event with a warning; the next full scan corrects it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use liveset_core::models::{LocationId, ProjectStatus};
use liveset_core::store::ProjectFilter;

use crate::analysis::SimilarityPass;
use crate::indexer::{path_key, Indexer, ReconcileScope, ScanSummary};
use crate::linker;
use crate::scan::walk_tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchKind,
}

/// Maps one backend event onto zero or more [`WatchEvent`]s.
pub fn normalize(event: &Event) -> Vec<WatchEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => WatchKind::Created,
        EventKind::Modify(ModifyKind::Name(_)) => WatchKind::Renamed,
        EventKind::Modify(_) => WatchKind::Modified,
        EventKind::Remove(_) => WatchKind::Deleted,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|p| WatchEvent {
            path: p.clone(),
            kind,
        })
        .collect()
}

/// Starts watching every active location root. Events land in `tx`; the
/// returned watcher must be kept alive for as long as events are wanted.
pub fn start_watcher(indexer: &Indexer, tx: mpsc::Sender<WatchEvent>) -> Result<RecommendedWatcher> {
    let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for ev in normalize(&event) {
                match tx.try_send(ev) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(ev)) => {
                        warn!(path = %ev.path.display(), "watch queue full; event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
        }
        Err(e) => warn!(error = %e, "watch backend error"),
    })
    .context("failed to create file watcher")?;

    for location in indexer.locations().into_iter().filter(|l| l.active) {
        watcher
            .watch(&location.root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", location.root.display()))?;
        info!(location = %location.name, root = %location.root.display(), "watching");
    }
    Ok(watcher)
}

/// A debounced batch expanded into container paths.
#[derive(Debug, Default)]
struct Batch {
    paths: BTreeSet<PathBuf>,
    relink: BTreeSet<LocationId>,
}

/// Turns raw event paths into container paths to reconcile. A directory
/// that appeared is walked; one that vanished expands to the stored
/// records under it. Audio files only trigger a relink.
async fn expand(indexer: &Indexer, events: BTreeMap<PathBuf, WatchKind>) -> Result<Batch> {
    let mut batch = Batch::default();
    let mut stored: Option<Vec<String>> = None;
    let exports = &indexer.config().exports;

    for (path, kind) in events {
        let Some(location) = indexer.location_for(&path) else {
            continue;
        };
        let filter = indexer.path_filter(&location)?;

        if filter.has_container_extension(&path) {
            batch.paths.insert(path);
            batch.relink.insert(location.id);
            continue;
        }
        let is_audio = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|e| exports.audio_extensions.iter().any(|x| x.eq_ignore_ascii_case(&e)));
        if is_audio {
            batch.relink.insert(location.id);
            continue;
        }

        if path.is_dir() {
            if kind == WatchKind::Modified {
                continue;
            }
            let follow = indexer.config().scan.follow_symlinks;
            let dir = path.clone();
            let walked = tokio::task::spawn_blocking(move || {
                walk_tree(&filter, &dir, follow, &CancellationToken::new(), |_, _| {})
            })
            .await??;
            if !walked.paths.is_empty() {
                batch.relink.insert(location.id);
            }
            batch.paths.extend(walked.paths);
        } else if !path.exists() {
            if stored.is_none() {
                stored = Some(
                    indexer
                        .store()
                        .list_projects(&ProjectFilter::default())
                        .await?
                        .into_iter()
                        .filter(|r| r.status != ProjectStatus::Missing)
                        .map(|r| r.path)
                        .collect(),
                );
            }
            let prefix = path_key(&path);
            for p in stored.iter().flatten() {
                if Path::new(p).starts_with(&path) && *p != prefix {
                    batch.paths.insert(PathBuf::from(p));
                    batch.relink.insert(location.id);
                }
            }
        }
    }
    Ok(batch)
}

/// Reconciles one batch and refreshes what depends on it.
async fn apply(
    indexer: &Indexer,
    pass: &SimilarityPass,
    events: BTreeMap<PathBuf, WatchKind>,
) -> Result<ScanSummary> {
    let batch = expand(indexer, events).await?;
    if batch.paths.is_empty() && batch.relink.is_empty() {
        return Ok(ScanSummary::default());
    }

    let summary = indexer
        .reconcile(
            ReconcileScope::Paths,
            batch.paths.into_iter().collect(),
            &indexer.shutdown_token(),
        )
        .await?;

    for id in &batch.relink {
        if let Some(location) = indexer.location(*id) {
            linker::link_location(indexer, &location).await?;
        }
    }

    if summary.mutations() > 0 {
        let indexer = indexer.clone();
        let pass = pass.clone();
        tokio::spawn(async move {
            if let Err(e) = pass.try_run(&indexer).await {
                error!(error = %e, "similarity pass failed");
            }
        });
    }
    Ok(summary)
}

/// Consumes the queue until it closes or `cancel` fires.
pub async fn consume(
    indexer: Indexer,
    mut rx: mpsc::Receiver<WatchEvent>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    let pass = SimilarityPass::new(&indexer);
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            ev = rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
        };

        let mut pending = BTreeMap::new();
        pending.insert(first.path, first.kind);
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(ev)) => {
                    pending.insert(ev.path, ev.kind);
                }
                Ok(None) | Err(_) => break,
            }
        }

        let count = pending.len();
        match apply(&indexer, &pass, pending).await {
            Ok(summary) if summary.mutations() > 0 => info!(
                events = count,
                added = summary.added,
                changed = summary.changed,
                removed = summary.removed,
                failed = summary.failed,
                moved = summary.moved,
                "watch batch applied"
            ),
            Ok(_) => debug!(events = count, "watch batch had no effect"),
            Err(e) => warn!(events = count, error = %e, "watch batch dropped"),
        }
    }
    debug!("watch consumer stopped");
}

/// Watches every active location until the indexer shuts down.
pub async fn run(indexer: Indexer) -> Result<()> {
    let watch = &indexer.config().watch;
    let (tx, rx) = mpsc::channel(watch.queue_capacity.max(1));
    let debounce = Duration::from_millis(watch.debounce_ms);
    let _watcher = start_watcher(&indexer, tx)?;
    let cancel = indexer.shutdown_token();
    consume(indexer, rx, debounce, cancel).await;
    Ok(())
}
