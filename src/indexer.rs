//! The reconciliation pipeline.
//!
//! [`Indexer`] is the one handle that mutates project records. Full scans,
//! `rescan_single`, and watch events all call [`Indexer::reconcile`], so
//! their results cannot diverge. Per path the pipeline is:
//!
//! ```text
//! classify ──▶ stat ──▶ fingerprint cache ──▶ sha256 ──▶ decode ──▶ commit
//!  (globs)              (size, mtime)         (on miss)   (pool)
//! ```
//!
//! Every step after classification runs under a per-path lock, so a scan
//! and a watch event racing on the same file serialize. Decoding runs on
//! blocking threads bounded by a semaphore.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use liveset_core::decoder;
use liveset_core::models::{Location, LocationId, ProjectId, ProjectRecord, ProjectStatus};
use liveset_core::store::{ProjectFilter, ProjectStore};

use crate::config::{Config, MoveTieBreak, RenamePolicy};
use crate::error::{IndexError, IndexResult, LookupError};
use crate::filters::{PathClass, PathFilter};
use crate::fingerprint::{self, FingerprintIndex, StatCheck};
use crate::store::SqliteStore;
use crate::{db, migrate};

/// What a reconcile call covers.
#[derive(Debug, Clone)]
pub enum ReconcileScope {
    /// A full walk of one location: stored paths under it that were not
    /// discovered are Removed.
    Location(Location),
    /// Explicit paths: an explicit path that no longer exists is Removed.
    Paths,
}

/// Counts reported at the end of a reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub added: u64,
    pub changed: u64,
    pub unchanged: u64,
    pub removed: u64,
    pub failed: u64,
    pub moved: u64,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl ScanSummary {
    /// Number of committed record mutations.
    pub fn mutations(&self) -> u64 {
        self.added + self.changed + self.removed + self.failed + self.moved
    }

    pub fn absorb(&mut self, other: &ScanSummary) {
        self.added += other.added;
        self.changed += other.changed;
        self.unchanged += other.unchanged;
        self.removed += other.removed;
        self.failed += other.failed;
        self.moved += other.moved;
        self.cancelled |= other.cancelled;
        self.elapsed_ms += other.elapsed_ms;
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Added => self.added += 1,
            Outcome::Changed => self.changed += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Removed => self.removed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Moved => self.moved += 1,
            Outcome::Skipped => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Added,
    Changed,
    Unchanged,
    Removed,
    Failed,
    Moved,
    /// Excluded, or not a file.
    Skipped,
}

/// Handle owning the store, the fingerprint cache, and the locks that
/// serialize work on a path. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Indexer {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    store: Arc<dyn ProjectStore>,
    fingerprints: FingerprintIndex,
    path_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    location_locks: Mutex<HashMap<LocationId, Arc<tokio::sync::Mutex<()>>>>,
    parse_slots: Arc<Semaphore>,
    locations: RwLock<Vec<Location>>,
    shutdown: CancellationToken,
}

/// Held while a path is being reconciled.
struct PathGuard {
    indexer: Indexer,
    key: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .indexer
            .inner
            .path_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if locks.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.key);
        }
    }
}

/// Records eligible to be the source of a hash move in one pass.
struct MovePool {
    policy: RenamePolicy,
    tie_break: MoveTieBreak,
    candidates: Vec<ProjectRecord>,
    claimed: Mutex<HashSet<ProjectId>>,
}

impl MovePool {
    fn disabled() -> Self {
        Self {
            policy: RenamePolicy::DeleteAdd,
            tie_break: MoveTieBreak::Skip,
            candidates: Vec::new(),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, content_hash: &str, new_path: &str) -> Option<ProjectRecord> {
        if self.policy != RenamePolicy::HashMove {
            return None;
        }
        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        let matching: Vec<&ProjectRecord> = self
            .candidates
            .iter()
            .filter(|r| r.content_hash == content_hash && !claimed.contains(&r.id))
            .collect();
        let chosen = match (matching.len(), self.tie_break) {
            (0, _) => None,
            (1, _) => matching.first().copied(),
            (_, MoveTieBreak::Skip) => None,
            (_, MoveTieBreak::NearestPath) => matching
                .iter()
                .copied()
                .max_by(|a, b| {
                    shared_prefix(&a.path, new_path)
                        .cmp(&shared_prefix(&b.path, new_path))
                        .then_with(|| b.path.cmp(&a.path))
                }),
        }?;
        claimed.insert(chosen.id);
        Some(chosen.clone())
    }

    fn is_claimed(&self, id: ProjectId) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }
}

fn shared_prefix(a: &str, b: &str) -> usize {
    Path::new(a)
        .components()
        .zip(Path::new(b).components())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Stable string key for a path.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Absolute, symlink-resolved form of a path. For a path that no longer
/// exists the parent is resolved instead.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(p) = std::fs::canonicalize(path) {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            std::fs::canonicalize(parent)
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

fn is_under(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
        && !path
            .strip_prefix(root)
            .map(|rel| rel.components().any(|c| c == Component::ParentDir))
            .unwrap_or(true)
}

impl Indexer {
    /// Connects to the configured database, applies migrations, and
    /// registers the configured locations.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Self::with_store(config.clone(), Arc::new(SqliteStore::new(pool))).await
    }

    pub async fn with_store(config: Config, store: Arc<dyn ProjectStore>) -> Result<Self> {
        let records = store.list_projects(&ProjectFilter::default()).await?;
        let fingerprints = FingerprintIndex::from_records(&records);
        let parse_workers = config.scan.parse_workers.max(1);
        let indexer = Self {
            inner: Arc::new(Inner {
                config,
                store,
                fingerprints,
                path_locks: Mutex::new(HashMap::new()),
                location_locks: Mutex::new(HashMap::new()),
                parse_slots: Arc::new(Semaphore::new(parse_workers)),
                locations: RwLock::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        };
        indexer.sync_locations().await?;
        debug!(records = records.len(), "fingerprint index loaded");
        Ok(indexer)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.inner.store
    }

    /// Upserts every configured location and refreshes the cached list.
    pub async fn sync_locations(&self) -> Result<Vec<Location>> {
        for loc in &self.inner.config.locations {
            let root = normalize_path(&loc.root);
            self.inner
                .store
                .upsert_location(&loc.name, &path_key(&root), loc.active, &loc.exclude_globs)
                .await
                .with_context(|| format!("failed to register location '{}'", loc.name))?;
        }
        let locations = self.inner.store.list_locations().await?;
        *self
            .inner
            .locations
            .write()
            .unwrap_or_else(|e| e.into_inner()) = locations.clone();
        Ok(locations)
    }

    pub fn locations(&self) -> Vec<Location> {
        self.inner
            .locations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn location(&self, id: LocationId) -> Option<Location> {
        self.locations().into_iter().find(|l| l.id == id)
    }

    pub fn location_by_name(&self, name: &str) -> Option<Location> {
        self.locations().into_iter().find(|l| l.name == name)
    }

    /// The active location with the deepest root containing `path`.
    pub fn location_for(&self, path: &Path) -> Option<Location> {
        self.locations()
            .into_iter()
            .filter(|l| l.active && is_under(path, &l.root))
            .max_by_key(|l| l.root.components().count())
    }

    pub fn path_filter(&self, location: &Location) -> Result<PathFilter> {
        PathFilter::new(&location.root, &location.exclude_globs, &self.inner.config.scan)
    }

    /// Lock serializing full scans of one location.
    pub fn location_lock(&self, id: LocationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .location_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Waits for exclusive use of `key`. The lock table entry is dropped
    /// when the last holder or waiter releases it.
    async fn lock_path(&self, key: &str) -> PathGuard {
        let lock = {
            let mut locks = self
                .inner
                .path_locks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            locks.entry(key.to_string()).or_default().clone()
        };
        PathGuard {
            indexer: self.clone(),
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Token cancelled by [`Indexer::shutdown`]; long-lived workers select
    /// on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Signals every worker holding this handle to stop.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Every stored record, ordered by path.
    pub async fn snapshot(&self) -> Result<Vec<ProjectRecord>> {
        self.inner.store.list_projects(&ProjectFilter::default()).await
    }

    /// Brings the store in line with the filesystem for `discovered`.
    ///
    /// Applying it twice to an unchanged tree commits nothing the second
    /// time. Results computed after `cancel` fires are discarded, and no
    /// record is marked MISSING by a cancelled pass.
    pub async fn reconcile(
        &self,
        scope: ReconcileScope,
        discovered: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary> {
        let started = Instant::now();
        let mut summary = ScanSummary::default();

        let mut seen = HashSet::new();
        let discovered: Vec<PathBuf> = discovered
            .into_iter()
            .filter(|p| seen.insert(path_key(p)))
            .collect();

        let (vanished, present) = self.partition(&scope, discovered).await?;
        let moves = Arc::new(self.move_pool(&vanished).await?);

        let mut filters: HashMap<LocationId, Arc<PathFilter>> = HashMap::new();
        let mut tasks = JoinSet::new();
        for path in present {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let location = match &scope {
                ReconcileScope::Location(loc) => Some(loc.clone()),
                ReconcileScope::Paths => self.location_for(&path),
            };
            let Some(location) = location else {
                debug!(path = %path.display(), "not under an active location; skipped");
                continue;
            };
            let filter = match filters.get(&location.id) {
                Some(f) => f.clone(),
                None => {
                    let f = Arc::new(self.path_filter(&location)?);
                    filters.insert(location.id, f.clone());
                    f
                }
            };

            let permit = self
                .inner
                .parse_slots
                .clone()
                .acquire_owned()
                .await
                .context("parse pool closed")?;
            let this = self.clone();
            let moves = moves.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = this
                    .process_path(&path, &location, &filter, &moves, &cancel)
                    .await;
                (path, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => summary.record(outcome),
                Ok((_, Err(IndexError::Cancelled))) => {}
                Ok((path, Err(e))) => {
                    error!(path = %path.display(), error = %e, "reconcile failed for path");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "reconcile task panicked");
                    summary.failed += 1;
                }
            }
        }

        if cancel.is_cancelled() {
            summary.cancelled = true;
        } else {
            let scope_filter = match &scope {
                ReconcileScope::Location(loc) => Some(self.path_filter(loc)?),
                ReconcileScope::Paths => None,
            };
            for record in vanished {
                if moves.is_claimed(record.id) {
                    continue;
                }
                // Still on disk but no longer wanted by the walk's rules.
                let excluded = scope_filter.as_ref().is_some_and(|f| {
                    f.classify(Path::new(&record.path)) == PathClass::Excluded
                });
                match self.mark_missing(&record.path, excluded).await {
                    Ok(Outcome::Removed) => summary.removed += 1,
                    Ok(_) => {}
                    Err(e) => {
                        error!(path = %record.path, error = %e, "failed to mark record missing");
                        summary.failed += 1;
                    }
                }
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }

    /// Splits the request into records that vanished and paths to process.
    async fn partition(
        &self,
        scope: &ReconcileScope,
        discovered: Vec<PathBuf>,
    ) -> Result<(Vec<ProjectRecord>, Vec<PathBuf>)> {
        match scope {
            ReconcileScope::Location(location) => {
                let keys: HashSet<String> = discovered.iter().map(|p| path_key(p)).collect();
                let filter = ProjectFilter {
                    location_id: Some(location.id),
                    ..Default::default()
                };
                let vanished = self
                    .inner
                    .store
                    .list_projects(&filter)
                    .await?
                    .into_iter()
                    .filter(|r| r.status != ProjectStatus::Missing && !keys.contains(&r.path))
                    .collect();
                Ok((vanished, discovered))
            }
            ReconcileScope::Paths => {
                let mut vanished = Vec::new();
                let mut present = Vec::new();
                for path in discovered {
                    if tokio::fs::symlink_metadata(&path).await.is_ok() {
                        present.push(path);
                        continue;
                    }
                    let key = path_key(&path);
                    match self.inner.store.get_project_by_path(&key).await? {
                        Some(r) if r.status != ProjectStatus::Missing => vanished.push(r),
                        _ => debug!(path = %key, "vanished path has no live record"),
                    }
                }
                Ok((vanished, present))
            }
        }
    }

    async fn move_pool(&self, vanished: &[ProjectRecord]) -> Result<MovePool> {
        let watch = &self.inner.config.watch;
        if watch.rename_policy != RenamePolicy::HashMove {
            return Ok(MovePool::disabled());
        }
        let window = chrono::Duration::from_std(Duration::from_millis(watch.move_window_ms))
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - window;
        let recent_missing = self
            .inner
            .store
            .list_projects(&ProjectFilter {
                status: Some(ProjectStatus::Missing),
                ..Default::default()
            })
            .await?
            .into_iter()
            .filter(|r| r.last_scanned >= cutoff);

        let mut candidates: Vec<ProjectRecord> = vanished.to_vec();
        candidates.extend(recent_missing);
        Ok(MovePool {
            policy: watch.rename_policy,
            tie_break: watch.move_tie_break,
            candidates,
            claimed: Mutex::new(HashSet::new()),
        })
    }

    async fn process_path(
        &self,
        path: &Path,
        location: &Location,
        filter: &PathFilter,
        moves: &MovePool,
        cancel: &CancellationToken,
    ) -> IndexResult<Outcome> {
        let key = path_key(path);
        let class = filter.classify(path);
        let _guard = self.lock_path(&key).await;

        if class == PathClass::Excluded {
            debug!(path = %key, "excluded");
            return Ok(self.mark_missing_locked(&key).await?);
        }

        let stat = match fingerprint::stat(path) {
            Ok(s) => s,
            Err(e) => return self.vanished_mid_read(&key, e).await,
        };

        if let StatCheck::Unchanged(_) = self.inner.fingerprints.check(&key, stat) {
            debug!(path = %key, "unchanged");
            return Ok(Outcome::Unchanged);
        }

        let owned = path.to_path_buf();
        let hashed = tokio::task::spawn_blocking(move || fingerprint::hash_stable(&owned, stat))
            .await
            .map_err(|e| IndexError::Store(e.into()))?;
        let hashed = match hashed {
            Ok(h) => h,
            Err(e) => return self.vanished_mid_read(&key, e).await,
        };
        if hashed.raced {
            warn!(error = %IndexError::HashRace { path: path.to_path_buf() }, "treating as changed");
        }

        let existing = self.inner.store.get_project_by_path(&key).await?;
        let now = Utc::now();

        if let Some(record) = &existing {
            if record.status != ProjectStatus::Missing
                && record.content_hash == hashed.content_hash
                && !hashed.raced
            {
                if cancel.is_cancelled() {
                    return Err(IndexError::Cancelled);
                }
                let mut touched = record.clone();
                touched.size = hashed.stat.size;
                touched.mtime = hashed.stat.mtime;
                touched.last_scanned = now;
                self.commit(&touched).await?;
                debug!(path = %key, "stat moved, content unchanged");
                return Ok(Outcome::Unchanged);
            }
        }

        let moved_from = match &existing {
            None => moves.claim(&hashed.content_hash, &key),
            Some(_) => None,
        };

        let base = existing.clone().or_else(|| moved_from.clone());
        let mut record = match base {
            Some(r) => r,
            None => ProjectRecord {
                id: Uuid::new_v4(),
                path: key.clone(),
                name: String::new(),
                location_id: None,
                content_hash: String::new(),
                size: 0,
                mtime: 0,
                status: ProjectStatus::Active,
                metadata: None,
                parse_error: None,
                export_song_name: None,
                first_seen: now,
                last_scanned: now,
                last_parsed: None,
            },
        };
        let previous_hash = record.content_hash.clone();
        record.path = key.clone();
        record.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        record.location_id = Some(location.id);
        record.content_hash = hashed.content_hash.clone();
        record.size = hashed.stat.size;
        record.mtime = hashed.stat.mtime;
        record.last_scanned = now;

        let decoded = if class == PathClass::Backup {
            None
        } else {
            match self.decode(path).await {
                Ok(result) => Some(result),
                Err(e) => return self.vanished_mid_read(&key, e).await,
            }
        };

        if cancel.is_cancelled() {
            debug!(path = %key, "cancelled before commit; result discarded");
            return Err(IndexError::Cancelled);
        }

        let mut failed = false;
        match decoded {
            None => {
                record.status = ProjectStatus::Backup;
                record.metadata = None;
                record.parse_error = None;
            }
            Some(Ok(metadata)) => {
                record.status = ProjectStatus::Active;
                record.metadata = Some(metadata);
                record.parse_error = None;
                record.last_parsed = Some(now);
            }
            Some(Err(e)) => {
                let err = IndexError::from(e);
                warn!(path = %key, error = %err, "container could not be decoded");
                record.status = ProjectStatus::ParseFailed;
                record.metadata = None;
                record.parse_error = Some(err.to_string());
                record.last_parsed = Some(now);
                failed = true;
            }
        }

        self.commit(&record).await?;
        if !previous_hash.is_empty() && previous_hash != record.content_hash {
            let dropped = self.inner.store.invalidate_scores(record.id).await?;
            debug!(path = %key, dropped, "similarity rows invalidated");
        }

        let outcome = if failed {
            Outcome::Failed
        } else if let Some(from) = &moved_from {
            info!(from = %from.path, to = %key, "recognised move");
            Outcome::Moved
        } else if existing.is_some() {
            Outcome::Changed
        } else {
            Outcome::Added
        };
        debug!(path = %key, ?outcome, status = %record.status, "committed");
        Ok(outcome)
    }

    /// Reads and decodes on a blocking thread. The outer error is I/O; the
    /// inner one is the container's own failure.
    async fn decode(
        &self,
        path: &Path,
    ) -> IndexResult<std::result::Result<liveset_core::models::ProjectMetadata, decoder::FormatError>>
    {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&owned).map_err(|e| IndexError::io(&owned, e))?;
            Ok(decoder::decode(&bytes, owned.parent()))
        })
        .await
        .map_err(|e| IndexError::Store(e.into()))?
    }

    /// An I/O failure mid-read: a known record is Removed for this cycle,
    /// an unknown one is skipped. The next pass retries either way.
    async fn vanished_mid_read(&self, key: &str, err: IndexError) -> IndexResult<Outcome> {
        match err {
            IndexError::Io { .. } => {
                warn!(path = %key, error = %err, "file unreadable; treating as removed");
                Ok(self.mark_missing_locked(key).await?)
            }
            other => Err(other),
        }
    }

    /// Transitions a vanished record to MISSING. An `excluded` path is
    /// transitioned even though it still exists on disk.
    async fn mark_missing(&self, key: &str, excluded: bool) -> Result<Outcome> {
        let _guard = self.lock_path(key).await;
        if !excluded && tokio::fs::metadata(key).await.is_ok() {
            // Reappeared after partitioning; the next pass picks it up.
            return Ok(Outcome::Skipped);
        }
        self.mark_missing_locked(key).await
    }

    async fn mark_missing_locked(&self, key: &str) -> Result<Outcome> {
        let Some(mut record) = self.inner.store.get_project_by_path(key).await? else {
            return Ok(Outcome::Skipped);
        };
        if record.status == ProjectStatus::Missing {
            return Ok(Outcome::Skipped);
        }
        record.status = ProjectStatus::Missing;
        record.last_scanned = Utc::now();
        self.commit(&record).await?;
        info!(path = %key, "record marked missing");
        Ok(Outcome::Removed)
    }

    async fn commit(&self, record: &ProjectRecord) -> Result<()> {
        self.inner.store.upsert_project(record).await?;
        self.inner.fingerprints.insert(record);
        Ok(())
    }

    /// Reconciles one path outside any scan.
    pub async fn rescan_single(&self, path: &Path) -> Result<ScanSummary> {
        let path = normalize_path(path);
        if self.location_for(&path).is_none() {
            return Err(LookupError::OutsideLocations(path).into());
        }
        self.reconcile(ReconcileScope::Paths, vec![path], &CancellationToken::new())
            .await
    }

    /// Hard-deletes a MISSING record with its exports and similarity rows.
    pub async fn purge(&self, path: &Path) -> Result<ProjectRecord> {
        let key = path_key(&normalize_path(path));
        let _guard = self.lock_path(&key).await;

        let record = match self.inner.store.get_project_by_path(&key).await? {
            Some(r) => r,
            None => match self.inner.store.get_project_by_path(&path_key(path)).await? {
                Some(r) => r,
                None => bail!("no project recorded at {}", key),
            },
        };
        if record.status != ProjectStatus::Missing {
            bail!(
                "refusing to purge {}: status is {}, only MISSING records can be purged",
                record.path,
                record.status
            );
        }
        self.inner.store.purge_project(record.id).await?;
        self.inner.fingerprints.remove(&record.path);
        info!(path = %record.path, "record purged");
        Ok(record)
    }

    /// Sets or clears the operator alias used for export linking.
    pub async fn set_export_name(&self, id: ProjectId, name: Option<&str>) -> Result<bool> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let Some(record) = self.inner.store.get_project(id).await? else {
            return Ok(false);
        };
        let _guard = self.lock_path(&record.path).await;
        self.inner.store.set_export_song_name(id, name).await
    }
}
