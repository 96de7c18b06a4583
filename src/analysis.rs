//! Derived relationships: the background similarity pass and the read
//! paths for `similar` and `duplicates`.
//!
//! Scoring works on a snapshot of the store and runs on a blocking thread,
//! so reconciliation never waits for it. Cached rows may lag one cycle
//! behind; rows whose features changed are dropped and rescored on the
//! next pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use liveset_core::models::{PairKey, ProjectId, ProjectRecord, SimilarityScore};
use liveset_core::similarity::{DuplicateCluster, SimilarMatch, SimilarityEngine};

use crate::error::LookupError;
use crate::indexer::Indexer;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub projects: u64,
    pub scored: u64,
    pub kept: u64,
    pub invalidated: u64,
}

/// Recomputes cached similarity rows whose inputs changed.
#[derive(Clone)]
pub struct SimilarityPass {
    engine: SimilarityEngine,
    running: Arc<tokio::sync::Mutex<()>>,
}

impl SimilarityPass {
    pub fn new(indexer: &Indexer) -> Self {
        Self {
            engine: SimilarityEngine::new(indexer.config().similarity.params()),
            running: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Runs a pass unless one is already in flight.
    pub async fn try_run(&self, indexer: &Indexer) -> Result<Option<PassSummary>> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("similarity pass already running; skipped");
            return Ok(None);
        };
        self.run_locked(indexer).await.map(Some)
    }

    pub async fn run(&self, indexer: &Indexer) -> Result<PassSummary> {
        let _guard = self.running.lock().await;
        self.run_locked(indexer).await
    }

    async fn run_locked(&self, indexer: &Indexer) -> Result<PassSummary> {
        let store = indexer.store();
        let snapshot = indexer.snapshot().await?;
        let cached = store.list_scores().await?;

        let live: HashMap<ProjectId, &ProjectRecord> = snapshot
            .iter()
            .filter(|r| r.is_analyzable())
            .map(|r| (r.id, r))
            .collect();

        let mut stale: HashSet<ProjectId> = HashSet::new();
        for row in &cached {
            for (id, hash) in [(row.pair.a, &row.hash_a), (row.pair.b, &row.hash_b)] {
                match live.get(&id) {
                    Some(r) if r.content_hash == *hash => {}
                    _ => {
                        stale.insert(id);
                    }
                }
            }
        }
        let mut invalidated = 0;
        for id in &stale {
            invalidated += store.invalidate_scores(*id).await?;
        }

        let keep: HashSet<PairKey> = cached
            .iter()
            .filter(|row| !stale.contains(&row.pair.a) && !stale.contains(&row.pair.b))
            .map(|row| row.pair)
            .collect();

        let engine = self.engine.clone();
        let projects = snapshot.len() as u64;
        let fresh: Vec<SimilarityScore> = tokio::task::spawn_blocking(move || {
            engine
                .candidate_pairs(&snapshot)
                .into_iter()
                .filter(|&(i, j)| !keep.contains(&PairKey::new(snapshot[i].id, snapshot[j].id)))
                .filter_map(|(i, j)| engine.score(&snapshot[i], &snapshot[j]))
                .collect()
        })
        .await?;
        store.upsert_scores(&fresh).await?;

        let summary = PassSummary {
            projects,
            scored: fresh.len() as u64,
            kept: (cached.len() as u64).saturating_sub(invalidated),
            invalidated,
        };
        info!(
            projects = summary.projects,
            scored = summary.scored,
            kept = summary.kept,
            invalidated = summary.invalidated,
            "similarity pass finished"
        );
        Ok(summary)
    }
}

/// Up to `k` projects most similar to `id`, reusing current cached rows.
pub async fn similar(
    indexer: &Indexer,
    id: ProjectId,
    k: usize,
    min_score: f64,
) -> Result<Vec<SimilarMatch>> {
    let store = indexer.store();
    let Some(target) = store.get_project(id).await? else {
        return Err(LookupError::UnknownProject(id).into());
    };
    let snapshot = indexer.snapshot().await?;
    let cached: HashMap<PairKey, SimilarityScore> = store
        .list_scores()
        .await?
        .into_iter()
        .filter(|row| row.pair.contains(id))
        .map(|row| (row.pair, row))
        .collect();
    let engine = SimilarityEngine::new(indexer.config().similarity.params());
    Ok(engine.find_similar(&target, &snapshot, &cached, k, min_score))
}

/// Duplicate clusters over the current snapshot.
pub async fn duplicates(indexer: &Indexer) -> Result<Vec<DuplicateCluster>> {
    let snapshot = indexer.snapshot().await?;
    let engine = SimilarityEngine::new(indexer.config().similarity.params());
    Ok(tokio::task::spawn_blocking(move || engine.duplicates(&snapshot)).await?)
}
