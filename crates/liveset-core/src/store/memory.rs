//! In-memory [`ProjectStore`] implementation for tests and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    ExportRecord, Location, LocationId, PairKey, ProjectId, ProjectRecord, SimilarityScore,
};

use super::{ProjectFilter, ProjectStore, StoreCounts};

/// In-memory store for tests and embedding.
pub struct InMemoryStore {
    locations: RwLock<Vec<Location>>,
    projects: RwLock<HashMap<ProjectId, ProjectRecord>>,
    exports: RwLock<Vec<ExportRecord>>,
    scores: RwLock<HashMap<PairKey, SimilarityScore>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            locations: RwLock::new(Vec::new()),
            projects: RwLock::new(HashMap::new()),
            exports: RwLock::new(Vec::new()),
            scores: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("store lock poisoned"))
}

#[async_trait]
impl ProjectStore for InMemoryStore {
    async fn upsert_location(
        &self,
        name: &str,
        root: &str,
        active: bool,
        exclude_globs: &[String],
    ) -> Result<Location> {
        let mut locations = write(&self.locations)?;
        let root_path = PathBuf::from(root);
        if let Some(existing) = locations.iter_mut().find(|l| l.root == root_path) {
            existing.name = name.to_string();
            existing.active = active;
            existing.exclude_globs = exclude_globs.to_vec();
            return Ok(existing.clone());
        }
        let loc = Location {
            id: Uuid::new_v4(),
            name: name.to_string(),
            root: root_path,
            active,
            exclude_globs: exclude_globs.to_vec(),
        };
        locations.push(loc.clone());
        Ok(loc)
    }

    async fn list_locations(&self) -> Result<Vec<Location>> {
        let mut out = read(&self.locations)?.clone();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<ProjectRecord>> {
        Ok(read(&self.projects)?.get(&id).cloned())
    }

    async fn get_project_by_path(&self, path: &str) -> Result<Option<ProjectRecord>> {
        Ok(read(&self.projects)?
            .values()
            .find(|p| p.path == path)
            .cloned())
    }

    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<ProjectRecord>> {
        let mut out: Vec<ProjectRecord> = read(&self.projects)?
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn upsert_project(&self, record: &ProjectRecord) -> Result<()> {
        let mut projects = write(&self.projects)?;
        if projects
            .values()
            .any(|p| p.path == record.path && p.id != record.id)
        {
            bail!("path already indexed under another id: {}", record.path);
        }
        let mut record = record.clone();
        if let Some(existing) = projects.get(&record.id) {
            record.export_song_name = existing.export_song_name.clone();
        }
        projects.insert(record.id, record);
        Ok(())
    }

    async fn set_export_song_name(&self, id: ProjectId, name: Option<&str>) -> Result<bool> {
        let mut projects = write(&self.projects)?;
        match projects.get_mut(&id) {
            Some(p) => {
                p.export_song_name = name.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge_project(&self, id: ProjectId) -> Result<bool> {
        let removed = write(&self.projects)?.remove(&id).is_some();
        if removed {
            write(&self.exports)?.retain(|e| e.project_id != Some(id));
            write(&self.scores)?.retain(|k, _| !k.contains(id));
        }
        Ok(removed)
    }

    async fn replace_exports(
        &self,
        location_id: Option<LocationId>,
        exports: &[ExportRecord],
    ) -> Result<()> {
        let mut stored = write(&self.exports)?;
        stored.retain(|e| e.location_id != location_id);
        stored.extend(exports.iter().cloned());
        Ok(())
    }

    async fn list_exports(&self, orphans_only: bool) -> Result<Vec<ExportRecord>> {
        let mut out: Vec<ExportRecord> = read(&self.exports)?
            .iter()
            .filter(|e| !orphans_only || e.is_orphan())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn exports_for_project(&self, id: ProjectId) -> Result<Vec<ExportRecord>> {
        let mut out: Vec<ExportRecord> = read(&self.exports)?
            .iter()
            .filter(|e| e.project_id == Some(id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn upsert_scores(&self, scores: &[SimilarityScore]) -> Result<()> {
        let mut stored = write(&self.scores)?;
        for s in scores {
            stored.insert(s.pair, s.clone());
        }
        Ok(())
    }

    async fn list_scores(&self) -> Result<Vec<SimilarityScore>> {
        let mut out: Vec<SimilarityScore> = read(&self.scores)?.values().cloned().collect();
        out.sort_by_key(|s| s.pair);
        Ok(out)
    }

    async fn invalidate_scores(&self, id: ProjectId) -> Result<u64> {
        let mut stored = write(&self.scores)?;
        let before = stored.len();
        stored.retain(|k, _| !k.contains(id));
        Ok((before - stored.len()) as u64)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let mut counts = StoreCounts {
            locations: read(&self.locations)?.len() as u64,
            ..Default::default()
        };
        for p in read(&self.projects)?.values() {
            counts.projects += 1;
            *counts.by_status.entry(p.status.to_string()).or_default() += 1;
        }
        for e in read(&self.exports)?.iter() {
            counts.exports += 1;
            if e.is_orphan() {
                counts.orphan_exports += 1;
            }
        }
        counts.similarity_rows = read(&self.scores)?.len() as u64;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FactorBreakdown, ProjectStatus};
    use chrono::Utc;

    fn record(path: &str) -> ProjectRecord {
        let now = Utc::now();
        ProjectRecord {
            id: Uuid::new_v4(),
            path: path.to_string(),
            name: "p".to_string(),
            location_id: None,
            content_hash: "h".to_string(),
            size: 1,
            mtime: 1,
            status: ProjectStatus::Active,
            metadata: None,
            parse_error: None,
            export_song_name: None,
            first_seen: now,
            last_scanned: now,
            last_parsed: None,
        }
    }

    fn score(a: ProjectId, b: ProjectId) -> SimilarityScore {
        SimilarityScore {
            pair: PairKey::new(a, b),
            score: 0.5,
            factors: FactorBreakdown::default(),
            computed_at: Utc::now(),
            hash_a: "h".to_string(),
            hash_b: "h".to_string(),
        }
    }

    #[tokio::test]
    async fn location_upsert_is_keyed_by_root() {
        let store = InMemoryStore::new();
        let a = store.upsert_location("Music", "/music", true, &[]).await.unwrap();
        let b = store
            .upsert_location("Renamed", "/music", false, &["**/tmp/**".to_string()])
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        let all = store.list_locations().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Renamed");
        assert!(!all[0].active);
    }

    #[tokio::test]
    async fn upsert_keeps_alias_set_after_read() {
        let store = InMemoryStore::new();
        let rec = record("/a.als");
        store.upsert_project(&rec).await.unwrap();
        let stale = store.get_project(rec.id).await.unwrap().unwrap();

        assert!(store.set_export_song_name(rec.id, Some("Golden Hour")).await.unwrap());
        let mut changed = stale.clone();
        changed.content_hash = "beef".to_string();
        store.upsert_project(&changed).await.unwrap();

        let back = store.get_project(rec.id).await.unwrap().unwrap();
        assert_eq!(back.content_hash, "beef");
        assert_eq!(back.export_song_name.as_deref(), Some("Golden Hour"));
    }

    #[tokio::test]
    async fn paths_stay_unique() {
        let store = InMemoryStore::new();
        let a = record("/x.als");
        store.upsert_project(&a).await.unwrap();
        assert!(store.upsert_project(&record("/x.als")).await.is_err());
        let mut moved = a.clone();
        moved.path = "/y.als".to_string();
        store.upsert_project(&moved).await.unwrap();
        assert!(store.get_project_by_path("/x.als").await.unwrap().is_none());
        assert_eq!(store.get_project(a.id).await.unwrap().unwrap().path, "/y.als");
    }

    #[tokio::test]
    async fn invalidate_and_purge_drop_derived_rows() {
        let store = InMemoryStore::new();
        let a = record("/a.als");
        let b = record("/b.als");
        let c = record("/c.als");
        for r in [&a, &b, &c] {
            store.upsert_project(r).await.unwrap();
        }
        store
            .upsert_scores(&[score(a.id, b.id), score(b.id, c.id), score(a.id, c.id)])
            .await
            .unwrap();
        assert_eq!(store.invalidate_scores(a.id).await.unwrap(), 2);
        assert_eq!(store.list_scores().await.unwrap().len(), 1);

        assert!(store.purge_project(b.id).await.unwrap());
        assert!(store.list_scores().await.unwrap().is_empty());
        assert!(!store.purge_project(b.id).await.unwrap());
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.projects, 2);
        assert_eq!(counts.by_status.get("ACTIVE"), Some(&2));
    }
}
