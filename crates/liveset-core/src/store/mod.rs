//! Storage abstraction for the project index.
//!
//! The [`ProjectStore`] trait is the durable record set: locations,
//! project records, export records, and cached similarity rows. The
//! indexer is the only writer of project records; every other component
//! reads snapshots through the same trait.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{
    ExportRecord, Location, LocationId, ProjectId, ProjectRecord, ProjectStatus, SimilarityScore,
};

/// Selection applied by [`ProjectStore::list_projects`]. Empty selects all.
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub location_id: Option<LocationId>,
}

impl ProjectFilter {
    pub fn matches(&self, record: &ProjectRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self
                .location_id
                .map_or(true, |l| record.location_id == Some(l))
    }
}

/// Aggregate counts for `lsi stats` and `/health`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreCounts {
    pub locations: u64,
    pub projects: u64,
    pub by_status: BTreeMap<String, u64>,
    pub exports: u64,
    pub orphan_exports: u64,
    pub similarity_rows: u64,
}

/// Abstract storage backend for the index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_location`](ProjectStore::upsert_location) | Register a root, keyed by path |
/// | [`upsert_project`](ProjectStore::upsert_project) | Insert or replace a record by id |
/// | [`purge_project`](ProjectStore::purge_project) | Hard-delete a record and its derived rows |
/// | [`replace_exports`](ProjectStore::replace_exports) | Swap the export rows of one location |
/// | [`upsert_scores`](ProjectStore::upsert_scores) | Cache similarity rows |
/// | [`invalidate_scores`](ProjectStore::invalidate_scores) | Drop rows touching a project |
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert a location or update the one with the same root.
    async fn upsert_location(
        &self,
        name: &str,
        root: &str,
        active: bool,
        exclude_globs: &[String],
    ) -> Result<Location>;

    async fn list_locations(&self) -> Result<Vec<Location>>;

    async fn get_project(&self, id: ProjectId) -> Result<Option<ProjectRecord>>;

    async fn get_project_by_path(&self, path: &str) -> Result<Option<ProjectRecord>>;

    /// Records ordered by path.
    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<ProjectRecord>>;

    /// Insert or replace a record keyed by id. The path of a replaced
    /// record may change (moves); paths stay unique. A replace keeps the
    /// stored `export_song_name`: only [`ProjectStore::set_export_song_name`]
    /// writes it after insertion.
    async fn upsert_project(&self, record: &ProjectRecord) -> Result<()>;

    async fn set_export_song_name(&self, id: ProjectId, name: Option<&str>) -> Result<bool>;

    /// Removes the record, the exports linked to it, and its similarity rows.
    async fn purge_project(&self, id: ProjectId) -> Result<bool>;

    /// Replaces every export row belonging to `location_id`.
    async fn replace_exports(
        &self,
        location_id: Option<LocationId>,
        exports: &[ExportRecord],
    ) -> Result<()>;

    async fn list_exports(&self, orphans_only: bool) -> Result<Vec<ExportRecord>>;

    async fn exports_for_project(&self, id: ProjectId) -> Result<Vec<ExportRecord>>;

    async fn upsert_scores(&self, scores: &[SimilarityScore]) -> Result<()>;

    async fn list_scores(&self) -> Result<Vec<SimilarityScore>>;

    /// Deletes every cached row involving `id`; returns how many went.
    async fn invalidate_scores(&self, id: ProjectId) -> Result<u64>;

    async fn counts(&self) -> Result<StoreCounts>;
}
