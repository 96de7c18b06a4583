//! SQLite-backed [`ProjectStore`] implementation.
//!
//! Ids are stored as hyphenated UUID text, timestamps as RFC 3339 text,
//! and the decoded metadata as one JSON column so a stored record reads
//! back field-for-field.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use liveset_core::models::{
    ExportRecord, FactorBreakdown, Location, LocationId, PairKey, ProjectId, ProjectRecord,
    SimilarityScore,
};
use liveset_core::store::{ProjectFilter, ProjectStore, StoreCounts};

/// SQLite implementation of the [`ProjectStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid id in database: {}", raw))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp in database: {}", raw))?
        .with_timezone(&Utc))
}

fn opt_uuid(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.as_deref().map(parse_uuid).transpose()
}

fn location_from_row(row: &SqliteRow) -> Result<Location> {
    let id: String = row.get("id");
    let root: String = row.get("root");
    let globs: String = row.get("exclude_globs_json");
    Ok(Location {
        id: parse_uuid(&id)?,
        name: row.get("name"),
        root: root.into(),
        active: row.get::<i64, _>("active") != 0,
        exclude_globs: serde_json::from_str(&globs).unwrap_or_default(),
    })
}

fn project_from_row(row: &SqliteRow) -> Result<ProjectRecord> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let metadata_json: Option<String> = row.get("metadata_json");
    let first_seen: String = row.get("first_seen");
    let last_scanned: String = row.get("last_scanned");
    let last_parsed: Option<String> = row.get("last_parsed");
    Ok(ProjectRecord {
        id: parse_uuid(&id)?,
        path: row.get("path"),
        name: row.get("name"),
        location_id: opt_uuid(row.get("location_id"))?,
        content_hash: row.get("content_hash"),
        size: row.get::<i64, _>("size") as u64,
        mtime: row.get("mtime"),
        status: status.parse()?,
        metadata: metadata_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("invalid metadata_json")?,
        parse_error: row.get("parse_error"),
        export_song_name: row.get("export_song_name"),
        first_seen: parse_ts(&first_seen)?,
        last_scanned: parse_ts(&last_scanned)?,
        last_parsed: last_parsed.as_deref().map(parse_ts).transpose()?,
    })
}

fn export_from_row(row: &SqliteRow) -> Result<ExportRecord> {
    let id: String = row.get("id");
    let tier: Option<String> = row.get("tier");
    Ok(ExportRecord {
        id: parse_uuid(&id)?,
        path: row.get("path"),
        name: row.get("name"),
        format: row.get("format"),
        bit_depth: row.get::<Option<i64>, _>("bit_depth").map(|v| v as u32),
        sample_rate: row.get::<Option<i64>, _>("sample_rate").map(|v| v as u32),
        duration_secs: row.get("duration_secs"),
        size: row.get::<i64, _>("size") as u64,
        mtime: row.get("mtime"),
        location_id: opt_uuid(row.get("location_id"))?,
        project_id: opt_uuid(row.get("project_id"))?,
        confidence: row.get("confidence"),
        tier: tier.as_deref().map(str::parse).transpose()?,
    })
}

fn score_from_row(row: &SqliteRow) -> Result<SimilarityScore> {
    let a: String = row.get("project_a");
    let b: String = row.get("project_b");
    let factors: String = row.get("factors_json");
    let computed_at: String = row.get("computed_at");
    let factors: FactorBreakdown =
        serde_json::from_str(&factors).context("invalid factors_json")?;
    Ok(SimilarityScore {
        pair: PairKey::new(parse_uuid(&a)?, parse_uuid(&b)?),
        score: row.get("score"),
        factors,
        computed_at: parse_ts(&computed_at)?,
        hash_a: row.get("features_hash_a"),
        hash_b: row.get("features_hash_b"),
    })
}

const PROJECT_COLUMNS: &str = "id, path, name, location_id, content_hash, size, mtime, status, \
     metadata_json, parse_error, export_song_name, first_seen, last_scanned, last_parsed";

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn upsert_location(
        &self,
        name: &str,
        root: &str,
        active: bool,
        exclude_globs: &[String],
    ) -> Result<Location> {
        let globs = serde_json::to_string(exclude_globs)?;
        sqlx::query(
            r#"
            INSERT INTO locations (id, name, root, active, exclude_globs_json)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(root) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                exclude_globs_json = excluded.exclude_globs_json
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(root)
        .bind(active as i64)
        .bind(&globs)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM locations WHERE root = ?")
            .bind(root)
            .fetch_one(&self.pool)
            .await?;
        location_from_row(&row)
    }

    async fn list_locations(&self) -> Result<Vec<Location>> {
        let rows = sqlx::query("SELECT * FROM locations ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(location_from_row).collect()
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn get_project_by_path(&self, path: &str) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE path = ?",
            PROJECT_COLUMNS
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<ProjectRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM projects
            WHERE (? IS NULL OR status = ?)
              AND (? IS NULL OR location_id = ?)
            ORDER BY path
            "#,
            PROJECT_COLUMNS
        ))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.location_id.map(|l| l.to_string()))
        .bind(filter.location_id.map(|l| l.to_string()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn upsert_project(&self, record: &ProjectRecord) -> Result<()> {
        let metadata_json = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO projects (id, path, name, location_id, content_hash, size, mtime,
                                  status, metadata_json, parse_error, export_song_name,
                                  first_seen, last_scanned, last_parsed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                name = excluded.name,
                location_id = excluded.location_id,
                content_hash = excluded.content_hash,
                size = excluded.size,
                mtime = excluded.mtime,
                status = excluded.status,
                metadata_json = excluded.metadata_json,
                parse_error = excluded.parse_error,
                last_scanned = excluded.last_scanned,
                last_parsed = excluded.last_parsed
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.path)
        .bind(&record.name)
        .bind(record.location_id.map(|l| l.to_string()))
        .bind(&record.content_hash)
        .bind(record.size as i64)
        .bind(record.mtime)
        .bind(record.status.to_string())
        .bind(metadata_json)
        .bind(&record.parse_error)
        .bind(&record.export_song_name)
        .bind(record.first_seen.to_rfc3339())
        .bind(record.last_scanned.to_rfc3339())
        .bind(record.last_parsed.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store project {}", record.path))?;
        Ok(())
    }

    async fn set_export_song_name(&self, id: ProjectId, name: Option<&str>) -> Result<bool> {
        let result = sqlx::query("UPDATE projects SET export_song_name = ? WHERE id = ?")
            .bind(name)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_project(&self, id: ProjectId) -> Result<bool> {
        let id = id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM similarity_scores WHERE project_a = ? OR project_b = ?")
            .bind(&id)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM exports WHERE project_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_exports(
        &self,
        location_id: Option<LocationId>,
        exports: &[ExportRecord],
    ) -> Result<()> {
        let loc = location_id.map(|l| l.to_string());
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM exports WHERE location_id IS ?")
            .bind(&loc)
            .execute(&mut *tx)
            .await?;

        for e in exports {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO exports (id, path, name, format, bit_depth, sample_rate,
                                                duration_secs, size, mtime, location_id,
                                                project_id, confidence, tier)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(e.id.to_string())
            .bind(&e.path)
            .bind(&e.name)
            .bind(&e.format)
            .bind(e.bit_depth.map(|v| v as i64))
            .bind(e.sample_rate.map(|v| v as i64))
            .bind(e.duration_secs)
            .bind(e.size as i64)
            .bind(e.mtime)
            .bind(e.location_id.map(|l| l.to_string()))
            .bind(e.project_id.map(|p| p.to_string()))
            .bind(e.confidence)
            .bind(e.tier.map(|t| t.as_str()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_exports(&self, orphans_only: bool) -> Result<Vec<ExportRecord>> {
        let sql = if orphans_only {
            "SELECT * FROM exports WHERE project_id IS NULL ORDER BY path"
        } else {
            "SELECT * FROM exports ORDER BY path"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(export_from_row).collect()
    }

    async fn exports_for_project(&self, id: ProjectId) -> Result<Vec<ExportRecord>> {
        let rows = sqlx::query("SELECT * FROM exports WHERE project_id = ? ORDER BY path")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(export_from_row).collect()
    }

    async fn upsert_scores(&self, scores: &[SimilarityScore]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for s in scores {
            sqlx::query(
                r#"
                INSERT INTO similarity_scores (project_a, project_b, score, factors_json,
                                               features_hash_a, features_hash_b, computed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(project_a, project_b) DO UPDATE SET
                    score = excluded.score,
                    factors_json = excluded.factors_json,
                    features_hash_a = excluded.features_hash_a,
                    features_hash_b = excluded.features_hash_b,
                    computed_at = excluded.computed_at
                "#,
            )
            .bind(s.pair.a.to_string())
            .bind(s.pair.b.to_string())
            .bind(s.score)
            .bind(serde_json::to_string(&s.factors)?)
            .bind(&s.hash_a)
            .bind(&s.hash_b)
            .bind(s.computed_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_scores(&self) -> Result<Vec<SimilarityScore>> {
        let rows = sqlx::query("SELECT * FROM similarity_scores ORDER BY project_a, project_b")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(score_from_row).collect()
    }

    async fn invalidate_scores(&self, id: ProjectId) -> Result<u64> {
        let id = id.to_string();
        let result =
            sqlx::query("DELETE FROM similarity_scores WHERE project_a = ? OR project_b = ?")
                .bind(&id)
                .bind(&id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let locations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM locations")
            .fetch_one(&self.pool)
            .await?;
        let status_rows = sqlx::query("SELECT status, COUNT(*) AS n FROM projects GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut by_status = BTreeMap::new();
        let mut projects = 0u64;
        for row in &status_rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            projects += n as u64;
            by_status.insert(status, n as u64);
        }
        let exports: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exports")
            .fetch_one(&self.pool)
            .await?;
        let orphan_exports: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM exports WHERE project_id IS NULL")
                .fetch_one(&self.pool)
                .await?;
        let similarity_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM similarity_scores")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreCounts {
            locations: locations as u64,
            projects,
            by_status,
            exports: exports as u64,
            orphan_exports: orphan_exports as u64,
            similarity_rows: similarity_rows as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use liveset_core::decoder::tempo::TempoMap;
    use liveset_core::models::{
        Marker, MatchTier, ProjectMetadata, ProjectStatus, TimeSignature, TrackCounts,
    };
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn record(path: &str) -> ProjectRecord {
        let now = Utc::now();
        ProjectRecord {
            id: Uuid::new_v4(),
            path: path.to_string(),
            name: "Night Drive".to_string(),
            location_id: Some(Uuid::new_v4()),
            content_hash: "cafe".to_string(),
            size: 2048,
            mtime: 1_700_000_000_123_456_789,
            status: ProjectStatus::Active,
            metadata: Some(ProjectMetadata {
                tempo: Some(128.0),
                time_signature: Some(TimeSignature::COMMON),
                tracks: TrackCounts {
                    audio: 2,
                    midi: 1,
                    group: 0,
                    returns: 1,
                },
                plugins: ["serum".to_string()].into(),
                ..Default::default()
            }),
            parse_error: None,
            export_song_name: None,
            first_seen: now,
            last_scanned: now,
            last_parsed: Some(now),
        }
    }

    #[tokio::test]
    async fn project_round_trips_through_sqlite() {
        let store = store().await;
        let mut rec = record("/m/Night Drive.als");
        let ramp = TempoMap::from_points([(0.0, 88.0), (384.0, 141.5)]).unwrap();
        let meta = rec.metadata.as_mut().unwrap();
        meta.tempo = Some(ramp.bpm_at(77.3));
        meta.arrangement_bars = Some(ramp.seconds_at(383.9) / 2.3);
        meta.markers = (1..120)
            .map(|i| {
                let beat = i as f64 * 3.1;
                Marker {
                    beat,
                    bar: beat / 4.0 + 1.0,
                    seconds: ramp.seconds_at(beat),
                    label: format!("Section {}", i),
                }
            })
            .collect();

        store.upsert_project(&rec).await.unwrap();
        let back = store.get_project(rec.id).await.unwrap().unwrap();
        assert_eq!(back.metadata, rec.metadata);
        assert_eq!(back.mtime, rec.mtime);
        assert_eq!(back.location_id, rec.location_id);
        assert_eq!(back.first_seen, rec.first_seen);
        let by_path = store.get_project_by_path(&rec.path).await.unwrap().unwrap();
        assert_eq!(by_path.id, rec.id);
    }

    #[tokio::test]
    async fn upsert_keeps_alias_set_after_read() {
        let store = store().await;
        let rec = record("/m/a.als");
        store.upsert_project(&rec).await.unwrap();
        let stale = store.get_project(rec.id).await.unwrap().unwrap();

        assert!(store
            .set_export_song_name(rec.id, Some("Golden Hour"))
            .await
            .unwrap());
        let mut changed = stale.clone();
        changed.content_hash = "beef".to_string();
        store.upsert_project(&changed).await.unwrap();

        let back = store.get_project(rec.id).await.unwrap().unwrap();
        assert_eq!(back.content_hash, "beef");
        assert_eq!(back.export_song_name.as_deref(), Some("Golden Hour"));

        assert!(store.set_export_song_name(rec.id, None).await.unwrap());
        store.upsert_project(&changed).await.unwrap();
        assert!(store.get_project(rec.id).await.unwrap().unwrap().export_song_name.is_none());
    }

    #[tokio::test]
    async fn status_filter_and_counts() {
        let store = store().await;
        let a = record("/m/a.als");
        let mut b = record("/m/b.als");
        b.status = ProjectStatus::Missing;
        store.upsert_project(&a).await.unwrap();
        store.upsert_project(&b).await.unwrap();

        let missing = store
            .list_projects(&ProjectFilter {
                status: Some(ProjectStatus::Missing),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].path, "/m/b.als");

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.projects, 2);
        assert_eq!(counts.by_status.get("MISSING"), Some(&1));
    }

    #[tokio::test]
    async fn purge_removes_derived_rows() {
        let store = store().await;
        let a = record("/m/a.als");
        let b = record("/m/b.als");
        store.upsert_project(&a).await.unwrap();
        store.upsert_project(&b).await.unwrap();
        store
            .upsert_scores(&[SimilarityScore {
                pair: PairKey::new(a.id, b.id),
                score: 0.7,
                factors: FactorBreakdown::default(),
                computed_at: Utc::now(),
                hash_a: "cafe".to_string(),
                hash_b: "cafe".to_string(),
            }])
            .await
            .unwrap();
        store
            .replace_exports(
                None,
                &[ExportRecord {
                    id: Uuid::new_v4(),
                    path: "/m/Exports/a.wav".to_string(),
                    name: "a.wav".to_string(),
                    format: "wav".to_string(),
                    bit_depth: Some(24),
                    sample_rate: Some(48000),
                    duration_secs: Some(12.5),
                    size: 10,
                    mtime: 0,
                    location_id: None,
                    project_id: Some(a.id),
                    confidence: 1.0,
                    tier: Some(MatchTier::Exact),
                }],
            )
            .await
            .unwrap();
        assert_eq!(store.exports_for_project(a.id).await.unwrap().len(), 1);

        assert!(store.purge_project(a.id).await.unwrap());
        assert!(store.list_scores().await.unwrap().is_empty());
        assert!(store.list_exports(false).await.unwrap().is_empty());
        assert!(store.get_project(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn location_upsert_keeps_id() {
        let store = store().await;
        let first = store.upsert_location("Studio", "/m", true, &[]).await.unwrap();
        let again = store
            .upsert_location("Studio 2", "/m", false, &["**/x/**".to_string()])
            .await
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.exclude_globs, vec!["**/x/**".to_string()]);
    }
}
