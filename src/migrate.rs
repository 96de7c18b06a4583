use anyhow::Result;
use sqlx::SqlitePool;

/// Creates every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS locations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            root TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            exclude_globs_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            location_id TEXT,
            content_hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            status TEXT NOT NULL,
            metadata_json TEXT,
            parse_error TEXT,
            export_song_name TEXT,
            first_seen TEXT NOT NULL,
            last_scanned TEXT NOT NULL,
            last_parsed TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exports (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            format TEXT NOT NULL,
            bit_depth INTEGER,
            sample_rate INTEGER,
            duration_secs REAL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            location_id TEXT,
            project_id TEXT,
            confidence REAL NOT NULL DEFAULT 0,
            tier TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // project_a < project_b always holds: pairs are stored canonically.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS similarity_scores (
            project_a TEXT NOT NULL,
            project_b TEXT NOT NULL,
            score REAL NOT NULL,
            factors_json TEXT NOT NULL,
            features_hash_a TEXT NOT NULL,
            features_hash_b TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (project_a, project_b),
            CHECK (project_a < project_b)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_projects_location ON projects(location_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_projects_hash ON projects(content_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_exports_project ON exports(project_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_similarity_b ON similarity_scores(project_b)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
