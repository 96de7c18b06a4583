//! Index statistics and health overview.
//!
//! Provides a quick summary of what's indexed: record counts by status,
//! export linkage, cached similarity rows, and per-location breakdowns.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use liveset_core::models::{LocationId, ProjectStatus};
use liveset_core::store::{ProjectFilter, StoreCounts};

use crate::indexer::Indexer;

#[derive(Debug, Clone, Serialize)]
pub struct LocationStats {
    pub name: String,
    pub root: String,
    pub active: bool,
    pub projects: u64,
    pub missing: u64,
    pub last_scanned: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub counts: StoreCounts,
    pub locations: Vec<LocationStats>,
}

pub async fn collect(indexer: &Indexer) -> Result<IndexStats> {
    let store = indexer.store();
    let counts = store.counts().await?;
    let projects = store.list_projects(&ProjectFilter::default()).await?;

    let mut per_location: HashMap<LocationId, (u64, u64, Option<DateTime<Utc>>)> = HashMap::new();
    for p in &projects {
        let Some(loc) = p.location_id else { continue };
        let entry = per_location.entry(loc).or_default();
        entry.0 += 1;
        if p.status == ProjectStatus::Missing {
            entry.1 += 1;
        }
        entry.2 = entry.2.max(Some(p.last_scanned));
    }

    let locations = store
        .list_locations()
        .await?
        .into_iter()
        .map(|l| {
            let (projects, missing, last_scanned) =
                per_location.get(&l.id).copied().unwrap_or_default();
            LocationStats {
                name: l.name,
                root: l.root.display().to_string(),
                active: l.active,
                projects,
                missing,
                last_scanned,
            }
        })
        .collect();

    Ok(IndexStats { counts, locations })
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(indexer: &Indexer, json: bool) -> Result<()> {
    let stats = collect(indexer).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let db_path = &indexer.config().db.path;
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);
    let c = &stats.counts;

    println!("liveset-index — Index Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Projects:    {}", c.projects);
    for (status, n) in &c.by_status {
        println!("    {:<12} {}", status, n);
    }
    println!(
        "  Exports:     {} ({} orphaned)",
        c.exports, c.orphan_exports
    );
    println!("  Similarity:  {} cached pairs", c.similarity_rows);

    if !stats.locations.is_empty() {
        println!();
        println!("  By location:");
        println!(
            "  {:<20} {:>8} {:>8}   {:<12} {}",
            "LOCATION", "PROJECTS", "MISSING", "LAST SCAN", "ROOT"
        );
        println!("  {}", "-".repeat(76));
        for l in &stats.locations {
            let scanned = match l.last_scanned {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            let name = if l.active {
                l.name.clone()
            } else {
                format!("{} (off)", l.name)
            };
            println!(
                "  {:<20} {:>8} {:>8}   {:<12} {}",
                name, l.projects, l.missing, scanned, l.root
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_times() {
        assert_eq!(format_ts_relative(Utc::now()), "just now");
        let two_hours = Utc::now() - chrono::Duration::hours(2);
        assert_eq!(format_ts_relative(two_hours), "2 hours ago");
    }
}
