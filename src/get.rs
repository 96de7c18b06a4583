//! Project retrieval by id or path.
//!
//! Used by the `lsi get` CLI command; the HTTP API serves the same shape
//! from `GET /projects/{id}`.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

use liveset_core::models::{ExportRecord, ProjectRecord};

use crate::indexer::{normalize_path, path_key, Indexer};

#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetail {
    pub project: ProjectRecord,
    pub exports: Vec<ExportRecord>,
}

/// Looks a project up by uuid, falling back to its path.
pub async fn get_project(indexer: &Indexer, id_or_path: &str) -> Result<ProjectDetail> {
    let store = indexer.store();
    let project = match Uuid::parse_str(id_or_path) {
        Ok(id) => store.get_project(id).await?,
        Err(_) => {
            let raw = Path::new(id_or_path);
            match store.get_project_by_path(&path_key(&normalize_path(raw))).await? {
                Some(p) => Some(p),
                None => store.get_project_by_path(id_or_path).await?,
            }
        }
    };
    let Some(project) = project else {
        bail!("no project found for {}", id_or_path);
    };
    let exports = store.exports_for_project(project.id).await?;
    Ok(ProjectDetail { project, exports })
}

/// CLI entry point — prints the record to stdout.
pub async fn run_get(indexer: &Indexer, id_or_path: &str, json: bool) -> Result<()> {
    let detail = get_project(indexer, id_or_path).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let p = &detail.project;
    println!("--- Project ---");
    println!("id:           {}", p.id);
    println!("name:         {}", p.name);
    println!("path:         {}", p.path);
    println!("status:       {}", p.status);
    println!("hash:         {}", p.content_hash);
    println!("size:         {}", p.size);
    println!("first_seen:   {}", p.first_seen.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("last_scanned: {}", p.last_scanned.format("%Y-%m-%dT%H:%M:%SZ"));
    if let Some(alias) = &p.export_song_name {
        println!("export_name:  {}", alias);
    }
    if let Some(err) = &p.parse_error {
        println!("parse_error:  {}", err);
    }

    if let Some(m) = &p.metadata {
        println!();
        println!("--- Metadata ---");
        println!(
            "tempo:        {}{}",
            m.tempo.map(|t| format!("{:.2}", t)).unwrap_or_else(|| "-".into()),
            if m.tempo_automated { " (automated)" } else { "" }
        );
        println!(
            "time sig:     {}",
            m.time_signature.map(|t| t.to_string()).unwrap_or_else(|| "-".into())
        );
        println!(
            "key:          {} {}",
            m.key.as_deref().unwrap_or("-"),
            m.scale.as_deref().unwrap_or("")
        );
        println!(
            "tracks:       {} audio, {} midi, {} group, {} return",
            m.tracks.audio, m.tracks.midi, m.tracks.group, m.tracks.returns
        );
        if let Some(bars) = m.arrangement_bars {
            println!("length:       {:.1} bars", bars);
        }
        println!("automation:   {}", m.has_automation);
        if let Some(creator) = &m.creator {
            println!("creator:      {}", creator);
        }
        println!("plugins:      {}", join(m.plugins.iter()));
        println!("devices:      {}", join(m.devices.iter()));
        println!("samples:      {}", m.samples.len());
        for marker in &m.markers {
            println!(
                "  marker bar {:>6.2}  {:>8.2}s  {}",
                marker.bar, marker.seconds, marker.label
            );
        }
        for w in &m.parse_warnings {
            println!("  warning: {}", w);
        }
    }

    println!();
    println!("--- Exports ({}) ---", detail.exports.len());
    for e in &detail.exports {
        println!(
            "{}  [{} {:.2}]",
            e.path,
            e.tier.map(|t| t.as_str()).unwrap_or("-"),
            e.confidence
        );
    }
    Ok(())
}

fn join<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let v: Vec<&str> = items.map(String::as_str).collect();
    if v.is_empty() {
        "-".to_string()
    } else {
        v.join(", ")
    }
}
