//! Export linking, filesystem side.
//!
//! Collects candidate audio files for a location and hands them to
//! [`liveset_core::linking::link_exports`]. Candidates come from a flat,
//! non-recursive listing of:
//!
//! - each project's folder and its configured export subfolders
//! - the location root and its configured export subfolders
//!
//! The stored export rows of a location are replaced as a whole, so an
//! export whose project disappeared comes back orphaned.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::Result;
use lofty::file::AudioFile;
use lofty::probe::Probe;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use liveset_core::linking::link_exports;
use liveset_core::models::{ExportRecord, Location, ProjectRecord};
use liveset_core::store::ProjectFilter;

use crate::config::ExportsConfig;
use crate::indexer::{normalize_path, path_key, Indexer};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkSummary {
    pub candidates: u64,
    pub linked: u64,
    pub orphans: u64,
}

impl LinkSummary {
    pub fn absorb(&mut self, other: &LinkSummary) {
        self.candidates += other.candidates;
        self.linked += other.linked;
        self.orphans += other.orphans;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioProps {
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u32>,
    pub duration_secs: Option<f64>,
}

/// Reads stream properties; anything lofty cannot parse leaves them empty.
pub fn probe_audio(path: &Path) -> AudioProps {
    match Probe::open(path).and_then(|p| p.read()) {
        Ok(tagged) => {
            let props = tagged.properties();
            AudioProps {
                sample_rate: props.sample_rate(),
                bit_depth: props.bit_depth().map(u32::from),
                duration_secs: Some(props.duration().as_secs_f64()),
            }
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no audio properties");
            AudioProps::default()
        }
    }
}

/// Folders searched for exports of `projects` in `location`.
pub fn candidate_dirs(
    location: &Location,
    projects: &[ProjectRecord],
    config: &ExportsConfig,
) -> Vec<PathBuf> {
    let mut dirs = BTreeSet::new();
    for project in projects {
        if let Some(folder) = Path::new(&project.path).parent() {
            dirs.insert(folder.to_path_buf());
            for sub in &config.project_subfolders {
                dirs.insert(folder.join(sub));
            }
        }
    }
    dirs.insert(location.root.clone());
    for sub in &config.location_subfolders {
        dirs.insert(location.root.join(sub));
    }
    dirs.into_iter().collect()
}

fn is_audio(path: &Path, config: &ExportsConfig) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| config.audio_extensions.iter().any(|x| x.eq_ignore_ascii_case(&e)))
}

/// Lists audio files directly inside `dirs`. Known paths keep their id.
pub fn collect_candidates(
    location: &Location,
    dirs: &[PathBuf],
    config: &ExportsConfig,
    known_ids: &HashMap<String, Uuid>,
) -> Vec<ExportRecord> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() || !is_audio(&path, config) {
                continue;
            }
            let key = path_key(&path);
            if !seen.insert(key.clone()) {
                continue;
            }
            let props = probe_audio(&path);
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0);
            out.push(ExportRecord {
                id: known_ids.get(&key).copied().unwrap_or_else(Uuid::new_v4),
                name: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                format: path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_default(),
                path: key,
                bit_depth: props.bit_depth,
                sample_rate: props.sample_rate,
                duration_secs: props.duration_secs,
                size: meta.len(),
                mtime,
                location_id: Some(location.id),
                project_id: None,
                confidence: 0.0,
                tier: None,
            });
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

/// Recomputes every export row of `location`.
pub async fn link_location(indexer: &Indexer, location: &Location) -> Result<LinkSummary> {
    let store = indexer.store();
    let projects = store
        .list_projects(&ProjectFilter {
            location_id: Some(location.id),
            ..Default::default()
        })
        .await?;
    let known_ids: HashMap<String, Uuid> = store
        .list_exports(false)
        .await?
        .into_iter()
        .map(|e| (e.path, e.id))
        .collect();

    let config = indexer.config().exports.clone();
    let loc = location.clone();
    let linked = tokio::task::spawn_blocking(move || {
        let live: Vec<ProjectRecord> = projects.into_iter().filter(|p| p.is_analyzable()).collect();
        let dirs = candidate_dirs(&loc, &live, &config);
        let candidates = collect_candidates(&loc, &dirs, &config, &known_ids);
        link_exports(&live, &candidates, config.fuzzy_threshold)
    })
    .await?;

    store.replace_exports(Some(location.id), &linked).await?;

    let orphans = linked.iter().filter(|e| e.is_orphan()).count() as u64;
    let summary = LinkSummary {
        candidates: linked.len() as u64,
        linked: linked.len() as u64 - orphans,
        orphans,
    };
    info!(
        location = %location.name,
        candidates = summary.candidates,
        linked = summary.linked,
        orphans = summary.orphans,
        "exports linked"
    );
    Ok(summary)
}

/// Relinks the location containing `path`, if any.
pub async fn link_for_path(indexer: &Indexer, path: &Path) -> Result<Option<LinkSummary>> {
    match indexer.location_for(&normalize_path(path)) {
        Some(location) => Ok(Some(link_location(indexer, &location).await?)),
        None => Ok(None),
    }
}

/// Links every active location, or only the one named.
pub async fn link(indexer: &Indexer, only: Option<&str>) -> Result<LinkSummary> {
    let mut total = LinkSummary::default();
    for location in indexer.locations() {
        if !location.active || only.is_some_and(|n| n != location.name) {
            continue;
        }
        total.absorb(&link_location(indexer, &location).await?);
    }
    Ok(total)
}
