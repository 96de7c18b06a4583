//! CLI command runners.
//!
//! Each `run_*` function backs one `lsi` subcommand: it calls into the
//! library and prints to stdout. `--json` variants print one pretty JSON
//! document so scripts can parse the output.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use liveset_core::models::ProjectStatus;
use liveset_core::similarity::ClusterKind;
use liveset_core::store::ProjectFilter;

use crate::analysis::{self, SimilarityPass};
use crate::config::Config;
use crate::error::LookupError;
use crate::indexer::{Indexer, ScanSummary};
use crate::linker;
use crate::progress::{format_number, ProgressMode, ScanProgressReporter};
use crate::scan;
use crate::watch;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_summary(label: &str, s: &ScanSummary) {
    println!(
        "{}: {} added, {} changed, {} unchanged, {} removed, {} failed, {} moved ({} ms){}",
        label,
        format_number(s.added),
        format_number(s.changed),
        format_number(s.unchanged),
        format_number(s.removed),
        format_number(s.failed),
        format_number(s.moved),
        s.elapsed_ms,
        if s.cancelled { " [cancelled]" } else { "" }
    );
}

/// Cancels `token` on ctrl-c.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight files");
            token.cancel();
        }
    });
}

pub async fn run_init(config: &Config) -> Result<()> {
    let indexer = Indexer::open(config).await?;
    println!("Database initialized successfully.");
    println!("{} location(s) registered.", indexer.locations().len());
    Ok(())
}

pub async fn run_locations(indexer: &Indexer, json: bool) -> Result<()> {
    let locations = indexer.locations();
    if json {
        return print_json(&locations);
    }
    if locations.is_empty() {
        println!("No locations configured. Add [[locations]] entries to the config file.");
        return Ok(());
    }
    println!("{:<36}  {:<16} {:<6}  ROOT", "ID", "NAME", "ACTIVE");
    for l in &locations {
        println!(
            "{:<36}  {:<16} {:<6}  {}",
            l.id,
            l.name,
            if l.active { "yes" } else { "no" },
            l.root.display()
        );
    }
    Ok(())
}

pub async fn run_scan(
    indexer: &Indexer,
    location: Option<&str>,
    progress: ProgressMode,
    json: bool,
) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let reporter: Arc<dyn ScanProgressReporter> = Arc::from(progress.reporter());
    let report = scan::scan(indexer, location, reporter, &cancel).await?;

    let pass = if report.total.cancelled {
        None
    } else {
        Some(SimilarityPass::new(indexer).run(indexer).await?)
    };

    if json {
        #[derive(Serialize)]
        struct Out<'a> {
            scan: &'a scan::ScanReport,
            similarity: Option<analysis::PassSummary>,
        }
        return print_json(&Out {
            scan: &report,
            similarity: pass,
        });
    }

    for loc in &report.locations {
        match &loc.error {
            Some(err) => println!("{}: failed: {}", loc.location, err),
            None => print_summary(&loc.location, &loc.summary),
        }
    }
    if report.locations.len() > 1 {
        print_summary("total", &report.total);
    }
    if let Some(p) = pass {
        println!(
            "similarity: {} pairs scored, {} kept, {} invalidated",
            format_number(p.scored),
            format_number(p.kept),
            format_number(p.invalidated)
        );
    }
    if report.locations.iter().any(|l| l.error.is_some()) {
        bail!("one or more locations could not be scanned");
    }
    Ok(())
}

pub async fn run_rescan(indexer: &Indexer, path: &Path, json: bool) -> Result<()> {
    let summary = indexer.rescan_single(path).await?;
    linker::link_for_path(indexer, path).await?;
    if summary.mutations() > 0 {
        SimilarityPass::new(indexer).run(indexer).await?;
    }
    if json {
        return print_json(&summary);
    }
    print_summary(&path.display().to_string(), &summary);
    Ok(())
}

pub async fn run_watch(indexer: &Indexer) -> Result<()> {
    let token = indexer.shutdown_token();
    cancel_on_ctrl_c(token);
    println!(
        "Watching {} location(s). Press Ctrl-C to stop.",
        indexer.locations().iter().filter(|l| l.active).count()
    );
    watch::run(indexer.clone()).await
}

pub async fn run_list(indexer: &Indexer, status: Option<&str>, json: bool) -> Result<()> {
    let status = status.map(str::parse::<ProjectStatus>).transpose()?;
    let records = indexer
        .store()
        .list_projects(&ProjectFilter {
            status,
            ..Default::default()
        })
        .await?;
    if json {
        return print_json(&records);
    }
    for r in &records {
        let tempo = r
            .metadata
            .as_ref()
            .and_then(|m| m.tempo)
            .map(|t| format!("{:>7.2}", t))
            .unwrap_or_else(|| format!("{:>7}", "-"));
        println!("{}  {:<12} {}  {}", r.id, r.status, tempo, r.path);
    }
    println!("{} project(s)", format_number(records.len() as u64));
    Ok(())
}

pub async fn run_similar(
    indexer: &Indexer,
    id: &str,
    k: Option<usize>,
    min_score: Option<f64>,
    json: bool,
) -> Result<()> {
    let id = Uuid::parse_str(id).with_context(|| format!("invalid project id: {}", id))?;
    let defaults = &indexer.config().similarity;
    let k = k.unwrap_or(defaults.default_k);
    let min_score = min_score.unwrap_or(defaults.default_min_score);
    if !(0.0..=1.0).contains(&min_score) {
        bail!("--min-score must be in [0.0, 1.0]");
    }
    let matches = analysis::similar(indexer, id, k, min_score).await?;
    if json {
        return print_json(&matches);
    }
    if matches.is_empty() {
        println!("No similar projects.");
        return Ok(());
    }
    for (i, m) in matches.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}  (plugins {:.2}, devices {:.2}, tempo {:.2}, tracks {:.2})",
            i + 1,
            m.score,
            m.path,
            m.factors.plugins,
            m.factors.devices,
            m.factors.tempo,
            m.factors.tracks
        );
    }
    Ok(())
}

pub async fn run_duplicates(indexer: &Indexer, json: bool) -> Result<()> {
    let clusters = analysis::duplicates(indexer).await?;
    if json {
        return print_json(&clusters);
    }
    if clusters.is_empty() {
        println!("No duplicates.");
        return Ok(());
    }
    for (i, c) in clusters.iter().enumerate() {
        let kind = match c.kind {
            ClusterKind::Exact => "exact",
            ClusterKind::Near => "near",
        };
        println!("cluster {} ({}, {} projects)", i + 1, kind, c.members.len());
        for m in &c.members {
            println!("  {}", m.path);
        }
    }
    Ok(())
}

pub async fn run_exports(indexer: &Indexer, orphans: bool, json: bool) -> Result<()> {
    let exports = indexer.store().list_exports(orphans).await?;
    if json {
        return print_json(&exports);
    }
    for e in &exports {
        let link = match e.project_id {
            Some(id) => format!(
                "{} {:.2} {}",
                e.tier.map(|t| t.as_str()).unwrap_or("-"),
                e.confidence,
                id
            ),
            None => "orphan".to_string(),
        };
        println!("{}  [{}]", e.path, link);
    }
    println!("{} export(s)", format_number(exports.len() as u64));
    Ok(())
}

pub async fn run_link(indexer: &Indexer, location: Option<&str>, json: bool) -> Result<()> {
    if let Some(name) = location {
        if indexer.location_by_name(name).is_none() {
            bail!("no location named '{}'", name);
        }
    }
    let summary = linker::link(indexer, location).await?;
    if json {
        return print_json(&summary);
    }
    println!(
        "{} candidate(s): {} linked, {} orphaned",
        format_number(summary.candidates),
        format_number(summary.linked),
        format_number(summary.orphans)
    );
    Ok(())
}

pub async fn run_set_export_name(indexer: &Indexer, id: &str, name: Option<&str>) -> Result<()> {
    let id = Uuid::parse_str(id).with_context(|| format!("invalid project id: {}", id))?;
    if !indexer.set_export_name(id, name).await? {
        return Err(LookupError::UnknownProject(id).into());
    }
    if let Some(project) = indexer.store().get_project(id).await? {
        if let Some(location) = project.location_id.and_then(|l| indexer.location(l)) {
            linker::link_location(indexer, &location).await?;
        }
    }
    match name {
        Some(n) => println!("Export name for {} set to '{}'.", id, n),
        None => println!("Export name for {} cleared.", id),
    }
    Ok(())
}

pub async fn run_purge(indexer: &Indexer, path: &Path) -> Result<()> {
    let record = indexer.purge(path).await?;
    println!("Purged {} ({}).", record.path, record.id);
    Ok(())
}
