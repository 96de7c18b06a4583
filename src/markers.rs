//! Timeline marker export.
//!
//! Text output is one `MM:SS.mmm  label` line per marker, widened to
//! `HH:MM:SS.mmm` for every line once any marker sits at or past the first
//! hour. CSV output is a `Time,Text` header followed by raw seconds.
//! Times come from [`Marker::seconds`], already integrated over the tempo
//! map, and are rounded to the millisecond.

use std::path::Path;

use anyhow::{bail, Context, Result};

use liveset_core::models::Marker;

use crate::get;
use crate::indexer::Indexer;

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum MarkerFormat {
    Text,
    Csv,
}

/// `MM:SS.mmm`, or `HH:MM:SS.mmm` with `include_hours`. Negative offsets
/// clamp to zero.
pub fn format_time(seconds: f64, include_hours: bool) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    if include_hours {
        let minutes = (total_secs / 60) % 60;
        let hours = total_secs / 3600;
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, ms)
    } else {
        format!("{:02}:{:02}.{:03}", total_secs / 60, secs, ms)
    }
}

fn ordered(markers: &[Marker]) -> Result<Vec<&Marker>> {
    if markers.is_empty() {
        bail!("no markers to export");
    }
    let mut sorted: Vec<&Marker> = markers.iter().collect();
    sorted.sort_by(|a, b| a.seconds.total_cmp(&b.seconds));
    Ok(sorted)
}

pub fn render_text(markers: &[Marker]) -> Result<String> {
    let markers = ordered(markers)?;
    let include_hours = markers.iter().any(|m| m.seconds >= 3600.0);
    let mut out = String::new();
    for m in markers {
        out.push_str(&format_time(m.seconds, include_hours));
        out.push_str("  ");
        out.push_str(&m.label);
        out.push('\n');
    }
    Ok(out)
}

pub fn render_csv(markers: &[Marker]) -> Result<String> {
    let markers = ordered(markers)?;
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Time", "Text"])?;
    for m in markers {
        let seconds = (m.seconds.max(0.0) * 1000.0).round() / 1000.0;
        writer.write_record([format!("{:?}", seconds).as_str(), m.label.as_str()])?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

pub fn render(markers: &[Marker], format: MarkerFormat) -> Result<String> {
    match format {
        MarkerFormat::Text => render_text(markers),
        MarkerFormat::Csv => render_csv(markers),
    }
}

/// CLI entry point: writes the markers of one project to `output`, or to
/// stdout.
pub async fn run_markers(
    indexer: &Indexer,
    id_or_path: &str,
    format: MarkerFormat,
    output: Option<&Path>,
) -> Result<()> {
    let detail = get::get_project(indexer, id_or_path).await?;
    let Some(metadata) = &detail.project.metadata else {
        bail!(
            "project {} has no decoded metadata (status {})",
            detail.project.path,
            detail.project.status
        );
    };
    let rendered = render(&metadata.markers, format)
        .with_context(|| format!("project {}", detail.project.path))?;

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "Wrote {} markers to {}",
                metadata.markers.len(),
                path.display()
            );
        }
        None => print!("{}", rendered),
    }
    Ok(())
}
