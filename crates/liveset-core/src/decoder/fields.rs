//! Independent field extractors over the element tree.
//!
//! Every extractor reads from the tree without touching the others, so a
//! malformed fragment only costs its own field. Gaps are reported through
//! [`Fields::warn`] and the field is left empty.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use super::tempo::TempoMap;
use super::tree::Element;
use crate::models::{Marker, ParseWarning, ProjectMetadata, TimeSignature, TrackCounts};

const KEY_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

const SCALE_NAMES: [&str; 25] = [
    "Major",
    "Minor",
    "Dorian",
    "Mixolydian",
    "Lydian",
    "Phrygian",
    "Locrian",
    "Diminished",
    "Whole Half",
    "Whole Tone",
    "Minor Blues",
    "Minor Pentatonic",
    "Major Pentatonic",
    "Harmonic Minor",
    "Melodic Minor",
    "Super Locrian",
    "Bhairav",
    "Hungarian Minor",
    "Minor Gypsy",
    "Hirojoshi",
    "In-Sen",
    "Iwato",
    "Kumoi",
    "Pelog",
    "Spanish",
];

const PLUGIN_HOSTS: [&str; 3] = ["PluginDevice", "AuPluginDevice", "Vst3PluginDevice"];

/// Tempo used to place markers in time when the set has no readable tempo.
const FALLBACK_BPM: f64 = 120.0;

/// Root attributes with a dedicated field.
const MODELED_ROOT_ATTRS: [&str; 2] = ["Creator", "MinorVersion"];

struct Fields {
    warnings: Vec<ParseWarning>,
}

impl Fields {
    fn warn(&mut self, field: &str, message: impl Into<String>) {
        self.warnings.push(ParseWarning::new(field, message));
    }
}

struct TempoInfo {
    bpm: f64,
    automated: bool,
    map: TempoMap,
}

/// Runs every extractor over a parsed document.
pub fn extract(root: &Element, project_dir: Option<&Path>) -> ProjectMetadata {
    let mut f = Fields {
        warnings: Vec::new(),
    };
    let mut meta = ProjectMetadata::default();

    if root.name != "Ableton" {
        f.warn(
            "schema",
            format!("unexpected root element '{}', reading best effort", root.name),
        );
    }
    meta.creator = root.attr("Creator").map(str::to_string);
    meta.schema_version = root
        .attr("MinorVersion")
        .or_else(|| root.attr("MajorVersion"))
        .map(str::to_string);
    meta.extra_attributes = root
        .attrs
        .iter()
        .filter(|(k, _)| !MODELED_ROOT_ATTRS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<BTreeMap<_, _>>();

    let Some(live_set) = find_live_set(root) else {
        f.warn("live_set", "LiveSet element missing");
        // Name-based sets can still be read from whatever is there.
        meta.plugins = plugins(root);
        meta.devices = devices(root);
        meta.parse_warnings = f.warnings;
        return meta;
    };

    let tempo = tempo(live_set, &mut f);
    meta.tempo = tempo.as_ref().map(|t| t.bpm);
    meta.tempo_automated = tempo.as_ref().is_some_and(|t| t.automated);

    meta.time_signature = time_signature(live_set, &mut f);
    let beats_per_bar = meta
        .time_signature
        .unwrap_or(TimeSignature::COMMON)
        .beats_per_bar();

    let (key, scale, in_key) = key_and_scale(live_set, &mut f);
    meta.key = key;
    meta.scale = scale;
    meta.is_in_key = in_key;

    meta.tracks = track_counts(live_set, &mut f);
    meta.has_master_track =
        live_set.child("MasterTrack").is_some() || live_set.child("MainTrack").is_some();
    meta.plugins = plugins(live_set);
    meta.devices = devices(live_set);
    meta.samples = samples(live_set, project_dir);
    meta.has_automation = has_automation(live_set);
    meta.arrangement_bars = arrangement_bars(live_set, beats_per_bar, &mut f);

    let map = match tempo {
        Some(t) => t.map,
        None => TempoMap::constant(FALLBACK_BPM),
    };
    meta.markers = markers(live_set, &map, beats_per_bar, meta.tempo.is_none(), &mut f);
    meta.export_names = export_names(root);
    meta.annotation = live_set
        .child("Annotation")
        .and_then(|a| a.value())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    meta.parse_warnings = f.warnings;
    meta
}

fn find_live_set(root: &Element) -> Option<&Element> {
    if root.name == "LiveSet" {
        return Some(root);
    }
    root.child("LiveSet").or_else(|| root.find("LiveSet"))
}

fn parse_f64(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn tempo(live_set: &Element, f: &mut Fields) -> Option<TempoInfo> {
    let master = live_set
        .child("MasterTrack")
        .or_else(|| live_set.child("MainTrack"));
    let tempo_el = master
        .and_then(|m| m.path(&["DeviceChain", "Mixer", "Tempo"]))
        .or_else(|| {
            live_set
                .descendants()
                .find(|e| e.name == "Tempo" && e.child("Manual").is_some())
        });
    let Some(tempo_el) = tempo_el else {
        f.warn("tempo", "Tempo element missing");
        return None;
    };

    let manual_raw = tempo_el.child("Manual").and_then(|m| m.value());
    let manual = parse_f64(manual_raw).filter(|v| *v > 0.0);

    let target_id = tempo_el
        .child("AutomationTarget")
        .and_then(|t| t.attr("Id"));
    let scope = master.unwrap_or(live_set);
    let points = target_id
        .map(|id| tempo_envelope_points(scope, id))
        .unwrap_or_default();

    if let Some(map) = TempoMap::from_points(points.iter().copied()) {
        let initial = initial_event_value(&points).unwrap_or_else(|| map.bpm_at(0.0));
        let first = points[0].1;
        let automated = points.iter().any(|(_, v)| (v - first).abs() > 1e-9);
        return Some(TempoInfo {
            bpm: initial,
            automated,
            map,
        });
    }

    match manual {
        Some(bpm) => Some(TempoInfo {
            bpm,
            automated: false,
            map: TempoMap::constant(bpm),
        }),
        None => {
            f.warn(
                "tempo",
                format!("unreadable tempo value {:?}", manual_raw.unwrap_or("")),
            );
            None
        }
    }
}

/// `(time, value)` pairs of the envelope pointing at `target_id`, sorted.
fn tempo_envelope_points(scope: &Element, target_id: &str) -> Vec<(f64, f64)> {
    let envelope = scope.descendants().find(|e| {
        e.name == "AutomationEnvelope"
            && e.path(&["EnvelopeTarget", "PointeeId"])
                .and_then(|p| p.value())
                == Some(target_id)
    });
    let Some(events) = envelope.and_then(|e| e.path(&["Automation", "Events"])) else {
        return Vec::new();
    };
    let mut points: Vec<(f64, f64)> = events
        .children_named("FloatEvent")
        .filter_map(|ev| {
            let time = parse_f64(ev.attr("Time"))?;
            let value = parse_f64(ev.attr("Value"))?;
            (value > 0.0).then_some((time, value))
        })
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points
}

/// The value in effect when playback starts: the last event at or before
/// beat 0, otherwise the earliest event.
fn initial_event_value(points: &[(f64, f64)]) -> Option<f64> {
    points
        .iter()
        .rev()
        .find(|(t, _)| *t <= 0.0)
        .or_else(|| points.first())
        .map(|(_, v)| *v)
}

fn time_signature(live_set: &Element, f: &mut Fields) -> Option<TimeSignature> {
    let candidate = live_set.descendants().find(|e| {
        (e.name == "RemoteableTimeSignature" || e.name == "TimeSignature")
            && e.attr_or_child_value("Numerator").is_some()
            && e.attr_or_child_value("Denominator").is_some()
    });
    let Some(el) = candidate else {
        f.warn("time_signature", "no time signature found");
        return None;
    };
    let num = el
        .attr_or_child_value("Numerator")
        .and_then(|v| v.trim().parse::<u32>().ok());
    let den = el
        .attr_or_child_value("Denominator")
        .and_then(|v| v.trim().parse::<u32>().ok());
    match (num, den) {
        (Some(numerator), Some(denominator)) if numerator > 0 && denominator > 0 => {
            Some(TimeSignature {
                numerator,
                denominator,
            })
        }
        _ => {
            f.warn("time_signature", "unreadable numerator or denominator");
            None
        }
    }
}

/// Reads a `ScaleInformation` block as `(root_index, scale_index_or_name)`.
fn scale_info(el: &Element) -> Option<(i64, String)> {
    let root = el
        .child("Root")
        .or_else(|| el.child("RootNote"))
        .and_then(|r| r.value())?;
    let name = el.child("Name").and_then(|n| n.value())?;
    let root = root.trim().parse::<i64>().ok()?;
    Some((root, name.trim().to_string()))
}

fn scale_label(name: &str) -> Option<String> {
    match name.parse::<usize>() {
        Ok(idx) => SCALE_NAMES.get(idx).map(|s| s.to_string()),
        Err(_) if !name.is_empty() => Some(name.to_string()),
        Err(_) => None,
    }
}

fn is_default_scale(root: i64, name: &str) -> bool {
    root == 0 && (name == "0" || name.eq_ignore_ascii_case("major"))
}

fn key_label(root: i64) -> Option<String> {
    usize::try_from(root)
        .ok()
        .and_then(|r| KEY_NAMES.get(r))
        .map(|s| s.to_string())
}

fn key_and_scale(
    live_set: &Element,
    f: &mut Fields,
) -> (Option<String>, Option<String>, Option<bool>) {
    let in_key = live_set
        .child("InKey")
        .and_then(|e| e.value())
        .map(|v| v.eq_ignore_ascii_case("true"));

    if let Some(info_el) = live_set.child("ScaleInformation") {
        match scale_info(info_el) {
            Some((root, name)) => {
                if in_key == Some(true) || !is_default_scale(root, &name) {
                    let key = key_label(root);
                    let scale = scale_label(&name);
                    if key.is_some() || scale.is_some() {
                        return (key, scale, in_key);
                    }
                }
            }
            None => f.warn("scale", "unreadable global ScaleInformation"),
        }
    }

    // Clip-level scale counts only when every clip that sets one agrees.
    let mut clip_scales: Vec<(Option<String>, Option<String>)> = Vec::new();
    for clip in live_set
        .descendants()
        .filter(|e| e.name == "AudioClip" || e.name == "MidiClip")
    {
        let Some((root, name)) = clip.find("ScaleInformation").and_then(scale_info) else {
            continue;
        };
        if is_default_scale(root, &name) {
            continue;
        }
        let pair = (key_label(root), scale_label(&name));
        if pair.0.is_some() || pair.1.is_some() {
            clip_scales.push(pair);
        }
    }
    let distinct: HashSet<_> = clip_scales.iter().collect();
    if distinct.len() == 1 {
        let (key, scale) = clip_scales.swap_remove(0);
        return (key, scale, None);
    }
    (None, None, in_key)
}

fn track_counts(live_set: &Element, f: &mut Fields) -> TrackCounts {
    let mut counts = TrackCounts::default();
    let Some(tracks) = live_set.child("Tracks") else {
        f.warn("tracks", "Tracks element missing");
        return counts;
    };
    for track in &tracks.children {
        match track.name.as_str() {
            "AudioTrack" => counts.audio += 1,
            "MidiTrack" => counts.midi += 1,
            "GroupTrack" => counts.group += 1,
            "ReturnTrack" => counts.returns += 1,
            _ => {}
        }
    }
    counts
}

fn normalize_name(raw: &str) -> Option<String> {
    let name = raw.trim().to_lowercase();
    (!name.is_empty()).then_some(name)
}

fn plugins(scope: &Element) -> BTreeSet<String> {
    scope
        .descendants()
        .filter_map(|e| match e.name.as_str() {
            "VstPluginInfo" => e.attr_or_child_value("PlugName"),
            "Vst3PluginInfo" | "AuPluginInfo" => e.attr_or_child_value("Name"),
            _ => None,
        })
        .filter_map(normalize_name)
        .collect()
}

fn devices(scope: &Element) -> BTreeSet<String> {
    scope
        .descendants()
        .filter(|e| e.name == "Devices")
        .flat_map(|d| d.children.iter())
        .filter(|c| !PLUGIN_HOSTS.contains(&c.name.as_str()))
        .filter_map(|c| normalize_name(&c.name))
        .collect()
}

fn samples(live_set: &Element, project_dir: Option<&Path>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for file_ref in live_set
        .descendants()
        .filter(|e| e.name == "SampleRef")
        .filter_map(|s| s.child("FileRef"))
    {
        if let Some(path) = sample_path(file_ref, project_dir) {
            if seen.insert(path.clone()) {
                out.push(path);
            }
        }
    }
    out
}

fn sample_path(file_ref: &Element, project_dir: Option<&Path>) -> Option<String> {
    let relative = file_ref.child("RelativePath");
    if let Some(rel) = relative
        .and_then(|r| r.attr("Value"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Some(match project_dir {
            Some(dir) => dir.join(rel).to_string_lossy().into_owned(),
            None => rel.to_string(),
        });
    }
    if let Some(abs) = file_ref
        .child("Path")
        .and_then(|p| p.value())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Some(abs.to_string());
    }

    // Legacy layout: a chain of RelativePathElement Dir attributes plus Name.
    let name = file_ref.child("Name").and_then(|n| n.value())?.trim();
    if name.is_empty() {
        return None;
    }
    let mut path = project_dir.map(Path::to_path_buf).unwrap_or_default();
    if let Some(rel) = relative {
        for dir in rel
            .children_named("RelativePathElement")
            .filter_map(|e| e.attr("Dir"))
        {
            path.push(dir);
        }
    }
    path.push(name);
    Some(path.to_string_lossy().into_owned())
}

fn has_automation(live_set: &Element) -> bool {
    live_set.descendants().any(|e| {
        e.name == "AutomationEnvelope"
            && e.path(&["Automation", "Events"])
                .is_some_and(|ev| !ev.children.is_empty())
    })
}

fn locator_times(live_set: &Element) -> impl Iterator<Item = (&Element, Option<f64>)> {
    live_set
        .descendants()
        .filter(|e| e.name == "Locator")
        .map(|l| (l, parse_f64(l.child("Time").and_then(|t| t.value()))))
}

fn arrangement_bars(live_set: &Element, beats_per_bar: f64, f: &mut Fields) -> Option<f64> {
    let mut max_end: f64 = 0.0;
    let mut bad = 0usize;
    for clip in live_set
        .descendants()
        .filter(|e| e.name == "AudioClip" || e.name == "MidiClip")
    {
        if let Some(end) = clip.child("CurrentEnd") {
            match parse_f64(end.value()) {
                Some(v) => max_end = max_end.max(v),
                None => bad += 1,
            }
        }
    }
    for (_, time) in locator_times(live_set) {
        if let Some(t) = time {
            max_end = max_end.max(t);
        }
    }
    if bad > 0 {
        f.warn(
            "arrangement",
            format!("{} clip(s) with unreadable CurrentEnd", bad),
        );
    }
    (max_end > 0.0).then(|| max_end / beats_per_bar)
}

fn markers(
    live_set: &Element,
    map: &TempoMap,
    beats_per_bar: f64,
    tempo_unknown: bool,
    f: &mut Fields,
) -> Vec<Marker> {
    let mut out = Vec::new();
    for (locator, time) in locator_times(live_set) {
        let Some(beat) = time else {
            f.warn("markers", "locator with unreadable Time skipped");
            continue;
        };
        let label = locator
            .child("Name")
            .and_then(|n| n.value())
            .unwrap_or_default()
            .to_string();
        out.push(Marker {
            beat,
            bar: 1.0 + beat / beats_per_bar,
            seconds: map.seconds_at(beat),
            label,
        });
    }
    if tempo_unknown && !out.is_empty() {
        f.warn(
            "markers",
            format!("tempo unknown, marker seconds assume {} bpm", FALLBACK_BPM),
        );
    }
    out.sort_by(|a, b| a.beat.total_cmp(&b.beat));
    out
}

fn file_stem(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let last = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let stem = Path::new(last)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| last.to_string());
    (!stem.is_empty()).then_some(stem)
}

fn export_names(root: &Element) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for holder in root
        .descendants()
        .filter(|e| e.name.contains("Export") || e.name.contains("RenderSettings"))
    {
        let own = holder.attr("FileName");
        let from_children = holder
            .children
            .iter()
            .filter(|c| c.name == "FileName" || c.name == "OutputFileName")
            .filter_map(|c| c.value());
        for raw in own.into_iter().chain(from_children) {
            if let Some(stem) = file_stem(raw) {
                if seen.insert(stem.to_lowercase()) {
                    out.push(stem);
                }
            }
        }
    }
    out
}
