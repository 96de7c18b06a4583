//! Export-to-project name matching.
//!
//! Names are compared in three increasingly lenient forms:
//!
//! | Tier | Form | Similarity |
//! |------|------|------------|
//! | exact | lowercase stem, audio/project extension removed | 1.0 |
//! | normalized | canonical key: version tokens, date stamps, track numbers and generic suffixes stripped, punctuation and whitespace removed | 1.0 |
//! | fuzzy | max(Sørensen–Dice, token Jaccard) over canonical forms | ratio |
//!
//! Per project the first tier with any hit wins and every export passing
//! it is linked. When several projects claim the same export the best
//! tier wins, then confidence, then the most recently modified project,
//! then the lowest id.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::models::{ExportRecord, MatchTier, ProjectId, ProjectRecord};

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.65;

const KNOWN_EXTENSIONS: [&str; 10] = [
    "als", "alc", "wav", "aif", "aiff", "flac", "mp3", "ogg", "m4a", "aac",
];

const GENERIC_SUFFIXES: [&str; 9] = [
    "final", "master", "mix", "bounce", "export", "project", "render", "mixdown", "mastered",
];

/// Lowercase, trimmed, known extension removed.
pub fn base_form(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    if let Some((stem, ext)) = lower.rsplit_once('.') {
        if KNOWN_EXTENSIONS.contains(&ext) && !stem.is_empty() {
            return stem.trim().to_string();
        }
    }
    lower
}

fn is_version_token(t: &str) -> bool {
    let rest = t.strip_prefix('v').or_else(|| t.strip_prefix("ver"));
    matches!(rest, Some(r) if !r.is_empty() && r.chars().all(|c| c.is_ascii_digit()))
}

fn is_number(t: &str) -> bool {
    !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())
}

/// Alphanumeric tokens of the base form with noise removed.
///
/// Trailing version tokens, numbers (which covers split date stamps) and
/// generic suffixes are stripped repeatedly. A leading track number is
/// dropped when a real name follows. If stripping would leave nothing the
/// raw tokens are kept.
pub fn canonical_tokens(name: &str) -> Vec<String> {
    let base = base_form(name);
    let raw: Vec<String> = base
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let mut tokens: Vec<String> = raw.iter().filter(|t| *t != "project").cloned().collect();
    while let Some(last) = tokens.last() {
        if is_version_token(last) || is_number(last) || GENERIC_SUFFIXES.contains(&last.as_str()) {
            tokens.pop();
        } else {
            break;
        }
    }
    if tokens.len() > 1 && tokens[0].len() <= 2 && is_number(&tokens[0]) {
        tokens.remove(0);
    }
    if tokens.is_empty() {
        return raw;
    }
    tokens
}

/// Tier 2 comparison key.
pub fn canonical_key(name: &str) -> String {
    canonical_tokens(name).concat()
}

fn token_jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: BTreeSet<&String> = a.iter().collect();
    let sb: BTreeSet<&String> = b.iter().collect();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count();
    inter as f64 / (sa.len() + sb.len() - inter) as f64
}

/// Fuzzy ratio in `[0, 1]` between two names' canonical forms.
pub fn fuzzy_ratio(a: &str, b: &str) -> f64 {
    let ta = canonical_tokens(a);
    let tb = canonical_tokens(b);
    let dice = strsim::sorensen_dice(&ta.concat(), &tb.concat());
    dice.max(token_jaccard(&ta, &tb)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameMatch {
    pub tier: MatchTier,
    pub similarity: f64,
}

impl NameMatch {
    pub fn confidence(&self) -> f64 {
        (self.tier.weight() * self.similarity).clamp(0.0, 1.0)
    }

    fn better_than(&self, other: &NameMatch) -> bool {
        match self.tier.cmp(&other.tier) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.similarity > other.similarity,
        }
    }
}

/// Best match of one export file name against a project's name aliases.
pub fn match_name(aliases: &[String], export_name: &str, fuzzy_threshold: f64) -> Option<NameMatch> {
    let export_base = base_form(export_name);
    let export_key = canonical_key(export_name);
    let mut best: Option<NameMatch> = None;
    for alias in aliases {
        let candidate = if base_form(alias) == export_base {
            Some(NameMatch {
                tier: MatchTier::Exact,
                similarity: 1.0,
            })
        } else if !export_key.is_empty() && canonical_key(alias) == export_key {
            Some(NameMatch {
                tier: MatchTier::Normalized,
                similarity: 1.0,
            })
        } else {
            let ratio = fuzzy_ratio(alias, export_name);
            (ratio >= fuzzy_threshold).then_some(NameMatch {
                tier: MatchTier::Fuzzy,
                similarity: ratio,
            })
        };
        if let Some(c) = candidate {
            if best.as_ref().map_or(true, |b| c.better_than(b)) {
                best = Some(c);
            }
        }
    }
    best
}

/// Exports linked to one project: every export hit by the project's best
/// tier, as `(index into exports, match)`.
pub fn match_project(
    project: &ProjectRecord,
    export_names: &[&str],
    fuzzy_threshold: f64,
) -> Vec<(usize, NameMatch)> {
    let aliases = project.link_names();
    let hits: Vec<(usize, NameMatch)> = export_names
        .iter()
        .enumerate()
        .filter_map(|(i, name)| match_name(&aliases, name, fuzzy_threshold).map(|m| (i, m)))
        .collect();
    let Some(winning) = hits.iter().map(|(_, m)| m.tier).min() else {
        return Vec::new();
    };
    hits.into_iter().filter(|(_, m)| m.tier == winning).collect()
}

struct Claim<'a> {
    project: &'a ProjectRecord,
    hit: NameMatch,
}

fn claim_order(a: &Claim<'_>, b: &Claim<'_>) -> Ordering {
    a.hit
        .tier
        .cmp(&b.hit.tier)
        .then_with(|| b.hit.confidence().total_cmp(&a.hit.confidence()))
        .then_with(|| b.project.mtime.cmp(&a.project.mtime))
        .then_with(|| a.project.id.cmp(&b.project.id))
}

/// Recomputes the link of every export against the given projects.
///
/// Only analyzable projects are considered. Exports that no project
/// claims come back orphaned with zero confidence.
pub fn link_exports(
    projects: &[ProjectRecord],
    exports: &[ExportRecord],
    fuzzy_threshold: f64,
) -> Vec<ExportRecord> {
    let names: Vec<&str> = exports.iter().map(|e| e.name.as_str()).collect();
    let mut claims: HashMap<usize, Vec<Claim<'_>>> = HashMap::new();
    for project in projects.iter().filter(|p| p.is_analyzable()) {
        for (idx, hit) in match_project(project, &names, fuzzy_threshold) {
            claims.entry(idx).or_default().push(Claim { project, hit });
        }
    }

    exports
        .iter()
        .enumerate()
        .map(|(idx, export)| {
            let mut out = export.clone();
            let winner = claims
                .get_mut(&idx)
                .and_then(|c| {
                    c.sort_by(claim_order);
                    c.first()
                })
                .map(|c| (c.project.id, c.hit));
            apply(&mut out, winner);
            out
        })
        .collect()
}

fn apply(export: &mut ExportRecord, winner: Option<(ProjectId, NameMatch)>) {
    match winner {
        Some((project_id, hit)) => {
            export.project_id = Some(project_id);
            export.tier = Some(hit.tier);
            export.confidence = hit.confidence();
        }
        None => {
            export.project_id = None;
            export.tier = None;
            export.confidence = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProjectMetadata, ProjectStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn project(name: &str, mtime: i64) -> ProjectRecord {
        let now = Utc::now();
        ProjectRecord {
            id: Uuid::new_v4(),
            path: format!("/music/{name}.als"),
            name: name.to_string(),
            location_id: None,
            content_hash: String::new(),
            size: 1,
            mtime,
            status: ProjectStatus::Active,
            metadata: Some(ProjectMetadata::default()),
            parse_error: None,
            export_song_name: None,
            first_seen: now,
            last_scanned: now,
            last_parsed: Some(now),
        }
    }

    fn export(file: &str) -> ExportRecord {
        ExportRecord {
            id: Uuid::new_v4(),
            path: format!("/music/Exports/{file}"),
            name: file.to_string(),
            format: "wav".to_string(),
            bit_depth: None,
            sample_rate: None,
            duration_secs: None,
            size: 1,
            mtime: 0,
            location_id: None,
            project_id: None,
            confidence: 0.0,
            tier: None,
        }
    }

    #[test]
    fn canonical_key_strips_noise() {
        assert_eq!(canonical_key("MySong_v2_master.wav"), "mysong");
        assert_eq!(canonical_key("Night Drive - 2024-01-15.wav"), "nightdrive");
        assert_eq!(canonical_key("01 - Night Drive (Final).aif"), "nightdrive");
        assert_eq!(canonical_key("Sunset Project"), "sunset");
        assert_eq!(canonical_key("2024"), "2024");
    }

    #[test]
    fn versioned_master_is_tier_two() {
        let m = match_name(&["MySong".to_string()], "MySong_v2_master.wav", 0.65).unwrap();
        assert_eq!(m.tier, MatchTier::Normalized);
        assert!(m.confidence() >= 0.9);
    }

    #[test]
    fn same_stem_is_tier_one() {
        let m = match_name(&["Night Drive".to_string()], "night drive.wav", 0.65).unwrap();
        assert_eq!(m.tier, MatchTier::Exact);
        assert_eq!(m.confidence(), 1.0);
    }

    #[test]
    fn typo_is_fuzzy_and_unrelated_is_none() {
        let m = match_name(&["Midnight Drive".to_string()], "midnight drivee.wav", 0.65).unwrap();
        assert_eq!(m.tier, MatchTier::Fuzzy);
        assert!(m.confidence() < 0.8 + 1e-9);
        assert!(match_name(&["Sunrise".to_string()], "midnight drive.wav", 0.65).is_none());
    }

    #[test]
    fn project_links_only_winning_tier() {
        let p = project("Night Drive", 0);
        let names = ["Night Drive.wav", "Night Drive v3.wav", "Nite Drive.wav"];
        let hits = match_project(&p, &names, 0.65);
        let idx: Vec<_> = hits.iter().map(|(i, _)| *i).collect();
        assert_eq!(idx, vec![0]);
    }

    #[test]
    fn project_owns_multiple_exports_at_one_tier() {
        let p = project("Night Drive", 0);
        let names = ["Night Drive v1.wav", "Night Drive_final.flac", "Other.wav"];
        let hits = match_project(&p, &names, 0.65);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(_, m)| m.tier == MatchTier::Normalized));
    }

    #[test]
    fn exact_beats_fuzzy_across_projects() {
        let exact = project("Night Drive", 0);
        let fuzzy = project("Night Driver", 100);
        let exports = vec![export("Night Drive.wav")];
        let linked = link_exports(&[fuzzy.clone(), exact.clone()], &exports, 0.65);
        assert_eq!(linked[0].project_id, Some(exact.id));
        assert_eq!(linked[0].tier, Some(MatchTier::Exact));
    }

    #[test]
    fn tie_goes_to_most_recent_project() {
        let old = project("Night Drive", 10);
        let mut new = project("Night Drive", 20);
        new.path = "/music/copy/Night Drive.als".to_string();
        let exports = vec![export("Night Drive.wav")];
        let linked = link_exports(&[old, new.clone()], &exports, 0.65);
        assert_eq!(linked[0].project_id, Some(new.id));
    }

    #[test]
    fn unmatched_export_is_orphaned() {
        let mut stale = export("Sunrise.wav");
        stale.project_id = Some(Uuid::new_v4());
        stale.confidence = 0.9;
        let linked = link_exports(&[project("Night Drive", 0)], &[stale], 0.65);
        assert!(linked[0].is_orphan());
        assert_eq!(linked[0].confidence, 0.0);
        assert_eq!(linked[0].tier, None);
    }

    #[test]
    fn export_song_name_alias_is_used() {
        let mut p = project("Untitled 14", 0);
        p.export_song_name = Some("Golden Hour".to_string());
        let linked = link_exports(&[p.clone()], &[export("Golden Hour (Master).wav")], 0.65);
        assert_eq!(linked[0].project_id, Some(p.id));
    }

    #[test]
    fn failed_projects_are_not_linked() {
        let mut p = project("Night Drive", 0);
        p.status = ProjectStatus::ParseFailed;
        p.metadata = None;
        let linked = link_exports(&[p], &[export("Night Drive.wav")], 0.65);
        assert!(linked[0].is_orphan());
    }
}
