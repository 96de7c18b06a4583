//! Core data models shared by the decoder, the store, and the derived
//! relationship engines.
//!
//! A [`ProjectRecord`] is keyed by its path and carries the fingerprint
//! (size, mtime, content hash) alongside the decoded [`ProjectMetadata`].
//! [`ExportRecord`] and [`SimilarityScore`] are derived rows that point
//! back at projects by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

pub type ProjectId = Uuid;
pub type LocationId = Uuid;
pub type ExportId = Uuid;

/// Lifecycle state of an indexed project file.
///
/// Records are never removed implicitly: a file that disappears becomes
/// `Missing`, a container that cannot be decoded becomes `ParseFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Active,
    Missing,
    ParseFailed,
    Backup,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "ACTIVE",
            ProjectStatus::Missing => "MISSING",
            ProjectStatus::ParseFailed => "PARSE_FAILED",
            ProjectStatus::Backup => "BACKUP",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(ProjectStatus::Active),
            "MISSING" => Ok(ProjectStatus::Missing),
            "PARSE_FAILED" => Ok(ProjectStatus::ParseFailed),
            "BACKUP" => Ok(ProjectStatus::Backup),
            other => anyhow::bail!("unknown project status: '{}'", other),
        }
    }
}

/// A non-fatal gap found while decoding one field of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    pub field: String,
    pub message: String,
}

impl ParseWarning {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Time signature of the arrangement, e.g. `4/4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature {
        numerator: 4,
        denominator: 4,
    };

    /// Quarter-note beats per bar (`6/8` is 3.0, `7/4` is 7.0).
    pub fn beats_per_bar(&self) -> f64 {
        if self.denominator == 0 {
            return 4.0;
        }
        self.numerator as f64 * 4.0 / self.denominator as f64
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// A named locator on the arrangement timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Position in quarter-note beats, as stored in the container.
    pub beat: f64,
    /// 1-based bar position derived from the time signature.
    pub bar: f64,
    /// Wall-clock offset from the start, integrated over the tempo map.
    pub seconds: f64,
    pub label: String,
}

/// Top-level track layout. `returns` is informational and never part of
/// [`TrackCounts::total`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackCounts {
    pub audio: u32,
    pub midi: u32,
    pub group: u32,
    pub returns: u32,
}

impl TrackCounts {
    pub fn total(&self) -> u32 {
        self.audio + self.midi + self.group
    }

    pub fn vector(&self) -> [f64; 3] {
        [self.audio as f64, self.midi as f64, self.group as f64]
    }
}

/// Everything the decoder extracts from one container.
///
/// Each field is extracted independently; a field that could not be read
/// stays empty and leaves an entry in `parse_warnings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub tempo: Option<f64>,
    #[serde(default)]
    pub tempo_automated: bool,
    pub time_signature: Option<TimeSignature>,
    pub key: Option<String>,
    pub scale: Option<String>,
    pub is_in_key: Option<bool>,
    pub tracks: TrackCounts,
    #[serde(default)]
    pub has_master_track: bool,
    pub plugins: BTreeSet<String>,
    pub devices: BTreeSet<String>,
    pub samples: Vec<String>,
    pub arrangement_bars: Option<f64>,
    pub has_automation: bool,
    pub markers: Vec<Marker>,
    pub schema_version: Option<String>,
    pub creator: Option<String>,
    pub annotation: Option<String>,
    #[serde(default)]
    pub export_names: Vec<String>,
    /// Root attributes the decoder does not model, kept verbatim.
    #[serde(default)]
    pub extra_attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub parse_warnings: Vec<ParseWarning>,
}

/// The (size, mtime, content-hash) triple identifying a file's content state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime: i64,
    pub content_hash: String,
}

impl Fingerprint {
    /// True when the cheap stat pair matches; the hash is not consulted.
    pub fn same_stat(&self, size: u64, mtime: i64) -> bool {
        self.size == size && self.mtime == mtime
    }
}

/// One indexed project container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub path: String,
    pub name: String,
    pub location_id: Option<LocationId>,
    pub content_hash: String,
    pub size: u64,
    pub mtime: i64,
    pub status: ProjectStatus,
    pub metadata: Option<ProjectMetadata>,
    pub parse_error: Option<String>,
    pub export_song_name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_scanned: DateTime<Utc>,
    pub last_parsed: Option<DateTime<Utc>>,
}

impl ProjectRecord {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            size: self.size,
            mtime: self.mtime,
            content_hash: self.content_hash.clone(),
        }
    }

    /// Only active, successfully decoded projects take part in similarity
    /// scoring and export linking.
    pub fn is_analyzable(&self) -> bool {
        self.status == ProjectStatus::Active && self.metadata.is_some()
    }

    /// Names the export linker tries, in priority order, without duplicates.
    pub fn link_names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        if let Some(alias) = &self.export_song_name {
            names.push(alias.clone());
        }
        if let Some(meta) = &self.metadata {
            names.extend(meta.export_names.iter().cloned());
        }
        let mut seen = BTreeSet::new();
        names.retain(|n| !n.trim().is_empty() && seen.insert(n.to_lowercase()));
        names
    }
}

/// Which matching tier produced an export link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    Exact,
    Normalized,
    Fuzzy,
}

impl MatchTier {
    pub fn weight(&self) -> f64 {
        match self {
            MatchTier::Exact => 1.0,
            MatchTier::Normalized => 0.95,
            MatchTier::Fuzzy => 0.8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Exact => "exact",
            MatchTier::Normalized => "normalized",
            MatchTier::Fuzzy => "fuzzy",
        }
    }
}

impl FromStr for MatchTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MatchTier::Exact),
            "normalized" => Ok(MatchTier::Normalized),
            "fuzzy" => Ok(MatchTier::Fuzzy),
            other => anyhow::bail!("unknown match tier: '{}'", other),
        }
    }
}

/// A rendered audio file and the project it was linked to, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: ExportId,
    pub path: String,
    pub name: String,
    pub format: String,
    pub bit_depth: Option<u32>,
    pub sample_rate: Option<u32>,
    pub duration_secs: Option<f64>,
    pub size: u64,
    pub mtime: i64,
    pub location_id: Option<LocationId>,
    pub project_id: Option<ProjectId>,
    pub confidence: f64,
    pub tier: Option<MatchTier>,
}

impl ExportRecord {
    pub fn is_orphan(&self) -> bool {
        self.project_id.is_none()
    }
}

/// Unordered project pair stored in canonical (ascending) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub a: ProjectId,
    pub b: ProjectId,
}

impl PairKey {
    pub fn new(x: ProjectId, y: ProjectId) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    pub fn contains(&self, id: ProjectId) -> bool {
        self.a == id || self.b == id
    }

    pub fn other(&self, id: ProjectId) -> ProjectId {
        if self.a == id {
            self.b
        } else {
            self.a
        }
    }
}

/// Per-factor contributions before weighting, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorBreakdown {
    pub plugins: f64,
    pub devices: f64,
    pub tempo: f64,
    pub tracks: f64,
}

/// Cached composite similarity of one project pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub pair: PairKey,
    pub score: f64,
    pub factors: FactorBreakdown,
    pub computed_at: DateTime<Utc>,
    /// Content hashes of both sides at computation time; a mismatch with
    /// the live records means the row is stale.
    pub hash_a: String,
    pub hash_b: String,
}

impl SimilarityScore {
    pub fn is_current(&self, a: &ProjectRecord, b: &ProjectRecord) -> bool {
        let key = PairKey::new(a.id, b.id);
        if key != self.pair {
            return false;
        }
        let (ra, rb) = if a.id == key.a { (a, b) } else { (b, a) };
        ra.content_hash == self.hash_a && rb.content_hash == self.hash_b
    }
}

/// A configured root that is scanned and watched for project containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub root: PathBuf,
    pub active: bool,
    pub exclude_globs: Vec<String>,
}
