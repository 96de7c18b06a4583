//! Composite similarity, nearest-neighbour queries, and duplicate
//! clustering over project records.
//!
//! The composite score for a pair is
//!
//! ```text
//! w_p * jaccard(plugins) + w_d * jaccard(devices)
//!   + w_t * max(0, 1 - |Δtempo| / tolerance)
//!   + w_k * (1 - track_distance)
//! ```
//!
//! A factor whose input is missing on either side contributes 0 rather
//! than being dropped, so scores stay comparable between projects with
//! partial metadata. Only [`ProjectRecord::is_analyzable`] records take
//! part.

pub mod cluster;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::{
    FactorBreakdown, PairKey, ProjectId, ProjectMetadata, ProjectRecord, SimilarityScore,
    TrackCounts,
};
use cluster::UnionFind;

/// Relative weights of the four factors. Expected to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    pub plugins: f64,
    pub devices: f64,
    pub tempo: f64,
    pub tracks: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            plugins: 0.3,
            devices: 0.3,
            tempo: 0.2,
            tracks: 0.2,
        }
    }
}

impl SimilarityWeights {
    pub fn sum(&self) -> f64 {
        self.plugins + self.devices + self.tempo + self.tracks
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityParams {
    pub weights: SimilarityWeights,
    /// BPM difference at which the tempo factor reaches 0.
    pub tempo_tolerance: f64,
    /// Minimum composite score for two projects to count as near-duplicates.
    pub duplicate_threshold: f64,
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self {
            weights: SimilarityWeights::default(),
            tempo_tolerance: 20.0,
            duplicate_threshold: 0.85,
        }
    }
}

/// Jaccard index of two name sets; 0 when either side is empty.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

pub fn tempo_term(a: Option<f64>, b: Option<f64>, tolerance: f64) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) if tolerance > 0.0 => (1.0 - (a - b).abs() / tolerance).max(0.0),
        _ => 0.0,
    }
}

/// `1 - Σ|aᵢ-bᵢ| / Σmax(aᵢ,bᵢ)` over (audio, midi, group).
pub fn track_term(a: &TrackCounts, b: &TrackCounts) -> f64 {
    if a.total() == 0 || b.total() == 0 {
        return 0.0;
    }
    let (va, vb) = (a.vector(), b.vector());
    let diff: f64 = va.iter().zip(vb.iter()).map(|(x, y)| (x - y).abs()).sum();
    let span: f64 = va.iter().zip(vb.iter()).map(|(x, y)| x.max(*y)).sum();
    if span == 0.0 {
        return 0.0;
    }
    (1.0 - diff / span).clamp(0.0, 1.0)
}

pub fn factors(a: &ProjectMetadata, b: &ProjectMetadata, params: &SimilarityParams) -> FactorBreakdown {
    FactorBreakdown {
        plugins: jaccard(&a.plugins, &b.plugins),
        devices: jaccard(&a.devices, &b.devices),
        tempo: tempo_term(a.tempo, b.tempo, params.tempo_tolerance),
        tracks: track_term(&a.tracks, &b.tracks),
    }
}

pub fn composite(f: &FactorBreakdown, w: &SimilarityWeights) -> f64 {
    let raw = w.plugins * f.plugins + w.devices * f.devices + w.tempo * f.tempo + w.tracks * f.tracks;
    raw.clamp(0.0, 1.0)
}

/// One neighbour returned by [`SimilarityEngine::find_similar`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarMatch {
    pub project_id: ProjectId,
    pub path: String,
    pub name: String,
    pub mtime: i64,
    pub score: f64,
    pub factors: FactorBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterKind {
    /// Every member has the same content hash.
    Exact,
    Near,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterEdge {
    pub pair: PairKey,
    pub score: f64,
    pub same_content: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCluster {
    pub kind: ClusterKind,
    /// Members ordered by path.
    pub members: Vec<ClusterMember>,
    pub edges: Vec<ClusterEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMember {
    pub id: ProjectId,
    pub path: String,
    pub content_hash: String,
}

/// Stateless scorer bound to one parameter set.
#[derive(Debug, Clone, Default)]
pub struct SimilarityEngine {
    params: SimilarityParams,
}

impl SimilarityEngine {
    pub fn new(params: SimilarityParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SimilarityParams {
        &self.params
    }

    /// Scores a pair, or `None` when either side cannot be analyzed.
    pub fn score(&self, a: &ProjectRecord, b: &ProjectRecord) -> Option<SimilarityScore> {
        if a.id == b.id || !a.is_analyzable() || !b.is_analyzable() {
            return None;
        }
        let (ma, mb) = (a.metadata.as_ref()?, b.metadata.as_ref()?);
        let pair = PairKey::new(a.id, b.id);
        let (first, second, mfirst, msecond) = if pair.a == a.id {
            (a, b, ma, mb)
        } else {
            (b, a, mb, ma)
        };
        let f = factors(mfirst, msecond, &self.params);
        Some(SimilarityScore {
            pair,
            score: composite(&f, &self.params.weights),
            factors: f,
            computed_at: Utc::now(),
            hash_a: first.content_hash.clone(),
            hash_b: second.content_hash.clone(),
        })
    }

    /// Up to `k` analyzable projects other than `target` scoring at least
    /// `min_score`, best first. Ties go to the most recently modified
    /// project, then the lowest id.
    ///
    /// `cached` rows are used when they are still current for both sides;
    /// anything else is scored on the spot.
    pub fn find_similar(
        &self,
        target: &ProjectRecord,
        snapshot: &[ProjectRecord],
        cached: &HashMap<PairKey, SimilarityScore>,
        k: usize,
        min_score: f64,
    ) -> Vec<SimilarMatch> {
        if !target.is_analyzable() || k == 0 {
            return Vec::new();
        }
        let mut out: Vec<SimilarMatch> = snapshot
            .iter()
            .filter(|c| c.id != target.id && c.is_analyzable())
            .filter_map(|c| {
                let key = PairKey::new(target.id, c.id);
                let row = match cached.get(&key) {
                    Some(row) if row.is_current(target, c) => row.clone(),
                    _ => self.score(target, c)?,
                };
                (row.score >= min_score).then(|| SimilarMatch {
                    project_id: c.id,
                    path: c.path.clone(),
                    name: c.name.clone(),
                    mtime: c.mtime,
                    score: row.score,
                    factors: row.factors,
                })
            })
            .collect();
        out.sort_by(rank_order);
        out.truncate(k);
        out
    }

    /// Pairs sharing at least one plugin or device name.
    ///
    /// Built from an inverted index so projects with disjoint feature sets
    /// are never compared.
    pub fn candidate_pairs(&self, snapshot: &[ProjectRecord]) -> Vec<(usize, usize)> {
        let mut postings: HashMap<(u8, &str), Vec<usize>> = HashMap::new();
        for (i, rec) in snapshot.iter().enumerate() {
            let Some(meta) = rec.metadata.as_ref().filter(|_| rec.is_analyzable()) else {
                continue;
            };
            for p in &meta.plugins {
                postings.entry((0, p.as_str())).or_default().push(i);
            }
            for d in &meta.devices {
                postings.entry((1, d.as_str())).or_default().push(i);
            }
        }
        let mut pairs = HashSet::new();
        for list in postings.values() {
            for (n, &i) in list.iter().enumerate() {
                for &j in &list[n + 1..] {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
        let mut pairs: Vec<_> = pairs.into_iter().collect();
        pairs.sort_unstable();
        pairs
    }

    /// Duplicate clusters: byte-identical projects plus pairs scoring at
    /// least the duplicate threshold, merged transitively.
    pub fn duplicates(&self, snapshot: &[ProjectRecord]) -> Vec<DuplicateCluster> {
        let mut uf = UnionFind::new(snapshot.len());
        let mut edges: BTreeMap<(usize, usize), ClusterEdge> = BTreeMap::new();

        let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, rec) in snapshot.iter().enumerate() {
            if rec.is_analyzable() && !rec.content_hash.is_empty() {
                by_hash.entry(rec.content_hash.as_str()).or_default().push(i);
            }
        }
        for group in by_hash.values() {
            for w in group.windows(2) {
                let (i, j) = (w[0], w[1]);
                uf.union(i, j);
                edges.insert(
                    (i.min(j), i.max(j)),
                    ClusterEdge {
                        pair: PairKey::new(snapshot[i].id, snapshot[j].id),
                        score: 1.0,
                        same_content: true,
                    },
                );
            }
        }

        for (i, j) in self.candidate_pairs(snapshot) {
            if edges.contains_key(&(i, j)) {
                continue;
            }
            let Some(s) = self.score(&snapshot[i], &snapshot[j]) else {
                continue;
            };
            if s.score >= self.params.duplicate_threshold {
                uf.union(i, j);
                edges.insert(
                    (i, j),
                    ClusterEdge {
                        pair: s.pair,
                        score: s.score,
                        same_content: snapshot[i].content_hash == snapshot[j].content_hash,
                    },
                );
            }
        }

        let mut clusters: Vec<DuplicateCluster> = uf
            .groups()
            .into_iter()
            .map(|group| {
                let ids: HashSet<usize> = group.iter().copied().collect();
                let mut members: Vec<ClusterMember> = group
                    .iter()
                    .map(|&i| ClusterMember {
                        id: snapshot[i].id,
                        path: snapshot[i].path.clone(),
                        content_hash: snapshot[i].content_hash.clone(),
                    })
                    .collect();
                members.sort_by(|a, b| a.path.cmp(&b.path));
                let first_hash = &members[0].content_hash;
                let kind = if members.iter().all(|m| &m.content_hash == first_hash) {
                    ClusterKind::Exact
                } else {
                    ClusterKind::Near
                };
                let cluster_edges = edges
                    .iter()
                    .filter(|((i, j), _)| ids.contains(i) && ids.contains(j))
                    .map(|(_, e)| e.clone())
                    .collect();
                DuplicateCluster {
                    kind,
                    members,
                    edges: cluster_edges,
                }
            })
            .collect();
        clusters.sort_by(|a, b| a.members[0].path.cmp(&b.members[0].path));
        clusters
    }
}

fn rank_order(a: &SimilarMatch, b: &SimilarMatch) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.mtime.cmp(&a.mtime))
        .then_with(|| a.project_id.cmp(&b.project_id))
}
