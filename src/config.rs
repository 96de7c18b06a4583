//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] parses and validates in one step so commands can
//! assume a consistent configuration.

use anyhow::{Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use liveset_core::similarity::{SimilarityParams, SimilarityWeights};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub exports: ExportsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocationConfig {
    pub name: String,
    pub root: PathBuf,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_parse_workers")]
    pub parse_workers: usize,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub skip_hidden: bool,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Record files under backup folders with status BACKUP instead of
    /// skipping them.
    #[serde(default)]
    pub index_backups: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            parse_workers: default_parse_workers(),
            follow_symlinks: false,
            exclude_globs: Vec::new(),
            skip_hidden: true,
            extensions: default_extensions(),
            index_backups: false,
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_parse_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_extensions() -> Vec<String> {
    vec!["als".to_string()]
}

/// Patterns excluded in every location, before any configured globs.
pub const DEFAULT_EXCLUDES: [&str; 3] = [
    "**/.git/**",
    "**/Ableton Project Info/**",
    "**/node_modules/**",
];

/// Folders holding the automatic copies Live writes on every save.
pub const BACKUP_GLOBS: [&str; 1] = ["**/Backup/**"];

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RenamePolicy {
    /// A rename is a Removed old path plus an Added new path.
    DeleteAdd,
    /// A Removed and an Added path with the same hash inside the move
    /// window become one moved record.
    HashMove,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MoveTieBreak {
    /// Several candidates share the hash: fall back to delete + add.
    Skip,
    /// Pick the candidate whose path shares the longest prefix.
    NearestPath,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_rename_policy")]
    pub rename_policy: RenamePolicy,
    #[serde(default = "default_move_window_ms")]
    pub move_window_ms: u64,
    #[serde(default = "default_move_tie_break")]
    pub move_tie_break: MoveTieBreak,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            queue_capacity: default_queue_capacity(),
            debounce_ms: default_debounce_ms(),
            rename_policy: default_rename_policy(),
            move_window_ms: default_move_window_ms(),
            move_tie_break: default_move_tie_break(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_rename_policy() -> RenamePolicy {
    RenamePolicy::DeleteAdd
}
fn default_move_window_ms() -> u64 {
    2000
}
fn default_move_tie_break() -> MoveTieBreak {
    MoveTieBreak::Skip
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimilarityConfig {
    #[serde(default = "default_tempo_tolerance")]
    pub tempo_tolerance: f64,
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default)]
    pub default_min_score: f64,
    #[serde(default)]
    pub weights: WeightsConfig,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            tempo_tolerance: default_tempo_tolerance(),
            duplicate_threshold: default_duplicate_threshold(),
            default_k: default_k(),
            default_min_score: 0.0,
            weights: WeightsConfig::default(),
        }
    }
}

impl SimilarityConfig {
    pub fn params(&self) -> SimilarityParams {
        SimilarityParams {
            weights: SimilarityWeights {
                plugins: self.weights.plugins,
                devices: self.weights.devices,
                tempo: self.weights.tempo,
                tracks: self.weights.tracks,
            },
            tempo_tolerance: self.tempo_tolerance,
            duplicate_threshold: self.duplicate_threshold,
        }
    }
}

fn default_tempo_tolerance() -> f64 {
    20.0
}
fn default_duplicate_threshold() -> f64 {
    0.85
}
fn default_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeightsConfig {
    #[serde(default = "default_set_weight")]
    pub plugins: f64,
    #[serde(default = "default_set_weight")]
    pub devices: f64,
    #[serde(default = "default_scalar_weight")]
    pub tempo: f64,
    #[serde(default = "default_scalar_weight")]
    pub tracks: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            plugins: default_set_weight(),
            devices: default_set_weight(),
            tempo: default_scalar_weight(),
            tracks: default_scalar_weight(),
        }
    }
}

fn default_set_weight() -> f64 {
    0.3
}
fn default_scalar_weight() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportsConfig {
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default = "default_audio_extensions")]
    pub audio_extensions: Vec<String>,
    #[serde(default = "default_project_subfolders")]
    pub project_subfolders: Vec<String>,
    #[serde(default = "default_location_subfolders")]
    pub location_subfolders: Vec<String>,
}

impl Default for ExportsConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            audio_extensions: default_audio_extensions(),
            project_subfolders: default_project_subfolders(),
            location_subfolders: default_location_subfolders(),
        }
    }
}

fn default_fuzzy_threshold() -> f64 {
    liveset_core::linking::DEFAULT_FUZZY_THRESHOLD
}
fn default_audio_extensions() -> Vec<String> {
    ["wav", "aif", "aiff", "flac", "mp3", "ogg", "m4a"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_project_subfolders() -> Vec<String> {
    ["Exports", "Renders", "Bounces", "Audio", "Mixdowns"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_location_subfolders() -> Vec<String> {
    ["Exports", "Renders", "Bounces", "Mixdowns"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    if config.scan.workers == 0 {
        anyhow::bail!("scan.workers must be >= 1");
    }
    if config.scan.parse_workers == 0 {
        anyhow::bail!("scan.parse_workers must be >= 1");
    }
    if config.scan.extensions.is_empty() {
        anyhow::bail!("scan.extensions must list at least one extension");
    }
    if config.watch.queue_capacity == 0 {
        anyhow::bail!("watch.queue_capacity must be >= 1");
    }

    let sim = &config.similarity;
    if sim.tempo_tolerance <= 0.0 {
        anyhow::bail!("similarity.tempo_tolerance must be > 0");
    }
    if !(0.0..=1.0).contains(&sim.duplicate_threshold) {
        anyhow::bail!("similarity.duplicate_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&sim.default_min_score) {
        anyhow::bail!("similarity.default_min_score must be in [0.0, 1.0]");
    }
    let w = &sim.weights;
    if [w.plugins, w.devices, w.tempo, w.tracks].iter().any(|v| *v < 0.0) {
        anyhow::bail!("similarity.weights must be non-negative");
    }
    let sum = w.plugins + w.devices + w.tempo + w.tracks;
    if (sum - 1.0).abs() > 1e-6 {
        anyhow::bail!("similarity.weights must sum to 1.0 (got {})", sum);
    }

    if !(0.0..=1.0).contains(&config.exports.fuzzy_threshold) {
        anyhow::bail!("exports.fuzzy_threshold must be in [0.0, 1.0]");
    }

    let mut roots = HashSet::new();
    for loc in &config.locations {
        if !roots.insert(loc.root.clone()) {
            anyhow::bail!("location root listed twice: {}", loc.root.display());
        }
        for g in &loc.exclude_globs {
            Glob::new(g).with_context(|| format!("Invalid exclude glob in location '{}': {}", loc.name, g))?;
        }
    }
    for g in &config.scan.exclude_globs {
        Glob::new(g).with_context(|| format!("Invalid scan.exclude_globs pattern: {}", g))?;
    }

    Ok(())
}
