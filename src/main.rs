//! # liveset-index CLI (`lsi`)
//!
//! The `lsi` binary indexes Ableton Live sets found under the configured
//! locations and answers questions about them: what changed, which sets
//! are duplicates, which sets resemble each other, and which rendered
//! audio files belong to which project.
//!
//! ## Usage
//!
//! ```bash
//! lsi --config ./config/lsi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lsi init` | Create the database and register configured locations |
//! | `lsi locations` | List registered locations |
//! | `lsi scan` | Reconcile every active location with the filesystem |
//! | `lsi rescan <path>` | Reconcile a single file |
//! | `lsi watch` | Keep the index live from filesystem events |
//! | `lsi get <id\|path>` | Show one project with its metadata and exports |
//! | `lsi markers <id\|path>` | Export a project's timeline markers |
//! | `lsi list` | List indexed projects |
//! | `lsi similar <id>` | Nearest projects by weighted similarity |
//! | `lsi duplicates` | Exact and near-duplicate clusters |
//! | `lsi exports` | List exports and their links |
//! | `lsi link` | Recompute export links |
//! | `lsi set-export-name <id> [name]` | Set or clear a project's export alias |
//! | `lsi purge <path>` | Remove a MISSING record |
//! | `lsi stats` | Index overview |
//! | `lsi serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! lsi init --config ./config/lsi.toml
//! lsi scan --progress human
//! lsi similar 0d6f6c1e-8f0e-4a3e-9a57-5d1c1b0c7a11 --k 5 --min-score 0.4
//! lsi exports --orphans --json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use liveset_index::indexer::Indexer;
use liveset_index::markers::{self, MarkerFormat};
use liveset_index::progress::ProgressMode;
use liveset_index::{commands, config, get, logging, server, stats};

/// liveset-index: a local-first indexer for Ableton Live sets.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lsi.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lsi",
    about = "liveset-index: a local-first indexer for Ableton Live sets",
    version,
    long_about = "liveset-index keeps a SQLite index of Ableton Live sets consistent with the \
    filesystem, decodes their metadata, finds duplicates and similar projects, and links \
    rendered audio exports back to the projects that produced them."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lsi.toml`. Locations, scanning, similarity,
    /// export, watch and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/lsi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and register locations.
    ///
    /// Idempotent: running it again only re-syncs the location table
    /// with the config file.
    Init,

    /// List registered locations.
    Locations {
        #[arg(long)]
        json: bool,
    },

    /// Reconcile active locations with the filesystem.
    ///
    /// Walks each location, fingerprints every `.als` file, decodes the
    /// ones whose content changed, marks vanished files MISSING, relinks
    /// exports and refreshes similarity scores. Ctrl-C stops the scan
    /// without marking anything missing.
    Scan {
        /// Only scan the location with this name.
        #[arg(long)]
        location: Option<String>,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        #[arg(long)]
        json: bool,
    },

    /// Reconcile a single path.
    Rescan {
        path: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Watch active locations and apply changes as they happen.
    Watch,

    /// Show a project by id or path.
    Get {
        /// Project UUID or file path.
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Export a project's timeline markers as text or CSV.
    ///
    /// Times are wall-clock offsets that follow tempo automation.
    Markers {
        /// Project UUID or file path.
        id: String,

        #[arg(long, value_enum, default_value = "text")]
        format: MarkerFormat,

        /// Write to this file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// List indexed projects.
    List {
        /// Filter by status: ACTIVE, MISSING, PARSE_FAILED, BACKUP.
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Find the projects most similar to one project.
    Similar {
        /// Project UUID.
        id: String,

        /// Maximum number of results (default from config).
        #[arg(long)]
        k: Option<usize>,

        /// Minimum composite score in [0, 1] (default from config).
        #[arg(long)]
        min_score: Option<f64>,

        #[arg(long)]
        json: bool,
    },

    /// List exact and near-duplicate clusters.
    Duplicates {
        #[arg(long)]
        json: bool,
    },

    /// List audio exports and the projects they are linked to.
    Exports {
        /// Only exports without a project.
        #[arg(long)]
        orphans: bool,

        #[arg(long)]
        json: bool,
    },

    /// Recompute export links.
    Link {
        /// Only relink the location with this name.
        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Set the song name a project's exports are rendered under.
    ///
    /// Omit the name to clear the alias.
    SetExportName {
        /// Project UUID.
        id: String,
        name: Option<String>,
    },

    /// Remove a MISSING record and everything derived from it.
    Purge { path: PathBuf },

    /// Show index statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP API (and the watcher, when enabled in config).
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    if let Commands::Init = cli.command {
        return commands::run_init(&cfg).await;
    }

    let indexer = Indexer::open(&cfg).await?;

    match cli.command {
        Commands::Init => {
            // Handled above
            unreachable!()
        }
        Commands::Locations { json } => {
            commands::run_locations(&indexer, json).await?;
        }
        Commands::Scan {
            location,
            progress,
            json,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            commands::run_scan(&indexer, location.as_deref(), progress, json).await?;
        }
        Commands::Rescan { path, json } => {
            commands::run_rescan(&indexer, &path, json).await?;
        }
        Commands::Watch => {
            commands::run_watch(&indexer).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&indexer, &id, json).await?;
        }
        Commands::Markers { id, format, output } => {
            markers::run_markers(&indexer, &id, format, output.as_deref()).await?;
        }
        Commands::List { status, json } => {
            commands::run_list(&indexer, status.as_deref(), json).await?;
        }
        Commands::Similar {
            id,
            k,
            min_score,
            json,
        } => {
            commands::run_similar(&indexer, &id, k, min_score, json).await?;
        }
        Commands::Duplicates { json } => {
            commands::run_duplicates(&indexer, json).await?;
        }
        Commands::Exports { orphans, json } => {
            commands::run_exports(&indexer, orphans, json).await?;
        }
        Commands::Link { location, json } => {
            commands::run_link(&indexer, location.as_deref(), json).await?;
        }
        Commands::SetExportName { id, name } => {
            commands::run_set_export_name(&indexer, &id, name.as_deref()).await?;
        }
        Commands::Purge { path } => {
            commands::run_purge(&indexer, &path).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&indexer, json).await?;
        }
        Commands::Serve => {
            server::run_server(indexer).await?;
        }
    }

    Ok(())
}
