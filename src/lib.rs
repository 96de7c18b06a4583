//! # liveset-index
//!
//! A local-first indexer for Ableton Live sets.
//!
//! liveset-index walks configured locations, decodes every `.als`
//! container into structured metadata, and keeps a SQLite index
//! consistent with the filesystem through full scans and live watch
//! events. From the indexed metadata it derives duplicate clusters,
//! nearest-neighbour similarity, and links between projects and their
//! rendered audio exports.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────┐
//! │ Scan/Watch  │──▶│ Indexer          │──▶│  SQLite   │
//! │ walkdir/    │   │ fingerprint,     │   │ projects, │
//! │ notify      │   │ decode, commit   │   │ exports   │
//! └─────────────┘   └──────────────────┘   └────┬─────┘
//!                                               │
//!                  ┌────────────────────────────┤
//!                  ▼                            ▼
//!          ┌───────────────┐             ┌──────────┐
//!          │ Linker,       │             │ CLI/HTTP │
//!          │ Similarity    │             │ (lsi)    │
//!          └───────────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lsi init                       # create database, register locations
//! lsi scan                       # index every active location
//! lsi duplicates                 # byte-identical and near-identical sets
//! lsi similar <id> --k 5         # nearest projects
//! lsi watch                      # keep the index live
//! lsi serve                      # read-only HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`indexer`] | Reconciliation pipeline and the `Indexer` handle |
//! | [`fingerprint`] | Stat/hash fingerprints and their cache |
//! | [`filters`] | Exclude rules applied before any hashing |
//! | [`scan`] | Full scans of locations |
//! | [`watch`] | Live change watching |
//! | [`linker`] | Export candidate collection and linking |
//! | [`markers`] | Timeline marker export as text or CSV |
//! | [`analysis`] | Similarity pass, `similar`, `duplicates` |
//! | [`server`] | HTTP API |
//! | [`store`] | SQLite store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analysis;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod fingerprint;
pub mod get;
pub mod indexer;
pub mod linker;
pub mod logging;
pub mod markers;
pub mod migrate;
pub mod progress;
pub mod scan;
pub mod server;
pub mod stats;
pub mod store;
pub mod watch;

pub use liveset_core as core;
