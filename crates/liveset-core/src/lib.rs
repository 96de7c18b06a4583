//! # liveset-core
//!
//! Runtime-free logic shared by the indexer: the project data model, the
//! container decoder, composite similarity scoring with duplicate
//! clustering, export-to-project name matching, and the store abstraction.
//!
//! This crate contains no tokio, sqlx, or filesystem walking. Every
//! function here takes bytes or records and returns records, so the same
//! code paths serve full scans, watch events, and tests.

pub mod decoder;
pub mod linking;
pub mod models;
pub mod similarity;
pub mod store;
