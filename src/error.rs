//! Per-file failure taxonomy of the indexing pipeline.
//!
//! None of these abort a batch: the reconciler maps each one to a record
//! state (`PARSE_FAILED`, Removed, Changed) and a summary counter.

use std::path::PathBuf;

use liveset_core::decoder::FormatError;
use liveset_core::models::{LocationId, ProjectId};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The container could not be opened; the record becomes PARSE_FAILED.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// The file vanished or became unreadable mid-read; treated as Removed
    /// for this cycle and retried on the next one.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Content kept changing between stat and hash after one retry.
    #[error("file changed while hashing: {path}")]
    HashRace { path: PathBuf },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for a missing file, which the reconciler treats as Removed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// A request naming something the index does not hold, or a path it does
/// not cover. The HTTP layer maps these to client errors.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("no project with id {0}")]
    UnknownProject(ProjectId),

    #[error("no location with id {0}")]
    UnknownLocation(LocationId),

    #[error("location '{0}' is not active")]
    InactiveLocation(String),

    #[error("{} is not under an active location", .0.display())]
    OutsideLocations(PathBuf),
}

impl LookupError {
    /// True when the named entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LookupError::UnknownProject(_) | LookupError::UnknownLocation(_)
        )
    }
}
