//! File fingerprints and the in-memory fingerprint cache.
//!
//! A fingerprint is `(size, mtime, sha256)`. The cheap `(size, mtime)`
//! comparison guards the hash: content is only read when the stat moved or
//! the path is unknown. The cache is derived from the store at open time
//! and is never authoritative on its own.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::RwLock;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use liveset_core::models::{Fingerprint, ProjectId, ProjectRecord, ProjectStatus};

use crate::error::{IndexError, IndexResult};

const HASH_BUF: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Nanoseconds since the Unix epoch.
    pub mtime: i64,
}

pub fn stat(path: &Path) -> IndexResult<FileStat> {
    let meta = std::fs::metadata(path).map_err(|e| IndexError::io(path, e))?;
    if !meta.is_file() {
        return Err(IndexError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a regular file"),
        ));
    }
    let mtime = meta
        .modified()
        .ok()
        .map(|t| match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            Err(e) => -(e.duration().as_nanos() as i64),
        })
        .unwrap_or(0);
    Ok(FileStat {
        size: meta.len(),
        mtime,
    })
}

/// Streams the file through SHA-256 and returns the lowercase hex digest.
pub fn hash_file(path: &Path) -> IndexResult<String> {
    let mut file = File::open(path).map_err(|e| IndexError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF];
    loop {
        let n = file.read(&mut buf).map_err(|e| IndexError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Result of [`hash_stable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableHash {
    pub stat: FileStat,
    pub content_hash: String,
    /// The file kept changing across the retry.
    pub raced: bool,
}

/// Hashes `path` and re-stats it afterwards. When the stat moved during the
/// read the file is hashed once more; if it moved again the second hash is
/// returned with `raced` set.
pub fn hash_stable(path: &Path, before: FileStat) -> IndexResult<StableHash> {
    let first = hash_file(path)?;
    let after = stat(path)?;
    if after == before {
        return Ok(StableHash {
            stat: after,
            content_hash: first,
            raced: false,
        });
    }

    let second = hash_file(path)?;
    let settled = stat(path)?;
    Ok(StableHash {
        stat: settled,
        content_hash: second,
        raced: settled != after,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: ProjectId,
    pub fingerprint: Fingerprint,
    pub status: ProjectStatus,
}

/// What the cache says about a freshly stat'ed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatCheck {
    Unknown,
    /// Same `(size, mtime)` as the last commit.
    Unchanged(IndexEntry),
    /// Known path whose stat moved, or a MISSING record that reappeared.
    Moved(IndexEntry),
}

/// Path → fingerprint cache shared by every reconcile trigger.
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ProjectRecord>) -> Self {
        let index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    pub fn check(&self, path: &str, stat: FileStat) -> StatCheck {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        match entries.get(path) {
            None => StatCheck::Unknown,
            Some(entry)
                if entry.status != ProjectStatus::Missing
                    && entry.fingerprint.same_stat(stat.size, stat.mtime) =>
            {
                StatCheck::Unchanged(entry.clone())
            }
            Some(entry) => StatCheck::Moved(entry.clone()),
        }
    }

    pub fn get(&self, path: &str) -> Option<IndexEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(path).cloned()
    }

    pub fn insert(&self, record: &ProjectRecord) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|path, entry| entry.id != record.id || *path == record.path);
        entries.insert(
            record.path.clone(),
            IndexEntry {
                id: record.id,
                fingerprint: record.fingerprint(),
                status: record.status,
            },
        );
    }

    pub fn remove(&self, path: &str) -> Option<IndexEntry> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(path: &str, size: u64, mtime: i64, status: ProjectStatus) -> ProjectRecord {
        ProjectRecord {
            id: Uuid::new_v4(),
            path: path.to_string(),
            name: "Song".to_string(),
            location_id: None,
            content_hash: "abc".to_string(),
            size,
            mtime,
            status,
            metadata: None,
            parse_error: None,
            export_song_name: None,
            first_seen: Utc::now(),
            last_scanned: Utc::now(),
            last_parsed: None,
        }
    }

    #[test]
    fn hash_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.als");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn stable_hash_on_quiet_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.als");
        std::fs::write(&path, b"hello").unwrap();
        let before = stat(&path).unwrap();
        let h = hash_stable(&path, before).unwrap();
        assert!(!h.raced);
        assert_eq!(h.stat, before);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = stat(Path::new("/definitely/not/here.als")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn check_classifies_paths() {
        let active = record("/m/a.als", 10, 5, ProjectStatus::Active);
        let missing = record("/m/b.als", 10, 5, ProjectStatus::Missing);
        let index = FingerprintIndex::from_records([&active, &missing]);

        assert_eq!(
            index.check("/m/new.als", FileStat { size: 1, mtime: 1 }),
            StatCheck::Unknown
        );
        assert!(matches!(
            index.check("/m/a.als", FileStat { size: 10, mtime: 5 }),
            StatCheck::Unchanged(_)
        ));
        assert!(matches!(
            index.check("/m/a.als", FileStat { size: 11, mtime: 5 }),
            StatCheck::Moved(_)
        ));
        assert!(matches!(
            index.check("/m/b.als", FileStat { size: 10, mtime: 5 }),
            StatCheck::Moved(_)
        ));
    }

    #[test]
    fn insert_drops_old_path_of_moved_record() {
        let mut rec = record("/m/old.als", 1, 1, ProjectStatus::Active);
        let index = FingerprintIndex::from_records([&rec]);
        rec.path = "/m/new.als".to_string();
        index.insert(&rec);
        assert!(index.get("/m/old.als").is_none());
        assert_eq!(index.get("/m/new.als").map(|e| e.id), Some(rec.id));
        assert_eq!(index.len(), 1);
    }
}
