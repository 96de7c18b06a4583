//! Path classification applied before any file I/O.
//!
//! Patterns are matched against the path relative to the location root,
//! the same way for full scans and watch events.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};

use crate::config::{ScanConfig, BACKUP_GLOBS, DEFAULT_EXCLUDES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// A project container to fingerprint and decode.
    Index,
    /// A container inside a backup folder: fingerprinted, recorded as BACKUP.
    Backup,
    /// Never touched.
    Excluded,
}

#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    excludes: GlobSet,
    backups: GlobSet,
    skip_hidden: bool,
    index_backups: bool,
    extensions: Vec<String>,
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

impl PathFilter {
    pub fn new(root: &Path, location_globs: &[String], scan: &ScanConfig) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(scan.exclude_globs.iter().cloned());
        excludes.extend(location_globs.iter().cloned());
        let backups: Vec<String> = BACKUP_GLOBS.iter().map(|s| s.to_string()).collect();

        Ok(Self {
            root: root.to_path_buf(),
            excludes: build_globset(&excludes)?,
            backups: build_globset(&backups)?,
            skip_hidden: scan.skip_hidden,
            index_backups: scan.index_backups,
            extensions: scan.extensions.iter().map(|e| e.to_lowercase()).collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }

    fn is_hidden(rel: &Path) -> bool {
        rel.components().any(|c| match c {
            Component::Normal(s) => s.to_string_lossy().starts_with('.'),
            _ => false,
        })
    }

    /// Whether a directory should be descended into during a walk.
    pub fn descend(&self, dir: &Path) -> bool {
        let Some(rel) = self.relative(dir) else {
            return false;
        };
        if rel.as_os_str().is_empty() {
            return true;
        }
        !(self.skip_hidden && Self::is_hidden(rel))
    }

    pub fn has_container_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|e| self.extensions.iter().any(|x| *x == e))
    }

    pub fn classify(&self, path: &Path) -> PathClass {
        let Some(rel) = self.relative(path) else {
            return PathClass::Excluded;
        };
        if !self.has_container_extension(path) {
            return PathClass::Excluded;
        }
        if self.skip_hidden && Self::is_hidden(rel) {
            return PathClass::Excluded;
        }
        let rel_str = rel.to_string_lossy();
        if self.excludes.is_match(rel_str.as_ref()) {
            return PathClass::Excluded;
        }
        if self.backups.is_match(rel_str.as_ref()) {
            return if self.index_backups {
                PathClass::Backup
            } else {
                PathClass::Excluded
            };
        }
        PathClass::Index
    }
}
