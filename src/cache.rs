//! Thumbnail cache for incremental builds.
//!
//! Decoding and re-encoding a catalog's worth of stamp scans takes minutes,
//! while the images themselves change rarely. This module remembers which
//! thumbnail was derived from which source content, so the thumbnail
//! pipeline only renders images it has never seen before.
//!
//! # Design
//!
//! The cache is **content-addressed** twice over:
//!
//! - **Lookup key**: SHA-256 of the source file bytes. Content-based rather
//!   than mtime-based so it survives `git checkout` (which resets
//!   modification times) and file renames.
//! - **Derived name**: SHA-256 of the encoded thumbnail bytes plus `.jpg`.
//!   The published file name changes exactly when the published bytes do,
//!   which makes the output safe to serve with long-lived HTTP caching.
//!
//! Two indices cover the same set of entries:
//!
//! ```text
//! by_checksum:    source checksum → entry          (unique)
//! by_source_name: source file name → checksum      (many names per entry)
//! ```
//!
//! One entry may be referenced by several source names when the data
//! repository contains duplicate scans. An entry may also have no names at
//! all; it stays reachable by checksum until the next GC pass.
//!
//! ## Concurrency
//!
//! The thumbnail pipeline shares one cache between all workers. Both indices
//! live behind a single [`RwLock`]: lookups take the read lock, [`add`] and
//! [`remove_stale`] the write lock, so a name is never visible in one index
//! but not the other.
//!
//! ## Storage
//!
//! The cache is a flat JSON list at `<thumbnail_dir>/_metadata.json`. The
//! indices are rebuilt on load. Saving writes a temporary file and renames it
//! over the old one, so a crash mid-save leaves the previous snapshot intact.
//!
//! [`add`]: ThumbnailCache::add
//! [`remove_stale`]: ThumbnailCache::remove_stale

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Name of the cache metadata file within the thumbnail directory.
///
/// Reserved: never garbage-collected and never published.
pub const METADATA_FILENAME: &str = "_metadata.json";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("cache metadata {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cache metadata not found in {0}")]
    Missing(PathBuf),
}

/// One piece of visual content and the thumbnail derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Source file names currently carrying this content.
    #[serde(rename = "srcNames", default)]
    pub source_names: BTreeSet<String>,
    /// SHA-256 of the source bytes.
    #[serde(rename = "srcChecksum")]
    pub source_checksum: String,
    /// File name of the derived thumbnail in the thumbnail directory.
    #[serde(rename = "dstName")]
    pub derived_name: String,
}

#[derive(Debug, Default)]
struct Indices {
    by_checksum: HashMap<String, CacheEntry>,
    by_source_name: HashMap<String, String>,
}

impl Indices {
    /// Detach `name` from whatever entry owns it.
    fn forget_source_name(&mut self, name: &str) -> bool {
        let Some(checksum) = self.by_source_name.remove(name) else {
            return false;
        };
        if let Some(entry) = self.by_checksum.get_mut(&checksum) {
            entry.source_names.remove(name);
        }
        true
    }
}

/// Shared, lock-guarded thumbnail cache.
#[derive(Debug, Default)]
pub struct ThumbnailCache {
    indices: RwLock<Indices>,
}

impl ThumbnailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from persisted entries, rebuilding both indices.
    ///
    /// If two entries claim the same source name, the later one wins.
    pub fn from_entries(entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        let cache = Self::new();
        for entry in entries {
            let CacheEntry {
                source_names,
                source_checksum,
                derived_name,
            } = entry;
            cache.insert_entry(&source_checksum, &derived_name);
            for name in source_names {
                cache.add(&name, &source_checksum, &derived_name);
            }
        }
        cache
    }

    /// Load the cache from `dir`.
    ///
    /// A missing metadata file yields an empty cache unless `require` is set.
    /// A corrupt file is always an error: silently starting over would
    /// re-render every thumbnail and make every published name look new.
    pub fn load(dir: &Path, require: bool) -> Result<Self, CacheError> {
        let path = metadata_path(dir);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if require {
                    return Err(CacheError::Missing(dir.to_path_buf()));
                }
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let entries: Vec<CacheEntry> =
            serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
                path: path.clone(),
                source,
            })?;
        Ok(Self::from_entries(entries))
    }

    /// Persist a snapshot of the cache into `dir`, atomically.
    pub fn save(&self, dir: &Path) -> Result<(), CacheError> {
        let path = metadata_path(dir);
        let tmp_path = dir.join(format!("{METADATA_FILENAME}.tmp"));
        let json = serde_json::to_vec_pretty(&self.entries()).map_err(io::Error::from)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Record that `source_name` currently has content `source_checksum`,
    /// whose thumbnail is `derived_name`.
    ///
    /// If an entry for the checksum already exists the name is attached to
    /// it and `derived_name` is ignored; the first derivation wins.
    pub fn add(&self, source_name: &str, source_checksum: &str, derived_name: &str) {
        let mut indices = self.write();
        indices.forget_source_name(source_name);

        let Indices {
            by_checksum,
            by_source_name,
        } = &mut *indices;
        let entry = by_checksum
            .entry(source_checksum.to_string())
            .or_insert_with(|| CacheEntry {
                source_names: BTreeSet::new(),
                source_checksum: source_checksum.to_string(),
                derived_name: derived_name.to_string(),
            });
        entry.source_names.insert(source_name.to_string());
        by_source_name.insert(source_name.to_string(), source_checksum.to_string());
    }

    /// Point an existing entry at a different derived file.
    ///
    /// Used when the recorded thumbnail vanished from disk and had to be
    /// rendered again. Does nothing for unknown checksums.
    pub fn set_derived_name(&self, source_checksum: &str, derived_name: &str) {
        if let Some(entry) = self.write().by_checksum.get_mut(source_checksum) {
            entry.derived_name = derived_name.to_string();
        }
    }

    fn insert_entry(&self, source_checksum: &str, derived_name: &str) {
        self.write()
            .by_checksum
            .entry(source_checksum.to_string())
            .or_insert_with(|| CacheEntry {
                source_names: BTreeSet::new(),
                source_checksum: source_checksum.to_string(),
                derived_name: derived_name.to_string(),
            });
    }

    pub fn find_by_checksum(&self, checksum: &str) -> Option<CacheEntry> {
        self.read().by_checksum.get(checksum).cloned()
    }

    pub fn find_by_source_name(&self, name: &str) -> Option<CacheEntry> {
        let indices = self.read();
        let checksum = indices.by_source_name.get(name)?;
        indices.by_checksum.get(checksum).cloned()
    }

    /// Forget every source name not in `valid_source_names` and every entry
    /// whose checksum is not in `valid_checksums`.
    ///
    /// Returns `true` if anything was removed.
    pub fn remove_stale(
        &self,
        valid_source_names: &HashSet<String>,
        valid_checksums: &HashSet<String>,
    ) -> bool {
        let mut indices = self.write();
        let mut changed = false;

        let stale_names: Vec<String> = indices
            .by_source_name
            .keys()
            .filter(|name| !valid_source_names.contains(*name))
            .cloned()
            .collect();
        for name in stale_names {
            changed |= indices.forget_source_name(&name);
        }

        let stale_checksums: Vec<String> = indices
            .by_checksum
            .keys()
            .filter(|checksum| !valid_checksums.contains(*checksum))
            .cloned()
            .collect();
        for checksum in stale_checksums {
            if let Some(entry) = indices.by_checksum.remove(&checksum) {
                for name in &entry.source_names {
                    indices.by_source_name.remove(name);
                }
                changed = true;
            }
        }

        changed
    }

    /// Snapshot of all entries, ordered by checksum.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.read().by_checksum.values().cloned().collect();
        entries.sort_by(|a, b| a.source_checksum.cmp(&b.source_checksum));
        entries
    }

    /// Names of all derived files the cache still references.
    pub fn derived_names(&self) -> HashSet<String> {
        self.read()
            .by_checksum
            .values()
            .map(|entry| entry.derived_name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_checksum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panicking worker cannot leave the indices half-updated (every
    // mutation completes before the guard drops), so a poisoned lock is safe
    // to keep using.
    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// SHA-256 of a byte blob, as lowercase hex.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Resolve the cache metadata path for a thumbnail directory.
pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILENAME)
}

/// Summary of cache performance for one pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Source already cached under its current name.
    pub hits: u32,
    /// Content already cached, name newly attached (rename or duplicate).
    pub linked: u32,
    /// Thumbnail rendered from scratch.
    pub rendered: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn link(&mut self) {
        self.linked += 1;
    }

    pub fn render(&mut self) {
        self.rendered += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.linked + self.rendered
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 || self.linked > 0 {
            if self.linked > 0 {
                write!(
                    f,
                    "{} cached, {} linked, {} rendered ({} total)",
                    self.hits,
                    self.linked,
                    self.rendered,
                    self.total()
                )
            } else {
                write!(
                    f,
                    "{} cached, {} rendered ({} total)",
                    self.hits,
                    self.rendered,
                    self.total()
                )
            }
        } else {
            write!(f, "{} rendered", self.rendered)
        }
    }
}
