//! FR-016: Version list cache — TTL-bounded, one JSON file per source.
//!
//! Entries live in `cache/versions/<sha256(source)[..16]>.json`. A corrupt or
//! unreadable entry is a miss. Concurrent writers race; the last rename wins.

use super::cancel::CancelToken;
use super::error::Error;
use super::types::{VersionCacheInfo, VersionInfo};
use super::version::{VersionLister, VersionResolver};
use crate::tripwire::hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Time source, replaceable in tests.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    versions: Vec<String>,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    source: String,
}

/// Where a version list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Network,
    Cache,
    /// Refresh failed; a still-valid cache entry was served instead.
    StaleFallback,
}

/// Caching wrapper around any [`VersionLister`].
pub struct CachedVersionLister<'a> {
    inner: &'a dyn VersionLister,
    dir: PathBuf,
    ttl: Duration,
    clock: Box<dyn Clock + 'a>,
}

impl<'a> CachedVersionLister<'a> {
    pub fn new(inner: &'a dyn VersionLister, dir: &Path, ttl: Duration) -> Self {
        Self {
            inner,
            dir: dir.to_path_buf(),
            ttl,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// `<dir>/<first 16 hex of sha256(source)>.json`
    pub fn cache_path(&self) -> PathBuf {
        cache_file_for(&self.dir, &self.inner.source_description())
    }

    fn read_entry(&self) -> Option<CacheEntry> {
        let path = self.cache_path();
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt version cache entry");
                None
            }
        }
    }

    fn write_entry(&self, versions: &[String]) {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1));
        let entry = CacheEntry {
            versions: versions.to_vec(),
            cached_at: now,
            expires_at: now + ttl,
            source: self.inner.source_description(),
        };
        if let Err(e) = write_atomic(&self.cache_path(), &entry) {
            tracing::warn!(error = %e, "cannot write version cache");
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.clock.now() < entry.expires_at
    }

    /// Versions, served from cache while fresh.
    pub fn list_with_origin(&self, cancel: &CancelToken) -> Result<(Vec<String>, Origin), Error> {
        if let Some(entry) = self.read_entry().filter(|e| self.is_fresh(e)) {
            tracing::debug!(source = %entry.source, "version cache hit");
            return Ok((entry.versions, Origin::Cache));
        }
        let versions = self.inner.list_versions(cancel)?;
        self.write_entry(&versions);
        Ok((versions, Origin::Network))
    }

    /// Fetch unconditionally and overwrite the entry. A failed fetch falls
    /// back to a still-valid entry.
    pub fn refresh(&self, cancel: &CancelToken) -> Result<(Vec<String>, Origin), Error> {
        match self.inner.list_versions(cancel) {
            Ok(versions) => {
                self.write_entry(&versions);
                Ok((versions, Origin::Network))
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => match self.read_entry().filter(|entry| self.is_fresh(entry)) {
                Some(entry) => {
                    tracing::warn!(error = %e, "refresh failed, using cached versions");
                    Ok((entry.versions, Origin::StaleFallback))
                }
                None => Err(e),
            },
        }
    }

    /// Cached list and staleness, without fetching.
    pub fn cache_info(&self) -> Option<VersionCacheInfo> {
        let entry = self.read_entry()?;
        Some(VersionCacheInfo {
            is_expired: !self.is_fresh(&entry),
            versions: entry.versions,
            source: entry.source,
            cached_at: entry.cached_at,
            expires_at: entry.expires_at,
        })
    }
}

impl VersionResolver for CachedVersionLister<'_> {
    fn resolve_latest(&self, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        self.inner.resolve_latest(cancel)
    }

    fn resolve_version(&self, requested: &str, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        self.inner.resolve_version(requested, cancel)
    }

    fn source_description(&self) -> String {
        self.inner.source_description()
    }

    fn as_lister(&self) -> Option<&dyn VersionLister> {
        Some(self)
    }
}

impl VersionLister for CachedVersionLister<'_> {
    fn list_versions(&self, cancel: &CancelToken) -> Result<Vec<String>, Error> {
        self.list_with_origin(cancel).map(|(v, _)| v)
    }
}

pub fn cache_file_for(dir: &Path, source: &str) -> PathBuf {
    dir.join(format!("{}.json", hasher::short_hash(source, 16)))
}

fn write_atomic(path: &Path, entry: &CacheEntry) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }
    let json = serde_json::to_string_pretty(entry).map_err(|e| format!("serialize error: {}", e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| format!("cannot write {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        format!("cannot rename {} → {}: {}", tmp.display(), path.display(), e)
    })
}

// ============================================================================
// Cache management
// ============================================================================

/// Entry count and total size of the version cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
}

fn entry_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let read = std::fs::read_dir(dir).map_err(|e| Error::Io(format!("cannot read {}: {}", dir.display(), e)))?;
    Ok(read
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect())
}

pub fn cache_stats(dir: &Path) -> Result<CacheStats, Error> {
    let mut stats = CacheStats::default();
    for path in entry_files(dir)? {
        stats.entries += 1;
        stats.bytes += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    }
    Ok(stats)
}

/// Remove every cached version list. Returns how many were removed.
pub fn clear(dir: &Path) -> Result<usize, Error> {
    let files = entry_files(dir)?;
    for path in &files {
        std::fs::remove_file(path).map_err(|e| Error::Io(format!("cannot remove {}: {}", path.display(), e)))?;
    }
    Ok(files.len())
}
