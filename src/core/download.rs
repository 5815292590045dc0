//! FR-006: Artifact download and the on-disk download cache.
//!
//! The compiler downloads each artifact once to learn its checksum and size,
//! then stores it here so an offline apply can reuse it.

use super::cancel::CancelToken;
use super::error::Error;
use crate::tripwire::hasher;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const USER_AGENT: &str = concat!("ferrule/", env!("CARGO_PKG_VERSION"));

/// A downloaded artifact. The scratch directory is removed on drop.
#[derive(Debug)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub checksum: String,
    pub size: u64,
    _scratch: Option<tempfile::TempDir>,
}

impl DownloadResult {
    /// Wrap a file already on disk (hashes it).
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let (checksum, size) = hasher::sha256_file(path).map_err(Error::Io)?;
        Ok(Self {
            path: path.to_path_buf(),
            checksum,
            size,
            _scratch: None,
        })
    }
}

/// Fetches artifacts by URL.
pub trait Downloader {
    fn download(&self, url: &str, cancel: &CancelToken) -> Result<DownloadResult, Error>;
}

/// Blocking HTTP downloader.
#[derive(Debug, Default)]
pub struct HttpDownloader;

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, cancel: &CancelToken) -> Result<DownloadResult, Error> {
        cancel.check()?;
        tracing::info!(url, "downloading");
        let response = ureq::get(url)
            .timeout(HTTP_TIMEOUT)
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| Error::Network(format!("download failed for {}: {}", url, e)))?;

        let scratch = tempfile::Builder::new()
            .prefix("ferrule-dl-")
            .tempdir()
            .map_err(|e| Error::Io(format!("cannot create scratch dir: {}", e)))?;
        let path = scratch.path().join(file_name_for(url));
        let mut file = std::fs::File::create(&path)
            .map_err(|e| Error::Io(format!("cannot create {}: {}", path.display(), e)))?;

        let mut reader = response.into_reader();
        let mut buf = [0u8; 8192];
        loop {
            cancel.check()?;
            let n = reader
                .read(&mut buf)
                .map_err(|e| Error::Network(format!("read error for {}: {}", url, e)))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .map_err(|e| Error::Io(format!("write error {}: {}", path.display(), e)))?;
        }
        drop(file);

        let mut result = DownloadResult::from_file(&path)?;
        result._scratch = Some(scratch);
        Ok(result)
    }
}

/// Last path segment of a URL without query string, or `download`.
pub fn file_name_for(url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    match trimmed.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "download".to_string(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    url: String,
    checksum: String,
    size: u64,
}

/// Artifacts keyed by URL under `cache/downloads/`.
#[derive(Debug, Clone)]
pub struct DownloadCache {
    dir: PathBuf,
}

impl DownloadCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let key = hasher::short_hash(url, 16);
        (
            self.dir.join(format!("{}.data", key)),
            self.dir.join(format!("{}.meta.json", key)),
        )
    }

    /// Store a copy of `src` for `url`.
    pub fn save(&self, url: &str, src: &Path, checksum: &str, size: u64) -> Result<(), Error> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Io(format!("cannot create dir {}: {}", self.dir.display(), e)))?;
        let (data, meta) = self.paths(url);
        let tmp = data.with_extension("data.tmp");
        std::fs::copy(src, &tmp)
            .map_err(|e| Error::Io(format!("cannot copy {} → {}: {}", src.display(), tmp.display(), e)))?;
        std::fs::rename(&tmp, &data)
            .map_err(|e| Error::Io(format!("cannot rename {}: {}", tmp.display(), e)))?;
        let json = serde_json::to_string(&CacheMeta {
            url: url.to_string(),
            checksum: checksum.to_string(),
            size,
        })
        .map_err(|e| Error::Io(format!("serialize error: {}", e)))?;
        std::fs::write(&meta, json)
            .map_err(|e| Error::Io(format!("cannot write {}: {}", meta.display(), e)))?;
        Ok(())
    }

    /// Cached artifact for `url` whose content still hashes to `checksum`.
    /// Mismatched or unreadable entries count as misses.
    pub fn lookup(&self, url: &str, checksum: &str) -> Option<PathBuf> {
        let (data, meta) = self.paths(url);
        let meta: CacheMeta = serde_json::from_str(&std::fs::read_to_string(&meta).ok()?).ok()?;
        if meta.url != url || !hasher::checksum_matches(checksum, &meta.checksum) {
            return None;
        }
        let (actual, _) = hasher::sha256_file(&data).ok()?;
        if hasher::checksum_matches(checksum, &actual) {
            Some(data)
        } else {
            tracing::warn!(url, "cached artifact is corrupt, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_file_name_for() {
        assert_eq!(file_name_for("https://x/a/jq-linux-amd64"), "jq-linux-amd64");
        assert_eq!(file_name_for("https://x/a/tool.tar.gz?raw=1"), "tool.tar.gz");
        assert_eq!(file_name_for("https://x/a/"), "download");
    }

    #[test]
    fn test_download_cache_save_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("artifact");
        std::fs::write(&src, "payload").unwrap();
        let sum = hasher::sha256_string("payload");
        let cache = DownloadCache::new(&dir.path().join("cache"));
        cache.save("https://x/artifact", &src, &sum, 7).unwrap();

        let hit = cache.lookup("https://x/artifact", &sum).unwrap();
        assert_eq!(std::fs::read_to_string(hit).unwrap(), "payload");
        assert!(cache.lookup("https://x/other", &sum).is_none());
        assert!(cache.lookup("https://x/artifact", &hasher::sha256_string("x")).is_none());
    }

    #[test]
    fn test_download_cache_corrupt_entry_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("artifact");
        std::fs::write(&src, "payload").unwrap();
        let sum = hasher::sha256_string("payload");
        let cache = DownloadCache::new(dir.path());
        cache.save("u", &src, &sum, 7).unwrap();
        let (data, _) = cache.paths("u");
        std::fs::write(data, "tampered").unwrap();
        assert!(cache.lookup("u", &sum).is_none());
    }

    #[test]
    fn test_download_result_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("f");
        std::fs::write(&f, "abc").unwrap();
        let r = DownloadResult::from_file(&f).unwrap();
        assert_eq!(r.size, 3);
        assert_eq!(r.checksum, hasher::sha256_string("abc"));
    }
}
