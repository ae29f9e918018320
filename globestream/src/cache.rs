//! Disk-backed blob store for fetched payloads.
//!
//! The cache is a pure name → bytes store with expiry metadata. Everything in
//! it is replaceable: corruption of any kind is treated as a miss, and writes
//! are best-effort (logged but never surfaced to the caller, since caching is
//! an optimization, not a requirement).
//!
//! # File format
//!
//! ```text
//! offset  size  field
//! 0       8     magic "vtscache"
//! 8       2     version (= 2, little endian)
//! 10      8     expiry (signed unix seconds, little endian)
//! 18      2     name length (little endian)
//! 20      n     name bytes
//! 20+n    m     payload bytes
//! ```
//!
//! A zero-length payload behind a valid header is a deliberate "known
//! unavailable" marker, distinct from a cache miss.
//!
//! # Path derivation
//!
//! Two modes, selected by [`MapOptions::hash_cache_paths`]:
//! - hashed: MD5 of the scheme-stripped name, split into nested hex-digit
//!   buckets (`ab0/1cd/…rest`), keeping directory fan-out bounded;
//! - hierarchy: the scheme-stripped name mirrored as sanitized path segments,
//!   keeping the cache greppable at the cost of deep directories.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MapOptions;

/// Leading bytes of every cache file.
pub const CACHE_MAGIC: &[u8; 8] = b"vtscache";

/// Current cache file format version.
pub const CACHE_VERSION: u16 = 2;

/// Expiry value meaning "no expiry information available".
pub const EXPIRES_UNKNOWN: i64 = -1;

/// Expiry value meaning "always revalidate"; such entries never hit.
pub const EXPIRES_REVALIDATE: i64 = -2;

/// Fixed header length preceding the name bytes.
const HEADER_LEN: usize = 8 + 2 + 8 + 2;

/// Errors produced while accessing the cache store.
///
/// These never escape [`DiskCache::write`]; reads map every failure to a
/// miss. The type exists for the internal `Result` plumbing and logs.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry header malformed")]
    BadHeader,

    #[error("cache entry name mismatch")]
    NameMismatch,
}

/// A successful cache read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheHit {
    /// The stored payload; empty means "known unavailable".
    pub payload: Vec<u8>,
    /// The stored expiry (unix seconds, or [`EXPIRES_UNKNOWN`]).
    pub expires: i64,
}

/// Disk-backed blob store.
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    hashed_paths: bool,
}

impl DiskCache {
    /// Create a cache over the configured root directory.
    pub fn new(options: &MapOptions) -> Self {
        Self {
            root: options.cache_root.clone(),
            hashed_paths: options.hash_cache_paths,
        }
    }

    /// Create a cache with an explicit root and path mode.
    pub fn with_root(root: impl Into<PathBuf>, hashed_paths: bool) -> Self {
        Self {
            root: root.into(),
            hashed_paths,
        }
    }

    /// Store a payload under a name, best-effort.
    ///
    /// Failures are logged and swallowed; the caller cannot distinguish a
    /// failed write from a successful one, and does not need to.
    pub fn write(&self, name: &str, payload: &[u8], expires: i64) {
        if let Err(e) = self.write_impl(name, payload, expires) {
            warn!(name, error = %e, "disk cache write failed");
        }
    }

    /// Read a payload by name.
    ///
    /// Returns `None` unless the file exists, the header magic and version
    /// match, the stored name equals `name`, and the stored expiry is neither
    /// the always-revalidate sentinel nor already elapsed at `now`.
    pub fn read(&self, name: &str, now: i64) -> Option<CacheHit> {
        let path = self.path_for(name);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(_) => return None,
        };

        match Self::parse(&data, name) {
            Ok(hit) => {
                if hit.expires == EXPIRES_REVALIDATE {
                    debug!(name, "cache entry requires revalidation");
                    return None;
                }
                if hit.expires >= 0 && hit.expires < now {
                    debug!(name, expires = hit.expires, "cache entry expired");
                    return None;
                }
                Some(hit)
            }
            Err(e) => {
                // Corruption is a miss, nothing more.
                debug!(name, error = %e, "cache entry rejected");
                None
            }
        }
    }

    /// The on-disk path an entry for `name` would use.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let stripped = strip_scheme(name);
        if self.hashed_paths {
            let digest = Md5::digest(stripped.as_bytes());
            let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
            self.root.join(&hex[0..3]).join(&hex[3..6]).join(&hex[6..])
        } else {
            let mut path = self.root.clone();
            for segment in stripped.split('/') {
                path.push(sanitize_segment(segment));
            }
            path
        }
    }

    fn write_impl(&self, name: &str, payload: &[u8], expires: i64) -> Result<(), CacheError> {
        let name_bytes = name.as_bytes();
        if name_bytes.len() > u16::MAX as usize {
            return Err(CacheError::BadHeader);
        }

        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a sibling temp file first so a concurrent read never sees
        // a half-written entry.
        let tmp = path.with_extension("part");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(CACHE_MAGIC)?;
            file.write_all(&CACHE_VERSION.to_le_bytes())?;
            file.write_all(&expires.to_le_bytes())?;
            file.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
            file.write_all(name_bytes)?;
            file.write_all(payload)?;
        }
        fs::rename(&tmp, &path)?;

        debug!(name, bytes = payload.len(), expires, "cache entry written");
        Ok(())
    }

    fn parse(data: &[u8], expected_name: &str) -> Result<CacheHit, CacheError> {
        if data.len() < HEADER_LEN {
            return Err(CacheError::BadHeader);
        }
        if &data[0..8] != CACHE_MAGIC {
            return Err(CacheError::BadHeader);
        }
        let version = u16::from_le_bytes([data[8], data[9]]);
        if version != CACHE_VERSION {
            return Err(CacheError::BadHeader);
        }
        let expires = i64::from_le_bytes(data[10..18].try_into().unwrap());
        let name_len = u16::from_le_bytes([data[18], data[19]]) as usize;
        if data.len() < HEADER_LEN + name_len {
            return Err(CacheError::BadHeader);
        }
        let stored_name = &data[HEADER_LEN..HEADER_LEN + name_len];
        if stored_name != expected_name.as_bytes() {
            return Err(CacheError::NameMismatch);
        }
        Ok(CacheHit {
            payload: data[HEADER_LEN + name_len..].to_vec(),
            expires,
        })
    }
}

/// Drop a leading `scheme://` from a resource name.
fn strip_scheme(name: &str) -> &str {
    match name.find("://") {
        Some(idx) => &name[idx + 3..],
        None => name,
    }
}

/// Make a url path segment safe to use as a single directory entry.
///
/// Anything outside `[A-Za-z0-9._-]` is replaced, and segments that would
/// alias the current or parent directory are rewritten, so a hostile name can
/// never escape the cache root.
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hashed_cache() -> (TempDir, DiskCache) {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::with_root(dir.path(), true);
        (dir, cache)
    }

    #[test]
    fn test_round_trip() {
        let (_dir, cache) = hashed_cache();
        cache.write("https://tiles.example.com/meta/3/1/2", b"payload", 10_000);

        let hit = cache.read("https://tiles.example.com/meta/3/1/2", 5_000).unwrap();
        assert_eq!(hit.payload, b"payload");
        assert_eq!(hit.expires, 10_000);
    }

    #[test]
    fn test_miss_on_absent_entry() {
        let (_dir, cache) = hashed_cache();
        assert!(cache.read("https://tiles.example.com/nothing", 0).is_none());
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let (_dir, cache) = hashed_cache();
        cache.write("name", b"data", 100);
        assert!(cache.read("name", 101).is_none());
        assert!(cache.read("name", 99).is_some());
    }

    #[test]
    fn test_revalidate_sentinel_never_hits() {
        let (_dir, cache) = hashed_cache();
        cache.write("name", b"data", EXPIRES_REVALIDATE);
        assert!(cache.read("name", 0).is_none());
    }

    #[test]
    fn test_unknown_expiry_always_hits() {
        let (_dir, cache) = hashed_cache();
        cache.write("name", b"data", EXPIRES_UNKNOWN);
        assert!(cache.read("name", i64::MAX).is_some());
    }

    #[test]
    fn test_zero_length_payload_is_valid_hit() {
        let (_dir, cache) = hashed_cache();
        cache.write("missing-tile", b"", EXPIRES_UNKNOWN);
        let hit = cache.read("missing-tile", 0).unwrap();
        assert!(hit.payload.is_empty());
    }

    #[test]
    fn test_rejects_entry_with_different_stored_name() {
        let (_dir, cache) = hashed_cache();
        cache.write("name-a", b"data", EXPIRES_UNKNOWN);

        // Force a path collision by copying the file to name-b's path.
        let path_a = cache.path_for("name-a");
        let path_b = cache.path_for("name-b");
        fs::create_dir_all(path_b.parent().unwrap()).unwrap();
        fs::copy(&path_a, &path_b).unwrap();

        assert!(cache.read("name-b", 0).is_none());
        assert!(cache.read("name-a", 0).is_some());
    }

    #[test]
    fn test_corrupted_entry_is_miss() {
        let (_dir, cache) = hashed_cache();
        cache.write("name", b"data", EXPIRES_UNKNOWN);

        let path = cache.path_for("name");
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0xff; // break the magic
        fs::write(&path, &bytes).unwrap();

        assert!(cache.read("name", 0).is_none());
    }

    #[test]
    fn test_truncated_entry_is_miss() {
        let (_dir, cache) = hashed_cache();
        cache.write("name", b"data", EXPIRES_UNKNOWN);

        let path = cache.path_for("name");
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..10]).unwrap();

        assert!(cache.read("name", 0).is_none());
    }

    #[test]
    fn test_hashed_paths_strip_scheme() {
        let cache = DiskCache::with_root("/cache", true);
        let with_scheme = cache.path_for("https://host/tile/1/2/3");
        let without = cache.path_for("host/tile/1/2/3");
        assert_eq!(with_scheme, without);
    }

    #[test]
    fn test_hashed_path_shape() {
        let cache = DiskCache::with_root("/cache", true);
        let path = cache.path_for("https://host/tile");
        let rel: Vec<_> = path
            .strip_prefix("/cache")
            .unwrap()
            .iter()
            .map(|c| c.to_string_lossy().into_owned())
            .collect();
        assert_eq!(rel.len(), 3);
        assert_eq!(rel[0].len(), 3);
        assert_eq!(rel[1].len(), 3);
        assert_eq!(rel[2].len(), 26);
    }

    #[test]
    fn test_hierarchy_paths_mirror_and_sanitize() {
        let cache = DiskCache::with_root("/cache", false);
        let path = cache.path_for("https://host/tiles?lod=3/../x");
        let s = path.to_string_lossy();
        assert!(s.starts_with("/cache/host/"));
        assert!(!s.contains("?"));
        assert!(!s.contains("/../"));
    }

    #[test]
    fn test_hierarchy_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::with_root(dir.path(), false);
        cache.write("https://host/a/b/c.bin", b"xyz", EXPIRES_UNKNOWN);
        let hit = cache.read("https://host/a/b/c.bin", 0).unwrap();
        assert_eq!(hit.payload, b"xyz");
    }

    #[test]
    fn test_overwrite_replaces_payload() {
        let (_dir, cache) = hashed_cache();
        cache.write("name", b"old", EXPIRES_UNKNOWN);
        cache.write("name", b"new", EXPIRES_UNKNOWN);
        assert_eq!(cache.read("name", 0).unwrap().payload, b"new");
    }
}
