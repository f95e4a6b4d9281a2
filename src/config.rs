//! Cache configuration
//!
//! All tunables live in [`CacheConfig`]. The defaults reproduce the fixed
//! constants of the caching policy; the CLI overrides individual fields.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

/// Name of the header carrying the write-time freshness stamp (epoch ms)
pub const FRESHNESS_HEADER: &str = "sw-cache-time";

/// Entries older than this are expired (2 hours)
pub const DEFAULT_EXPIRY: Duration = Duration::from_millis(7_200_000);

/// Aggregate payload ceiling (50 MB)
pub const DEFAULT_MAX_SIZE: u64 = 52_428_800;

/// Eviction stops once total size is at or below this share of the ceiling
pub const DEFAULT_EVICTION_RATIO: f64 = 0.8;

/// How long a control request waits for its reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle time after which a leftover temporary file counts as abandoned (5 minutes)
pub const DEFAULT_ABANDONED_WRITE_AGE: Duration = Duration::from_secs(300);

/// Name of the current store generation
pub const DEFAULT_STORE_NAME: &str = "media-cache-v1";

/// How response bodies reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Body chunks are streamed into the entry file
    #[default]
    Streamed,
    /// The whole entry is materialized in memory and written at once
    Buffered,
}

/// Configuration for the cache worker
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one sub-directory per named store
    pub root: PathBuf,
    /// Name of the live store generation
    pub store_name: String,
    /// Age after which an entry is no longer served as fresh
    pub expiry: Duration,
    /// Size ceiling in bytes that triggers eviction
    pub max_size: u64,
    /// Fraction of `max_size` eviction brings the total down to
    pub eviction_ratio: f64,
    /// Reply timeout for control requests
    pub reply_timeout: Duration,
    /// Body write strategy
    pub write_mode: WriteMode,
    /// Spawn a size governor pass after every cache write. Short-lived
    /// callers turn this off and await a single pass themselves.
    pub background_eviction: bool,
    /// Idle time after which leftover temporary files are deleted
    pub abandoned_write_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            store_name: DEFAULT_STORE_NAME.to_string(),
            expiry: DEFAULT_EXPIRY,
            max_size: DEFAULT_MAX_SIZE,
            eviction_ratio: DEFAULT_EVICTION_RATIO,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            write_mode: WriteMode::default(),
            background_eviction: true,
            abandoned_write_age: DEFAULT_ABANDONED_WRITE_AGE,
        }
    }
}

impl CacheConfig {
    /// Creates a default configuration rooted at `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Byte total the size governor evicts down to
    pub fn eviction_target(&self) -> u64 {
        (self.max_size as f64 * self.eviction_ratio).round() as u64
    }
}

/// XDG-compliant cache directory (`~/.cache/mediacache/` on Linux), or a
/// relative `.mediacache` directory when no home directory is known.
fn default_root() -> PathBuf {
    ProjectDirs::from("", "", "mediacache")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".mediacache"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        let config = CacheConfig::default();
        assert_eq!(config.expiry.as_millis(), 7_200_000);
        assert_eq!(config.max_size, 52_428_800);
        assert_eq!(config.reply_timeout, Duration::from_secs(5));
        assert_eq!(config.store_name, "media-cache-v1");
        assert_eq!(config.write_mode, WriteMode::Streamed);
        assert!(config.background_eviction);
    }

    #[test]
    fn test_eviction_target_is_eighty_percent() {
        let config = CacheConfig::default();
        assert_eq!(config.eviction_target(), 41_943_040);
    }

    #[test]
    fn test_with_root_keeps_defaults() {
        let config = CacheConfig::with_root("/tmp/somewhere");
        assert_eq!(config.root, PathBuf::from("/tmp/somewhere"));
        assert_eq!(config.max_size, DEFAULT_MAX_SIZE);
    }

    #[test]
    fn test_default_root_mentions_project() {
        let config = CacheConfig::default();
        assert!(config.root.to_string_lossy().contains("mediacache"));
    }
}
