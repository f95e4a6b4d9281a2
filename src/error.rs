//! Error types for the media cache
//!
//! `FetchError` covers the network layer, `CacheError` everything else. Most
//! failures inside the cache are logged and recovered from; the only error a
//! media request surfaces is a network failure with nothing cached to fall
//! back on.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type used across the crate
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors produced by a [`Fetcher`](crate::fetch::Fetcher)
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The resource could not be reached (used by non-HTTP fetchers)
    #[error("network unreachable for {0}")]
    Unreachable(String),

    /// The connection broke while the body was being received
    #[error("response body interrupted: {0}")]
    Body(#[from] io::Error),
}

/// Errors that can occur while operating the cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Entry metadata or a control message could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The network layer failed and no cached copy was available
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// An entry file exists but its framing is broken
    #[error("corrupt cache entry {path}: {reason}")]
    Corrupt {
        /// File that failed to parse
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// A control request did not get a reply in time
    #[error("no reply from cache worker within {0:?}")]
    Timeout(Duration),

    /// The control loop has shut down
    #[error("cache worker is not running")]
    WorkerClosed,
}

impl CacheError {
    pub(crate) fn corrupt(path: impl Into<String>, reason: impl Into<String>) -> Self {
        CacheError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True when an entry file's contents can never be decoded
    pub(crate) fn is_unreadable_entry(&self) -> bool {
        match self {
            CacheError::Corrupt { .. } | CacheError::Serialization(_) => true,
            CacheError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}
