//! Cached response representation
//!
//! A [`Response`] is what the fetcher returns and what the store hands back.
//! Entries written by the store always carry the `sw-cache-time` header; an
//! entry without it is treated as expired.

use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::FRESHNESS_HEADER;

/// An HTTP response as seen by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase accompanying the status
    pub status_text: String,
    /// Header list in arrival order
    pub headers: Vec<(String, String)>,
    /// Payload
    pub body: Bytes,
}

impl Response {
    /// Creates a response with the given status and body and no headers
    pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Shorthand for a `200 OK` response
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, "OK", body)
    }

    /// Builder-style header addition
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every header named `name` with a single value
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Write time in epoch milliseconds, if the entry was stamped
    pub fn freshness_stamp(&self) -> Option<i64> {
        parse_stamp(self.header(FRESHNESS_HEADER))
    }

    /// Value of the `Content-Length` header, if present and numeric
    pub fn declared_length(&self) -> Option<u64> {
        declared_length(&self.headers)
    }

    /// Whether the entry is still within `expiry` of its freshness stamp
    pub fn is_fresh(&self, expiry: Duration) -> bool {
        is_fresh(self.freshness_stamp(), now_millis(), expiry)
    }
}

/// Where an intercepted response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Fresh entry served from the store
    Cache,
    /// Downloaded (and, when successful, written to the store)
    Network,
    /// Expired entry served because the network failed
    Stale,
    /// Not a cacheable URL; forwarded untouched
    Passthrough,
}

/// A response together with how it was obtained
#[derive(Debug, Clone)]
pub struct Intercepted {
    pub response: Response,
    pub source: CacheSource,
}

/// Metadata stored alongside each payload on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntryMeta {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body_len: u64,
}

impl EntryMeta {
    pub fn freshness_stamp(&self) -> Option<i64> {
        parse_stamp(
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(FRESHNESS_HEADER))
                .map(|(_, v)| v.as_str()),
        )
    }

    pub fn declared_length(&self) -> Option<u64> {
        declared_length(&self.headers)
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Freshness rule: a stamp exists and is younger than `expiry`
pub fn is_fresh(stamp: Option<i64>, now: i64, expiry: Duration) -> bool {
    match stamp {
        Some(written) => (now - written) < expiry.as_millis() as i64,
        None => false,
    }
}

fn parse_stamp(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse::<i64>().ok())
}

fn declared_length(headers: &[(String, String)]) -> Option<u64> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<u64>().ok())
}
