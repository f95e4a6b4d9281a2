//! Request interception policy
//!
//! Every request passes through [`Interceptor::handle`]. Only media URLs are
//! cached; everything else goes straight to the network.
//!
//! For a cacheable URL:
//! - a fresh entry is served from the store; manifests additionally get a
//!   background refresh, since live playlists change while the entry is
//!   still fresh
//! - an expired entry is deleted, then the request falls through to the network
//! - a successful network response is written to the store and a size
//!   governor pass is spawned; in streamed mode body chunks go to disk as
//!   they arrive
//! - if the network fails, any cached copy (even expired) is served instead

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use tracing::{debug, trace, warn};

use crate::cache::{now_millis, CacheSource, Intercepted, Response, Store};
use crate::config::WriteMode;
use crate::error::{CacheResult, FetchError};
use crate::fetch::{BodyStream, Fetcher, StreamedResponse};
use crate::governor::SizeGovernor;

/// Extension marker identifying manifests
pub const MANIFEST_EXTENSION: &str = ".m3u8";

/// URL markers of cacheable resources: manifest, segment, progressive containers
pub const CACHEABLE_EXTENSIONS: [&str; 4] = [MANIFEST_EXTENSION, ".ts", ".mp4", ".webm"];

/// Whether responses for `url` are stored
pub fn should_cache(url: &str) -> bool {
    CACHEABLE_EXTENSIONS.iter().any(|ext| url.contains(ext))
}

/// Whether `url` points at a manifest
pub fn is_manifest(url: &str) -> bool {
    url.contains(MANIFEST_EXTENSION)
}

/// Read-through / write-through cache in front of a [`Fetcher`]
#[derive(Clone)]
pub struct Interceptor {
    store: Store,
    fetcher: Arc<dyn Fetcher>,
    governor: SizeGovernor,
    expiry: Duration,
    background_eviction: bool,
}

impl Interceptor {
    /// Creates an interceptor that caches into `store`
    ///
    /// # Arguments
    /// * `store` - Store that cacheable responses are read from and written to
    /// * `fetcher` - Network access for misses, refreshes and passthrough
    /// * `governor` - Size governor triggered after each successful write
    /// * `expiry` - Age after which an entry is no longer served as fresh
    pub fn new(
        store: Store,
        fetcher: Arc<dyn Fetcher>,
        governor: SizeGovernor,
        expiry: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            governor,
            expiry,
            background_eviction: true,
        }
    }

    /// Whether writes spawn a governor pass (the default)
    ///
    /// With this off, the caller is responsible for running
    /// [`SizeGovernor::run_pass`] itself.
    pub fn with_background_eviction(mut self, enabled: bool) -> Self {
        self.background_eviction = enabled;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Serves `url` from the cache or the network
    ///
    /// # Returns
    /// * `Ok(Intercepted)` - the response and where it came from
    /// * `Err` - the network failed and nothing was cached for `url`
    pub async fn handle(&self, url: &str) -> CacheResult<Intercepted> {
        if !should_cache(url) {
            let response = self.fetcher.fetch(url).await?;
            return Ok(Intercepted {
                response,
                source: CacheSource::Passthrough,
            });
        }

        let cached = match self.store.get(url).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(url, error = %e, "cache read failed; treating as miss");
                None
            }
        };

        if let Some(entry) = &cached {
            if entry.is_fresh(self.expiry) {
                debug!(url, "cache hit");
                if is_manifest(url) {
                    self.refresh_in_background(url);
                }
                return Ok(Intercepted {
                    response: entry.clone(),
                    source: CacheSource::Cache,
                });
            }

            debug!(url, "cache entry expired");
            if let Err(e) = self.store.delete(url).await {
                warn!(url, error = %e, "failed to delete expired entry");
            }
        }

        match self.fetch_and_store(url).await {
            Ok(response) => Ok(Intercepted {
                response,
                source: CacheSource::Network,
            }),
            Err(e) => match cached {
                Some(stale) => {
                    warn!(url, error = %e, "network failed; serving stale cache entry");
                    Ok(Intercepted {
                        response: stale,
                        source: CacheSource::Stale,
                    })
                }
                None => Err(e.into()),
            },
        }
    }

    /// Fetches `url` and writes a successful response to the store
    ///
    /// Only network failures are errors. A failed cache write is logged and
    /// the response is still returned.
    async fn fetch_and_store(&self, url: &str) -> Result<Response, FetchError> {
        let streamed = self.fetcher.fetch_streamed(url).await?;
        if !streamed.head.is_success() {
            return streamed.collect().await;
        }

        match self.store.write_mode() {
            WriteMode::Streamed => {
                let StreamedResponse { head, body } = streamed;
                self.stream_back(url, head, body).await
            }
            WriteMode::Buffered => {
                let response = streamed.collect().await?;
                self.write_back(url, &response).await;
                Ok(response)
            }
        }
    }

    /// Copies body chunks into a new entry as they arrive from the network
    async fn stream_back(
        &self,
        url: &str,
        head: Response,
        mut body: BodyStream,
    ) -> Result<Response, FetchError> {
        let mut writer = match self.store.begin(url, &head, now_millis()).await {
            Ok(writer) => Some(writer),
            Err(e) => {
                warn!(url, error = %e, "failed to start cache entry");
                None
            }
        };

        let mut received = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    if let Some(writer) = writer.take() {
                        writer.abort().await;
                    }
                    return Err(FetchError::Body(e));
                }
            };

            let failed = match writer.as_mut() {
                Some(writer) => writer.write_chunk(&chunk).await.err(),
                None => None,
            };
            if let Some(e) = failed {
                warn!(url, error = %e, "failed to write cache entry");
                if let Some(writer) = writer.take() {
                    writer.abort().await;
                }
            }
            received.extend_from_slice(&chunk);
        }

        if let Some(writer) = writer {
            match writer.commit().await {
                Ok(bytes) => {
                    trace!(url, bytes, "cached network response");
                    self.after_write();
                }
                Err(e) => warn!(url, error = %e, "failed to write cache entry"),
            }
        }

        Ok(Response {
            body: received.freeze(),
            ..head
        })
    }

    /// Stores a complete network response and schedules a size check
    async fn write_back(&self, url: &str, response: &Response) {
        match self.store.put(url, response).await {
            Ok(()) => {
                trace!(url, bytes = response.body.len(), "cached network response");
                self.after_write();
            }
            Err(e) => warn!(url, error = %e, "failed to write cache entry"),
        }
    }

    fn after_write(&self) {
        if self.background_eviction {
            self.governor.trigger();
        }
    }

    /// Re-fetches a manifest and overwrites its entry; failures are ignored
    fn refresh_in_background(&self, url: &str) {
        let this = self.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            this.refresh(&url).await;
        });
    }

    /// Body of the manifest refresh, awaitable for callers that need it
    ///
    /// The rewritten entry's stamp is always later than the one it replaces.
    pub async fn refresh(&self, url: &str) {
        match self.fetcher.fetch(url).await {
            Ok(response) if response.is_success() => {
                let stamp = self.store.next_stamp(url).await;
                match self.store.put_at(url, &response, stamp).await {
                    Ok(()) => {
                        trace!(url, stamp, "manifest refreshed");
                        self.after_write();
                    }
                    Err(e) => trace!(url, error = %e, "manifest refresh not stored"),
                }
            }
            Ok(response) => trace!(url, status = response.status, "manifest refresh not ok"),
            Err(e) => trace!(url, error = %e, "manifest refresh failed"),
        }
    }
}
