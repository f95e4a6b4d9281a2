//! Network access
//!
//! The interceptor talks to the network through the [`Fetcher`] trait so the
//! cache can sit in front of any transport. [`HttpFetcher`] is the `reqwest`
//! implementation used by the binary.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use tracing::debug;

use crate::cache::Response;
use crate::error::FetchError;

/// Response body delivered as it arrives from the network
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// Status and headers of a response whose body has not been read yet
pub struct StreamedResponse {
    /// Status line and headers; the body is empty
    pub head: Response,
    pub body: BodyStream,
}

impl StreamedResponse {
    /// Wraps an already complete response as a single-chunk stream
    pub fn from_response(mut response: Response) -> Self {
        let body = std::mem::take(&mut response.body);
        Self {
            head: response,
            body: stream::once(async move { Ok(body) }).boxed(),
        }
    }

    /// Reads the remaining body into memory
    pub async fn collect(self) -> Result<Response, FetchError> {
        let Self { head, mut body } = self;
        let mut received = BytesMut::new();
        while let Some(chunk) = body.next().await {
            received.extend_from_slice(&chunk?);
        }
        Ok(Response {
            body: received.freeze(),
            ..head
        })
    }
}

/// Issues a GET for `url` and returns the response
///
/// Only transport failures are errors; non-2xx statuses come back as
/// ordinary responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the whole response
    async fn fetch(&self, url: &str) -> Result<Response, FetchError>;

    /// Fetches the response head and hands back the body as a stream
    ///
    /// The default reads the full response with [`fetch`](Self::fetch) and
    /// yields it as one chunk.
    async fn fetch_streamed(&self, url: &str) -> Result<StreamedResponse, FetchError> {
        Ok(StreamedResponse::from_response(self.fetch(url).await?))
    }
}

/// `reqwest`-backed fetcher
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with a default HTTP client
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fetcher with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Response, FetchError> {
        let response = self.fetch_streamed(url).await?.collect().await?;
        debug!(url, bytes = response.body.len(), "network body received");
        Ok(response)
    }

    async fn fetch_streamed(&self, url: &str) -> Result<StreamedResponse, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        debug!(url, status = status.as_u16(), "network response");

        let head = Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: Bytes::new(),
        };
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();
        Ok(StreamedResponse { head, body })
    }
}
