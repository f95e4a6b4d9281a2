//! Control channel
//!
//! Out-of-band commands from the page (or the CLI) reach the cache worker as
//! [`ControlMessage`]s over an mpsc channel. Each message may carry a oneshot
//! reply sender. The worker always answers once the operation finishes or
//! fails; the caller bounds the wait with its own timeout.
//!
//! Wire shapes (JSON):
//! - `{"type":"CLEAR_CACHE"}` -> `{"success":true}`
//! - `{"type":"CLEAR_PREVIOUS_VIDEO","url":"..."}` ->
//!   `{"success":true,"deletedCount":2,"deletedSize":1100}`
//! - `{"type":"GET_CACHE_SIZE"}` -> `{"size":1000,"count":1}`

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{size, Store};
use crate::error::{CacheError, CacheResult};
use crate::invalidate;

/// Commands accepted by the cache worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Delete the whole named store
    ClearCache,
    /// Delete the entries of the video at `url`
    ClearPreviousVideo { url: String },
    /// Report total size and entry count
    GetCacheSize,
}

/// Replies posted back on the reply channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlReply {
    #[serde(rename_all = "camelCase")]
    VideoCleared {
        success: bool,
        deleted_count: usize,
        deleted_size: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Cleared {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Size { size: u64, count: usize },
}

impl ControlReply {
    fn clear_failed(error: &CacheError) -> Self {
        ControlReply::Cleared {
            success: false,
            error: Some(error.to_string()),
        }
    }

    /// Per-video failure keeps the per-video shape, with zero counts
    fn video_clear_failed(error: &CacheError) -> Self {
        ControlReply::VideoCleared {
            success: false,
            deleted_count: 0,
            deleted_size: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Executes control messages against a store
#[derive(Debug, Clone)]
pub struct ControlHandler {
    store: Store,
}

impl ControlHandler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Runs `message` to completion and builds its reply; never fails
    pub async fn handle(&self, message: ControlMessage) -> ControlReply {
        debug!(?message, "control message");
        match message {
            ControlMessage::ClearCache => match self.store.clear().await {
                Ok(_) => ControlReply::Cleared {
                    success: true,
                    error: None,
                },
                Err(e) => {
                    warn!(error = %e, "clearing cache failed");
                    ControlReply::clear_failed(&e)
                }
            },
            ControlMessage::ClearPreviousVideo { url } => {
                match invalidate::clear_video(&self.store, &url).await {
                    Ok(report) => ControlReply::VideoCleared {
                        success: true,
                        deleted_count: report.deleted_count,
                        deleted_size: report.deleted_size,
                        error: None,
                    },
                    Err(e) => {
                        warn!(url = %url, error = %e, "clearing video failed");
                        ControlReply::video_clear_failed(&e)
                    }
                }
            }
            ControlMessage::GetCacheSize => match size::total(&self.store).await {
                Ok((size, count)) => ControlReply::Size { size, count },
                Err(e) => {
                    warn!(error = %e, "measuring cache failed");
                    ControlReply::Size { size: 0, count: 0 }
                }
            },
        }
    }
}

type Envelope = (ControlMessage, Option<oneshot::Sender<ControlReply>>);

/// Sending side of the control channel
#[derive(Debug, Clone)]
pub struct ControlHandle {
    sender: mpsc::Sender<Envelope>,
    reply_timeout: Duration,
}

impl ControlHandle {
    /// Spawns the control loop for `handler`
    ///
    /// Each message runs in its own task so a slow enumeration never holds up
    /// the next command. The loop ends when every handle is dropped.
    pub fn spawn(handler: ControlHandler, reply_timeout: Duration) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Envelope>(32);

        let task = tokio::spawn(async move {
            while let Some((message, reply)) = receiver.recv().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let result = handler.handle(message).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                });
            }
        });

        (
            Self {
                sender,
                reply_timeout,
            },
            task,
        )
    }

    /// Sends `message` without waiting for a reply
    pub async fn post(&self, message: ControlMessage) -> CacheResult<()> {
        self.sender
            .send((message, None))
            .await
            .map_err(|_| CacheError::WorkerClosed)
    }

    /// Sends `message` and waits for the answer
    ///
    /// The reply timeout covers queueing as well as handling, so a full
    /// channel cannot block the caller past it either.
    ///
    /// # Returns
    /// * `Ok(ControlReply)` - the worker's answer
    /// * `Err(CacheError::Timeout)` - no answer within the reply timeout
    /// * `Err(CacheError::WorkerClosed)` - the control loop is gone
    pub async fn request(&self, message: ControlMessage) -> CacheResult<ControlReply> {
        let exchange = async {
            let (tx, rx) = oneshot::channel();
            self.sender
                .send((message, Some(tx)))
                .await
                .map_err(|_| CacheError::WorkerClosed)?;
            rx.await.map_err(|_| CacheError::WorkerClosed)
        };

        match tokio::time::timeout(self.reply_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.reply_timeout)),
        }
    }

    /// Asks the worker to delete the whole store
    ///
    /// # Returns
    /// * `Ok(ControlReply::Cleared)` - `success` tells whether the delete worked
    /// * `Err` - the request timed out or the worker is gone
    pub async fn clear_cache(&self) -> CacheResult<ControlReply> {
        self.request(ControlMessage::ClearCache).await
    }

    pub async fn clear_previous_video(&self, url: &str) -> CacheResult<ControlReply> {
        self.request(ControlMessage::ClearPreviousVideo {
            url: url.to_string(),
        })
        .await
    }

    /// Asks for the total size and entry count (`ControlReply::Size`)
    pub async fn cache_size(&self) -> CacheResult<ControlReply> {
        self.request(ControlMessage::GetCacheSize).await
    }

    /// Player hook: the page switched videos, drop the previous one's entries
    pub async fn video_changed(&self, previous_url: Option<&str>) -> CacheResult<()> {
        match previous_url {
            Some(url) if !url.is_empty() => {
                self.post(ControlMessage::ClearPreviousVideo {
                    url: url.to_string(),
                })
                .await
            }
            _ => Ok(()),
        }
    }
}
