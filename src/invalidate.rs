//! Per-video invalidation
//!
//! Segments of one video usually live next to its manifest, so a video's
//! entries are found by their base path: origin plus the directory part of
//! the URL, e.g. `https://cdn/a/video.m3u8` -> `https://cdn/a/`.

use tracing::{debug, info, warn};
use url::Url;

use crate::cache::size::measure;
use crate::cache::Store;
use crate::error::CacheResult;

/// Outcome of invalidating one video's entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub deleted_count: usize,
    pub deleted_size: u64,
}

/// Origin plus path with the trailing file name removed
pub fn base_path(url: &str) -> CacheResult<String> {
    let parsed = Url::parse(url)?;
    let path = parsed.path();
    let dir = match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "/",
    };
    Ok(format!("{}{}", parsed.origin().ascii_serialization(), dir))
}

/// Deletes every entry belonging to the same video as `video_url`
///
/// An entry matches when its URL contains the target base path or its own
/// base path equals it. Entries that fail to delete are logged and skipped.
pub async fn clear_video(store: &Store, video_url: &str) -> CacheResult<InvalidationReport> {
    let target = base_path(video_url)?;
    let mut report = InvalidationReport::default();

    for key in store.keys().await? {
        let same_group = key.contains(&target)
            || base_path(&key).map(|b| b == target).unwrap_or(false);
        if !same_group {
            continue;
        }

        let size = match store.inspect(&key).await {
            Ok(Some(info)) => measure(&info),
            Ok(None) => continue,
            Err(e) => {
                debug!(key = %key, error = %e, "could not measure entry before delete");
                0
            }
        };
        match store.delete(&key).await {
            Ok(true) => {
                report.deleted_count += 1;
                report.deleted_size += size;
            }
            Ok(false) => {}
            Err(e) => warn!(key = %key, error = %e, "failed to delete video entry"),
        }
    }

    info!(
        base = %target,
        count = report.deleted_count,
        bytes = report.deleted_size,
        "cleared cached video"
    );
    Ok(report)
}
