//! Size governor
//!
//! Keeps the aggregate payload size of a store under a ceiling. A pass is
//! spawned after every successful cache write and never awaited by the
//! request that triggered it. When the total exceeds the ceiling, entries are
//! evicted oldest-first until the total is at or below the eviction target
//! (80% of the ceiling by default), so the next write does not immediately
//! trigger another eviction.
//!
//! Every pass first removes files that can never be served: entry files that
//! fail to decode and temporary files left by interrupted writes. They take
//! up disk space without showing up in any entry listing.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::size::{self, SizedEntry};
use crate::cache::{Debris, Store};
use crate::config::CacheConfig;
use crate::error::CacheResult;

/// Outcome of one governor pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GovernorReport {
    /// Total size before eviction
    pub size_before: u64,
    /// Total size after eviction
    pub size_after: u64,
    /// Keys removed, in eviction order
    pub evicted: Vec<String>,
    /// Unreadable files removed before measuring
    pub debris: Debris,
}

/// Enforces the size ceiling of one store
///
/// Cheap to clone; clones share nothing but the store location, and passes
/// from different clones may run concurrently.
#[derive(Debug, Clone)]
pub struct SizeGovernor {
    store: Store,
    max_size: u64,
    target: u64,
    abandoned_write_age: Duration,
}

impl SizeGovernor {
    /// Creates a governor for `store` using the ceiling and ratio from `config`
    pub fn new(store: Store, config: &CacheConfig) -> Self {
        Self {
            store,
            max_size: config.max_size,
            target: config.eviction_target(),
            abandoned_write_age: config.abandoned_write_age,
        }
    }

    /// Runs a pass in the background; errors are logged, never returned
    pub fn trigger(&self) {
        let governor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = governor.run_pass().await {
                warn!(error = %e, "size governor pass failed");
            }
        });
    }

    /// Measures the store and evicts the oldest entries if it is over the ceiling
    pub async fn run_pass(&self) -> CacheResult<GovernorReport> {
        let debris = match self.store.sweep_debris(self.abandoned_write_age).await {
            Ok(debris) => debris,
            Err(e) => {
                warn!(error = %e, "could not sweep unreadable cache files");
                Debris::default()
            }
        };

        let entries = size::scan(&self.store).await?;
        let total: u64 = entries.iter().map(|e| e.size).sum();

        if total <= self.max_size {
            debug!(total, max = self.max_size, "cache within size limit");
            return Ok(GovernorReport {
                size_before: total,
                size_after: total,
                evicted: Vec::new(),
                debris,
            });
        }

        let mut remaining = total;
        let mut evicted = Vec::new();
        for entry in eviction_order(entries) {
            if remaining <= self.target {
                break;
            }
            match self.store.delete(&entry.key).await {
                Ok(_) => {
                    remaining = remaining.saturating_sub(entry.size);
                    evicted.push(entry.key);
                }
                Err(e) => warn!(key = %entry.key, error = %e, "eviction failed; skipping"),
            }
        }

        info!(
            before = total,
            after = remaining,
            evicted = evicted.len(),
            "evicted oldest cache entries"
        );
        Ok(GovernorReport {
            size_before: total,
            size_after: remaining,
            evicted,
            debris,
        })
    }
}

/// Oldest stamp first; ties broken by key so repeated passes agree
fn eviction_order(mut entries: Vec<SizedEntry>) -> Vec<SizedEntry> {
    entries.sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.key.cmp(&b.key)));
    entries
}
