// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the tiered cache coordinator.

use std::time::Duration;

use thiserror::Error;

use crate::domain::OriginError;
use crate::freshness::FreshnessHint;
use crate::storage::traits::QueryFilter;
use crate::tiers::{CacheTier, CleanupStats};

/// Errors surfaced by [`super::TieredCache`].
///
/// Tier-local failures are demoted to misses inside the read path; callers
/// only see an error once every tier, stale rescue included, came up empty.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A single tier failed (non-fatal inside reads, reported by writes)
    #[error("{tier} tier unavailable: {reason}")]
    TierUnavailable { tier: CacheTier, reason: String },

    /// Offline with nothing cached for the key
    #[error("offline and no cached data for '{key}'")]
    OfflineNoData { key: String },

    /// Origin failed and no rescue copy exists
    #[error("origin fetch for '{key}' failed: {source}")]
    OriginFailure {
        key: String,
        #[source]
        source: OriginError,
    },

    /// A persisted blob could not be decoded.
    ///
    /// Kept for error classification only. The read path never returns it:
    /// corrupt blobs are deleted, counted in
    /// [`DurableTier::corrupted_count`](crate::tiers::DurableTier::corrupted_count)
    /// and treated as misses.
    #[error("malformed stored entry '{key}': {reason}")]
    MalformedStoredEntry { key: String, reason: String },

    #[error("invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// A read answered by some tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<E> {
    pub data: Vec<E>,
    pub tier: CacheTier,
    /// `false` only when the origin answered
    pub from_cache: bool,
    /// Epoch millis at which the data was last written by its source
    pub observed_at: i64,
    /// Served past its TTL (stale rescue) or from the offline snapshot
    pub stale: bool,
}

/// What the caller knows about a read before it happens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSpec {
    /// Remote collection to query; the cache key when unset
    pub collection: Option<String>,
    /// Passed to the remote tier
    pub filters: Vec<QueryFilter>,
    /// Drives the remote freshness threshold
    pub hint: FreshnessHint,
}

impl LoadSpec {
    #[must_use]
    pub fn new(hint: FreshnessHint) -> Self {
        Self {
            collection: None,
            filters: Vec::new(),
            hint,
        }
    }

    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Outcome of [`super::TieredCache::run_maintenance`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub memory_expired: usize,
    pub durable: CleanupStats,
    pub quota_evicted: usize,
    pub duration: Duration,
}

impl MaintenanceReport {
    #[must_use]
    pub fn total_removed(&self) -> usize {
        self.memory_expired + self.durable.expired + self.durable.corrupted + self.quota_evicted
    }
}
