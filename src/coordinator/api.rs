// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Writes, invalidation and introspection for [`TieredCache`].

use tracing::{debug, info, warn};

use super::types::CacheError;
use super::TieredCache;
use crate::freshness::{CacheRecord, EventStatus};
use crate::stats::CacheHealth;
use crate::tiers::{CacheTier, KeyPattern, MemoryTierStats, StorageUsage};

impl<E: CacheRecord> TieredCache<E> {
    /// Write a result set the caller obtained itself.
    ///
    /// The TTL comes from `status_override` if given, else from the
    /// records. Memory is always written; a durable failure is returned
    /// after the memory write.
    #[tracing::instrument(skip(self, data), fields(cache = %self.name, records = data.len()))]
    pub async fn put(&self, key: &str, data: Vec<E>, status_override: Option<EventStatus>) -> Result<(), CacheError> {
        let ttl = match status_override {
            Some(status) => self.policy.ttl_for_status(status),
            None => self.policy.ttl_for(&data),
        };

        self.memory.set(key, data.clone(), ttl);
        crate::metrics::record_operation("memory", "put", "success");

        self.durable.set(key, &data, ttl).await.map_err(|e| {
            warn!(error = %e, "Durable write failed");
            crate::metrics::record_error("durable", "put", "backend");
            CacheError::TierUnavailable {
                tier: CacheTier::Durable,
                reason: e.to_string(),
            }
        })?;

        self.durable.set_offline_records(key, &data).await.map_err(|e| {
            warn!(error = %e, "Offline snapshot write failed");
            crate::metrics::record_error("offline", "put", "backend");
            CacheError::TierUnavailable {
                tier: CacheTier::Offline,
                reason: e.to_string(),
            }
        })?;

        debug!(ttl_secs = ttl.as_secs(), "Stored");
        Ok(())
    }

    /// Remove a key, or every key matching a `*` glob, from Memory and the
    /// durable TTL cache. Offline snapshots are kept. Returns the number of
    /// entries removed across both tiers.
    ///
    /// A durable failure is logged; the memory part still applies.
    #[tracing::instrument(skip(self), fields(cache = %self.name))]
    pub async fn invalidate(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut removed = 0;

        if KeyPattern::is_glob(pattern) {
            let matcher = KeyPattern::new(pattern).map_err(|e| CacheError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            for key in self.memory.get_keys_by_pattern(&matcher) {
                if self.memory.delete(&key) {
                    removed += 1;
                }
            }
            match self.durable.delete_by_pattern(&matcher).await {
                Ok(count) => removed += count,
                Err(e) => {
                    warn!(error = %e, "Durable pattern invalidation failed");
                    crate::metrics::record_error("durable", "invalidate", "backend");
                }
            }
        } else {
            if self.memory.delete(pattern) {
                removed += 1;
            }
            match self.durable.lookup::<serde_json::Value>(pattern).await {
                Ok(crate::tiers::DurableLookup::Missing) => {}
                Ok(_) => match self.durable.delete(pattern).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(error = %e, "Durable invalidation failed");
                        crate::metrics::record_error("durable", "invalidate", "backend");
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Durable invalidation failed");
                    crate::metrics::record_error("durable", "invalidate", "backend");
                }
            }
        }

        info!(removed, "Invalidated");
        crate::metrics::record_operation("all", "invalidate", "success");
        Ok(removed)
    }

    /// Byte usage of the durable store.
    pub async fn storage_usage(&self) -> Result<StorageUsage, CacheError> {
        let usage = self
            .durable
            .get_storage_usage()
            .await
            .map_err(|e| CacheError::TierUnavailable {
                tier: CacheTier::Durable,
                reason: e.to_string(),
            })?;
        if usage.quota_bytes > 0 {
            crate::metrics::set_storage_utilization(usage.total_bytes as f64 / usage.quota_bytes as f64);
        }
        Ok(usage)
    }

    #[must_use]
    pub fn health(&self) -> CacheHealth {
        self.stats.health()
    }

    #[must_use]
    pub fn memory_stats(&self) -> MemoryTierStats {
        self.memory.stats()
    }

    /// Drop everything from Memory and the durable TTL cache.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.memory.clear();
        self.durable.clear_ttl().await.map_err(|e| CacheError::TierUnavailable {
            tier: CacheTier::Durable,
            reason: e.to_string(),
        })?;
        info!(cache = %self.name, "Cache cleared");
        Ok(())
    }
}
