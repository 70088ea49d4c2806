// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistent tier over a [`KeyValueStore`].
//!
//! Two key spaces share one store:
//!
//! - **TTL cache** (`cache_` prefix): [`CacheEntry`] blobs, expired lazily
//!   on read or by [`DurableTier::cleanup_expired`].
//! - **Offline cache** (`offline_` prefix): compacted snapshots that never
//!   expire. Their sizes are tracked in a metadata index so that
//!   [`DurableTier::enforce_storage_quota`] can evict oldest-first once the
//!   hard cap is exceeded.
//!
//! Every read-modify-write of the index runs under an index lock. Tiers
//! over the same store must share it (see [`DurableTier::with_index_lock`]).
//!
//! Unparsable blobs are treated as absent, deleted and counted. They never
//! surface as errors. Store failures do surface, as [`StorageError`], and
//! the orchestrator demotes them to misses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{CacheEntry, KeyPattern};
use crate::clock::SharedClock;
use crate::config::DurableConfig;
use crate::freshness::CacheRecord;
use crate::storage::traits::{KeyValueStore, StorageError};

/// Never-expiring snapshot kept for offline use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineEntry<T> {
    pub data: T,
    /// Epoch millis of the write
    pub stored_at: i64,
}

/// One row of the offline size index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OfflineMeta {
    key: String,
    timestamp: i64,
    size: u64,
}

/// Just the freshness fields of a stored [`CacheEntry`].
#[derive(Deserialize)]
struct EntryHeader {
    written_at: i64,
    ttl_ms: u64,
}

#[derive(Deserialize)]
struct OfflineHeader {
    #[allow(dead_code)]
    stored_at: i64,
}

/// Result of a TTL-cache read that does not delete.
#[derive(Debug, Clone, PartialEq)]
pub enum DurableLookup<T> {
    Fresh(CacheEntry<T>),
    /// Past its TTL; still usable as a stale-rescue copy
    Expired(CacheEntry<T>),
    Missing,
}

/// Byte usage across both key spaces.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageUsage {
    pub total_bytes: u64,
    pub offline_bytes: u64,
    pub ttl_bytes: u64,
    pub offline_entries: usize,
    pub ttl_entries: usize,
    pub quota_bytes: u64,
    pub is_near_limit: bool,
}

/// Outcome of a maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub expired: usize,
    pub corrupted: usize,
}

/// Serializes updates to the offline size index of one store.
pub type IndexLock = Arc<Mutex<()>>;

pub struct DurableTier {
    store: Arc<dyn KeyValueStore>,
    config: DurableConfig,
    clock: SharedClock,
    corrupted: AtomicU64,
    index_lock: IndexLock,
}

impl DurableTier {
    pub fn new(store: Arc<dyn KeyValueStore>, config: DurableConfig, clock: SharedClock) -> Self {
        Self {
            store,
            config,
            clock,
            corrupted: AtomicU64::new(0),
            index_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Use `lock` for index updates. Pass the same lock to every tier built
    /// over the same store and metadata key.
    #[must_use]
    pub fn with_index_lock(mut self, lock: IndexLock) -> Self {
        self.index_lock = lock;
        self
    }

    #[must_use]
    pub fn index_lock(&self) -> &IndexLock {
        &self.index_lock
    }

    fn ttl_key(&self, key: &str) -> String {
        format!("{}{}", self.config.ttl_prefix, key)
    }

    fn offline_key(&self, key: &str) -> String {
        format!("{}{}", self.config.offline_prefix, key)
    }

    /// Total corrupted blobs seen since construction.
    #[must_use]
    pub fn corrupted_count(&self) -> u64 {
        self.corrupted.load(Ordering::Relaxed)
    }

    fn reject_index_collision(&self, store_key: &str) -> Result<(), StorageError> {
        if store_key == self.config.metadata_key {
            return Err(StorageError::Backend(format!("key {store_key} is reserved for the offline index")));
        }
        Ok(())
    }

    async fn discard_corrupted(&self, store_key: &str, reason: &str) {
        self.corrupted.fetch_add(1, Ordering::Relaxed);
        warn!(key = %store_key, reason, "Discarding malformed stored entry");
        crate::metrics::record_corruption("durable");
        if let Err(e) = self.store.delete(store_key).await {
            warn!(key = %store_key, error = %e, "Failed to delete malformed entry");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TTL CACHE
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) -> Result<(), StorageError> {
        let store_key = self.ttl_key(key);
        self.reject_index_collision(&store_key)?;
        let entry = CacheEntry::new(data, ttl, self.clock.now_millis());
        let bytes = serde_json::to_vec(&entry).map_err(|e| StorageError::Backend(e.to_string()))?;
        let len = bytes.len();
        self.store.set(&store_key, bytes).await?;
        crate::metrics::record_bytes_written("durable", len);
        Ok(())
    }

    /// Read without deleting: fresh, expired or missing.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<DurableLookup<T>, StorageError> {
        let store_key = self.ttl_key(key);
        let Some(bytes) = self.store.get(&store_key).await? else {
            return Ok(DurableLookup::Missing);
        };
        match serde_json::from_slice::<CacheEntry<T>>(&bytes) {
            Ok(entry) if entry.is_live(self.clock.now_millis()) => Ok(DurableLookup::Fresh(entry)),
            Ok(entry) => Ok(DurableLookup::Expired(entry)),
            Err(e) => {
                self.discard_corrupted(&store_key, &e.to_string()).await;
                Ok(DurableLookup::Missing)
            }
        }
    }

    /// Live entry for `key`; an expired entry is deleted and reported absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>, StorageError> {
        match self.lookup(key).await? {
            DurableLookup::Fresh(entry) => Ok(Some(entry)),
            DurableLookup::Expired(_) => {
                debug!(key, "Durable entry expired on read");
                self.store.delete(&self.ttl_key(key)).await?;
                crate::metrics::record_expiration("durable", 1);
                Ok(None)
            }
            DurableLookup::Missing => Ok(None),
        }
    }

    /// Entry for `key` regardless of expiry.
    pub async fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>, StorageError> {
        Ok(match self.lookup(key).await? {
            DurableLookup::Fresh(entry) | DurableLookup::Expired(entry) => Some(entry),
            DurableLookup::Missing => None,
        })
    }

    /// Remove `key` from the TTL cache. The offline copy stays.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(&self.ttl_key(key)).await
    }

    /// Logical keys (prefix stripped) in the TTL cache matching `pattern`.
    pub async fn keys_by_pattern(&self, pattern: &KeyPattern) -> Result<Vec<String>, StorageError> {
        Ok(self
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter(|k| *k != self.config.metadata_key)
            .filter_map(|k| k.strip_prefix(&self.config.ttl_prefix).map(str::to_string))
            .filter(|k| pattern.matches(k))
            .collect())
    }

    /// Delete every TTL-cache key matching `pattern`. Returns the count.
    pub async fn delete_by_pattern(&self, pattern: &KeyPattern) -> Result<usize, StorageError> {
        let keys: Vec<String> = self
            .keys_by_pattern(pattern)
            .await?
            .iter()
            .map(|k| self.ttl_key(k))
            .collect();
        self.store.delete_many(&keys).await?;
        Ok(keys.len())
    }

    /// Remove expired and corrupted entries from both key spaces.
    pub async fn cleanup_expired(&self) -> Result<CleanupStats, StorageError> {
        let now = self.clock.now_millis();
        let mut stats = CleanupStats::default();
        let mut expired_keys = Vec::new();
        let mut corrupt_offline = Vec::new();

        for store_key in self.store.list_keys().await? {
            if store_key == self.config.metadata_key {
                continue;
            }
            if store_key.starts_with(&self.config.ttl_prefix) {
                let Some(bytes) = self.store.get(&store_key).await? else { continue };
                match serde_json::from_slice::<EntryHeader>(&bytes) {
                    Ok(h) if (now.saturating_sub(h.written_at).max(0) as u64) > h.ttl_ms => {
                        expired_keys.push(store_key);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.discard_corrupted(&store_key, &e.to_string()).await;
                        stats.corrupted += 1;
                    }
                }
            } else if store_key.starts_with(&self.config.offline_prefix) {
                let Some(bytes) = self.store.get(&store_key).await? else { continue };
                if let Err(e) = serde_json::from_slice::<OfflineHeader>(&bytes) {
                    self.discard_corrupted(&store_key, &e.to_string()).await;
                    stats.corrupted += 1;
                    corrupt_offline.push(store_key);
                }
            }
        }

        stats.expired = expired_keys.len();
        if !expired_keys.is_empty() {
            self.store.delete_many(&expired_keys).await?;
            crate::metrics::record_expiration("durable", expired_keys.len());
        }
        if !corrupt_offline.is_empty() {
            let _guard = self.index_lock.lock().await;
            let mut index = self.load_index().await?;
            index.retain(|m| !corrupt_offline.contains(&m.key));
            self.save_index(&index).await?;
        }
        if stats.expired > 0 || stats.corrupted > 0 {
            info!(expired = stats.expired, corrupted = stats.corrupted, "Durable cleanup complete");
        }
        Ok(stats)
    }

    /// Drop the whole TTL key space.
    pub async fn clear_ttl(&self) -> Result<usize, StorageError> {
        let keys: Vec<String> = self
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(&self.config.ttl_prefix) && *k != self.config.metadata_key)
            .collect();
        self.store.delete_many(&keys).await?;
        Ok(keys.len())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OFFLINE CACHE
    // ═══════════════════════════════════════════════════════════════════════

    /// Store a snapshot that never expires, then enforce the quota.
    /// Returns the number of offline entries evicted by the quota pass.
    pub async fn set_offline<T: Serialize>(&self, key: &str, data: &T) -> Result<usize, StorageError> {
        let now = self.clock.now_millis();
        let entry = OfflineEntry { data, stored_at: now };
        let bytes = serde_json::to_vec(&entry).map_err(|e| StorageError::Backend(e.to_string()))?;
        let size = bytes.len() as u64;
        let store_key = self.offline_key(key);
        self.reject_index_collision(&store_key)?;

        let _guard = self.index_lock.lock().await;
        self.store.set(&store_key, bytes).await?;
        crate::metrics::record_bytes_written("offline", size as usize);

        let mut index = self.load_index().await?;
        index.retain(|m| m.key != store_key);
        index.push(OfflineMeta {
            key: store_key,
            timestamp: now,
            size,
        });
        self.save_index(&index).await?;

        self.enforce_quota_locked().await
    }

    /// Store the compacted projection of a record set.
    pub async fn set_offline_records<E: CacheRecord>(&self, key: &str, records: &[E]) -> Result<usize, StorageError> {
        let compacted: Vec<E> = records.iter().map(CacheRecord::compact).collect();
        self.set_offline(key, &compacted).await
    }

    pub async fn get_offline<T: DeserializeOwned>(&self, key: &str) -> Result<Option<OfflineEntry<T>>, StorageError> {
        let store_key = self.offline_key(key);
        let Some(bytes) = self.store.get(&store_key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<OfflineEntry<T>>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                self.discard_corrupted(&store_key, &e.to_string()).await;
                let _guard = self.index_lock.lock().await;
                let mut index = self.load_index().await?;
                index.retain(|m| m.key != store_key);
                self.save_index(&index).await?;
                Ok(None)
            }
        }
    }

    /// If tracked offline bytes exceed the cap, evict oldest entries until
    /// usage is at most `quota_target_ratio` of the cap. Returns the count
    /// removed.
    pub async fn enforce_storage_quota(&self) -> Result<usize, StorageError> {
        let _guard = self.index_lock.lock().await;
        self.enforce_quota_locked().await
    }

    /// Caller holds the index lock.
    async fn enforce_quota_locked(&self) -> Result<usize, StorageError> {
        let mut index = self.load_index().await?;
        let mut total: u64 = index.iter().map(|m| m.size).sum();
        if total <= self.config.quota_bytes {
            return Ok(0);
        }

        let target = (self.config.quota_bytes as f64 * self.config.quota_target_ratio) as u64;
        index.sort_by_key(|m| m.timestamp);

        let mut victims = Vec::new();
        let mut freed = 0u64;
        while total > target && !index.is_empty() {
            let oldest = index.remove(0);
            total -= oldest.size;
            freed += oldest.size;
            victims.push(oldest.key);
        }

        self.store.delete_many(&victims).await?;
        self.save_index(&index).await?;

        info!(
            removed = victims.len(),
            freed_bytes = freed,
            remaining_bytes = total,
            quota_bytes = self.config.quota_bytes,
            "Offline storage quota enforced"
        );
        crate::metrics::record_eviction("offline", victims.len(), freed as usize);
        crate::metrics::set_offline_bytes(total);
        Ok(victims.len())
    }

    /// Drop the whole offline key space and its index.
    pub async fn clear_offline(&self) -> Result<usize, StorageError> {
        let _guard = self.index_lock.lock().await;
        let keys: Vec<String> = self
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(&self.config.offline_prefix))
            .collect();
        self.store.delete_many(&keys).await?;
        self.save_index(&[]).await?;
        Ok(keys.len())
    }

    pub async fn get_storage_usage(&self) -> Result<StorageUsage, StorageError> {
        let index = self.load_index().await?;
        let offline_bytes: u64 = index.iter().map(|m| m.size).sum();

        let mut ttl_bytes = 0u64;
        let mut ttl_entries = 0usize;
        for store_key in self.store.list_keys().await? {
            if store_key == self.config.metadata_key || !store_key.starts_with(&self.config.ttl_prefix) {
                continue;
            }
            if let Some(bytes) = self.store.get(&store_key).await? {
                ttl_bytes += bytes.len() as u64;
                ttl_entries += 1;
            }
        }

        let total_bytes = offline_bytes + ttl_bytes;
        let near = (self.config.quota_bytes as f64 * self.config.near_limit_ratio) as u64;
        Ok(StorageUsage {
            total_bytes,
            offline_bytes,
            ttl_bytes,
            offline_entries: index.len(),
            ttl_entries,
            quota_bytes: self.config.quota_bytes,
            is_near_limit: total_bytes >= near,
        })
    }

    async fn load_index(&self) -> Result<Vec<OfflineMeta>, StorageError> {
        let Some(bytes) = self.store.get(&self.config.metadata_key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice(&bytes) {
            Ok(index) => Ok(index),
            Err(e) => {
                // Index is rebuilt from subsequent writes
                self.discard_corrupted(&self.config.metadata_key, &e.to_string()).await;
                Ok(Vec::new())
            }
        }
    }

    async fn save_index(&self, index: &[OfflineMeta]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(index).map_err(|e| StorageError::Backend(e.to_string()))?;
        self.store.set(&self.config.metadata_key, bytes).await
    }
}
