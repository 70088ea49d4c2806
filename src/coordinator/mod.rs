// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tiered cache coordinator.
//!
//! [`TieredCache`] walks the tiers for a key, cheapest first, and backfills
//! the faster tiers on a hit further down:
//!
//! ```text
//!   get_with(key)
//!        │
//!        ▼
//!   ┌─────────┐ hit
//!   │ Memory  │──────────────────────────────────────────────▶ return
//!   └────┬────┘
//!        ▼
//!   ┌─────────┐ fresh hit: backfill Memory
//!   │ Durable │──────────────────────────────────────────────▶ return
//!   └────┬────┘ expired: keep as rescue candidate
//!        ▼
//!   offline? ── yes ──▶ offline snapshot / rescue / OfflineNoData
//!        │
//!        ▼
//!   ┌─────────┐ rows within freshness threshold: backfill Durable + Memory
//!   │ Remote  │──────────────────────────────────────────────▶ return
//!   └────┬────┘
//!        ▼
//!   ┌─────────┐ ok: write Durable TTL + offline snapshot + Memory
//!   │ Origin  │──────────────────────────────────────────────▶ return
//!   └────┬────┘
//!        ▼ error
//!   offline snapshot ▶ stale rescue ▶ OriginFailure
//! ```
//!
//! TTLs come from the [`FreshnessPolicy`] applied to the result set being
//! written, so a batch that gained a live match gets the live TTL.

mod api;
mod lifecycle;
mod types;

pub use types::{CacheError, CacheResult, LoadSpec, MaintenanceReport};

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::clock::SharedClock;
use crate::config::CacheEngineConfig;
use crate::domain::OriginError;
use crate::freshness::{CacheRecord, FreshnessPolicy};
use crate::network::NetworkQualityMonitor;
use crate::scheduler::TaskHandle;
use crate::stats::StatsRecorder;
use crate::storage::traits::{KeyValueStore, RemoteQueryStore};
use crate::tiers::{CacheEntry, CacheTier, DurableLookup, DurableTier, IndexLock, MemoryTier, RemoteTier};

/// Four-tier read-through cache for one record type.
///
/// # Thread Safety
///
/// `Send + Sync`. Tiers guard their own state; no lock is held across an
/// `.await`. Concurrent reads of the same key are not coalesced, so two
/// callers may both reach the origin.
pub struct TieredCache<E: CacheRecord> {
    pub(super) name: String,
    pub(super) config: CacheEngineConfig,
    pub(super) memory: MemoryTier<Vec<E>>,
    pub(super) durable: DurableTier,
    pub(super) remote: Option<RemoteTier>,
    pub(super) policy: FreshnessPolicy,
    pub(super) monitor: Arc<NetworkQualityMonitor>,
    pub(super) stats: Arc<StatsRecorder>,
    pub(super) clock: SharedClock,
    request_seq: AtomicU64,
    pub(super) background: Mutex<Vec<TaskHandle>>,
}

impl<E: CacheRecord> TieredCache<E> {
    /// Build a cache over the given stores. Without a remote store the
    /// Remote tier is skipped.
    pub fn new(
        name: impl Into<String>,
        config: CacheEngineConfig,
        kv_store: Arc<dyn KeyValueStore>,
        remote_store: Option<Arc<dyn RemoteQueryStore>>,
        monitor: Arc<NetworkQualityMonitor>,
        clock: SharedClock,
    ) -> Self {
        Self {
            name: name.into(),
            memory: MemoryTier::new(config.memory.clone(), Arc::clone(&clock)),
            durable: DurableTier::new(kv_store, config.durable.clone(), Arc::clone(&clock)),
            remote: remote_store.map(|store| RemoteTier::new(store, Arc::clone(&clock))),
            policy: FreshnessPolicy::new(config.freshness.clone()),
            stats: Arc::new(StatsRecorder::new(Arc::clone(&clock))),
            monitor,
            clock,
            config,
            request_seq: AtomicU64::new(0),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Share the offline index lock with other caches over the same store.
    #[must_use]
    pub fn with_offline_index_lock(mut self, lock: IndexLock) -> Self {
        self.durable = self.durable.with_index_lock(lock);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<StatsRecorder> {
        &self.stats
    }

    #[must_use]
    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    #[must_use]
    pub fn memory(&self) -> &MemoryTier<Vec<E>> {
        &self.memory
    }

    #[must_use]
    pub fn durable(&self) -> &DurableTier {
        &self.durable
    }

    /// Read `key`, calling `fetch` only if no cache tier can answer.
    ///
    /// Tier errors are logged and treated as misses. An error is returned
    /// only when the origin fails (or the device is offline) and neither an
    /// offline snapshot nor an expired durable copy exists.
    #[tracing::instrument(skip(self, spec, fetch), fields(cache = %self.name, tier))]
    pub async fn get_with<F, Fut>(&self, key: &str, spec: &LoadSpec, fetch: F) -> Result<CacheResult<E>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<E>, OriginError>>,
    {
        let request_id = format!("{}#{}", key, self.request_seq.fetch_add(1, Ordering::Relaxed));
        // Dropped with the future if the caller abandons the read
        let _timer = self.stats.start_request(&request_id);

        // 1. Memory
        if let Some(entry) = self.memory.get_entry(key) {
            debug!("Memory hit");
            return Ok(self.served(&request_id, CacheTier::Memory, entry, false));
        }

        // 2. Durable TTL cache
        let mut rescue: Option<CacheEntry<Vec<E>>> = None;
        match self.durable.lookup::<Vec<E>>(key).await {
            Ok(DurableLookup::Fresh(entry)) => {
                let ttl = self.policy.ttl_for(&entry.data);
                self.memory.set(key, entry.data.clone(), ttl);
                debug!(ttl_secs = ttl.as_secs(), "Durable hit, promoted to memory");
                return Ok(self.served(&request_id, CacheTier::Durable, entry, false));
            }
            Ok(DurableLookup::Expired(entry)) => {
                debug!("Durable entry expired, kept for rescue");
                crate::metrics::record_operation("durable", "get", "expired");
                rescue = Some(entry);
            }
            Ok(DurableLookup::Missing) => {
                crate::metrics::record_operation("durable", "get", "miss");
            }
            Err(e) => {
                warn!(error = %e, "Durable lookup failed");
                crate::metrics::record_error("durable", "get", "backend");
            }
        }

        // 3. Offline: no Remote, no Origin
        if self.monitor.is_offline() {
            return match self.offline_or_rescue(key, rescue).await {
                Some((tier, entry)) => Ok(self.served(&request_id, tier, entry, true)),
                None => {
                    warn!("Offline with no cached data");
                    self.stats.record_failure(&request_id);
                    tracing::Span::current().record("tier", "none");
                    Err(CacheError::OfflineNoData { key: key.to_string() })
                }
            };
        }

        // 4. Remote relational cache
        if let Some(remote) = &self.remote {
            let threshold = self.policy.remote_threshold(&spec.hint, self.clock.now_millis());
            let collection = spec.collection.as_deref().unwrap_or(key);
            let rows: Vec<E> = remote.get(collection, &spec.filters, threshold).await;
            if rows.is_empty() {
                crate::metrics::record_operation("remote", "get", "miss");
            } else {
                let rows = self.dedup(key, rows);
                let ttl = self.policy.ttl_for(&rows);
                self.write_durable(key, &rows, ttl).await;
                self.memory.set(key, rows.clone(), ttl);
                debug!(rows = rows.len(), ttl_secs = ttl.as_secs(), "Remote hit, backfilled");
                let entry = CacheEntry::new(rows, ttl, self.clock.now_millis());
                return Ok(self.served(&request_id, CacheTier::Remote, entry, false));
            }
        }

        // 5. Origin
        let origin_error = match fetch().await {
            Ok(records) => {
                let records = self.dedup(key, records);
                let ttl = self.policy.ttl_for(&records);
                crate::metrics::record_origin_fetch("success", records.len());
                self.write_durable(key, &records, ttl).await;
                if let Err(e) = self.durable.set_offline_records(key, &records).await {
                    warn!(error = %e, "Offline snapshot write failed");
                    crate::metrics::record_error("offline", "put", "backend");
                }
                self.memory.set(key, records.clone(), ttl);
                debug!(records = records.len(), ttl_secs = ttl.as_secs(), "Origin fetch cached");
                let entry = CacheEntry::new(records, ttl, self.clock.now_millis());
                return Ok(self.served(&request_id, CacheTier::Origin, entry, false));
            }
            Err(e) => {
                warn!(error = %e, "Origin fetch failed");
                crate::metrics::record_origin_fetch("error", 0);
                e
            }
        };

        // 6. Rescue
        if let Some((tier, entry)) = self.offline_or_rescue(key, rescue).await {
            warn!(tier = %tier, "Serving stale data after origin failure");
            return Ok(self.served(&request_id, tier, entry, true));
        }

        error!(error = %origin_error, "All tiers exhausted");
        self.stats.record_failure(&request_id);
        tracing::Span::current().record("tier", "none");
        Err(CacheError::OriginFailure {
            key: key.to_string(),
            source: origin_error,
        })
    }

    /// Offline snapshot first, then the expired durable copy.
    async fn offline_or_rescue(
        &self,
        key: &str,
        rescue: Option<CacheEntry<Vec<E>>>,
    ) -> Option<(CacheTier, CacheEntry<Vec<E>>)> {
        match self.durable.get_offline::<Vec<E>>(key).await {
            Ok(Some(snapshot)) => {
                let ttl = self.policy.ttl_for(&snapshot.data);
                let mut entry = CacheEntry::new(snapshot.data, ttl, snapshot.stored_at);
                entry.last_accessed_at = self.clock.now_millis();
                return Some((CacheTier::Offline, entry));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Offline snapshot lookup failed");
                crate::metrics::record_error("offline", "get", "backend");
            }
        }

        let stale = match rescue {
            Some(entry) => Some(entry),
            None => match self.durable.get_stale::<Vec<E>>(key).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "Stale rescue lookup failed");
                    None
                }
            },
        };
        stale.map(|entry| (CacheTier::Durable, entry))
    }

    async fn write_durable(&self, key: &str, records: &[E], ttl: Duration) {
        if let Err(e) = self.durable.set(key, &records, ttl).await {
            warn!(error = %e, "Durable write failed");
            crate::metrics::record_error("durable", "put", "backend");
        }
    }

    /// Drop records whose dedup key was already seen, keeping the first.
    fn dedup(&self, key: &str, records: Vec<E>) -> Vec<E> {
        let before = records.len();
        let mut seen = HashSet::new();
        let kept: Vec<E> = records
            .into_iter()
            .filter(|r| r.dedup_key().map_or(true, |k| seen.insert(k)))
            .collect();
        if kept.len() != before {
            debug!(key, removed = before - kept.len(), "Dropped duplicate records");
        }
        kept
    }

    fn served(&self, request_id: &str, tier: CacheTier, entry: CacheEntry<Vec<E>>, stale: bool) -> CacheResult<E> {
        let latency = self.stats.record_response_time(tier, request_id);
        tracing::Span::current().record("tier", tier.as_str());
        crate::metrics::record_operation(tier.as_str(), "get", "hit");
        crate::metrics::record_latency(tier.as_str(), "get", Duration::from_micros((latency * 1000.0) as u64));
        crate::metrics::record_served_by(tier.as_str(), stale);
        CacheResult {
            data: entry.data,
            tier,
            from_cache: tier != CacheTier::Origin,
            observed_at: entry.written_at,
            stale,
        }
    }
}
