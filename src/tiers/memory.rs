// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded in-process LRU.
//!
//! Two bounds apply: an entry count and an estimated byte budget. When an
//! insert would break either, entries are evicted in ascending
//! `last_accessed_at` order (ties broken by access sequence) until the new
//! entry fits. Expired entries are only removed when touched or by
//! [`MemoryTier::cleanup_expired`]; `get`/`set` never sweep.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::{CacheEntry, KeyPattern};
use crate::clock::SharedClock;
use crate::config::MemoryConfig;

/// Fixed per-entry bookkeeping overhead added to the payload estimate.
const ENTRY_OVERHEAD_BYTES: usize = 64;

struct Slot<V> {
    entry: CacheEntry<V>,
    size_bytes: usize,
    /// Monotonic access sequence; breaks `last_accessed_at` ties
    seq: u64,
}

struct MemoryState<V> {
    slots: HashMap<String, Slot<V>>,
    total_bytes: usize,
    next_seq: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> MemoryState<V> {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(&mut self, key: &str) -> Option<Slot<V>> {
        let slot = self.slots.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(slot.size_bytes);
        Some(slot)
    }

    fn lru_key(&self) -> Option<String> {
        self.slots
            .iter()
            .min_by_key(|(_, s)| (s.entry.last_accessed_at, s.seq))
            .map(|(k, _)| k.clone())
    }
}

/// Point-in-time view of the memory tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTierStats {
    pub entries: usize,
    pub bytes: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
    pub evictions: u64,
    pub expirations: u64,
}

/// In-process LRU cache keyed by string.
pub struct MemoryTier<V> {
    config: MemoryConfig,
    clock: SharedClock,
    state: Mutex<MemoryState<V>>,
}

impl<V: Clone + Serialize> MemoryTier<V> {
    pub fn new(config: MemoryConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(MemoryState {
                slots: HashMap::new(),
                total_bytes: 0,
                next_seq: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    /// Approximate footprint of `key` + `data`.
    ///
    /// Serialized JSON length is a stand-in for heap size. It is not exact,
    /// but it grows with the payload, which is all eviction needs.
    pub fn estimate_size(key: &str, data: &V) -> usize {
        let payload = serde_json::to_vec(data).map(|b| b.len()).unwrap_or(0);
        key.len() + payload + ENTRY_OVERHEAD_BYTES
    }

    /// Live value for `key`, updating its recency. Expired entries are
    /// removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_entry(key).map(|e| e.data)
    }

    /// Like [`get`](Self::get) but returns the full entry.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();

        let live = state.slots.get(key)?.entry.is_live(now);
        if !live {
            state.remove(key);
            state.expirations += 1;
            debug!(key, "Memory entry expired on read");
            crate::metrics::record_expiration("memory", 1);
            return None;
        }

        let seq = state.bump();
        let slot = state.slots.get_mut(key)?;
        slot.entry.record_access(now);
        slot.seq = seq;
        Some(slot.entry.clone())
    }

    /// Insert or replace `key`. Returns `false` when the value alone is
    /// larger than the byte budget and was not stored.
    pub fn set(&self, key: &str, data: V, ttl: Duration) -> bool {
        let size = Self::estimate_size(key, &data);
        if size > self.config.max_bytes || self.config.max_entries == 0 {
            warn!(key, size, max_bytes = self.config.max_bytes, "Value exceeds memory tier budget, not cached");
            return false;
        }

        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        state.remove(key);

        let mut evicted = 0usize;
        let mut evicted_bytes = 0usize;
        while state.slots.len() + 1 > self.config.max_entries
            || state.total_bytes + size > self.config.max_bytes
        {
            let Some(victim) = state.lru_key() else { break };
            if let Some(slot) = state.remove(&victim) {
                evicted += 1;
                evicted_bytes += slot.size_bytes;
                debug!(key = %victim, "Evicted least recently used entry");
            }
        }
        state.evictions += evicted as u64;

        let seq = state.bump();
        state.slots.insert(
            key.to_string(),
            Slot {
                entry: CacheEntry::new(data, ttl, now),
                size_bytes: size,
                seq,
            },
        );
        state.total_bytes += size;

        if evicted > 0 {
            crate::metrics::record_eviction("memory", evicted, evicted_bytes);
        }
        crate::metrics::set_memory_usage(state.slots.len(), state.total_bytes);
        true
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.remove(key).is_some();
        crate::metrics::set_memory_usage(state.slots.len(), state.total_bytes);
        removed
    }

    /// Remove every non-live entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, s)| !s.entry.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        state.expirations += expired.len() as u64;
        if !expired.is_empty() {
            crate::metrics::record_expiration("memory", expired.len());
        }
        crate::metrics::set_memory_usage(state.slots.len(), state.total_bytes);
        expired.len()
    }

    /// Keys matching a glob pattern (`prefix*`), live or not.
    pub fn get_keys_by_pattern(&self, pattern: &KeyPattern) -> Vec<String> {
        self.state
            .lock()
            .slots
            .keys()
            .filter(|k| pattern.matches(k))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.total_bytes = 0;
        crate::metrics::set_memory_usage(0, 0);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().slots.contains_key(key)
    }

    #[must_use]
    pub fn stats(&self) -> MemoryTierStats {
        let state = self.state.lock();
        MemoryTierStats {
            entries: state.slots.len(),
            bytes: state.total_bytes,
            max_entries: self.config.max_entries,
            max_bytes: self.config.max_bytes,
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }
}
