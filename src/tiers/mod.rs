// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The three cache tiers in front of the origin.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  memory.rs   - bounded in-process LRU, explicit TTL per entry │
//! ├──────────────────────────────────────────────────────────────┤
//! │  durable.rs  - TTL cache + never-expiring offline cache over  │
//! │                a KeyValueStore, with a byte quota             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  remote.rs   - freshness-gated reads from a relational cache  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod durable;
pub mod memory;
pub mod remote;

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use durable::{CleanupStats, DurableLookup, DurableTier, IndexLock, StorageUsage};
pub use memory::{MemoryTier, MemoryTierStats};
pub use remote::RemoteTier;

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Memory,
    Durable,
    Remote,
    Origin,
    /// Never-expiring offline snapshot in the durable store
    Offline,
}

impl CacheTier {
    pub const ALL: [CacheTier; 5] = [
        CacheTier::Memory,
        CacheTier::Durable,
        CacheTier::Remote,
        CacheTier::Origin,
        CacheTier::Offline,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Durable => "durable",
            Self::Remote => "remote",
            Self::Origin => "origin",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached value with its freshness bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Epoch millis of the write
    pub written_at: i64,
    pub ttl_ms: u64,
    pub access_count: u64,
    /// Epoch millis of the last read hit
    pub last_accessed_at: i64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, ttl: Duration, now_millis: i64) -> Self {
        Self {
            data,
            written_at: now_millis,
            ttl_ms: ttl.as_millis() as u64,
            access_count: 0,
            last_accessed_at: now_millis,
        }
    }

    /// Live iff `now - written_at <= ttl`.
    #[must_use]
    pub fn is_live(&self, now_millis: i64) -> bool {
        self.age_ms(now_millis) <= self.ttl_ms
    }

    #[must_use]
    pub fn age_ms(&self, now_millis: i64) -> u64 {
        now_millis.saturating_sub(self.written_at).max(0) as u64
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn record_access(&mut self, now_millis: i64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now_millis;
    }
}

/// Glob-style key matcher. `*` matches any run of characters; everything
/// else is literal. A pattern without `*` matches only itself.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Ok(Self {
            raw: pattern.to_string(),
            regex: Regex::new(&format!("^{}$", body))?,
        })
    }

    #[must_use]
    pub fn is_glob(pattern: &str) -> bool {
        pattern.contains('*')
    }

    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
