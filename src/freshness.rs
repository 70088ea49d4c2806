// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event classification and the TTL policy derived from it.
//!
//! TTLs are chosen per *result set*, not per key: a tournament's matches can
//! flip from scheduled to live between two syncs, so every write
//! re-evaluates the batch and the most volatile member wins.
//!
//! | status    | TTL    | Remote freshness |
//! |-----------|--------|------------------|
//! | Live      | 30 s   | 30 s             |
//! | Scheduled | 15 min | 15 min           |
//! | Finished  | 24 h   | 24 h (30 d for past seasons) |
//! | Unknown   | 5 min  | 24 h (30 d for past seasons) |
//!
//! # Example
//!
//! ```
//! use matchday_cache::freshness::{EventStatus, FreshnessPolicy};
//! use std::time::Duration;
//!
//! let policy = FreshnessPolicy::default();
//! let ttl = policy.ttl_for_statuses([EventStatus::Finished, EventStatus::Live, EventStatus::Finished]);
//! assert_eq!(ttl, Duration::from_secs(30));
//! ```

use std::time::Duration;

use chrono::Datelike;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::FreshnessConfig;

/// Domain classification of an event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Live,
    Scheduled,
    Finished,
    Unknown,
}

impl EventStatus {
    /// Precedence rank; lower is more volatile.
    fn rank(self) -> u8 {
        match self {
            Self::Live => 0,
            Self::Scheduled => 1,
            Self::Finished => 2,
            Self::Unknown => 3,
        }
    }

    /// The most volatile status in a set (`Unknown` when empty).
    pub fn dominant<I: IntoIterator<Item = EventStatus>>(statuses: I) -> Self {
        statuses
            .into_iter()
            .min_by_key(|s| s.rank())
            .unwrap_or(Self::Unknown)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Finished => write!(f, "finished"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A record the tiered cache can store.
///
/// Implementors supply the classification the TTL policy runs on, plus
/// optional de-duplication and offline compaction.
pub trait CacheRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn status(&self) -> EventStatus;

    /// Identity used to drop duplicates from origin results.
    fn dedup_key(&self) -> Option<String> {
        None
    }

    /// Size-reduced projection written to the offline store.
    fn compact(&self) -> Self {
        self.clone()
    }

    /// Season the record belongs to, if known.
    fn season_year(&self) -> Option<i32> {
        None
    }
}

/// What the caller knows about the data before it is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessHint {
    pub status: EventStatus,
    pub season_year: Option<i32>,
}

impl FreshnessHint {
    #[must_use]
    pub fn new(status: EventStatus) -> Self {
        Self {
            status,
            season_year: None,
        }
    }

    #[must_use]
    pub fn with_season(mut self, year: i32) -> Self {
        self.season_year = Some(year);
        self
    }

    /// Derive a hint from records already at hand.
    #[must_use]
    pub fn from_records<E: CacheRecord>(records: &[E]) -> Self {
        Self {
            status: EventStatus::dominant(records.iter().map(CacheRecord::status)),
            season_year: records.iter().filter_map(CacheRecord::season_year).max(),
        }
    }
}

impl Default for FreshnessHint {
    fn default() -> Self {
        Self::new(EventStatus::Unknown)
    }
}

/// Maps classifications to TTLs and Remote freshness windows.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    config: FreshnessConfig,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(FreshnessConfig::default())
    }
}

impl FreshnessPolicy {
    #[must_use]
    pub fn new(config: FreshnessConfig) -> Self {
        Self { config }
    }

    /// TTL for a single classification.
    #[must_use]
    pub fn ttl_for_status(&self, status: EventStatus) -> Duration {
        Duration::from_secs(match status {
            EventStatus::Live => self.config.live_ttl_secs,
            EventStatus::Scheduled => self.config.scheduled_ttl_secs,
            EventStatus::Finished => self.config.finished_ttl_secs,
            EventStatus::Unknown => self.config.default_ttl_secs,
        })
    }

    /// TTL for a mixed batch: the most volatile member decides.
    pub fn ttl_for_statuses<I: IntoIterator<Item = EventStatus>>(&self, statuses: I) -> Duration {
        self.ttl_for_status(EventStatus::dominant(statuses))
    }

    /// TTL for a result set about to be cached.
    #[must_use]
    pub fn ttl_for<E: CacheRecord>(&self, records: &[E]) -> Duration {
        self.ttl_for_statuses(records.iter().map(CacheRecord::status))
    }

    /// Maximum age of a Remote-tier row for data described by `hint`.
    #[must_use]
    pub fn remote_threshold(&self, hint: &FreshnessHint, now_millis: i64) -> Duration {
        match hint.status {
            EventStatus::Live => Duration::from_secs(self.config.live_ttl_secs),
            EventStatus::Scheduled => Duration::from_secs(self.config.scheduled_ttl_secs),
            EventStatus::Finished | EventStatus::Unknown => {
                let historical = match (hint.season_year, year_of(now_millis)) {
                    (Some(season), Some(current)) => season < current,
                    _ => false,
                };
                if historical {
                    Duration::from_secs(self.config.historical_remote_secs)
                } else {
                    Duration::from_secs(self.config.finished_ttl_secs)
                }
            }
        }
    }
}

/// Calendar year (UTC) of an epoch-millis instant.
#[must_use]
pub fn year_of(millis: i64) -> Option<i32> {
    chrono::DateTime::from_timestamp_millis(millis).map(|d| d.year())
}
