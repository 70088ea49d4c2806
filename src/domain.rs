// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sports records and the service facade over their caches.
//!
//! [`SportsDataService`] owns one [`TieredCache`] per record type and the
//! [`OriginClient`] behind them. Keys follow two conventions:
//!
//! - `tournaments_<hash>`: a tournament listing, hashed from its filter
//! - `matches_<tournament id>`: every match of one tournament

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::clock::SharedClock;
use crate::config::CacheEngineConfig;
use crate::coordinator::{CacheError, CacheResult, LoadSpec, MaintenanceReport, TieredCache};
use crate::freshness::{year_of, CacheRecord, EventStatus, FreshnessHint};
use crate::network::NetworkQualityMonitor;
use crate::scheduler::TaskScheduler;
use crate::storage::traits::{KeyValueStore, QueryFilter, RemoteQueryStore};

const DAY_MS: i64 = 86_400_000;

/// Origin failures. A well-formed empty answer is `Ok(vec![])`, not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OriginError {
    /// Could not reach the origin or it timed out
    #[error("transport error: {0}")]
    Transport(String),

    /// The origin answered with something unusable
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════

fn unknown_status() -> EventStatus {
    EventStatus::Unknown
}

/// A tournament as listed by the origin.
///
/// `status` is derived from the date window at fetch time, see
/// [`Tournament::classify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: String,
    pub name: String,
    /// First day, epoch millis (UTC midnight)
    pub start_date: i64,
    /// Last day, epoch millis (UTC midnight)
    pub end_date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "unknown_status")]
    pub status: EventStatus,
}

impl Tournament {
    pub fn new(id: impl Into<String>, name: impl Into<String>, start_date: i64, end_date: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            start_date,
            end_date,
            region: None,
            venue: None,
            description: None,
            status: EventStatus::Unknown,
        }
    }

    /// Live from the first day through the end of the last day.
    #[must_use]
    pub fn classify(&self, now_millis: i64) -> EventStatus {
        if self.end_date < self.start_date {
            EventStatus::Unknown
        } else if now_millis < self.start_date {
            EventStatus::Scheduled
        } else if now_millis < self.end_date + DAY_MS {
            EventStatus::Live
        } else {
            EventStatus::Finished
        }
    }

    #[must_use]
    pub fn classified(mut self, now_millis: i64) -> Self {
        self.status = self.classify(now_millis);
        self
    }
}

impl CacheRecord for Tournament {
    fn status(&self) -> EventStatus {
        self.status
    }

    fn dedup_key(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn compact(&self) -> Self {
        Self {
            description: None,
            ..self.clone()
        }
    }

    fn season_year(&self) -> Option<i32> {
        year_of(self.start_date)
    }
}

/// A single match within a tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub tournament_id: String,
    /// Origin status code, e.g. `"IN_PROGRESS"`, `"SCHEDULED"`, `"FINAL"`
    pub status_code: String,
    /// Scheduled start, epoch millis
    pub scheduled_at: i64,
    pub home: String,
    pub away: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub court: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub officials: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Match {
    pub fn new(
        id: impl Into<String>,
        tournament_id: impl Into<String>,
        status_code: impl Into<String>,
        scheduled_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            tournament_id: tournament_id.into(),
            status_code: status_code.into(),
            scheduled_at,
            home: String::new(),
            away: String::new(),
            home_score: None,
            away_score: None,
            court: None,
            officials: Vec::new(),
            notes: None,
        }
    }

    #[must_use]
    pub fn with_teams(mut self, home: impl Into<String>, away: impl Into<String>) -> Self {
        self.home = home.into();
        self.away = away.into();
        self
    }

    /// Map an origin status code to a classification. Case-insensitive.
    #[must_use]
    pub fn classify_code(code: &str) -> EventStatus {
        match code.trim().to_ascii_uppercase().as_str() {
            "LIVE" | "IN_PROGRESS" | "INPROGRESS" | "STARTED" | "HALFTIME" | "SUSPENDED" => EventStatus::Live,
            "SCHEDULED" | "NOT_STARTED" | "PENDING" | "DELAYED" => EventStatus::Scheduled,
            "FINAL" | "FINISHED" | "COMPLETED" | "CANCELLED" | "FORFEIT" => EventStatus::Finished,
            _ => EventStatus::Unknown,
        }
    }
}

impl CacheRecord for Match {
    fn status(&self) -> EventStatus {
        Self::classify_code(&self.status_code)
    }

    fn dedup_key(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn compact(&self) -> Self {
        Self {
            officials: Vec::new(),
            notes: None,
            ..self.clone()
        }
    }

    fn season_year(&self) -> Option<i32> {
        year_of(self.scheduled_at)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ORIGIN
// ═══════════════════════════════════════════════════════════════════════════

/// Narrows a tournament listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TournamentFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl TournamentFilter {
    /// Stable cache key: `tournaments_` plus the first 16 hex chars of the
    /// SHA-256 of the filter's JSON form.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        format!("tournaments_{}", &hex::encode(digest)[..16])
    }

    fn query_filters(&self) -> Vec<QueryFilter> {
        let mut filters = Vec::new();
        if let Some(season) = self.season {
            filters.push(QueryFilter::eq("season", season));
        }
        if let Some(region) = &self.region {
            filters.push(QueryFilter::eq("region", region.as_str()));
        }
        filters
    }
}

/// The authoritative, slow source of tournaments and matches.
#[async_trait]
pub trait OriginClient: Send + Sync {
    async fn fetch_tournaments(&self, filter: &TournamentFilter) -> Result<Vec<Tournament>, OriginError>;

    async fn fetch_matches(&self, tournament_id: &str) -> Result<Vec<Match>, OriginError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// SERVICE
// ═══════════════════════════════════════════════════════════════════════════

#[must_use]
pub fn matches_key(tournament_id: &str) -> String {
    format!("matches_{tournament_id}")
}

/// Tournament and match access through two tiered caches.
pub struct SportsDataService {
    tournaments: Arc<TieredCache<Tournament>>,
    matches: Arc<TieredCache<Match>>,
    origin: Arc<dyn OriginClient>,
    clock: SharedClock,
}

impl SportsDataService {
    /// Both caches share `kv_store` and its offline index lock. The remote
    /// store, if any, is queried under the `tournaments` and `matches`
    /// collections.
    pub fn new(
        config: CacheEngineConfig,
        kv_store: Arc<dyn KeyValueStore>,
        remote_store: Option<Arc<dyn RemoteQueryStore>>,
        origin: Arc<dyn OriginClient>,
        monitor: Arc<NetworkQualityMonitor>,
        clock: SharedClock,
    ) -> Self {
        let tournaments = TieredCache::new(
            "tournaments",
            config.clone(),
            Arc::clone(&kv_store),
            remote_store.clone(),
            Arc::clone(&monitor),
            Arc::clone(&clock),
        );
        let index_lock = Arc::clone(tournaments.durable().index_lock());
        let matches = TieredCache::new("matches", config, kv_store, remote_store, monitor, Arc::clone(&clock))
            .with_offline_index_lock(index_lock);
        Self {
            tournaments: Arc::new(tournaments),
            matches: Arc::new(matches),
            origin,
            clock,
        }
    }

    #[must_use]
    pub fn tournaments_cache(&self) -> &Arc<TieredCache<Tournament>> {
        &self.tournaments
    }

    #[must_use]
    pub fn matches_cache(&self) -> &Arc<TieredCache<Match>> {
        &self.matches
    }

    /// Tournament listing for `filter`. Origin results are classified
    /// against the current clock before they are cached.
    pub async fn get_tournaments(&self, filter: &TournamentFilter) -> Result<CacheResult<Tournament>, CacheError> {
        let key = filter.cache_key();
        let mut hint = FreshnessHint::default();
        if let Some(season) = filter.season {
            hint = hint.with_season(season);
        }
        let mut spec = LoadSpec::new(hint).with_collection("tournaments");
        spec.filters = filter.query_filters();

        let origin = Arc::clone(&self.origin);
        let now = self.clock.now_millis();
        self.tournaments
            .get_with(&key, &spec, || async move {
                let listing = origin.fetch_tournaments(filter).await?;
                Ok::<_, OriginError>(listing.into_iter().map(|t| t.classified(now)).collect())
            })
            .await
    }

    /// Every match of one tournament. `hint` describes what the caller
    /// expects (for example `Live` while the tournament is running).
    pub async fn get_matches(&self, tournament_id: &str, hint: FreshnessHint) -> Result<CacheResult<Match>, CacheError> {
        let key = matches_key(tournament_id);
        let spec = LoadSpec::new(hint)
            .with_collection("matches")
            .with_filter(QueryFilter::eq("tournament_id", tournament_id));
        let origin = Arc::clone(&self.origin);
        self.matches
            .get_with(&key, &spec, || async move { origin.fetch_matches(tournament_id).await })
            .await
    }

    /// Force the next read of a tournament's matches past Memory and Durable.
    pub async fn invalidate_tournament(&self, tournament_id: &str) -> Result<usize, CacheError> {
        let removed = self.matches.invalidate(&matches_key(tournament_id)).await?;
        debug!(tournament_id, removed, "Tournament matches invalidated");
        Ok(removed)
    }

    /// Drop every cached tournament listing.
    pub async fn invalidate_tournament_listings(&self) -> Result<usize, CacheError> {
        self.tournaments.invalidate("tournaments_*").await
    }

    pub async fn run_maintenance(&self) -> (MaintenanceReport, MaintenanceReport) {
        let tournaments = self.tournaments.run_maintenance().await;
        let matches = self.matches.run_maintenance().await;
        (tournaments, matches)
    }

    pub fn start_background_tasks(&self, scheduler: &TaskScheduler) {
        self.tournaments.start_background_tasks(scheduler);
        self.matches.start_background_tasks(scheduler);
    }

    pub fn stop_background_tasks(&self, scheduler: &TaskScheduler) {
        self.tournaments.stop_background_tasks(scheduler);
        self.matches.stop_background_tasks(scheduler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::NetworkConfig;
    use crate::storage::memory::InMemoryKeyValueStore;
    use crate::tiers::CacheTier;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // 2026-03-10T00:00:00Z
    const MARCH_10: i64 = 1_773_100_800_000;

    struct ScriptedOrigin {
        tournaments: Vec<Tournament>,
        matches: Mutex<Result<Vec<Match>, OriginError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OriginClient for ScriptedOrigin {
        async fn fetch_tournaments(&self, _filter: &TournamentFilter) -> Result<Vec<Tournament>, OriginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tournaments.clone())
        }

        async fn fetch_matches(&self, _tournament_id: &str) -> Result<Vec<Match>, OriginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.matches.lock().clone()
        }
    }

    fn service(origin: Arc<ScriptedOrigin>, clock: &ManualClock) -> SportsDataService {
        let shared: SharedClock = Arc::new(clock.clone());
        let monitor = Arc::new(NetworkQualityMonitor::new(NetworkConfig::default(), Arc::clone(&shared)));
        SportsDataService::new(
            CacheEngineConfig::default(),
            Arc::new(InMemoryKeyValueStore::new()),
            None,
            origin,
            monitor,
            shared,
        )
    }

    #[test]
    fn test_tournament_classification() {
        let t = Tournament::new("t1", "Spring Open", MARCH_10, MARCH_10 + 2 * DAY_MS);
        assert_eq!(t.classify(MARCH_10 - 1), EventStatus::Scheduled);
        assert_eq!(t.classify(MARCH_10), EventStatus::Live);
        assert_eq!(t.classify(MARCH_10 + 3 * DAY_MS - 1), EventStatus::Live);
        assert_eq!(t.classify(MARCH_10 + 3 * DAY_MS), EventStatus::Finished);

        let broken = Tournament::new("t2", "Bad dates", MARCH_10, MARCH_10 - DAY_MS);
        assert_eq!(broken.classify(MARCH_10), EventStatus::Unknown);
    }

    #[test]
    fn test_match_status_codes() {
        assert_eq!(Match::classify_code("in_progress"), EventStatus::Live);
        assert_eq!(Match::classify_code("SCHEDULED"), EventStatus::Scheduled);
        assert_eq!(Match::classify_code(" Final "), EventStatus::Finished);
        assert_eq!(Match::classify_code("???"), EventStatus::Unknown);
    }

    #[test]
    fn test_match_compact_drops_extras() {
        let mut m = Match::new("m1", "t1", "FINAL", MARCH_10).with_teams("Hawks", "Owls");
        m.notes = Some("rain delay".into());
        m.officials = vec!["ref".into()];
        let compact = m.compact();
        assert!(compact.notes.is_none());
        assert!(compact.officials.is_empty());
        assert_eq!(compact.home, "Hawks");
        assert_eq!(compact.season_year(), Some(2026));
    }

    #[test]
    fn test_filter_keys_are_stable_and_distinct() {
        let all = TournamentFilter::default();
        let season = TournamentFilter {
            season: Some(2025),
            region: None,
        };
        assert_eq!(all.cache_key(), TournamentFilter::default().cache_key());
        assert_ne!(all.cache_key(), season.cache_key());
        assert!(all.cache_key().starts_with("tournaments_"));
        assert_eq!(all.cache_key().len(), "tournaments_".len() + 16);
    }

    #[tokio::test]
    async fn test_tournaments_are_classified_on_fetch() {
        let clock = ManualClock::new(MARCH_10 + DAY_MS);
        let origin = Arc::new(ScriptedOrigin {
            tournaments: vec![Tournament::new("t1", "Spring Open", MARCH_10, MARCH_10 + 2 * DAY_MS)],
            matches: Mutex::new(Ok(Vec::new())),
            calls: AtomicUsize::new(0),
        });
        let svc = service(Arc::clone(&origin), &clock);

        let result = svc.get_tournaments(&TournamentFilter::default()).await.unwrap();
        assert_eq!(result.tier, CacheTier::Origin);
        assert_eq!(result.data[0].status, EventStatus::Live);

        let again = svc.get_tournaments(&TournamentFilter::default()).await.unwrap();
        assert_eq!(again.tier, CacheTier::Memory);
        assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_tournament_forces_refetch() {
        let clock = ManualClock::new(MARCH_10);
        let origin = Arc::new(ScriptedOrigin {
            tournaments: Vec::new(),
            matches: Mutex::new(Ok(vec![Match::new("m1", "t1", "SCHEDULED", MARCH_10 + DAY_MS)])),
            calls: AtomicUsize::new(0),
        });
        let svc = service(Arc::clone(&origin), &clock);
        let hint = FreshnessHint::new(EventStatus::Scheduled);

        svc.get_matches("t1", hint).await.unwrap();
        assert_eq!(svc.invalidate_tournament("t1").await.unwrap(), 2);

        let refetched = svc.get_matches("t1", hint).await.unwrap();
        assert_eq!(refetched.tier, CacheTier::Origin);
        assert_eq!(origin.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_origin_failure_falls_back_to_offline_snapshot() {
        let clock = ManualClock::new(MARCH_10);
        let origin = Arc::new(ScriptedOrigin {
            tournaments: Vec::new(),
            matches: Mutex::new(Ok(vec![Match::new("m1", "t1", "IN_PROGRESS", MARCH_10)])),
            calls: AtomicUsize::new(0),
        });
        let svc = service(Arc::clone(&origin), &clock);
        let hint = FreshnessHint::new(EventStatus::Live);

        svc.get_matches("t1", hint).await.unwrap();
        svc.invalidate_tournament("t1").await.unwrap();
        *origin.matches.lock() = Err(OriginError::Transport("timeout".into()));

        let fallback = svc.get_matches("t1", hint).await.unwrap();
        assert_eq!(fallback.tier, CacheTier::Offline);
        assert!(fallback.stale);
        assert!(fallback.from_cache);
        assert_eq!(fallback.data[0].id, "m1");
    }

    #[test]
    fn test_caches_share_one_offline_index_lock() {
        let clock = ManualClock::new(MARCH_10);
        let origin = Arc::new(ScriptedOrigin {
            tournaments: Vec::new(),
            matches: Mutex::new(Ok(Vec::new())),
            calls: AtomicUsize::new(0),
        });
        let svc = service(origin, &clock);
        assert!(Arc::ptr_eq(
            svc.tournaments_cache().durable().index_lock(),
            svc.matches_cache().durable().index_lock(),
        ));
    }
}
