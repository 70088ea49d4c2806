//! # Matchday Cache
//!
//! Tiered caching and live-channel gating for frequently-changing sports
//! event data (tournaments and matches).
//!
//! ## Architecture
//!
//! Reads walk four tiers, cheapest first, backfilling faster tiers on the
//! way back. Network quality feeds both the read path (offline short-circuit)
//! and the circuit breakers that gate live push channels:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TieredCache::get_with()                   │
//! │  • TTL chosen per result set (live 30s, scheduled 15min...) │
//! │  • Stale rescue when every fresh source fails               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Memory: in-process LRU                   │
//! │  • Byte and entry bounds, explicit TTL per entry            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Durable: TTL cache + offline snapshots          │
//! │  • Any KeyValueStore; oldest-first quota eviction           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │      (skipped when offline)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Remote: shared relational cache                │
//! │  • Rows trusted only within a freshness threshold           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Origin: authoritative API                   │
//! └─────────────────────────────────────────────────────────────┘
//!
//!   NetworkQualityMonitor ──▶ CircuitBreaker ──▶ LiveUpdateSubscriber
//!   (score 0..100, strategy)  (adaptive thresholds) (push or polling)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use matchday_cache::{
//!     system_clock, CacheEngineConfig, EventStatus, FreshnessHint, InMemoryKeyValueStore, Match,
//!     NetworkConfig, NetworkQualityMonitor, OriginClient, OriginError, SportsDataService, Tournament,
//!     TournamentFilter,
//! };
//!
//! struct Api;
//!
//! #[async_trait]
//! impl OriginClient for Api {
//!     async fn fetch_tournaments(&self, _filter: &TournamentFilter) -> Result<Vec<Tournament>, OriginError> {
//!         Ok(Vec::new())
//!     }
//!
//!     async fn fetch_matches(&self, tournament_id: &str) -> Result<Vec<Match>, OriginError> {
//!         Ok(vec![Match::new("m1", tournament_id, "IN_PROGRESS", 0)])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), matchday_cache::CacheError> {
//!     let clock = system_clock();
//!     let monitor = Arc::new(NetworkQualityMonitor::new(NetworkConfig::default(), clock.clone()));
//!     let service = SportsDataService::new(
//!         CacheEngineConfig::default(),
//!         Arc::new(InMemoryKeyValueStore::new()),
//!         None,
//!         Arc::new(Api),
//!         monitor,
//!         clock,
//!     );
//!
//!     let matches = service.get_matches("t1", FreshnessHint::new(EventStatus::Live)).await?;
//!     println!("{} matches from {}", matches.data.len(), matches.tier);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: [`TieredCache`], the read-through orchestrator
//! - [`tiers`]: Memory, Durable and Remote tiers
//! - [`freshness`]: classification and TTL policy
//! - [`network`]: connection quality scoring and change events
//! - [`resilience`]: adaptive circuit breakers
//! - [`live`]: push-channel gating and rate limiting
//! - [`domain`]: tournaments, matches and the service facade
//! - [`storage`]: store contracts and in-memory adapters

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod freshness;
pub mod live;
pub mod metrics;
pub mod network;
pub mod resilience;
pub mod scheduler;
pub mod stats;
pub mod storage;
pub mod tiers;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{merge_config, CacheEngineConfig, ConfigOverride, NetworkConfig};
pub use coordinator::{CacheError, CacheResult, LoadSpec, MaintenanceReport, TieredCache};
pub use domain::{Match, OriginClient, OriginError, SportsDataService, Tournament, TournamentFilter};
pub use freshness::{CacheRecord, EventStatus, FreshnessHint, FreshnessPolicy};
pub use live::{ChannelRateLimiter, LiveMode, LiveUpdateSubscriber, PushChannel};
pub use metrics::LatencyTimer;
pub use network::{ConnectionQuality, ConnectionStrategy, NetworkQualityMonitor, NetworkState, NetworkType};
pub use resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use scheduler::TaskScheduler;
pub use stats::{CacheHealth, HealthStatus, StatsRecorder};
pub use storage::{InMemoryKeyValueStore, InMemoryRemoteStore, KeyValueStore, RemoteQueryStore, StorageError};
pub use tiers::CacheTier;
