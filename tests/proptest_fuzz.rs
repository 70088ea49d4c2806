//! Property-based tests for cache and resilience invariants.
//!
//! Uses proptest to generate operation sequences, timings and malformed
//! stored data, and checks the invariants hold and nothing panics.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde::{Deserialize, Serialize};

use matchday_cache::config::{AdaptiveCircuitConfig, DurableConfig, MemoryConfig};
use matchday_cache::network::backoff_delay;
use matchday_cache::tiers::{DurableLookup, DurableTier, MemoryTier};
use matchday_cache::{
    CacheRecord, CircuitBreaker, CircuitState, ConnectionQuality, ConnectionStrategy, EventStatus, FreshnessPolicy,
    InMemoryKeyValueStore, ManualClock, NetworkConfig, NetworkQualityMonitor, NetworkState, NetworkType,
    SharedClock, TaskScheduler,
};

// =============================================================================
// Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum LruOp {
    Set(u8),
    Get(u8),
}

fn lru_op_strategy() -> impl Strategy<Value = LruOp> {
    prop_oneof![
        (0u8..12).prop_map(LruOp::Set),
        (0u8..12).prop_map(LruOp::Get),
    ]
}

fn status_strategy() -> impl Strategy<Value = EventStatus> {
    prop_oneof![
        Just(EventStatus::Live),
        Just(EventStatus::Scheduled),
        Just(EventStatus::Finished),
        Just(EventStatus::Unknown),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Rec(EventStatus);

impl CacheRecord for Rec {
    fn status(&self) -> EventStatus {
        self.0
    }
}

fn clock_at(millis: i64) -> (ManualClock, SharedClock) {
    let clock = ManualClock::new(millis);
    let shared: SharedClock = Arc::new(clock.clone());
    (clock, shared)
}

// =============================================================================
// Memory Tier
// =============================================================================

proptest! {
    #[test]
    fn memory_matches_lru_model(cap in 1usize..6, ops in prop::collection::vec(lru_op_strategy(), 1..80)) {
        let (_clock, shared) = clock_at(0);
        let tier: MemoryTier<u8> = MemoryTier::new(
            MemoryConfig { max_bytes: usize::MAX / 2, max_entries: cap },
            shared,
        );
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                LruOp::Set(k) => {
                    prop_assert!(tier.set(&k.to_string(), k, Duration::from_secs(60)));
                    model.retain(|m| *m != k);
                    while model.len() + 1 > cap {
                        model.pop_front();
                    }
                    model.push_back(k);
                }
                LruOp::Get(k) => {
                    let hit = tier.get(&k.to_string());
                    let expected = model.contains(&k);
                    prop_assert_eq!(hit.is_some(), expected);
                    if expected {
                        model.retain(|m| *m != k);
                        model.push_back(k);
                    }
                }
            }
            prop_assert!(tier.len() <= cap);
        }

        for k in 0u8..12 {
            prop_assert_eq!(tier.contains(&k.to_string()), model.contains(&k));
        }
    }

    #[test]
    fn memory_expired_reads_are_absent_and_idempotent(ttl_ms in 0u64..100_000, past in 1u64..100_000) {
        let (clock, shared) = clock_at(1_000_000);
        let tier: MemoryTier<String> = MemoryTier::new(MemoryConfig::default(), shared);
        tier.set("k", "v".into(), Duration::from_millis(ttl_ms));

        clock.advance(Duration::from_millis(ttl_ms + past));
        prop_assert!(tier.get("k").is_none());
        prop_assert!(!tier.contains("k"));
        prop_assert!(tier.get("k").is_none());
    }

    #[test]
    fn memory_byte_budget_holds(sizes in prop::collection::vec(1usize..400, 1..40)) {
        let (_clock, shared) = clock_at(0);
        let budget = 2_000;
        let tier: MemoryTier<String> = MemoryTier::new(
            MemoryConfig { max_bytes: budget, max_entries: 1_000 },
            shared,
        );
        for (i, size) in sizes.into_iter().enumerate() {
            tier.set(&format!("k{i}"), "x".repeat(size), Duration::from_secs(60));
            prop_assert!(tier.stats().bytes <= budget);
        }
    }
}

// =============================================================================
// Freshness Policy
// =============================================================================

proptest! {
    #[test]
    fn live_member_always_wins(mut batch in prop::collection::vec(status_strategy(), 0..20), at in 0usize..20) {
        let policy = FreshnessPolicy::default();
        let at = at.min(batch.len());
        batch.insert(at, EventStatus::Live);
        let records: Vec<Rec> = batch.into_iter().map(Rec).collect();
        prop_assert_eq!(policy.ttl_for(&records), Duration::from_secs(30));
    }

    #[test]
    fn batch_ttl_never_exceeds_a_classified_member(batch in prop::collection::vec(status_strategy(), 1..20)) {
        let policy = FreshnessPolicy::default();
        let records: Vec<Rec> = batch.iter().copied().map(Rec).collect();
        let ttl = policy.ttl_for(&records);
        for status in batch.into_iter().filter(|s| *s != EventStatus::Unknown) {
            prop_assert!(ttl <= policy.ttl_for_status(status));
        }
    }
}

// =============================================================================
// Network Quality and Backoff
// =============================================================================

proptest! {
    #[test]
    fn strategy_follows_score_bands(score in any::<u8>()) {
        let quality = ConnectionQuality::from_score(score);
        let expected = match score.min(100) {
            80.. => ConnectionStrategy::AggressiveWebsocket,
            60..=79 => ConnectionStrategy::StandardWebsocket,
            40..=59 => ConnectionStrategy::ConservativeWebsocket,
            20..=39 => ConnectionStrategy::PollingOnly,
            _ => ConnectionStrategy::OfflineMode,
        };
        prop_assert!(quality.score <= 100);
        prop_assert_eq!(quality.recommendation, expected);
    }

    #[test]
    fn backoff_is_bounded(
        attempt in 0u32..80,
        base_ms in 0u64..60_000,
        max_ms in 1_000u64..600_000,
        jitter in 0.85f64..1.15,
    ) {
        let delay = backoff_delay(
            attempt,
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
            jitter,
            Duration::from_millis(1_000),
        );
        prop_assert!(delay <= Duration::from_millis(max_ms));
        prop_assert!(delay >= Duration::from_millis(1_000));
    }

    #[test]
    fn backoff_grows_with_attempts(attempt in 0u32..10, base_ms in 1_000u64..5_000) {
        let at = |n| backoff_delay(
            n,
            Duration::from_millis(base_ms),
            Duration::from_secs(3_600),
            1.0,
            Duration::from_millis(1_000),
        );
        prop_assert!(at(attempt + 1) >= at(attempt));
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

proptest! {
    #[test]
    fn breaker_opens_exactly_on_threshold_run(outcomes in prop::collection::vec(any::<bool>(), 1..60)) {
        let (_clock, shared) = clock_at(1_000_000);
        let monitor = Arc::new(NetworkQualityMonitor::new(NetworkConfig::default(), Arc::clone(&shared)));
        monitor.handle_network_change(NetworkState::online(NetworkType::Wifi));
        // No runtime: recovery timers are inert, the clock alone drives recovery
        let cb = CircuitBreaker::new(
            "prop",
            AdaptiveCircuitConfig::default(),
            shared,
            monitor,
            Arc::new(TaskScheduler::new("prop")),
        );
        let threshold = cb.failure_threshold();

        let mut run = 0u32;
        for ok in outcomes {
            if cb.state() == CircuitState::Open {
                break;
            }
            if ok {
                cb.on_success();
                run = 0;
            } else {
                cb.on_failure();
                run += 1;
            }
            prop_assert_eq!(cb.state() == CircuitState::Open, run >= threshold);
        }
    }
}

// =============================================================================
// Durable Tier Corruption
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn durable_never_panics_on_garbage(blob in prop::collection::vec(any::<u8>(), 0..256)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let store = Arc::new(InMemoryKeyValueStore::new());
            store.insert_raw("cache_k", blob.clone());
            store.insert_raw("offline_k", blob.clone());
            store.insert_raw("meta_offline_index", blob);

            let (_clock, shared) = clock_at(1_000_000);
            let tier = DurableTier::new(store, DurableConfig::default(), shared);

            let lookup = tier.lookup::<Vec<String>>("k").await;
            prop_assert!(lookup.is_ok());
            let offline = tier.get_offline::<Vec<String>>("k").await;
            prop_assert!(offline.is_ok());
            prop_assert!(tier.cleanup_expired().await.is_ok());
            prop_assert!(tier.get_storage_usage().await.is_ok());

            // A second read after cleanup must still not error
            let again = tier.lookup::<Vec<String>>("k").await;
            prop_assert!(matches!(again, Ok(DurableLookup::Missing | DurableLookup::Fresh(_) | DurableLookup::Expired(_))));
            Ok(())
        })?;
    }
}
