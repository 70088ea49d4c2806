//! Chaos testing for the matchday cache.
//!
//! Failure scenarios are driven by:
//! 1. **Failing store wrappers** - error injection at chosen call counts
//! 2. **Flaky origins** - transport errors on a schedule
//! 3. **Data corruption** - garbage blobs planted in the durable store
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde::{Deserialize, Serialize};

use matchday_cache::storage::{RemoteQuery, RemoteRow};
use matchday_cache::{
    CacheEngineConfig, CacheError, CacheRecord, CacheTier, EventStatus, InMemoryKeyValueStore, KeyValueStore,
    LoadSpec, ManualClock, NetworkConfig, NetworkQualityMonitor, OriginError, RemoteQueryStore, SharedClock,
    StorageError, TieredCache,
};

const T0: i64 = 1_780_000_000_000;

// =============================================================================
// Failing Store Wrappers - Precise Error Injection
// =============================================================================

/// Wraps a store and fails calls once a switch is flipped or a call
/// budget is spent.
pub struct FailingKeyValueStore<S: KeyValueStore> {
    inner: S,
    call_count: AtomicU64,
    /// Fail every call after this many succeeded (0 = no budget)
    fail_after: u64,
    failing: AtomicBool,
}

impl<S: KeyValueStore> FailingKeyValueStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            call_count: AtomicU64::new(0),
            fail_after: 0,
            failing: AtomicBool::new(false),
        }
    }

    /// A store that works for `n` calls and then fails permanently.
    pub fn fail_after(inner: S, n: u64) -> Self {
        let mut store = Self::new(inner);
        store.fail_after = n;
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<(), StorageError> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let over_budget = self.fail_after > 0 && count > self.fail_after;
        if over_budget || self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for FailingKeyValueStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.maybe_fail()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.maybe_fail()?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.maybe_fail()?;
        self.inner.delete(key).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        self.maybe_fail()?;
        self.inner.list_keys().await
    }
}

/// Yields before every call so concurrent requests interleave mid-update.
struct YieldingKeyValueStore(InMemoryKeyValueStore);

#[async_trait]
impl KeyValueStore for YieldingKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        tokio::task::yield_now().await;
        self.0.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.0.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.0.delete(key).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        tokio::task::yield_now().await;
        self.0.list_keys().await
    }
}

/// A remote store that is always down.
struct DeadRemote;

#[async_trait]
impl RemoteQueryStore for DeadRemote {
    async fn query(&self, _query: &RemoteQuery) -> Result<Vec<RemoteRow>, StorageError> {
        Err(StorageError::Unavailable("connection refused".into()))
    }
}

/// An origin failing on every call listed in `fail_on` (1-indexed).
struct FlakyOrigin {
    calls: AtomicU64,
    fail_on: Vec<u64>,
}

impl FlakyOrigin {
    fn new(fail_on: Vec<u64>) -> Self {
        Self {
            calls: AtomicU64::new(0),
            fail_on,
        }
    }

    async fn fetch(&self) -> Result<Vec<Score>, OriginError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            Err(OriginError::Transport(format!("call {call} timed out")))
        } else {
            Ok(vec![Score {
                id: format!("s{call}"),
                live: true,
            }])
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Score {
    id: String,
    live: bool,
}

impl CacheRecord for Score {
    fn status(&self) -> EventStatus {
        if self.live {
            EventStatus::Live
        } else {
            EventStatus::Finished
        }
    }
}

fn cache_over(
    kv: Arc<dyn KeyValueStore>,
    remote: Option<Arc<dyn RemoteQueryStore>>,
) -> (TieredCache<Score>, ManualClock) {
    let clock = ManualClock::new(T0);
    let shared: SharedClock = Arc::new(clock.clone());
    let monitor = Arc::new(NetworkQualityMonitor::new(NetworkConfig::default(), Arc::clone(&shared)));
    let cache = TieredCache::new("chaos", CacheEngineConfig::default(), kv, remote, monitor, shared);
    (cache, clock)
}

// =============================================================================
// Store Failures
// =============================================================================

#[tokio::test]
async fn chaos_durable_down_reads_still_served() {
    let kv = Arc::new(FailingKeyValueStore::new(InMemoryKeyValueStore::new()));
    kv.set_failing(true);
    let (cache, _clock) = cache_over(kv.clone(), None);
    let origin = FlakyOrigin::new(vec![]);

    let first = cache.get_with("scores", &LoadSpec::default(), || origin.fetch()).await.unwrap();
    assert_eq!(first.tier, CacheTier::Origin);

    let second = cache.get_with("scores", &LoadSpec::default(), || origin.fetch()).await.unwrap();
    assert_eq!(second.tier, CacheTier::Memory);
    assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn chaos_put_reports_durable_failure_after_memory_write() {
    let kv = Arc::new(FailingKeyValueStore::new(InMemoryKeyValueStore::new()));
    kv.set_failing(true);
    let (cache, _clock) = cache_over(kv.clone(), None);

    let err = cache
        .put("scores", vec![Score { id: "a".into(), live: false }], None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::TierUnavailable {
            tier: CacheTier::Durable,
            ..
        }
    ));
    assert!(cache.memory().contains("scores"));
}

#[tokio::test]
async fn chaos_store_dies_mid_session() {
    // Enough budget for the first read-through and its writes
    let kv = Arc::new(FailingKeyValueStore::fail_after(InMemoryKeyValueStore::new(), 6));
    let (cache, clock) = cache_over(kv.clone(), None);
    let origin = FlakyOrigin::new(vec![2]);

    cache.get_with("scores", &LoadSpec::default(), || origin.fetch()).await.unwrap();
    clock.advance(Duration::from_secs(60));

    // Memory expired, store dead, origin failing: nothing left to rescue
    let err = cache
        .get_with("scores", &LoadSpec::default(), || origin.fetch())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::OriginFailure { .. }));

    // Origin back: served again, store still dead
    let ok = cache.get_with("scores", &LoadSpec::default(), || origin.fetch()).await.unwrap();
    assert_eq!(ok.tier, CacheTier::Origin);
}

#[tokio::test]
async fn chaos_dead_remote_falls_through_to_origin() {
    let (cache, _clock) = cache_over(Arc::new(InMemoryKeyValueStore::new()), Some(Arc::new(DeadRemote)));
    let origin = FlakyOrigin::new(vec![]);

    let result = cache.get_with("scores", &LoadSpec::default(), || origin.fetch()).await.unwrap();
    assert_eq!(result.tier, CacheTier::Origin);
}

#[tokio::test]
async fn chaos_maintenance_survives_store_outage() {
    let kv = Arc::new(FailingKeyValueStore::new(InMemoryKeyValueStore::new()));
    let (cache, clock) = cache_over(kv.clone(), None);
    cache
        .put("scores", vec![Score { id: "a".into(), live: true }], None)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(60));

    kv.set_failing(true);
    let report = cache.run_maintenance().await;
    assert_eq!(report.memory_expired, 1);
    assert_eq!(report.durable.expired, 0);
}

#[tokio::test]
async fn chaos_concurrent_reads_track_every_snapshot() {
    let kv = Arc::new(YieldingKeyValueStore(InMemoryKeyValueStore::new()));
    let (cache, _clock) = cache_over(kv.clone(), None);
    let origin = FlakyOrigin::new(vec![]);

    let spec = LoadSpec::default();
    let (a, b, c, d) = tokio::join!(
        cache.get_with("scores_a", &spec, || origin.fetch()),
        cache.get_with("scores_b", &spec, || origin.fetch()),
        cache.get_with("scores_c", &spec, || origin.fetch()),
        cache.get_with("scores_d", &spec, || origin.fetch()),
    );
    for result in [a, b, c, d] {
        assert_eq!(result.unwrap().tier, CacheTier::Origin);
    }

    let snapshots = kv
        .list_keys()
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.starts_with("offline_"))
        .count();
    assert_eq!(snapshots, 4);
    assert_eq!(cache.storage_usage().await.unwrap().offline_entries, 4);
}

// =============================================================================
// Flaky Origin
// =============================================================================

#[tokio::test]
async fn chaos_flaky_origin_alternates_fresh_and_rescued() {
    let (cache, clock) = cache_over(Arc::new(InMemoryKeyValueStore::new()), None);
    let origin = FlakyOrigin::new(vec![2, 4, 6]);

    let mut tiers = Vec::new();
    for _ in 0..6 {
        let result = cache.get_with("scores", &LoadSpec::default(), || origin.fetch()).await.unwrap();
        tiers.push((result.tier, result.stale));
        clock.advance(Duration::from_secs(31));
    }

    for (i, (tier, stale)) in tiers.iter().enumerate() {
        if i % 2 == 0 {
            assert_eq!((*tier, *stale), (CacheTier::Origin, false), "call {}", i + 1);
        } else {
            assert_eq!((*tier, *stale), (CacheTier::Offline, true), "call {}", i + 1);
        }
    }
}

// =============================================================================
// Data Corruption
// =============================================================================

#[tokio::test]
async fn chaos_corrupted_blobs_are_misses() {
    let kv = Arc::new(InMemoryKeyValueStore::new());
    kv.insert_raw("cache_scores", b"{not json".to_vec());
    kv.insert_raw("offline_scores", vec![0xff, 0x00, 0x13]);
    let (cache, _clock) = cache_over(kv.clone(), None);
    let origin = FlakyOrigin::new(vec![1]);

    // Both copies are garbage: the origin failure has nothing to fall back on
    let err = cache
        .get_with("scores", &LoadSpec::default(), || origin.fetch())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::OriginFailure { .. }));
    assert_eq!(cache.durable().corrupted_count(), 2);

    let ok = cache.get_with("scores", &LoadSpec::default(), || origin.fetch()).await.unwrap();
    assert_eq!(ok.tier, CacheTier::Origin);
}

#[tokio::test]
async fn chaos_corrupted_metadata_index_is_rebuilt() {
    let kv = Arc::new(InMemoryKeyValueStore::new());
    kv.insert_raw("meta_offline_index", b"[[[".to_vec());
    let (cache, _clock) = cache_over(kv.clone(), None);

    cache
        .put("scores", vec![Score { id: "a".into(), live: false }], None)
        .await
        .unwrap();
    let usage = cache.storage_usage().await.unwrap();
    assert_eq!(usage.offline_entries, 1);
    assert_eq!(usage.ttl_entries, 1);
}

// =============================================================================
// Metrics Under Failure
// =============================================================================

#[test]
fn chaos_failures_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let kv = Arc::new(FailingKeyValueStore::new(InMemoryKeyValueStore::new()));
            kv.set_failing(true);
            let (cache, _clock) = cache_over(kv.clone(), None);
            let origin = FlakyOrigin::new(vec![1]);
            let _ = cache.get_with("scores", &LoadSpec::default(), || origin.fetch()).await;
        });
    });

    let snapshot = snapshotter.snapshot().into_vec();
    let counter = |name: &str| -> u64 {
        snapshot
            .iter()
            .filter(|(key, _, _, _)| key.key().name() == name)
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(c) => *c,
                _ => 0,
            })
            .sum()
    };
    assert!(counter("matchday_cache_errors_total") >= 1);
    assert_eq!(counter("matchday_cache_origin_fetches_total"), 1);
}
