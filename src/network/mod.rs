// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Network quality monitoring.
//!
//! [`NetworkQualityMonitor`] holds the current [`NetworkState`] and
//! [`ConnectionQuality`] as one immutable [`NetworkSnapshot`]. Every update
//! (an OS connectivity event via [`handle_network_change`] or an active
//! probe via [`probe_now`]) builds a new snapshot and swaps it in whole, so
//! readers never see a half-applied change.
//!
//! Consumers either register a synchronous listener (circuit breakers do)
//! or hold a `watch::Receiver` for async code.
//!
//! [`handle_network_change`]: NetworkQualityMonitor::handle_network_change
//! [`probe_now`]: NetworkQualityMonitor::probe_now

pub mod quality;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use quality::{backoff_delay, ConnectionQuality, ConnectionStrategy, NetworkState, NetworkType, QualityLevel};

use crate::clock::SharedClock;
use crate::config::NetworkConfig;
use crate::scheduler::{TaskHandle, TaskScheduler};

/// Lightweight reachability request used for active latency probes.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Round-trip time of one request, or `None` if the host is unreachable.
    async fn round_trip(&self) -> Option<Duration>;
}

/// Everything the monitor knows at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSnapshot {
    pub state: NetworkState,
    pub quality: ConnectionQuality,
    /// Last measured round trip, if any
    pub latency: Option<Duration>,
    /// Epoch millis of this snapshot
    pub updated_at: i64,
}

type Listener = Arc<dyn Fn(&NetworkSnapshot) + Send + Sync>;
type ListenerList = Mutex<Vec<(u64, Listener)>>;

/// Handle returned by [`NetworkQualityMonitor::add_change_listener`].
#[must_use = "dropping the subscription keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut list = listeners.lock();
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        list.len() != before
    }
}

pub struct NetworkQualityMonitor {
    config: NetworkConfig,
    clock: SharedClock,
    snapshot: RwLock<Arc<NetworkSnapshot>>,
    tx: watch::Sender<Arc<NetworkSnapshot>>,
    listeners: Arc<ListenerList>,
    next_listener: AtomicU64,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    probe_task: Mutex<Option<TaskHandle>>,
}

impl NetworkQualityMonitor {
    /// A monitor that assumes a connected link of unknown type until told
    /// otherwise.
    pub fn new(config: NetworkConfig, clock: SharedClock) -> Self {
        let state = NetworkState::online(NetworkType::Unknown);
        let initial = Arc::new(NetworkSnapshot {
            state,
            quality: ConnectionQuality::assess(&state, None),
            latency: None,
            updated_at: clock.now_millis(),
        });
        let (tx, _) = watch::channel(Arc::clone(&initial));
        Self {
            config,
            clock,
            snapshot: RwLock::new(initial),
            tx,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(1),
            probe: None,
            probe_task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn snapshot(&self) -> Arc<NetworkSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    #[must_use]
    pub fn get_current_quality(&self) -> ConnectionQuality {
        self.snapshot.read().quality
    }

    #[must_use]
    pub fn get_current_state(&self) -> NetworkState {
        self.snapshot.read().state
    }

    /// Not connected, or connected to nothing.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.snapshot.read().state.is_offline()
    }

    /// Async view of every future snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<NetworkSnapshot>> {
        self.tx.subscribe()
    }

    /// Register a callback run after every snapshot change. A panicking
    /// listener is logged and does not stop the others.
    pub fn add_change_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkSnapshot) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        self.listeners.lock().push((id, listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // UPDATES
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply an OS connectivity event. The last latency sample is kept
    /// while connected.
    pub fn handle_network_change(&self, state: NetworkState) {
        let latency = if state.is_offline() {
            None
        } else {
            self.snapshot.read().latency
        };
        self.publish(state, latency);
    }

    /// Apply a measured round trip (`None` = unreachable).
    pub fn record_probe_result(&self, latency: Option<Duration>) {
        let mut state = self.get_current_state();
        if state.is_offline() {
            debug!("Ignoring probe result while offline");
            return;
        }
        state.internet_reachable = latency.is_some();
        self.publish(state, latency);
    }

    /// Run one active probe now. No-op without a configured probe.
    pub async fn probe_now(&self) -> Option<ConnectionQuality> {
        let probe = self.probe.as_ref().map(Arc::clone)?;
        let latency = probe.round_trip().await;
        debug!(latency_ms = latency.map(|d| d.as_millis() as u64), "Reachability probe complete");
        self.record_probe_result(latency);
        Some(self.get_current_quality())
    }

    fn publish(&self, state: NetworkState, latency: Option<Duration>) {
        let next = Arc::new(NetworkSnapshot {
            state,
            quality: ConnectionQuality::assess(&state, latency),
            latency,
            updated_at: self.clock.now_millis(),
        });
        let previous = {
            let mut guard = self.snapshot.write();
            std::mem::replace(&mut *guard, Arc::clone(&next))
        };

        if previous.quality.level != next.quality.level || previous.state != next.state {
            info!(
                network = %next.state.kind,
                connected = next.state.connected,
                score = next.quality.score,
                level = %next.quality.level,
                previous_level = %previous.quality.level,
                "Network quality changed"
            );
        }
        crate::metrics::set_network_connected(!next.state.is_offline());
        crate::metrics::set_connection_quality(next.quality.score);

        self.tx.send_replace(Arc::clone(&next));
        self.notify(&next);
    }

    fn notify(&self, snapshot: &NetworkSnapshot) {
        // Callbacks run outside the lock so they may (un)register listeners
        let listeners: Vec<(u64, Listener)> = self.listeners.lock().clone();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                warn!(listener = id, "Network change listener panicked");
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BACKOFF
    // ═══════════════════════════════════════════════════════════════════════

    /// `min(max(base * 2^attempt * jitter, 1s), max)` with jitter drawn from
    /// the configured range.
    pub fn get_exponential_backoff_delay(&self, attempt: u32, base: Duration, max: Duration) -> Duration {
        let (lo, hi) = (self.config.jitter_min, self.config.jitter_max);
        let jitter = if lo < hi {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        backoff_delay(
            attempt,
            base,
            max,
            jitter,
            Duration::from_millis(self.config.min_backoff_ms),
        )
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Start periodic probing on `scheduler`. Replaces any earlier probe task.
    pub fn start(self: &Arc<Self>, scheduler: &TaskScheduler) {
        if self.probe.is_none() {
            debug!("No reachability probe configured, periodic probing disabled");
            return;
        }
        let weak = Arc::downgrade(self);
        let handle = scheduler.schedule_repeating(Duration::from_secs(self.config.probe_interval_secs), move || {
            let weak = weak.clone();
            async move {
                if let Some(monitor) = weak.upgrade() {
                    monitor.probe_now().await;
                }
            }
        });
        if let Some(old) = self.probe_task.lock().replace(handle) {
            scheduler.cancel(old);
        }
    }

    /// Cancel periodic probing.
    pub fn stop(&self, scheduler: &TaskScheduler) {
        if let Some(handle) = self.probe_task.lock().take() {
            scheduler.cancel(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn monitor() -> NetworkQualityMonitor {
        NetworkQualityMonitor::new(NetworkConfig::default(), Arc::new(ManualClock::new(0)))
    }

    struct FixedProbe(Option<Duration>);

    #[async_trait]
    impl ReachabilityProbe for FixedProbe {
        async fn round_trip(&self) -> Option<Duration> {
            self.0
        }
    }

    #[test]
    fn test_initial_state_assumes_connected() {
        let m = monitor();
        assert!(!m.is_offline());
        assert_eq!(m.get_current_state().kind, NetworkType::Unknown);
        assert_eq!(m.get_current_quality().score, 45);
    }

    #[test]
    fn test_network_change_replaces_snapshot() {
        let m = monitor();
        m.handle_network_change(NetworkState::online(NetworkType::Wifi));
        assert_eq!(m.get_current_quality().score, 80);

        m.handle_network_change(NetworkState::offline());
        assert!(m.is_offline());
        assert_eq!(m.get_current_quality().recommendation, ConnectionStrategy::OfflineMode);
    }

    #[test]
    fn test_connected_to_none_is_offline() {
        let m = monitor();
        m.handle_network_change(NetworkState {
            connected: true,
            kind: NetworkType::None,
            internet_reachable: false,
        });
        assert!(m.is_offline());
    }

    #[test]
    fn test_listeners_notified_and_unsubscribed() {
        let m = monitor();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let sub = m.add_change_listener(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        m.handle_network_change(NetworkState::online(NetworkType::Cellular));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(sub.unsubscribe());
        m.handle_network_change(NetworkState::online(NetworkType::Wifi));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(m.listener_count(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let m = monitor();
        let seen = Arc::new(AtomicUsize::new(0));
        let _bad = m.add_change_listener(|_| panic!("listener failure"));
        let seen_clone = Arc::clone(&seen);
        let _good = m.add_change_listener(move |s| {
            assert_eq!(s.state.kind, NetworkType::Ethernet);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        m.handle_network_change(NetworkState::online(NetworkType::Ethernet));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watch_receiver_sees_updates() {
        let m = monitor();
        let mut rx = m.subscribe();
        m.handle_network_change(NetworkState::online(NetworkType::Wifi));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state.kind, NetworkType::Wifi);
    }

    #[tokio::test]
    async fn test_probe_updates_latency() {
        let m = monitor().with_probe(Arc::new(FixedProbe(Some(Duration::from_millis(50)))));
        m.handle_network_change(NetworkState::online(NetworkType::Wifi));
        let q = m.probe_now().await.unwrap();
        assert_eq!(q.score, 100);
        assert_eq!(m.snapshot().latency, Some(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_unreachable_probe_caps_score() {
        let m = monitor().with_probe(Arc::new(FixedProbe(None)));
        m.handle_network_change(NetworkState::online(NetworkType::Wifi));
        let q = m.probe_now().await.unwrap();
        assert_eq!(q.score, 15);
        assert!(!m.get_current_state().internet_reachable);
    }

    #[tokio::test]
    async fn test_probe_without_probe_is_noop() {
        assert!(monitor().probe_now().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_probe_runs_and_stops() {
        let scheduler = TaskScheduler::new("network-test");
        let m = Arc::new(monitor().with_probe(Arc::new(FixedProbe(Some(Duration::from_millis(10))))));
        m.handle_network_change(NetworkState::online(NetworkType::Cellular));
        m.start(&scheduler);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(m.snapshot().latency, Some(Duration::from_millis(10)));

        m.stop(&scheduler);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_backoff_respects_bounds() {
        let m = monitor();
        for attempt in 0..20 {
            let d = m.get_exponential_backoff_delay(attempt, Duration::from_millis(500), Duration::from_secs(30));
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_secs(30));
        }
    }
}
