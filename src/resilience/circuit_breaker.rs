// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Network-aware circuit breaker for live-update channels.
//!
//! Gates attempts to (re)open a push channel for a service. The failure
//! threshold and recovery timeout are not fixed: both are retuned from the
//! current [`NetworkQualityMonitor`] reading.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Channel unhealthy, requests fail-fast until the recovery timeout elapses
//! - HalfOpen: Testing if the channel recovered, `success_threshold` successes close it
//!
//! Threshold adaptation:
//! - base per network type (cellular tolerates more than wifi)
//! - quality < 30 → ×1.5, quality > 80 → ×0.8
//!
//! A failure while half-open re-opens with the timeout doubled (capped at
//! `max_timeout`). A quality jump of more than `quality_jump_reset` points
//! while open resets the breaker to a fresh closed state.
//!
//! Nothing here returns an error: [`CircuitBreaker::can_execute`] returning
//! `false` is the only signal, meaning "use polling".

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::AdaptiveCircuitConfig;
use crate::network::{ConnectionStrategy, NetworkQualityMonitor, NetworkSnapshot, NetworkType, Subscription};
use crate::scheduler::{TaskHandle, TaskScheduler};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerStats {
    pub failures: u64,
    pub successes: u64,
    pub rejections: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_at: Option<i64>,
    pub last_success_at: Option<i64>,
    pub state: CircuitState,
    pub recovery_timeout: Duration,
    pub failure_threshold: u32,
    pub network_type: NetworkType,
    pub connection_quality: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitRecommendation {
    pub should_execute: bool,
    pub reason: String,
    /// Set whenever the circuit is not closed: prefer polling over push
    pub fallback_suggested: bool,
    pub connection_strategy: ConnectionStrategy,
}

struct BreakerState {
    state: CircuitState,
    failures: u64,
    successes: u64,
    rejections: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<i64>,
    last_success_at: Option<i64>,
    opened_at: Option<i64>,
    recovery_timeout: Duration,
    network_type: NetworkType,
    quality: u8,
    recovery_task: Option<TaskHandle>,
    /// Bumped on every transition; stale timers compare and bail
    generation: u64,
}

impl BreakerState {
    fn fresh(config: &AdaptiveCircuitConfig, snapshot: &NetworkSnapshot) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            rejections: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            last_success_at: None,
            opened_at: None,
            recovery_timeout: config.recovery_timeout(),
            network_type: snapshot.state.kind,
            quality: snapshot.quality.score,
            recovery_task: None,
            generation: 0,
        }
    }
}

/// A per-service circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: AdaptiveCircuitConfig,
    clock: SharedClock,
    monitor: Arc<NetworkQualityMonitor>,
    scheduler: Arc<TaskScheduler>,
    me: Weak<CircuitBreaker>,
    inner: Mutex<BreakerState>,
    subscription: Mutex<Option<Subscription>>,
}

impl CircuitBreaker {
    /// Create a breaker and attach it to the monitor's change events.
    pub fn new(
        name: impl Into<String>,
        config: AdaptiveCircuitConfig,
        clock: SharedClock,
        monitor: Arc<NetworkQualityMonitor>,
        scheduler: Arc<TaskScheduler>,
    ) -> Arc<Self> {
        let snapshot = monitor.snapshot();
        let breaker = Arc::new_cyclic(|me| Self {
            name: name.into(),
            inner: Mutex::new(BreakerState::fresh(&config, &snapshot)),
            config,
            clock,
            monitor: Arc::clone(&monitor),
            scheduler,
            me: me.clone(),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&breaker);
        let subscription = monitor.add_change_listener(move |snapshot| {
            if let Some(breaker) = weak.upgrade() {
                breaker.on_network_change(snapshot);
            }
        });
        *breaker.subscription.lock() = Some(subscription);

        crate::metrics::set_circuit_state(&breaker.name, CircuitState::Closed as u8);
        breaker
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current circuit state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failure threshold for the current network conditions.
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        let inner = self.inner.lock();
        self.adaptive_threshold(inner.network_type, inner.quality)
    }

    fn adaptive_threshold(&self, kind: NetworkType, quality: u8) -> u32 {
        let base = f64::from(match kind {
            NetworkType::Wifi | NetworkType::Ethernet => self.config.wifi_failure_threshold,
            NetworkType::Cellular => self.config.cellular_failure_threshold,
            NetworkType::Unknown | NetworkType::None => self.config.unknown_failure_threshold,
        });
        let scaled = if quality < 30 {
            base * 1.5
        } else if quality > 80 {
            base * 0.8
        } else {
            base
        };
        (scaled.round() as u32).max(1)
    }

    fn adaptive_recovery_timeout(&self, inner: &BreakerState, threshold: u32) -> Duration {
        let type_factor = match inner.network_type {
            NetworkType::Wifi | NetworkType::Ethernet => 1.0,
            NetworkType::Cellular => 1.5,
            NetworkType::Unknown | NetworkType::None => 1.2,
        };
        let quality_factor = if inner.quality < 30 {
            2.0
        } else if inner.quality > 80 {
            0.5
        } else {
            1.0
        };
        let base = Duration::from_millis((self.config.recovery_timeout_ms as f64 * type_factor * quality_factor) as u64);
        let attempt = inner.consecutive_failures.saturating_sub(threshold);
        self.monitor
            .get_exponential_backoff_delay(attempt, base, self.config.max_timeout())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // GATE
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether an attempt may be made now. An open circuit whose recovery
    /// timeout has elapsed moves to half-open and allows the probe.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map_or(u64::MAX, |at| self.clock.millis_since(at));
                if elapsed >= inner.recovery_timeout.as_millis() as u64 {
                    self.enter_half_open(&mut inner);
                    true
                } else {
                    inner.rejections += 1;
                    crate::metrics::record_circuit_call(&self.name, "rejected");
                    false
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.successes += 1;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = inner.consecutive_successes.saturating_add(1);
        inner.last_success_at = Some(self.clock.now_millis());
        crate::metrics::record_circuit_call(&self.name, "success");

        if inner.state == CircuitState::HalfOpen && inner.consecutive_successes >= self.config.success_threshold {
            self.enter_closed(&mut inner);
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        inner.consecutive_successes = 0;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(self.clock.now_millis());
        crate::metrics::record_circuit_call(&self.name, "failure");

        match inner.state {
            CircuitState::HalfOpen => {
                let doubled = inner.recovery_timeout.saturating_mul(2).min(self.config.max_timeout());
                self.enter_open(&mut inner, doubled);
            }
            CircuitState::Closed => {
                let threshold = self.adaptive_threshold(inner.network_type, inner.quality);
                crate::metrics::set_circuit_threshold(&self.name, threshold);
                if inner.consecutive_failures >= threshold {
                    let timeout = self.adaptive_recovery_timeout(&inner, threshold);
                    self.enter_open(&mut inner, timeout);
                }
            }
            CircuitState::Open => {
                debug!(circuit = %self.name, "Failure reported while open");
            }
        }
    }

    /// Run `f` through the breaker, reporting its outcome.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.can_execute() {
            return Err(CircuitError::Rejected);
        }
        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    #[must_use]
    pub fn get_recommendation(&self) -> CircuitRecommendation {
        let should_execute = self.can_execute();
        let quality = self.monitor.get_current_quality();
        let inner = self.inner.lock();

        let (reason, connection_strategy) = match inner.state {
            CircuitState::Closed => ("circuit closed".to_string(), quality.recommendation),
            CircuitState::HalfOpen => {
                let strategy = match quality.recommendation {
                    ConnectionStrategy::AggressiveWebsocket | ConnectionStrategy::StandardWebsocket => {
                        ConnectionStrategy::ConservativeWebsocket
                    }
                    other => other,
                };
                ("circuit half-open, probing recovery".to_string(), strategy)
            }
            CircuitState::Open => {
                let elapsed = inner.opened_at.map_or(0, |at| self.clock.millis_since(at));
                let remaining = (inner.recovery_timeout.as_millis() as u64).saturating_sub(elapsed);
                let strategy = if quality.recommendation == ConnectionStrategy::OfflineMode {
                    ConnectionStrategy::OfflineMode
                } else {
                    ConnectionStrategy::PollingOnly
                };
                (format!("circuit open, retry in {}ms", remaining), strategy)
            }
        };

        CircuitRecommendation {
            should_execute,
            reason,
            fallback_suggested: inner.state != CircuitState::Closed,
            connection_strategy,
        }
    }

    #[must_use]
    pub fn get_stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            failures: inner.failures,
            successes: inner.successes,
            rejections: inner.rejections,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            state: inner.state,
            recovery_timeout: inner.recovery_timeout,
            failure_threshold: self.adaptive_threshold(inner.network_type, inner.quality),
            network_type: inner.network_type,
            connection_quality: inner.quality,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OPERATOR CONTROLS
    // ═══════════════════════════════════════════════════════════════════════

    /// Fresh start: closed, all counters zeroed, timer cancelled.
    pub fn reset(&self) {
        let snapshot = self.monitor.snapshot();
        let mut inner = self.inner.lock();
        let generation = inner.generation + 1;
        if let Some(task) = inner.recovery_task.take() {
            self.scheduler.cancel(task);
        }
        *inner = BreakerState::fresh(&self.config, &snapshot);
        inner.generation = generation;
        info!(circuit = %self.name, "Circuit breaker reset");
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
    }

    /// Open immediately, regardless of counters.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        let threshold = self.adaptive_threshold(inner.network_type, inner.quality);
        let timeout = self.adaptive_recovery_timeout(&inner, threshold);
        warn!(circuit = %self.name, "Circuit breaker forced open");
        self.enter_open(&mut inner, timeout);
    }

    /// Cancel the recovery timer and detach from the monitor.
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            if let Some(task) = inner.recovery_task.take() {
                self.scheduler.cancel(task);
            }
        }
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
        debug!(circuit = %self.name, "Circuit breaker shut down");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRANSITIONS
    // ═══════════════════════════════════════════════════════════════════════

    fn enter_open(&self, inner: &mut BreakerState, timeout: Duration) {
        let from = inner.state;
        inner.state = CircuitState::Open;
        inner.opened_at = Some(self.clock.now_millis());
        inner.recovery_timeout = timeout;
        inner.consecutive_successes = 0;
        inner.generation += 1;
        if let Some(task) = inner.recovery_task.take() {
            self.scheduler.cancel(task);
        }

        let generation = inner.generation;
        let weak = self.me.clone();
        inner.recovery_task = Some(self.scheduler.schedule(timeout, async move {
            if let Some(breaker) = weak.upgrade() {
                breaker.on_recovery_timer(generation);
            }
        }));

        warn!(
            circuit = %self.name,
            from = %from,
            consecutive_failures = inner.consecutive_failures,
            recovery_timeout_ms = timeout.as_millis() as u64,
            "Circuit breaker opened"
        );
        crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
    }

    fn enter_half_open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::HalfOpen;
        inner.consecutive_successes = 0;
        inner.generation += 1;
        if let Some(task) = inner.recovery_task.take() {
            self.scheduler.cancel(task);
        }
        info!(circuit = %self.name, "Circuit breaker half-open, allowing probe");
        crate::metrics::set_circuit_state(&self.name, CircuitState::HalfOpen as u8);
    }

    fn enter_closed(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.consecutive_failures = 0;
        inner.generation += 1;
        if let Some(task) = inner.recovery_task.take() {
            self.scheduler.cancel(task);
        }
        info!(circuit = %self.name, "Circuit breaker closed");
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
    }

    fn on_recovery_timer(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != CircuitState::Open {
            return;
        }
        // This task is finishing; nothing to cancel
        inner.recovery_task = None;
        self.enter_half_open(&mut inner);
    }

    fn on_network_change(&self, snapshot: &NetworkSnapshot) {
        let jumped = {
            let mut inner = self.inner.lock();
            let previous = inner.quality;
            inner.network_type = snapshot.state.kind;
            inner.quality = snapshot.quality.score;
            inner.state == CircuitState::Open
                && snapshot.quality.score > previous.saturating_add(self.config.quality_jump_reset)
        };
        if jumped {
            info!(
                circuit = %self.name,
                quality = snapshot.quality.score,
                "Connection quality jumped while open, resetting"
            );
            self.reset();
        }
    }
}

/// Per-service breakers, created lazily and kept until removed.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: AdaptiveCircuitConfig,
    clock: SharedClock,
    monitor: Arc<NetworkQualityMonitor>,
    scheduler: Arc<TaskScheduler>,
}

impl CircuitBreakerRegistry {
    pub fn new(
        config: AdaptiveCircuitConfig,
        clock: SharedClock,
        monitor: Arc<NetworkQualityMonitor>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            clock,
            monitor,
            scheduler,
        }
    }

    /// Breaker for `service_id`, created on first use.
    pub fn get_instance(&self, service_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service_id) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(service_id.to_string()).or_insert_with(|| {
            debug!(circuit = service_id, "Creating circuit breaker");
            CircuitBreaker::new(
                service_id,
                self.config.clone(),
                Arc::clone(&self.clock),
                Arc::clone(&self.monitor),
                Arc::clone(&self.scheduler),
            )
        });
        Arc::clone(entry.value())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Stats for every breaker, sorted by service id.
    #[must_use]
    pub fn all_stats(&self) -> Vec<(String, CircuitBreakerStats)> {
        let mut stats: Vec<_> = self
            .breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().get_stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Shut down and forget one breaker.
    pub fn remove(&self, service_id: &str) -> bool {
        match self.breakers.remove(service_id) {
            Some((_, breaker)) => {
                breaker.shutdown();
                true
            }
            None => false,
        }
    }

    /// Shut down every breaker.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.remove(id);
        }
        info!(count = ids.len(), "Circuit breaker registry shut down");
    }
}
