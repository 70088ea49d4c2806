// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-tier hit and latency accounting.
//!
//! Each tier keeps its last 100 latency samples and a running hit count.
//! Derived figures:
//!
//! - **hit ratio**: reads answered by any cache tier / all requests
//! - **efficiency**: answered reads that did not need the origin / answered reads
//!
//! Efficiency leaves failed requests out of its denominator, so it reads as
//! origin offload among reads that returned data. Failures show up in the
//! hit ratio and in `failed_requests`.
//!
//! Every figure is also pushed to the `metrics` facade when
//! [`StatsRecorder::report`] runs.

use std::collections::{HashMap, VecDeque};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::tiers::CacheTier;

/// Samples retained per tier.
pub const LATENCY_HISTORY: usize = 100;

/// Below this many requests the cache is reported healthy regardless.
const MIN_REQUESTS_FOR_HEALTH: u64 = 10;

/// Latency summary for one tier, in milliseconds.
///
/// An empty history reports `average = 0`, `min = +∞`, `max = -∞`.
#[derive(Debug, Clone, PartialEq)]
pub struct TierLatency {
    pub tier: CacheTier,
    pub hits: u64,
    pub samples: usize,
    pub average: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Percent of requests answered by a cache tier
    pub hit_ratio: f64,
    /// Percent of answered requests that skipped the origin. Failed
    /// requests are not in the denominator.
    pub efficiency: f64,
    pub tiers: Vec<TierLatency>,
}

#[derive(Default)]
struct StatsState {
    total_requests: u64,
    failed_requests: u64,
    hits: HashMap<CacheTier, u64>,
    latencies: HashMap<CacheTier, VecDeque<f64>>,
}

pub struct StatsRecorder {
    state: Mutex<StatsState>,
    timers: DashMap<String, i64>,
    clock: SharedClock,
}

impl StatsRecorder {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(StatsState::default()),
            timers: DashMap::new(),
            clock,
        }
    }

    /// Begin timing a request.
    pub fn start_timer(&self, request_id: &str) {
        self.timers.insert(request_id.to_string(), self.clock.now_millis());
    }

    /// Begin timing a request and return a guard that drops the timer if
    /// the request is abandoned before it is recorded.
    pub fn start_request(&self, request_id: &str) -> RequestTimer<'_> {
        self.start_timer(request_id);
        RequestTimer {
            stats: self,
            request_id: request_id.to_string(),
        }
    }

    /// Timers started but not yet recorded.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Close the timer for `request_id` and count a hit on `tier`.
    /// Without a matching [`start_timer`](Self::start_timer) a zero sample
    /// is recorded. Returns the recorded latency in milliseconds.
    pub fn record_response_time(&self, tier: CacheTier, request_id: &str) -> f64 {
        let elapsed = match self.timers.remove(request_id) {
            Some((_, started)) => self.clock.millis_since(started) as f64,
            None => {
                debug!(request_id, tier = %tier, "No timer for request, recording zero latency");
                0.0
            }
        };
        self.record_hit(tier, elapsed);
        elapsed
    }

    /// Count a request answered by `tier` after `latency_ms`.
    pub fn record_hit(&self, tier: CacheTier, latency_ms: f64) {
        let mut state = self.state.lock();
        state.total_requests += 1;
        *state.hits.entry(tier).or_insert(0) += 1;
        let history = state.latencies.entry(tier).or_default();
        if history.len() == LATENCY_HISTORY {
            history.pop_front();
        }
        history.push_back(latency_ms);
    }

    /// Count a request that no tier could answer.
    pub fn record_failure(&self, request_id: &str) {
        self.timers.remove(request_id);
        let mut state = self.state.lock();
        state.total_requests += 1;
        state.failed_requests += 1;
    }

    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.state.lock().total_requests
    }

    #[must_use]
    pub fn hits(&self, tier: CacheTier) -> u64 {
        self.state.lock().hits.get(&tier).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let state = self.state.lock();
        if state.total_requests == 0 {
            return 0.0;
        }
        let cached = state.total_requests - state.failed_requests - origin_hits(&state);
        cached as f64 / state.total_requests as f64 * 100.0
    }

    /// Percent of answered requests not served by the origin.
    #[must_use]
    pub fn efficiency(&self) -> f64 {
        let state = self.state.lock();
        let answered = state.total_requests - state.failed_requests;
        if answered == 0 {
            return 0.0;
        }
        (answered - origin_hits(&state)) as f64 / answered as f64 * 100.0
    }

    #[must_use]
    pub fn tier_latency(&self, tier: CacheTier) -> TierLatency {
        let state = self.state.lock();
        summarize(
            tier,
            state.hits.get(&tier).copied().unwrap_or(0),
            state.latencies.get(&tier),
        )
    }

    #[must_use]
    pub fn health(&self) -> CacheHealth {
        let hit_ratio = self.hit_ratio();
        let efficiency = self.efficiency();
        let tiers = CacheTier::ALL.iter().map(|t| self.tier_latency(*t)).collect();
        let (total_requests, failed_requests) = {
            let state = self.state.lock();
            (state.total_requests, state.failed_requests)
        };

        let status = if total_requests < MIN_REQUESTS_FOR_HEALTH || efficiency >= 60.0 {
            HealthStatus::Healthy
        } else if efficiency >= 30.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        CacheHealth {
            status,
            total_requests,
            failed_requests,
            hit_ratio,
            efficiency,
            tiers,
        }
    }

    /// Publish current figures as gauges and log a one-line summary.
    pub fn report(&self) -> CacheHealth {
        let health = self.health();
        crate::metrics::set_cache_efficiency(health.efficiency);
        for tier in &health.tiers {
            let ratio = if health.total_requests == 0 {
                0.0
            } else {
                tier.hits as f64 / health.total_requests as f64 * 100.0
            };
            crate::metrics::set_hit_ratio(tier.tier.as_str(), ratio);
        }
        info!(
            status = %health.status,
            requests = health.total_requests,
            hit_ratio = health.hit_ratio,
            efficiency = health.efficiency,
            "Cache stats"
        );
        health
    }

    pub fn reset(&self) {
        *self.state.lock() = StatsState::default();
        self.timers.clear();
    }
}

/// Removes its request's timer on drop. Recording the request first
/// makes the drop a no-op.
pub struct RequestTimer<'a> {
    stats: &'a StatsRecorder,
    request_id: String,
}

impl RequestTimer<'_> {
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Drop for RequestTimer<'_> {
    fn drop(&mut self) {
        if self.stats.timers.remove(&self.request_id).is_some() {
            debug!(request_id = %self.request_id, "Request abandoned before completion");
        }
    }
}

fn origin_hits(state: &StatsState) -> u64 {
    state.hits.get(&CacheTier::Origin).copied().unwrap_or(0)
}

fn summarize(tier: CacheTier, hits: u64, history: Option<&VecDeque<f64>>) -> TierLatency {
    let mut sorted: Vec<f64> = history.map(|h| h.iter().copied().collect()).unwrap_or_default();
    if sorted.is_empty() {
        return TierLatency {
            tier,
            hits,
            samples: 0,
            average: 0.0,
            median: 0.0,
            p95: 0.0,
            p99: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        };
    }
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };

    TierLatency {
        tier,
        hits,
        samples: n,
        average: sorted.iter().sum::<f64>() / n as f64,
        median,
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        min: sorted[0],
        max: sorted[n - 1],
    }
}

/// Nearest-rank percentile over an ascending, non-empty slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
