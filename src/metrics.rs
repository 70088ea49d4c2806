// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for matchday-cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `matchday_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size gauges and counters
//!
//! # Labels
//! - `tier`: memory, durable, remote, origin, offline
//! - `operation`: get, put, invalidate, query, fetch
//! - `status` / `outcome`: hit, miss, success, error, rejected, dropped

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a cache operation outcome
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "matchday_cache_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "matchday_cache_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record which tier answered a read
pub fn record_served_by(tier: &str, stale: bool) {
    counter!(
        "matchday_cache_served_total",
        "tier" => tier.to_string(),
        "stale" => if stale { "true" } else { "false" }
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// TIER HOUSEKEEPING - Expiry, eviction, usage
// ═══════════════════════════════════════════════════════════════════════════

/// Record entries removed because their TTL elapsed
pub fn record_expiration(tier: &str, count: usize) {
    counter!(
        "matchday_cache_expirations_total",
        "tier" => tier.to_string()
    )
    .increment(count as u64);
}

/// Record entries removed to satisfy a capacity limit
pub fn record_eviction(tier: &str, count: usize, bytes: usize) {
    counter!(
        "matchday_cache_evictions_total",
        "tier" => tier.to_string()
    )
    .increment(count as u64);
    counter!(
        "matchday_cache_evicted_bytes_total",
        "tier" => tier.to_string()
    )
    .increment(bytes as u64);
}

/// Set current memory tier usage
pub fn set_memory_usage(entries: usize, bytes: usize) {
    gauge!("matchday_cache_memory_entries").set(entries as f64);
    gauge!("matchday_cache_memory_bytes").set(bytes as f64);
}

/// Set tracked offline snapshot bytes
pub fn set_offline_bytes(bytes: u64) {
    gauge!("matchday_cache_offline_bytes").set(bytes as f64);
}

/// Set durable store usage as a fraction of the quota
pub fn set_storage_utilization(ratio: f64) {
    gauge!("matchday_cache_storage_utilization").set(ratio);
}

/// Record malformed stored data
pub fn record_corruption(tier: &str) {
    counter!(
        "matchday_cache_corruption_detected_total",
        "tier" => tier.to_string()
    )
    .increment(1);
}

/// Record bytes written to a tier
pub fn record_bytes_written(tier: &str, bytes: usize) {
    counter!(
        "matchday_cache_bytes_written_total",
        "tier" => tier.to_string()
    )
    .increment(bytes as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Categorized error counters for alerting
// ═══════════════════════════════════════════════════════════════════════════

/// Record an error with category for alerting
pub fn record_error(tier: &str, operation: &str, error_type: &str) {
    counter!(
        "matchday_cache_errors_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record an origin fetch outcome
pub fn record_origin_fetch(status: &str, records: usize) {
    counter!(
        "matchday_cache_origin_fetches_total",
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("matchday_cache_origin_records").record(records as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// PERFORMANCE - Derived ratios
// ═══════════════════════════════════════════════════════════════════════════

/// Set per-tier hit ratio (0.0 - 100.0)
pub fn set_hit_ratio(tier: &str, ratio: f64) {
    gauge!(
        "matchday_cache_hit_ratio",
        "tier" => tier.to_string()
    )
    .set(ratio);
}

/// Set share of requests served without the origin (0.0 - 100.0)
pub fn set_cache_efficiency(efficiency: f64) {
    gauge!("matchday_cache_efficiency").set(efficiency);
}

/// Record a maintenance pass
pub fn record_maintenance(duration: Duration, removed: usize) {
    histogram!("matchday_cache_maintenance_seconds").record(duration.as_secs_f64());
    counter!("matchday_cache_maintenance_removed_total").increment(removed as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// NETWORK - Connectivity and quality
// ═══════════════════════════════════════════════════════════════════════════

/// Set connectivity (1 = connected, 0 = offline)
pub fn set_network_connected(connected: bool) {
    gauge!("matchday_cache_network_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Set connection quality score (0 - 100)
pub fn set_connection_quality(score: u8) {
    gauge!("matchday_cache_connection_quality").set(score as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER - Resilience metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Record circuit breaker state (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "matchday_cache_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "matchday_cache_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set adaptive failure threshold currently in force
pub fn set_circuit_threshold(circuit: &str, threshold: u32) {
    gauge!(
        "matchday_cache_circuit_breaker_threshold",
        "circuit" => circuit.to_string()
    )
    .set(threshold as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIVE CHANNELS - Push subscription traffic
// ═══════════════════════════════════════════════════════════════════════════

/// Record a push message outcome (delivered / dropped)
pub fn record_live_message(channel: &str, outcome: &str) {
    counter!(
        "matchday_cache_live_messages_total",
        "channel" => channel.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}
