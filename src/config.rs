//! Configuration for the cache engine.
//!
//! Configuration is an immutable value built once at startup. Runtime
//! changes produce a new value through [`merge_config`]; nothing mutates a
//! config that is already shared.
//!
//! # Example
//!
//! ```
//! use matchday_cache::config::{CacheEngineConfig, ConfigOverride, MemoryOverride, merge_config};
//!
//! let base = CacheEngineConfig::default();
//! assert_eq!(base.memory.max_entries, 500);
//!
//! let tuned = merge_config(&base, &ConfigOverride {
//!     memory: Some(MemoryOverride { max_entries: Some(50), ..Default::default() }),
//!     ..Default::default()
//! });
//! assert_eq!(tuned.memory.max_entries, 50);
//! assert_eq!(tuned.memory.max_bytes, base.memory.max_bytes);
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CacheEngineConfig {
    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub durable: DurableConfig,

    #[serde(default)]
    pub freshness: FreshnessConfig,

    #[serde(default)]
    pub circuit: AdaptiveCircuitConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub live: LiveConfig,

    /// Period of the Memory + Durable expiry sweep (0 = disabled)
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// Period of the stats summary log line (0 = disabled)
    #[serde(default = "default_stats_report_interval_secs")]
    pub stats_report_interval_secs: u64,
}

fn default_maintenance_interval_secs() -> u64 { 300 }
fn default_stats_report_interval_secs() -> u64 { 60 }

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            durable: DurableConfig::default(),
            freshness: FreshnessConfig::default(),
            circuit: AdaptiveCircuitConfig::default(),
            network: NetworkConfig::default(),
            live: LiveConfig::default(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            stats_report_interval_secs: default_stats_report_interval_secs(),
        }
    }
}

/// In-process LRU bounds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MemoryConfig {
    /// Estimated byte budget (default: 16 MB)
    #[serde(default = "default_memory_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_memory_max_entries")]
    pub max_entries: usize,
}

fn default_memory_max_bytes() -> usize { 16 * 1024 * 1024 }
fn default_memory_max_entries() -> usize { 500 }

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_memory_max_bytes(),
            max_entries: default_memory_max_entries(),
        }
    }
}

/// Persistent key-value tier layout and quota.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DurableConfig {
    #[serde(default = "default_ttl_prefix")]
    pub ttl_prefix: String,
    #[serde(default = "default_offline_prefix")]
    pub offline_prefix: String,
    /// Key holding the offline size index
    #[serde(default = "default_metadata_key")]
    pub metadata_key: String,
    /// Hard cap for tracked offline bytes (default: 50 MB)
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,
    /// Eviction target as a fraction of the cap
    #[serde(default = "default_quota_target_ratio")]
    pub quota_target_ratio: f64,
    /// `is_near_limit` threshold as a fraction of the cap
    #[serde(default = "default_near_limit_ratio")]
    pub near_limit_ratio: f64,
}

fn default_ttl_prefix() -> String { "cache_".into() }
fn default_offline_prefix() -> String { "offline_".into() }
fn default_metadata_key() -> String { "meta_offline_index".into() }
fn default_quota_bytes() -> u64 { 50 * 1024 * 1024 }
fn default_quota_target_ratio() -> f64 { 0.7 }
fn default_near_limit_ratio() -> f64 { 0.8 }

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            ttl_prefix: default_ttl_prefix(),
            offline_prefix: default_offline_prefix(),
            metadata_key: default_metadata_key(),
            quota_bytes: default_quota_bytes(),
            quota_target_ratio: default_quota_target_ratio(),
            near_limit_ratio: default_near_limit_ratio(),
        }
    }
}

/// TTLs per classification and Remote-tier freshness windows.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FreshnessConfig {
    #[serde(default = "default_live_ttl_secs")]
    pub live_ttl_secs: u64,
    #[serde(default = "default_scheduled_ttl_secs")]
    pub scheduled_ttl_secs: u64,
    #[serde(default = "default_finished_ttl_secs")]
    pub finished_ttl_secs: u64,
    /// TTL when nothing in the batch could be classified
    #[serde(default = "default_default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Remote freshness window for records from past seasons
    #[serde(default = "default_historical_remote_secs")]
    pub historical_remote_secs: u64,
}

fn default_live_ttl_secs() -> u64 { 30 }
fn default_scheduled_ttl_secs() -> u64 { 15 * 60 }
fn default_finished_ttl_secs() -> u64 { 24 * 60 * 60 }
fn default_default_ttl_secs() -> u64 { 5 * 60 }
fn default_historical_remote_secs() -> u64 { 30 * 24 * 60 * 60 }

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            live_ttl_secs: default_live_ttl_secs(),
            scheduled_ttl_secs: default_scheduled_ttl_secs(),
            finished_ttl_secs: default_finished_ttl_secs(),
            default_ttl_secs: default_default_ttl_secs(),
            historical_remote_secs: default_historical_remote_secs(),
        }
    }
}

/// Circuit breaker tuning. Thresholds are per network type and then scaled
/// by connection quality.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AdaptiveCircuitConfig {
    #[serde(default = "default_wifi_failure_threshold")]
    pub wifi_failure_threshold: u32,
    #[serde(default = "default_cellular_failure_threshold")]
    pub cellular_failure_threshold: u32,
    #[serde(default = "default_unknown_failure_threshold")]
    pub unknown_failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// Quality jump (points) that resets an open circuit
    #[serde(default = "default_quality_jump_reset")]
    pub quality_jump_reset: u8,
}

fn default_wifi_failure_threshold() -> u32 { 5 }
fn default_cellular_failure_threshold() -> u32 { 8 }
fn default_unknown_failure_threshold() -> u32 { 6 }
fn default_success_threshold() -> u32 { 2 }
fn default_recovery_timeout_ms() -> u64 { 30_000 }
fn default_max_timeout_ms() -> u64 { 300_000 }
fn default_quality_jump_reset() -> u8 { 20 }

impl Default for AdaptiveCircuitConfig {
    fn default() -> Self {
        Self {
            wifi_failure_threshold: default_wifi_failure_threshold(),
            cellular_failure_threshold: default_cellular_failure_threshold(),
            unknown_failure_threshold: default_unknown_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            quality_jump_reset: default_quality_jump_reset(),
        }
    }
}

impl AdaptiveCircuitConfig {
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    #[must_use]
    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }
}

/// Network probing.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Active probe period (0 = only OS events)
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Jitter multiplier bounds for backoff
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
    /// Floor applied to every backoff delay
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
}

fn default_probe_interval_secs() -> u64 { 30 }
fn default_jitter_min() -> f64 { 0.85 }
fn default_jitter_max() -> f64 { 1.15 }
fn default_min_backoff_ms() -> u64 { 1000 }

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            min_backoff_ms: default_min_backoff_ms(),
        }
    }
}

/// Inbound live-update throttling.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LiveConfig {
    #[serde(default = "default_max_messages_per_window")]
    pub max_messages_per_window: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_max_messages_per_window() -> u32 { 5 }
fn default_window_ms() -> u64 { 1000 }

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            max_messages_per_window: default_max_messages_per_window(),
            window_ms: default_window_ms(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// OVERRIDES
// ═══════════════════════════════════════════════════════════════════════════

/// Partial configuration. `None` keeps the base value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOverride {
    #[serde(default)]
    pub memory: Option<MemoryOverride>,
    #[serde(default)]
    pub durable: Option<DurableOverride>,
    #[serde(default)]
    pub freshness: Option<FreshnessOverride>,
    #[serde(default)]
    pub circuit: Option<CircuitOverride>,
    #[serde(default)]
    pub network: Option<NetworkOverride>,
    #[serde(default)]
    pub live: Option<LiveOverride>,
    #[serde(default)]
    pub maintenance_interval_secs: Option<u64>,
    #[serde(default)]
    pub stats_report_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryOverride {
    pub max_bytes: Option<usize>,
    pub max_entries: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DurableOverride {
    pub ttl_prefix: Option<String>,
    pub offline_prefix: Option<String>,
    pub metadata_key: Option<String>,
    pub quota_bytes: Option<u64>,
    pub quota_target_ratio: Option<f64>,
    pub near_limit_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FreshnessOverride {
    pub live_ttl_secs: Option<u64>,
    pub scheduled_ttl_secs: Option<u64>,
    pub finished_ttl_secs: Option<u64>,
    pub default_ttl_secs: Option<u64>,
    pub historical_remote_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CircuitOverride {
    pub wifi_failure_threshold: Option<u32>,
    pub cellular_failure_threshold: Option<u32>,
    pub unknown_failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub recovery_timeout_ms: Option<u64>,
    pub max_timeout_ms: Option<u64>,
    pub quality_jump_reset: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkOverride {
    pub probe_interval_secs: Option<u64>,
    pub jitter_min: Option<f64>,
    pub jitter_max: Option<f64>,
    pub min_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveOverride {
    pub max_messages_per_window: Option<u32>,
    pub window_ms: Option<u64>,
}

/// Build a new config from `base` with every `Some` field of `over` applied.
#[must_use]
pub fn merge_config(base: &CacheEngineConfig, over: &ConfigOverride) -> CacheEngineConfig {
    CacheEngineConfig {
        memory: merge_memory(&base.memory, over.memory.as_ref()),
        durable: merge_durable(&base.durable, over.durable.as_ref()),
        freshness: merge_freshness(&base.freshness, over.freshness.as_ref()),
        circuit: merge_circuit(&base.circuit, over.circuit.as_ref()),
        network: merge_network(&base.network, over.network.as_ref()),
        live: merge_live(&base.live, over.live.as_ref()),
        maintenance_interval_secs: over
            .maintenance_interval_secs
            .unwrap_or(base.maintenance_interval_secs),
        stats_report_interval_secs: over
            .stats_report_interval_secs
            .unwrap_or(base.stats_report_interval_secs),
    }
}

fn merge_memory(base: &MemoryConfig, over: Option<&MemoryOverride>) -> MemoryConfig {
    let Some(o) = over else { return base.clone() };
    MemoryConfig {
        max_bytes: o.max_bytes.unwrap_or(base.max_bytes),
        max_entries: o.max_entries.unwrap_or(base.max_entries),
    }
}

fn merge_durable(base: &DurableConfig, over: Option<&DurableOverride>) -> DurableConfig {
    let Some(o) = over else { return base.clone() };
    DurableConfig {
        ttl_prefix: o.ttl_prefix.clone().unwrap_or_else(|| base.ttl_prefix.clone()),
        offline_prefix: o.offline_prefix.clone().unwrap_or_else(|| base.offline_prefix.clone()),
        metadata_key: o.metadata_key.clone().unwrap_or_else(|| base.metadata_key.clone()),
        quota_bytes: o.quota_bytes.unwrap_or(base.quota_bytes),
        quota_target_ratio: o.quota_target_ratio.unwrap_or(base.quota_target_ratio),
        near_limit_ratio: o.near_limit_ratio.unwrap_or(base.near_limit_ratio),
    }
}

fn merge_freshness(base: &FreshnessConfig, over: Option<&FreshnessOverride>) -> FreshnessConfig {
    let Some(o) = over else { return base.clone() };
    FreshnessConfig {
        live_ttl_secs: o.live_ttl_secs.unwrap_or(base.live_ttl_secs),
        scheduled_ttl_secs: o.scheduled_ttl_secs.unwrap_or(base.scheduled_ttl_secs),
        finished_ttl_secs: o.finished_ttl_secs.unwrap_or(base.finished_ttl_secs),
        default_ttl_secs: o.default_ttl_secs.unwrap_or(base.default_ttl_secs),
        historical_remote_secs: o.historical_remote_secs.unwrap_or(base.historical_remote_secs),
    }
}

fn merge_circuit(base: &AdaptiveCircuitConfig, over: Option<&CircuitOverride>) -> AdaptiveCircuitConfig {
    let Some(o) = over else { return base.clone() };
    AdaptiveCircuitConfig {
        wifi_failure_threshold: o.wifi_failure_threshold.unwrap_or(base.wifi_failure_threshold),
        cellular_failure_threshold: o
            .cellular_failure_threshold
            .unwrap_or(base.cellular_failure_threshold),
        unknown_failure_threshold: o
            .unknown_failure_threshold
            .unwrap_or(base.unknown_failure_threshold),
        success_threshold: o.success_threshold.unwrap_or(base.success_threshold),
        recovery_timeout_ms: o.recovery_timeout_ms.unwrap_or(base.recovery_timeout_ms),
        max_timeout_ms: o.max_timeout_ms.unwrap_or(base.max_timeout_ms),
        quality_jump_reset: o.quality_jump_reset.unwrap_or(base.quality_jump_reset),
    }
}

fn merge_network(base: &NetworkConfig, over: Option<&NetworkOverride>) -> NetworkConfig {
    let Some(o) = over else { return base.clone() };
    NetworkConfig {
        probe_interval_secs: o.probe_interval_secs.unwrap_or(base.probe_interval_secs),
        jitter_min: o.jitter_min.unwrap_or(base.jitter_min),
        jitter_max: o.jitter_max.unwrap_or(base.jitter_max),
        min_backoff_ms: o.min_backoff_ms.unwrap_or(base.min_backoff_ms),
    }
}

fn merge_live(base: &LiveConfig, over: Option<&LiveOverride>) -> LiveConfig {
    let Some(o) = over else { return base.clone() };
    LiveConfig {
        max_messages_per_window: o
            .max_messages_per_window
            .unwrap_or(base.max_messages_per_window),
        window_ms: o.window_ms.unwrap_or(base.window_ms),
    }
}
