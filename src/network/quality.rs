// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection scoring and retry backoff arithmetic.
//!
//! The score is a type weight (up to 60) plus a latency weight (up to 40).
//! Only the band edges are load-bearing:
//!
//! | score  | level     | strategy              |
//! |--------|-----------|-----------------------|
//! | ≥ 80   | Excellent | AggressiveWebsocket   |
//! | ≥ 60   | Good      | StandardWebsocket     |
//! | ≥ 40   | Fair      | ConservativeWebsocket |
//! | ≥ 20   | Poor      | PollingOnly           |
//! | < 20   | Offline   | OfflineMode           |

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Link type reported by the host OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
    None,
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wifi => write!(f, "wifi"),
            Self::Cellular => write!(f, "cellular"),
            Self::Ethernet => write!(f, "ethernet"),
            Self::Unknown => write!(f, "unknown"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Connectivity as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub connected: bool,
    pub kind: NetworkType,
    pub internet_reachable: bool,
}

impl NetworkState {
    #[must_use]
    pub fn online(kind: NetworkType) -> Self {
        Self {
            connected: true,
            kind,
            internet_reachable: true,
        }
    }

    #[must_use]
    pub fn offline() -> Self {
        Self {
            connected: false,
            kind: NetworkType::None,
            internet_reachable: false,
        }
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        !self.connected || self.kind == NetworkType::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Offline,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::Poor => write!(f, "poor"),
            Self::Fair => write!(f, "fair"),
            Self::Good => write!(f, "good"),
            Self::Excellent => write!(f, "excellent"),
        }
    }
}

/// How a live-update client should talk to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStrategy {
    AggressiveWebsocket,
    StandardWebsocket,
    ConservativeWebsocket,
    PollingOnly,
    OfflineMode,
}

impl ConnectionStrategy {
    /// Whether this strategy keeps a push channel open.
    #[must_use]
    pub fn uses_push(self) -> bool {
        matches!(
            self,
            Self::AggressiveWebsocket | Self::StandardWebsocket | Self::ConservativeWebsocket
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionQuality {
    /// 0..=100
    pub score: u8,
    pub level: QualityLevel,
    pub recommendation: ConnectionStrategy,
}

impl ConnectionQuality {
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        let score = score.min(100);
        let (level, recommendation) = match score {
            80.. => (QualityLevel::Excellent, ConnectionStrategy::AggressiveWebsocket),
            60..=79 => (QualityLevel::Good, ConnectionStrategy::StandardWebsocket),
            40..=59 => (QualityLevel::Fair, ConnectionStrategy::ConservativeWebsocket),
            20..=39 => (QualityLevel::Poor, ConnectionStrategy::PollingOnly),
            _ => (QualityLevel::Offline, ConnectionStrategy::OfflineMode),
        };
        Self {
            score,
            level,
            recommendation,
        }
    }

    #[must_use]
    pub fn assess(state: &NetworkState, latency: Option<Duration>) -> Self {
        Self::from_score(score(state, latency))
    }
}

/// Unreachable internet never scores above this.
const UNREACHABLE_CAP: u8 = 15;

fn type_weight(kind: NetworkType) -> u8 {
    match kind {
        NetworkType::Wifi | NetworkType::Ethernet => 60,
        NetworkType::Cellular => 40,
        NetworkType::Unknown => 25,
        NetworkType::None => 0,
    }
}

fn latency_weight(latency: Option<Duration>) -> u8 {
    let Some(latency) = latency else {
        return 20;
    };
    match latency.as_millis() {
        0..=99 => 40,
        100..=299 => 30,
        300..=599 => 20,
        600..=999 => 10,
        _ => 0,
    }
}

/// Quality score in 0..=100 for a link and its last measured round trip.
#[must_use]
pub fn score(state: &NetworkState, latency: Option<Duration>) -> u8 {
    if state.is_offline() {
        return 0;
    }
    let raw = type_weight(state.kind) + latency_weight(latency);
    if state.internet_reachable {
        raw
    } else {
        raw.min(UNREACHABLE_CAP)
    }
}

/// `min(max(base * 2^attempt * jitter, floor), max)`.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter: f64, floor: Duration) -> Duration {
    let exp = 2f64.powi(attempt.min(62) as i32);
    let raw_ms = base.as_millis() as f64 * exp * jitter;
    let max_ms = max.as_millis() as f64;
    let ms = raw_ms.max(floor.as_millis() as f64).min(max_ms);
    if ms.is_finite() && ms > 0.0 {
        Duration::from_millis(ms as u64)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_edges() {
        assert_eq!(ConnectionQuality::from_score(80).level, QualityLevel::Excellent);
        assert_eq!(ConnectionQuality::from_score(79).level, QualityLevel::Good);
        assert_eq!(ConnectionQuality::from_score(60).recommendation, ConnectionStrategy::StandardWebsocket);
        assert_eq!(ConnectionQuality::from_score(59).level, QualityLevel::Fair);
        assert_eq!(ConnectionQuality::from_score(40).recommendation, ConnectionStrategy::ConservativeWebsocket);
        assert_eq!(ConnectionQuality::from_score(39).recommendation, ConnectionStrategy::PollingOnly);
        assert_eq!(ConnectionQuality::from_score(20).level, QualityLevel::Poor);
        assert_eq!(ConnectionQuality::from_score(19).recommendation, ConnectionStrategy::OfflineMode);
    }

    #[test]
    fn test_wifi_beats_cellular() {
        let latency = Some(Duration::from_millis(150));
        let wifi = score(&NetworkState::online(NetworkType::Wifi), latency);
        let cell = score(&NetworkState::online(NetworkType::Cellular), latency);
        assert!(wifi > cell);
        assert_eq!(wifi, 90);
        assert_eq!(cell, 70);
    }

    #[test]
    fn test_latency_lowers_score() {
        let state = NetworkState::online(NetworkType::Ethernet);
        assert_eq!(score(&state, Some(Duration::from_millis(20))), 100);
        assert_eq!(score(&state, Some(Duration::from_millis(2_000))), 60);
        assert_eq!(score(&state, None), 80);
    }

    #[test]
    fn test_disconnected_and_unreachable() {
        assert_eq!(score(&NetworkState::offline(), Some(Duration::from_millis(10))), 0);

        let captive = NetworkState {
            connected: true,
            kind: NetworkType::Wifi,
            internet_reachable: false,
        };
        let q = ConnectionQuality::assess(&captive, Some(Duration::from_millis(10)));
        assert_eq!(q.score, 15);
        assert_eq!(q.recommendation, ConnectionStrategy::OfflineMode);
    }

    #[test]
    fn test_backoff_floor_and_cap() {
        let floor = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(0, Duration::from_millis(100), max, 1.0, floor), floor);
        assert_eq!(backoff_delay(3, Duration::from_secs(1), max, 1.0, floor), Duration::from_secs(8));
        assert_eq!(backoff_delay(30, Duration::from_secs(1), max, 1.15, floor), max);
        assert_eq!(backoff_delay(u32::MAX, Duration::from_secs(1), max, 0.85, floor), max);
    }

    #[test]
    fn test_backoff_applies_jitter() {
        let floor = Duration::from_secs(1);
        let d = backoff_delay(2, Duration::from_secs(2), Duration::from_secs(600), 1.1, floor);
        assert_eq!(d, Duration::from_millis(8_800));
    }

    #[test]
    fn test_strategy_push() {
        assert!(ConnectionStrategy::StandardWebsocket.uses_push());
        assert!(!ConnectionStrategy::PollingOnly.uses_push());
        assert!(!ConnectionStrategy::OfflineMode.uses_push());
    }
}
