// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Live-update gate.
//!
//! Decides whether a tournament's push channel should be opened, and keeps
//! inbound message storms bounded once it is:
//!
//! ```text
//!   connect(tournament)
//!        │
//!        ▼
//!   breaker recommends push? ── no ──▶ LiveMode::Polling
//!        │ yes
//!        ▼
//!   PushChannel::subscribe ── err ──▶ on_failure, LiveMode::Polling
//!        │ ok
//!        ▼
//!   on_success, LiveMode::Push
//!        │
//!   messages ──▶ ChannelRateLimiter ──▶ handler (excess dropped)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::LiveConfig;
use crate::resilience::CircuitBreaker;

/// Callback invoked with each accepted message.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushHandle(pub u64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("push connect failed: {0}")]
    Connect(String),

    #[error("push channel closed")]
    Closed,
}

/// Push transport. Message parsing and dispatch live with the caller.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn subscribe(&self, topic: &str, on_message: MessageHandler) -> Result<PushHandle, PushError>;

    async fn unsubscribe(&self, handle: PushHandle) -> Result<(), PushError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// RATE LIMITING
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: i64,
    count: u32,
}

/// Fixed-window limiter, one window per channel. Excess messages are
/// dropped, never queued.
pub struct ChannelRateLimiter {
    config: LiveConfig,
    clock: SharedClock,
    windows: DashMap<String, Window>,
    dropped: AtomicU64,
}

impl ChannelRateLimiter {
    pub fn new(config: LiveConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            windows: DashMap::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Admit one message on `channel`, or drop it.
    pub fn allow(&self, channel: &str) -> bool {
        let now = self.clock.now_millis();
        let mut window = self.windows.entry(channel.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if self.clock.millis_since(window.started_at) >= self.config.window_ms {
            window.started_at = now;
            window.count = 0;
        }

        if window.count < self.config.max_messages_per_window {
            window.count += 1;
            crate::metrics::record_live_message(channel, "accepted");
            true
        } else {
            drop(window);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                channel,
                limit = self.config.max_messages_per_window,
                window_ms = self.config.window_ms,
                "Live message rate limit exceeded, dropping"
            );
            crate::metrics::record_live_message(channel, "dropped");
            false
        }
    }

    /// Messages dropped since construction.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn forget(&self, channel: &str) {
        self.windows.remove(channel);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SUBSCRIBER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveMode {
    Push,
    /// Caller should poll through the tiered cache instead
    Polling,
}

/// Opens and closes per-tournament push subscriptions behind a breaker.
pub struct LiveUpdateSubscriber {
    channel: Arc<dyn PushChannel>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<ChannelRateLimiter>,
    active: DashMap<String, PushHandle>,
}

impl LiveUpdateSubscriber {
    pub fn new(channel: Arc<dyn PushChannel>, breaker: Arc<CircuitBreaker>, limiter: Arc<ChannelRateLimiter>) -> Self {
        Self {
            channel,
            breaker,
            limiter,
            active: DashMap::new(),
        }
    }

    fn topic(tournament_id: &str) -> String {
        format!("tournament:{tournament_id}")
    }

    /// Subscribe to live updates for a tournament if the breaker and the
    /// network allow it.
    #[tracing::instrument(skip(self, handler), fields(circuit = %self.breaker.name()))]
    pub async fn connect(&self, tournament_id: &str, handler: MessageHandler) -> LiveMode {
        if self.active.contains_key(tournament_id) {
            return LiveMode::Push;
        }

        let recommendation = self.breaker.get_recommendation();
        if !recommendation.should_execute || !recommendation.connection_strategy.uses_push() {
            debug!(
                reason = %recommendation.reason,
                strategy = ?recommendation.connection_strategy,
                "Push suppressed, polling"
            );
            return LiveMode::Polling;
        }

        let limiter = Arc::clone(&self.limiter);
        let channel_id = tournament_id.to_string();
        let gated: MessageHandler = Arc::new(move |message| {
            if limiter.allow(&channel_id) {
                handler(message);
            }
        });

        match self.channel.subscribe(&Self::topic(tournament_id), gated).await {
            Ok(handle) => {
                self.breaker.on_success();
                self.active.insert(tournament_id.to_string(), handle);
                info!(tournament_id, "Live updates connected");
                LiveMode::Push
            }
            Err(e) => {
                self.breaker.on_failure();
                warn!(tournament_id, error = %e, "Live subscribe failed, polling");
                LiveMode::Polling
            }
        }
    }

    /// Close a tournament's subscription. Returns `false` if none was open.
    pub async fn disconnect(&self, tournament_id: &str) -> bool {
        let Some((_, handle)) = self.active.remove(tournament_id) else {
            return false;
        };
        self.limiter.forget(tournament_id);
        if let Err(e) = self.channel.unsubscribe(handle).await {
            warn!(tournament_id, error = %e, "Unsubscribe failed");
        }
        true
    }

    /// The transport dropped an open subscription.
    pub fn connection_lost(&self, tournament_id: &str) {
        if self.active.remove(tournament_id).is_some() {
            self.breaker.on_failure();
            warn!(tournament_id, "Live connection lost");
        }
    }

    #[must_use]
    pub fn is_active(&self, tournament_id: &str) -> bool {
        self.active.contains_key(tournament_id)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Close every open subscription.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.disconnect(&id).await;
        }
    }
}
