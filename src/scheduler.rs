// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tracked timers on the Tokio runtime.
//!
//! Circuit recovery, network probing and periodic maintenance all run as
//! spawned tasks. Each task is registered here so the owning subsystem can
//! cancel it, and [`TaskScheduler::shutdown`] aborts everything that is
//! still pending. Nothing fires after teardown.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Identifier of a scheduled task. Inert handles (scheduled outside a
/// runtime or after shutdown) carry `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(Option<u64>);

impl TaskHandle {
    /// A handle that refers to no task.
    #[must_use]
    pub fn inert() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn is_inert(&self) -> bool {
        self.0.is_none()
    }
}

/// Owns every timer spawned on behalf of the cache engine.
pub struct TaskScheduler {
    name: String,
    next_id: AtomicU64,
    tasks: Arc<DashMap<u64, JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl TaskScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(1),
            tasks: Arc::new(DashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Run `task` once after `delay`.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(runtime) = self.runtime() else {
            return TaskHandle::inert();
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            tasks.remove(&id);
        });
        self.tasks.insert(id, handle);
        TaskHandle(Some(id))
    }

    /// Run `tick` every `period`, starting one period from now.
    pub fn schedule_repeating<F, Fut>(&self, period: Duration, mut tick: F) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            warn!(scheduler = %self.name, "Refusing to schedule a zero-period repeating task");
            return TaskHandle::inert();
        }
        let Some(runtime) = self.runtime() else {
            return TaskHandle::inert();
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        self.tasks.insert(id, handle);
        TaskHandle(Some(id))
    }

    /// Cancel a task. Returns `true` if it was still pending.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let Some(id) = handle.0 else {
            return false;
        };
        match self.tasks.remove(&id) {
            Some((_, join)) => {
                join.abort();
                true
            }
            None => false,
        }
    }

    /// Number of tasks not yet finished or cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Abort all tasks and refuse new ones.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let ids: Vec<u64> = self.tasks.iter().map(|e| *e.key()).collect();
        let mut aborted = 0usize;
        for id in ids {
            if let Some((_, join)) = self.tasks.remove(&id) {
                join.abort();
                aborted += 1;
            }
        }
        debug!(scheduler = %self.name, aborted, "Scheduler shut down");
    }

    fn runtime(&self) -> Option<Handle> {
        if self.is_shut_down() {
            debug!(scheduler = %self.name, "Scheduler is shut down, task dropped");
            return None;
        }
        match Handle::try_current() {
            Ok(handle) => Some(handle),
            Err(_) => {
                debug!(scheduler = %self.name, "No Tokio runtime, task not scheduled");
                None
            }
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
    }
}
