// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Maintenance sweeps and background task management.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::types::MaintenanceReport;
use super::TieredCache;
use crate::freshness::CacheRecord;
use crate::scheduler::TaskScheduler;

impl<E: CacheRecord> TieredCache<E> {
    /// One expiry and quota sweep over Memory and the durable store.
    ///
    /// Durable errors are logged and leave their part of the report at zero.
    #[tracing::instrument(skip(self), fields(cache = %self.name))]
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let start = Instant::now();
        let mut report = MaintenanceReport {
            memory_expired: self.memory.cleanup_expired(),
            ..MaintenanceReport::default()
        };

        match self.durable.cleanup_expired().await {
            Ok(stats) => report.durable = stats,
            Err(e) => {
                warn!(error = %e, "Durable cleanup failed");
                crate::metrics::record_error("durable", "cleanup", "backend");
            }
        }

        match self.durable.enforce_storage_quota().await {
            Ok(evicted) => report.quota_evicted = evicted,
            Err(e) => {
                warn!(error = %e, "Quota enforcement failed");
                crate::metrics::record_error("offline", "quota", "backend");
            }
        }

        if let Ok(usage) = self.durable.get_storage_usage().await {
            if usage.quota_bytes > 0 {
                crate::metrics::set_storage_utilization(usage.total_bytes as f64 / usage.quota_bytes as f64);
            }
            crate::metrics::set_offline_bytes(usage.offline_bytes);
        }

        report.duration = start.elapsed();
        crate::metrics::record_maintenance(report.duration, report.total_removed());

        if report.total_removed() > 0 {
            info!(
                memory_expired = report.memory_expired,
                durable_expired = report.durable.expired,
                corrupted = report.durable.corrupted,
                quota_evicted = report.quota_evicted,
                "Maintenance sweep"
            );
        } else {
            debug!("Maintenance sweep found nothing to remove");
        }
        report
    }

    /// Schedule the periodic maintenance sweep and stats report.
    ///
    /// Tasks hold a weak reference, so dropping the last `Arc` ends them
    /// on their next tick. Calling this again replaces earlier tasks.
    pub fn start_background_tasks(self: &Arc<Self>, scheduler: &TaskScheduler) {
        self.stop_background_tasks(scheduler);
        let mut handles = Vec::new();

        if self.config.maintenance_interval_secs > 0 {
            let weak = Arc::downgrade(self);
            handles.push(scheduler.schedule_repeating(
                Duration::from_secs(self.config.maintenance_interval_secs),
                move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(cache) = weak.upgrade() {
                            cache.run_maintenance().await;
                        }
                    }
                },
            ));
        }

        if self.config.stats_report_interval_secs > 0 {
            let weak = Arc::downgrade(self);
            handles.push(scheduler.schedule_repeating(
                Duration::from_secs(self.config.stats_report_interval_secs),
                move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(cache) = weak.upgrade() {
                            cache.stats.report();
                        }
                    }
                },
            ));
        }

        debug!(cache = %self.name, tasks = handles.len(), "Background tasks started");
        *self.background.lock() = handles;
    }

    /// Cancel tasks started by [`Self::start_background_tasks`].
    pub fn stop_background_tasks(&self, scheduler: &TaskScheduler) {
        let handles = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            scheduler.cancel(handle);
        }
    }
}
