// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Freshness-gated reads from the remote relational cache.
//!
//! The remote store is shared with other clients, so rows are only trusted
//! when their last sync is within the caller's threshold. Any store error
//! or unparsable row is logged and the read degrades to an empty result.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::storage::traits::{QueryFilter, RemoteQuery, RemoteQueryStore};

pub struct RemoteTier {
    store: Arc<dyn RemoteQueryStore>,
    clock: SharedClock,
}

impl RemoteTier {
    pub fn new(store: Arc<dyn RemoteQueryStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Rows of `collection` matching `filters` whose last sync is no older
    /// than `threshold`. Empty on error.
    #[tracing::instrument(skip(self, filters), fields(tier = "remote"))]
    pub async fn get<E: DeserializeOwned>(&self, collection: &str, filters: &[QueryFilter], threshold: Duration) -> Vec<E> {
        let query = RemoteQuery {
            collection: collection.to_string(),
            filters: filters.to_vec(),
            synced_after: self.clock.now_millis() - threshold.as_millis() as i64,
        };

        let rows = match self.store.query(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(collection, error = %e, "Remote query failed, treating as miss");
                crate::metrics::record_error("remote", "query", "backend");
                return Vec::new();
            }
        };

        let total = rows.len();
        let records: Vec<E> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row.payload) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(collection, error = %e, "Skipping malformed remote row");
                    crate::metrics::record_corruption("remote");
                    None
                }
            })
            .collect();

        debug!(collection, rows = total, parsed = records.len(), "Remote query complete");
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::traits::{RemoteRow, StorageError};
    use crate::storage::InMemoryRemoteStore;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: String,
    }

    struct BrokenStore;

    #[async_trait]
    impl RemoteQueryStore for BrokenStore {
        async fn query(&self, _query: &RemoteQuery) -> Result<Vec<RemoteRow>, StorageError> {
            Err(StorageError::Unavailable("connection refused".into()))
        }
    }

    fn row(id: &str, synced: i64) -> RemoteRow {
        RemoteRow {
            collection: "matches_1".into(),
            last_synced_at: synced,
            payload: json!({ "id": id }),
        }
    }

    #[tokio::test]
    async fn test_threshold_excludes_old_rows() {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.insert(row("old", 0));
        store.insert(row("recent", 95_000));
        let tier = RemoteTier::new(store, Arc::new(ManualClock::new(100_000)));

        let rows: Vec<Row> = tier.get("matches_1", &[], Duration::from_secs(30)).await;
        assert_eq!(rows, vec![Row { id: "recent".into() }]);
    }

    #[tokio::test]
    async fn test_store_error_is_empty() {
        let tier = RemoteTier::new(Arc::new(BrokenStore), Arc::new(ManualClock::new(0)));
        let rows: Vec<Row> = tier.get("matches_1", &[], Duration::from_secs(30)).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped() {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.insert(row("good", 1_000));
        store.insert(RemoteRow {
            collection: "matches_1".into(),
            last_synced_at: 1_000,
            payload: json!({ "unexpected": true }),
        });
        let tier = RemoteTier::new(store, Arc::new(ManualClock::new(1_000)));

        let rows: Vec<Row> = tier.get("matches_1", &[], Duration::from_secs(30)).await;
        assert_eq!(rows.len(), 1);
    }
}
