//! In-memory adapters for the external store contracts.
//!
//! Useful for tests and for hosts that embed the engine without a real
//! persistent store.

use async_trait::async_trait;
use dashmap::DashMap;
use super::traits::{KeyValueStore, RemoteQuery, RemoteQueryStore, RemoteRow, StorageError};

/// `KeyValueStore` backed by a `DashMap`.
pub struct InMemoryKeyValueStore {
    data: DashMap<String, Vec<u8>>,
}

impl InMemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current key count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all keys
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Write raw bytes, bypassing any tier encoding (for corruption tests)
    pub fn insert_raw(&self, key: &str, value: Vec<u8>) {
        self.data.insert(key.to_string(), value);
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.data.iter().map(|e| e.key().clone()).collect())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.data.remove(key);
        }
        Ok(())
    }
}

/// `RemoteQueryStore` holding rows per collection.
pub struct InMemoryRemoteStore {
    rows: DashMap<String, Vec<RemoteRow>>,
}

impl InMemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    /// Append a row to its collection.
    pub fn insert(&self, row: RemoteRow) {
        self.rows.entry(row.collection.clone()).or_default().push(row);
    }

    /// Replace all rows of a collection.
    pub fn replace(&self, collection: &str, rows: Vec<RemoteRow>) {
        self.rows.insert(collection.to_string(), rows);
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.iter().map(|e| e.value().len()).sum()
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteQueryStore for InMemoryRemoteStore {
    async fn query(&self, query: &RemoteQuery) -> Result<Vec<RemoteRow>, StorageError> {
        let Some(rows) = self.rows.get(&query.collection) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|row| row.last_synced_at >= query.synced_after)
            .filter(|row| query.filters.iter().all(|f| f.matches(&row.payload)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::QueryFilter;
    use serde_json::json;

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.is_empty());
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryKeyValueStore::new();
        store.set("a", b"one".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.delete("nonexistent").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_many() {
        let store = InMemoryKeyValueStore::new();
        for i in 0..5 {
            store.set(&format!("k{}", i), vec![i]).await.unwrap();
        }
        store
            .delete_many(&["k1".to_string(), "k3".to_string()])
            .await
            .unwrap();
        let mut keys = store.list_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k0", "k2", "k4"]);
    }

    #[tokio::test]
    async fn test_remote_query_respects_synced_after_and_filters() {
        let store = InMemoryRemoteStore::new();
        store.insert(RemoteRow {
            collection: "matches_1".into(),
            last_synced_at: 1_000,
            payload: json!({"id": "m1", "status": "LIVE"}),
        });
        store.insert(RemoteRow {
            collection: "matches_1".into(),
            last_synced_at: 5_000,
            payload: json!({"id": "m2", "status": "LIVE"}),
        });
        store.insert(RemoteRow {
            collection: "matches_1".into(),
            last_synced_at: 5_000,
            payload: json!({"id": "m3", "status": "FINISHED"}),
        });

        let rows = store
            .query(&RemoteQuery {
                collection: "matches_1".into(),
                filters: vec![QueryFilter::eq("status", "LIVE")],
                synced_after: 2_000,
            })
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload["id"], "m2");
    }

    #[tokio::test]
    async fn test_remote_unknown_collection_is_empty() {
        let store = InMemoryRemoteStore::new();
        let rows = store
            .query(&RemoteQuery {
                collection: "nothing".into(),
                filters: vec![],
                synced_after: 0,
            })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryKeyValueStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store_clone = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store_clone
                        .set(&format!("batch-{}-item-{}", batch, i), vec![1])
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
