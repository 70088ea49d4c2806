// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Contracts for the external stores behind the Durable and Remote tiers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Durable key → blob storage. No TTL, ordering or transactions assumed.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    async fn list_keys(&self) -> Result<Vec<String>, StorageError>;

    /// Delete several keys. Default implementation deletes sequentially.
    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

/// Predicate on a payload field of a remote row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryFilter {
    Eq { field: String, value: Value },
    /// Inclusive numeric/string range; either bound may be open.
    Range {
        field: String,
        min: Option<Value>,
        max: Option<Value>,
    },
}

impl QueryFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn range(field: impl Into<String>, min: Option<Value>, max: Option<Value>) -> Self {
        Self::Range {
            field: field.into(),
            min,
            max,
        }
    }

    /// Whether `payload` satisfies this filter. Missing fields never match.
    #[must_use]
    pub fn matches(&self, payload: &Value) -> bool {
        match self {
            Self::Eq { field, value } => payload.get(field) == Some(value),
            Self::Range { field, min, max } => {
                let Some(actual) = payload.get(field) else {
                    return false;
                };
                let above = min.as_ref().map_or(true, |m| compare(actual, m).is_some_and(|o| o.is_ge()));
                let below = max.as_ref().map_or(true, |m| compare(actual, m).is_some_and(|o| o.is_le()));
                above && below
            }
        }
    }

    /// Stable textual form used when hashing filter sets into cache keys.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Eq { field, value } => format!("{}={}", field, value),
            Self::Range { field, min, max } => format!(
                "{}:[{},{}]",
                field,
                min.as_ref().map_or_else(String::new, Value::to_string),
                max.as_ref().map_or_else(String::new, Value::to_string),
            ),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Filtered read against the remote relational cache.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteQuery {
    /// Logical collection, e.g. `matches`
    pub collection: String,
    pub filters: Vec<QueryFilter>,
    /// Only rows synced at or after this epoch-millis instant
    pub synced_after: i64,
}

/// A row returned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub collection: String,
    /// Epoch millis of the last sync that wrote this row
    pub last_synced_at: i64,
    pub payload: Value,
}

/// External relational cache. Errors are never fatal to callers.
#[async_trait]
pub trait RemoteQueryStore: Send + Sync {
    async fn query(&self, query: &RemoteQuery) -> Result<Vec<RemoteRow>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_filter() {
        let f = QueryFilter::eq("status", "LIVE");
        assert!(f.matches(&json!({"status": "LIVE"})));
        assert!(!f.matches(&json!({"status": "FINISHED"})));
        assert!(!f.matches(&json!({"other": 1})));
    }

    #[test]
    fn test_range_filter_numbers_and_strings() {
        let f = QueryFilter::range("year", Some(json!(2020)), Some(json!(2022)));
        assert!(f.matches(&json!({"year": 2021})));
        assert!(f.matches(&json!({"year": 2022})));
        assert!(!f.matches(&json!({"year": 2023})));

        let open = QueryFilter::range("date", Some(json!("2024-01-01")), None);
        assert!(open.matches(&json!({"date": "2024-06-01"})));
        assert!(!open.matches(&json!({"date": "2023-12-31"})));
    }

    #[test]
    fn test_range_filter_type_mismatch_never_matches() {
        let f = QueryFilter::range("year", Some(json!(2020)), None);
        assert!(!f.matches(&json!({"year": "2021"})));
    }

    #[test]
    fn test_canonical_is_stable() {
        let f = QueryFilter::range("year", None, Some(json!(2020)));
        assert_eq!(f.canonical(), "year:[,2020]");
        assert_eq!(QueryFilter::eq("id", 7).canonical(), "id=7");
    }
}
