//! External store contracts and in-memory adapters.
//!
//! The concrete persistent key-value store and the remote relational cache
//! live outside this crate; tiers only see [`KeyValueStore`] and
//! [`RemoteQueryStore`].

pub mod memory;
pub mod traits;

pub use memory::{InMemoryKeyValueStore, InMemoryRemoteStore};
pub use traits::{KeyValueStore, QueryFilter, RemoteQuery, RemoteQueryStore, RemoteRow, StorageError};
