//! Durable key-value storage used for the device identity and the pending
//! queue.
//!
//! Implementors must be `Send + Sync` so they can be shared across tasks.
//! Values are opaque strings; callers own their serialization.

use crate::error::StorageError;

pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`. Returns `None` if the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or replace the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
