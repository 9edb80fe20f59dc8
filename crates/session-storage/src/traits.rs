//! Storage trait definitions.

use crate::StorageResult;

/// Durable key-value storage surface.
///
/// Implementations are treated as effectively synchronous by the session core.
pub trait KeyValueStorage: Send + Sync {
    /// Store a value under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Remove a value. Returns true if something was removed.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
