//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for Harbor.
///
/// Storage backends are **flat string maps**. They provide simple operations
/// for reading, replacing, removing and enumerating entries. Harbor owns all
/// interpretation of keys and values - backends do not understand records,
/// expiry, ciphertext or queue snapshots.
///
/// # Invariants
///
/// - `get_string` returns exactly the value last passed to `set_string`
/// - `set_string` replaces the whole value; there is no partial update
/// - `list_all_keys` returns a fresh, finite snapshot on every call
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_string(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// After this returns successfully the value survives process
    /// termination (for durable backends).
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    fn set_string(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    fn remove_key(&self, key: &str) -> StorageResult<()>;

    /// Returns every key currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be enumerated.
    fn list_all_keys(&self) -> StorageResult<Vec<String>>;

    /// Flushes pending writes to durable storage.
    ///
    /// The default implementation does nothing, which is correct for
    /// backends that persist synchronously on every write.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl<B: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<B> {
    fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get_string(key)
    }

    fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set_string(key, value)
    }

    fn remove_key(&self, key: &str) -> StorageResult<()> {
        (**self).remove_key(key)
    }

    fn list_all_keys(&self) -> StorageResult<Vec<String>> {
        (**self).list_all_keys()
    }

    fn flush(&self) -> StorageResult<()> {
        (**self).flush()
    }
}
