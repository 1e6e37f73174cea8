//! Encryption key persisted in the storage backend.

use std::sync::Arc;

use harbor_crypto::{CryptoError, CryptoResult, EncryptionKey, KeyStore};
use harbor_storage::StorageBackend;

use crate::config::StoreConfig;
use crate::kv::INTERNAL_PREFIX;

/// A [`KeyStore`] that keeps the key base64-encoded in the backend under
/// `<namespace>/__harbor:key`.
///
/// This places the key next to the data it protects. Hosts with a platform
/// keychain should provide their own [`KeyStore`] instead.
pub struct StoredKeyStore {
    backend: Arc<dyn StorageBackend>,
    storage_key: String,
}

impl StoredKeyStore {
    /// Creates a key store for the configured namespace.
    pub fn new(backend: Arc<dyn StorageBackend>, config: &StoreConfig) -> Self {
        Self {
            backend,
            storage_key: format!("{}/{INTERNAL_PREFIX}key", config.namespace),
        }
    }
}

impl KeyStore for StoredKeyStore {
    fn load_key(&self) -> CryptoResult<Option<EncryptionKey>> {
        let stored = self
            .backend
            .get_string(&self.storage_key)
            .map_err(|e| CryptoError::key_store(e.to_string()))?;
        stored
            .map(|encoded| EncryptionKey::from_base64(encoded.trim()))
            .transpose()
    }

    fn store_key(&self, key: &EncryptionKey) -> CryptoResult<()> {
        self.backend
            .set_string(&self.storage_key, &key.to_base64())
            .map_err(|e| CryptoError::key_store(e.to_string()))
    }
}

impl std::fmt::Debug for StoredKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKeyStore")
            .field("storage_key", &self.storage_key)
            .finish_non_exhaustive()
    }
}
