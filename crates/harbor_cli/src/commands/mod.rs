//! CLI command implementations.

pub mod inspect;
pub mod queue;
pub mod reset;
pub mod sweep;

use std::path::Path;
use std::sync::Arc;

use harbor_core::{KvStore, StoreConfig, StoredKeyStore, SystemClock};
use harbor_crypto::{resolve_key, Crypto, KeySource};
use harbor_storage::{FileBackend, StorageBackend};

/// An opened store directory.
pub struct OpenStore {
    /// The store.
    pub kv: Arc<KvStore>,
    /// Where the encryption key came from.
    pub key_source: KeySource,
}

/// Opens an existing store directory.
///
/// Fails if the directory holds no data file, so that inspecting a wrong
/// path does not create a store there.
pub fn open_store(path: &Path, namespace: &str) -> Result<OpenStore, Box<dyn std::error::Error>> {
    if !path.join("store.json").exists() {
        return Err(format!("No store found at {:?}", path).into());
    }

    let backend: Arc<dyn StorageBackend> = Arc::new(FileBackend::open(path)?);
    let config = StoreConfig::new().namespace(namespace);
    let resolved = resolve_key(&StoredKeyStore::new(Arc::clone(&backend), &config))?;
    let crypto = Arc::new(Crypto::new(resolved.key, resolved.source));
    let kv = Arc::new(KvStore::new(backend, crypto, Arc::new(SystemClock), &config));

    Ok(OpenStore {
        kv,
        key_source: resolved.source,
    })
}
