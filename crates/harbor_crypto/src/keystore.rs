//! Key persistence and resolution.

use crate::error::CryptoResult;
use crate::key::EncryptionKey;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// Where the active encryption key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Loaded from the key store.
    Loaded,
    /// Freshly generated and persisted on this start.
    Generated,
    /// The static fallback key; the store could not be read or written.
    Fallback,
}

impl KeySource {
    /// Returns true if the key is the publicly derivable fallback.
    #[must_use]
    pub fn is_weakened(&self) -> bool {
        matches!(self, KeySource::Fallback)
    }
}

/// Persistence for the single symmetric key.
///
/// Platform keychains and secure enclaves implement this outside Harbor.
pub trait KeyStore: Send + Sync {
    /// Loads the persisted key, or `None` on first run.
    fn load_key(&self) -> CryptoResult<Option<EncryptionKey>>;

    /// Persists `key`, replacing any previous one.
    fn store_key(&self, key: &EncryptionKey) -> CryptoResult<()>;
}

/// A process-local key store for tests and ephemeral engines.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    key: RwLock<Option<EncryptionKey>>,
}

impl MemoryKeyStore {
    /// Creates an empty key store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a key store holding `key`.
    #[must_use]
    pub fn with_key(key: EncryptionKey) -> Self {
        Self {
            key: RwLock::new(Some(key)),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn load_key(&self) -> CryptoResult<Option<EncryptionKey>> {
        Ok(self.key.read().clone())
    }

    fn store_key(&self, key: &EncryptionKey) -> CryptoResult<()> {
        *self.key.write() = Some(key.clone());
        Ok(())
    }
}

/// A key together with its provenance.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    /// The key to use.
    pub key: EncryptionKey,
    /// Where it came from.
    pub source: KeySource,
}

/// Loads the persisted key, generating and persisting one on first run.
///
/// If the store cannot be read, or a freshly generated key cannot be
/// persisted, the static fallback key is returned with
/// [`KeySource::Fallback`] so the engine stays usable.
///
/// # Errors
///
/// Returns an error only if the fallback key itself cannot be derived.
pub fn resolve_key(store: &dyn KeyStore) -> CryptoResult<ResolvedKey> {
    match store.load_key() {
        Ok(Some(key)) => {
            debug!("loaded persisted encryption key");
            Ok(ResolvedKey {
                key,
                source: KeySource::Loaded,
            })
        }
        Ok(None) => {
            let key = EncryptionKey::generate();
            match store.store_key(&key) {
                Ok(()) => {
                    info!("generated new encryption key");
                    Ok(ResolvedKey {
                        key,
                        source: KeySource::Generated,
                    })
                }
                Err(e) => {
                    warn!(error = %e, "cannot persist generated key, using fallback key");
                    fallback()
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot load encryption key, using fallback key");
            fallback()
        }
    }
}

fn fallback() -> CryptoResult<ResolvedKey> {
    Ok(ResolvedKey {
        key: EncryptionKey::fallback()?,
        source: KeySource::Fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;

    struct UnreadableStore;

    impl KeyStore for UnreadableStore {
        fn load_key(&self) -> CryptoResult<Option<EncryptionKey>> {
            Err(CryptoError::key_store("keychain locked"))
        }

        fn store_key(&self, _key: &EncryptionKey) -> CryptoResult<()> {
            Err(CryptoError::key_store("keychain locked"))
        }
    }

    #[test]
    fn first_run_generates_and_persists() {
        let store = MemoryKeyStore::new();

        let first = resolve_key(&store).unwrap();
        assert_eq!(first.source, KeySource::Generated);

        let second = resolve_key(&store).unwrap();
        assert_eq!(second.source, KeySource::Loaded);
        assert_eq!(first.key, second.key);
    }

    #[test]
    fn unreadable_store_uses_fallback() {
        let resolved = resolve_key(&UnreadableStore).unwrap();
        assert_eq!(resolved.source, KeySource::Fallback);
        assert!(resolved.source.is_weakened());
        assert_eq!(resolved.key, EncryptionKey::fallback().unwrap());
    }

    #[test]
    fn preloaded_store_is_loaded() {
        let key = EncryptionKey::generate();
        let store = MemoryKeyStore::with_key(key.clone());

        let resolved = resolve_key(&store).unwrap();
        assert_eq!(resolved.source, KeySource::Loaded);
        assert_eq!(resolved.key, key);
    }
}
