//! Shared fixtures for unit tests.

use std::sync::Arc;

use harbor_crypto::{Crypto, EncryptionKey, KeySource};
use harbor_storage::InMemoryBackend;

use crate::clock::ManualClock;
use crate::config::StoreConfig;
use crate::kv::KvStore;

pub(crate) const START_MS: u64 = 1_700_000_000_000;

pub(crate) struct TestStore {
    pub backend: Arc<InMemoryBackend>,
    pub clock: Arc<ManualClock>,
    pub kv: Arc<KvStore>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(InMemoryBackend::new()))
    }

    pub fn with_backend(backend: Arc<InMemoryBackend>) -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let crypto = Crypto::new(EncryptionKey::generate(), KeySource::Generated);
        let kv = Arc::new(KvStore::new(
            backend.clone(),
            Arc::new(crypto),
            clock.clone(),
            &StoreConfig::default(),
        ));
        Self { backend, clock, kv }
    }
}
