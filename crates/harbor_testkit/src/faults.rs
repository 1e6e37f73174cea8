//! Fault injection for storage, key persistence and encryption.

use std::sync::atomic::{AtomicBool, Ordering};

use harbor_crypto::{Cipher, CryptoError, CryptoResult, EncryptionKey, KeyStore};
use harbor_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};

/// An in-memory backend whose reads and writes can be made to fail.
#[derive(Debug, Default)]
pub struct FailingBackend {
    inner: InMemoryBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FailingBackend {
    /// Creates a healthy backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `get_string` and `list_all_keys` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes `set_string`, `remove_key` and `flush` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(format!("injected {op} failure")));
        }
        Ok(())
    }
}

impl StorageBackend for FailingBackend {
    fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        self.check(&self.fail_reads, "read")?;
        self.inner.get_string(key)
    }

    fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check(&self.fail_writes, "write")?;
        self.inner.set_string(key, value)
    }

    fn remove_key(&self, key: &str) -> StorageResult<()> {
        self.check(&self.fail_writes, "remove")?;
        self.inner.remove_key(key)
    }

    fn list_all_keys(&self) -> StorageResult<Vec<String>> {
        self.check(&self.fail_reads, "list")?;
        self.inner.list_all_keys()
    }

    fn flush(&self) -> StorageResult<()> {
        self.check(&self.fail_writes, "flush")?;
        self.inner.flush()
    }
}

/// A key store that cannot load, store, or both.
#[derive(Debug, Clone, Copy)]
pub struct FailingKeyStore {
    /// `load_key` fails.
    pub fail_load: bool,
    /// `store_key` fails.
    pub fail_store: bool,
}

impl FailingKeyStore {
    /// A key store that is unreadable.
    pub fn unreadable() -> Self {
        Self {
            fail_load: true,
            fail_store: false,
        }
    }

    /// A key store that loads nothing and cannot persist.
    pub fn read_only() -> Self {
        Self {
            fail_load: false,
            fail_store: true,
        }
    }
}

impl KeyStore for FailingKeyStore {
    fn load_key(&self) -> CryptoResult<Option<EncryptionKey>> {
        if self.fail_load {
            return Err(CryptoError::key_store("injected load failure"));
        }
        Ok(None)
    }

    fn store_key(&self, _key: &EncryptionKey) -> CryptoResult<()> {
        if self.fail_store {
            return Err(CryptoError::key_store("injected store failure"));
        }
        Ok(())
    }
}

/// A cipher that always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrokenCipher;

impl Cipher for BrokenCipher {
    fn encrypt(&self, _plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        Err(CryptoError::encryption_failed("injected failure"))
    }

    fn decrypt(&self, _ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        Err(CryptoError::decryption_failed("injected failure"))
    }
}
