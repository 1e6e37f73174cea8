//! Key-value store with TTL and optional encryption.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use harbor_crypto::{is_sealed, Crypto};
use harbor_storage::StorageBackend;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::record::Record;

/// Sub-namespace for engine internals. Hidden from listings, kept by `clear`.
pub(crate) const INTERNAL_PREFIX: &str = "__harbor:";

/// Per-write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Lifetime in milliseconds; `None` never expires.
    pub ttl_millis: Option<u64>,
    /// Whether to seal the record at rest.
    pub encrypted: bool,
}

impl SetOptions {
    /// No TTL, no encryption.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ttl_millis: None,
            encrypted: false,
        }
    }

    /// Sets the TTL.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl_millis = Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the TTL in milliseconds.
    #[must_use]
    pub const fn ttl_millis(mut self, ttl_millis: u64) -> Self {
        self.ttl_millis = Some(ttl_millis);
        self
    }

    /// Seals the record at rest.
    #[must_use]
    pub const fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

/// Result of a maintenance sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys whose TTL had elapsed.
    pub expired: Vec<String>,
    /// Keys whose records could not be opened or decoded.
    pub corrupt: Vec<String>,
    /// Sealed keys left in place because the store runs on a fallback key.
    pub locked: Vec<String>,
    /// Whether the keys were only reported, not removed.
    pub dry_run: bool,
}

impl SweepReport {
    /// Total number of keys found.
    #[must_use]
    pub fn total(&self) -> usize {
        self.expired.len() + self.corrupt.len()
    }
}

/// Space used by a namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    /// Number of keys.
    pub keys: usize,
    /// Bytes of keys plus stored (possibly sealed) values.
    pub bytes: usize,
}

enum Decoded {
    Live(Record),
    Expired,
    Corrupt(String),
    /// Sealed under a key this store does not hold.
    Locked,
}

/// A namespaced key-value store over a [`StorageBackend`].
///
/// Every value is wrapped in a [`Record`], serialized to JSON and, on
/// request, sealed. Reads detect sealing by the `hv1:` marker so a record
/// written during a crypto fallback remains readable.
///
/// Expired records are removed when read. Corrupt records read as absent
/// and are removed by [`sweep`](Self::sweep).
pub struct KvStore {
    backend: Arc<dyn StorageBackend>,
    crypto: Arc<Crypto>,
    clock: Arc<dyn Clock>,
    namespace: String,
    prefix: String,
    write_lock: Mutex<()>,
}

impl KvStore {
    /// Creates a store.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        crypto: Arc<Crypto>,
        clock: Arc<dyn Clock>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            backend,
            crypto,
            clock,
            namespace: config.namespace.clone(),
            prefix: format!("{}/", config.namespace),
            write_lock: Mutex::new(()),
        }
    }

    /// The namespace this store writes under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The crypto front end used for sealing.
    pub fn crypto(&self) -> &Crypto {
        &self.crypto
    }

    /// The store's clock.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The store's current time in epoch milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Stores `value` under `key`, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is reserved or the backend write fails.
    pub fn set(&self, key: &str, value: &[u8], options: SetOptions) -> CoreResult<()> {
        check_key(key)?;
        let mut record = Record::new(value.to_vec(), self.now_ms(), options.ttl_millis);
        record.encrypted = options.encrypted;

        let mut text = serde_json::to_string(&record)?;
        if options.encrypted {
            let sealed = self.crypto.seal(&text);
            if sealed.encrypted {
                text = sealed.text;
            } else {
                record.encrypted = false;
                text = serde_json::to_string(&record)?;
            }
        }

        let _guard = self.write_lock.lock();
        self.backend.set_string(&self.storage_key(key), &text)?;
        debug!(key, encrypted = record.encrypted, ttl = ?record.ttl_millis, "stored record");
        Ok(())
    }

    /// Serializes `value` as JSON and stores it under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> CoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes, options)
    }

    /// Returns the value under `key` if present, intact and not expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.get_record(key)?.map(|record| record.value))
    }

    /// Reads the value under `key` as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or the stored bytes are
    /// not a `T`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the full record under `key` if present, intact and not expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or an expired record
    /// cannot be removed.
    pub fn get_record(&self, key: &str) -> CoreResult<Option<Record>> {
        check_key(key)?;
        let storage_key = self.storage_key(key);
        let Some(raw) = self.backend.get_string(&storage_key)? else {
            return Ok(None);
        };

        let now = self.now_ms();
        match self.decode(&raw, now) {
            Decoded::Live(record) => Ok(Some(record)),
            Decoded::Expired => {
                self.remove_if_expired(&storage_key)?;
                debug!(key, "record expired on read");
                Ok(None)
            }
            Decoded::Corrupt(reason) => {
                warn!(key, %reason, "unreadable record left for sweep");
                Ok(None)
            }
            Decoded::Locked => {
                debug!(key, "sealed record unreadable under a weakened key");
                Ok(None)
            }
        }
    }

    /// Returns true if `get` would return a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn contains(&self, key: &str) -> CoreResult<bool> {
        Ok(self.get_record(key)?.is_some())
    }

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn remove(&self, key: &str) -> CoreResult<()> {
        check_key(key)?;
        let _guard = self.write_lock.lock();
        self.backend.remove_key(&self.storage_key(key))?;
        Ok(())
    }

    /// Removes every user record in the namespace. Returns the number removed.
    ///
    /// Engine internals (the persisted key) are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed or written.
    pub fn clear(&self) -> CoreResult<usize> {
        let _guard = self.write_lock.lock();
        let keys = self.namespace_keys()?;
        for key in &keys {
            self.backend.remove_key(&self.storage_key(key))?;
        }
        debug!(namespace = %self.namespace, removed = keys.len(), "cleared namespace");
        Ok(keys.len())
    }

    /// Lists the namespace-relative keys currently stored.
    ///
    /// Expired records not yet removed are included.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed.
    pub fn list_keys(&self) -> CoreResult<Vec<String>> {
        self.namespace_keys()
    }

    /// Lists the keys that start with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed.
    pub fn list_keys_with_prefix(&self, prefix: &str) -> CoreResult<Vec<String>> {
        let mut keys = self.namespace_keys()?;
        keys.retain(|key| key.starts_with(prefix));
        Ok(keys)
    }

    /// Removes expired and corrupt records.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed or written.
    pub fn sweep(&self) -> CoreResult<SweepReport> {
        self.sweep_inner(false)
    }

    /// Reports what [`sweep`](Self::sweep) would remove without removing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn sweep_dry_run(&self) -> CoreResult<SweepReport> {
        self.sweep_inner(true)
    }

    /// Counts the keys and bytes stored in the namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn usage(&self) -> CoreResult<StorageUsage> {
        let mut usage = StorageUsage::default();
        for key in self.namespace_keys()? {
            if let Some(raw) = self.backend.get_string(&self.storage_key(&key))? {
                usage.keys += 1;
                usage.bytes += key.len() + raw.len();
            }
        }
        Ok(usage)
    }

    /// Flushes the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot flush.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    fn sweep_inner(&self, dry_run: bool) -> CoreResult<SweepReport> {
        let now = self.now_ms();
        let mut report = SweepReport {
            dry_run,
            ..SweepReport::default()
        };

        for key in self.namespace_keys()? {
            let storage_key = self.storage_key(&key);
            let _guard = self.write_lock.lock();
            let Some(raw) = self.backend.get_string(&storage_key)? else {
                continue;
            };
            match self.decode(&raw, now) {
                Decoded::Live(_) => continue,
                Decoded::Locked => {
                    debug!(key = %key, "keeping sealed record under a weakened key");
                    report.locked.push(key);
                    continue;
                }
                Decoded::Expired => report.expired.push(key),
                Decoded::Corrupt(reason) => {
                    warn!(key = %key, %reason, "sweeping corrupt record");
                    report.corrupt.push(key);
                }
            }
            if !dry_run {
                self.backend.remove_key(&storage_key)?;
            }
        }

        if report.total() > 0 {
            debug!(
                expired = report.expired.len(),
                corrupt = report.corrupt.len(),
                dry_run,
                "sweep finished"
            );
        }
        Ok(report)
    }

    fn remove_if_expired(&self, storage_key: &str) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        // A writer may have replaced the record since it was read.
        if let Some(raw) = self.backend.get_string(storage_key)? {
            if matches!(self.decode(&raw, self.now_ms()), Decoded::Expired) {
                self.backend.remove_key(storage_key)?;
            }
        }
        Ok(())
    }

    fn decode(&self, raw: &str, now: u64) -> Decoded {
        let text: Cow<'_, str> = if is_sealed(raw) {
            let opened = self.crypto.open(raw);
            if is_sealed(&opened) {
                // The real key may come back once the key store recovers.
                if self.crypto.key_source().is_weakened() {
                    return Decoded::Locked;
                }
                return Decoded::Corrupt("sealed record could not be opened".to_string());
            }
            Cow::Owned(opened)
        } else {
            Cow::Borrowed(raw)
        };

        match serde_json::from_str::<Record>(&text) {
            Ok(record) if record.is_expired(now) => Decoded::Expired,
            Ok(record) => Decoded::Live(record),
            Err(e) => Decoded::Corrupt(e.to_string()),
        }
    }

    fn namespace_keys(&self) -> CoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .backend
            .list_all_keys()?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
            .filter(|key| !key.starts_with(INTERNAL_PREFIX))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

fn check_key(key: &str) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_operation("key must not be empty"));
    }
    if key.starts_with(INTERNAL_PREFIX) {
        return Err(CoreError::invalid_operation(format!(
            "keys starting with {INTERNAL_PREFIX} are reserved"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use harbor_crypto::{
        Cipher, CryptoError, CryptoResult, EncryptionKey, KeySource, SEALED_PREFIX,
    };
    use harbor_storage::InMemoryBackend;

    struct BrokenCipher;

    impl Cipher for BrokenCipher {
        fn encrypt(&self, _plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
            Err(CryptoError::encryption_failed("broken"))
        }

        fn decrypt(&self, _ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
            Err(CryptoError::decryption_failed("broken"))
        }
    }

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        clock: Arc<ManualClock>,
        store: KvStore,
    }

    fn fixture_with(crypto: Crypto) -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = KvStore::new(
            backend.clone(),
            Arc::new(crypto),
            clock.clone(),
            &StoreConfig::default(),
        );
        Fixture {
            backend,
            clock,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Crypto::new(EncryptionKey::generate(), KeySource::Generated))
    }

    #[test]
    fn set_get_remove() {
        let f = fixture();
        f.store.set("greeting", b"hello", SetOptions::new()).unwrap();
        assert_eq!(f.store.get("greeting").unwrap(), Some(b"hello".to_vec()));
        assert!(f.store.contains("greeting").unwrap());

        f.store.remove("greeting").unwrap();
        assert_eq!(f.store.get("greeting").unwrap(), None);
        f.store.remove("greeting").unwrap();
    }

    #[test]
    fn overwrite_replaces_record() {
        let f = fixture();
        f.store.set("k", b"one", SetOptions::new().ttl_millis(5)).unwrap();
        f.store.set("k", b"two", SetOptions::new()).unwrap();

        f.clock.advance_ms(100);
        assert_eq!(f.store.get("k").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn ttl_boundary() {
        let f = fixture();
        f.store
            .set("k", b"v", SetOptions::new().ttl_millis(1_000))
            .unwrap();

        f.clock.advance_ms(999);
        assert_eq!(f.store.get("k").unwrap(), Some(b"v".to_vec()));

        f.clock.advance_ms(2);
        assert_eq!(f.store.get("k").unwrap(), None);
        assert!(f.backend.is_empty());
    }

    #[test]
    fn encrypted_record_is_sealed_at_rest() {
        let f = fixture();
        f.store
            .set("secret", b"token", SetOptions::new().encrypted())
            .unwrap();

        let raw = f.backend.entries()["harbor/secret"].clone();
        assert!(raw.starts_with(SEALED_PREFIX));
        assert!(!raw.contains("dG9rZW4"));

        let record = f.store.get_record("secret").unwrap().unwrap();
        assert!(record.encrypted);
        assert_eq!(record.value, b"token");
    }

    #[test]
    fn seal_failure_stores_plaintext_marked_unencrypted() {
        let f = fixture_with(Crypto::with_cipher(BrokenCipher, KeySource::Generated));
        f.store
            .set("secret", b"token", SetOptions::new().encrypted())
            .unwrap();

        let raw = f.backend.entries()["harbor/secret"].clone();
        assert!(!raw.starts_with(SEALED_PREFIX));

        let record = f.store.get_record("secret").unwrap().unwrap();
        assert!(!record.encrypted);
        assert_eq!(record.value, b"token");
        assert_eq!(f.store.crypto().health().encrypt_fallbacks, 1);
    }

    #[test]
    fn corrupt_record_reads_as_absent_until_swept() {
        let f = fixture();
        f.backend.set_string("harbor/bad", "{not json").unwrap();
        f.backend
            .set_string("harbor/sealed", &format!("{SEALED_PREFIX}AAAA"))
            .unwrap();

        assert_eq!(f.store.get("bad").unwrap(), None);
        assert_eq!(f.store.get("sealed").unwrap(), None);
        assert_eq!(f.store.list_keys().unwrap().len(), 2);

        let dry = f.store.sweep_dry_run().unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.corrupt, vec!["bad".to_string(), "sealed".to_string()]);
        assert_eq!(f.store.list_keys().unwrap().len(), 2);

        let report = f.store.sweep().unwrap();
        assert_eq!(report.corrupt.len(), 2);
        assert!(f.store.list_keys().unwrap().is_empty());
    }

    #[test]
    fn weakened_key_sweep_keeps_sealed_records() {
        let f = fixture();
        f.store
            .set("token", b"secret", SetOptions::new().encrypted())
            .unwrap();
        f.backend.set_string("harbor/bad", "{not json").unwrap();

        let fallback = KvStore::new(
            f.backend.clone(),
            Arc::new(Crypto::new(EncryptionKey::generate(), KeySource::Fallback)),
            f.clock.clone(),
            &StoreConfig::default(),
        );
        assert_eq!(fallback.get("token").unwrap(), None);

        let report = fallback.sweep().unwrap();
        assert_eq!(report.locked, vec!["token".to_string()]);
        assert_eq!(report.corrupt, vec!["bad".to_string()]);
        assert_eq!(report.total(), 1);
        assert_eq!(f.store.get("token").unwrap(), Some(b"secret".to_vec()));
    }

    #[test]
    fn ttl_duration_saturates() {
        assert_eq!(SetOptions::new().ttl(Duration::MAX).ttl_millis, Some(u64::MAX));
        assert_eq!(
            SetOptions::new().ttl(Duration::from_secs(2)).ttl_millis,
            Some(2_000)
        );
    }

    #[test]
    fn sweep_removes_only_expired() {
        let f = fixture();
        f.store.set("short", b"a", SetOptions::new().ttl_millis(10)).unwrap();
        f.store.set("long", b"b", SetOptions::new().ttl_millis(10_000)).unwrap();
        f.store.set("forever", b"c", SetOptions::new()).unwrap();

        f.clock.advance_ms(11);
        let report = f.store.sweep().unwrap();
        assert_eq!(report.expired, vec!["short".to_string()]);
        assert_eq!(
            f.store.list_keys().unwrap(),
            vec!["forever".to_string(), "long".to_string()]
        );
    }

    #[test]
    fn listing_is_namespace_relative() {
        let f = fixture();
        f.backend.set_string("other/x", "{}").unwrap();
        f.backend.set_string("harbor/__harbor:key", "abc").unwrap();
        f.store.set("cache:1", b"", SetOptions::new()).unwrap();
        f.store.set("queue:meta", b"", SetOptions::new()).unwrap();

        assert_eq!(
            f.store.list_keys().unwrap(),
            vec!["cache:1".to_string(), "queue:meta".to_string()]
        );
        assert_eq!(
            f.store.list_keys_with_prefix("cache:").unwrap(),
            vec!["cache:1".to_string()]
        );
    }

    #[test]
    fn clear_keeps_internals_and_other_namespaces() {
        let f = fixture();
        f.backend.set_string("other/x", "{}").unwrap();
        f.backend.set_string("harbor/__harbor:key", "abc").unwrap();
        f.store.set("a", b"1", SetOptions::new()).unwrap();
        f.store.set("b", b"2", SetOptions::new()).unwrap();

        assert_eq!(f.store.clear().unwrap(), 2);
        let entries = f.backend.entries();
        assert!(entries.contains_key("other/x"));
        assert!(entries.contains_key("harbor/__harbor:key"));
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn reserved_and_empty_keys_rejected() {
        let f = fixture();
        assert!(matches!(
            f.store.set("", b"", SetOptions::new()),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            f.store.get("__harbor:key"),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn json_helpers() {
        let f = fixture();
        f.store
            .set_json("profile", &serde_json::json!({"name": "ada"}), SetOptions::new())
            .unwrap();
        let value: serde_json::Value = f.store.get_json("profile").unwrap().unwrap();
        assert_eq!(value["name"], "ada");

        let wrong: CoreResult<Option<u32>> = f.store.get_json("profile");
        assert!(matches!(wrong, Err(CoreError::Serialization(_))));
    }

    #[test]
    fn usage_counts_keys_and_bytes() {
        let f = fixture();
        assert_eq!(f.store.usage().unwrap(), StorageUsage::default());

        f.store.set("a", b"1", SetOptions::new()).unwrap();
        let usage = f.store.usage().unwrap();
        assert_eq!(usage.keys, 1);
        assert!(usage.bytes > 1);
    }
}
