//! Read-through cache with TTL and LRU eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{CoreError, CoreResult};
use crate::kv::{KvStore, SetOptions};

/// Sub-namespace of the key-value store owned by the cache.
pub const CACHE_PREFIX: &str = "cache:";

/// A cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The cached bytes.
    #[serde(with = "crate::record::base64_bytes")]
    pub data: Vec<u8>,
    /// When the data was last written, in epoch milliseconds.
    pub last_sync: u64,
    /// Incremented on every overwrite of the same logical key.
    pub version: u64,
    /// Lifetime in milliseconds.
    pub ttl_millis: u64,
}

impl CacheEntry {
    /// Returns true once more than `ttl_millis` have elapsed since `last_sync`.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_sync) > self.ttl_millis
    }
}

/// Cache counters and current occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that returned data.
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Entries dropped to stay within budget.
    pub evictions: u64,
    /// Entries currently indexed.
    pub entries: usize,
    /// Payload bytes currently indexed.
    pub bytes: usize,
}

impl CacheStats {
    /// Fraction of reads that hit, or 0 with no reads.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    tick: u64,
    size: usize,
    version: u64,
    last_sync: u64,
    ttl_millis: u64,
}

/// Recency order over cache keys. Lowest tick is least recently used.
#[derive(Debug, Default)]
struct LruIndex {
    next_tick: u64,
    order: BTreeMap<u64, String>,
    slots: HashMap<String, Slot>,
    bytes: usize,
}

impl LruIndex {
    fn insert(&mut self, key: String, entry: &CacheEntry) {
        self.remove(&key);
        let tick = self.bump();
        self.bytes += entry.data.len();
        self.order.insert(tick, key.clone());
        self.slots.insert(
            key,
            Slot {
                tick,
                size: entry.data.len(),
                version: entry.version,
                last_sync: entry.last_sync,
                ttl_millis: entry.ttl_millis,
            },
        );
    }

    fn touch(&mut self, key: &str) -> bool {
        let tick = self.bump();
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, key.to_string());
        true
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        self.bytes -= slot.size;
        Some(slot)
    }

    fn least_recent(&self) -> Option<&String> {
        self.order.values().next()
    }

    fn version(&self, key: &str) -> Option<u64> {
        self.slots.get(key).map(|slot| slot.version)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }
}

/// A cache of fetched payloads stored in the key-value store.
///
/// Logical keys (typically request URLs or query descriptors) are hashed so
/// arbitrary strings map to fixed-length store keys under `cache:`. Entries
/// expire lazily on read. Eviction runs on `put` only, removing the least
/// recently used entries until both the item and byte budgets hold.
///
/// Recency lives in memory and is rebuilt from `lastSync` order at open, so
/// the first eviction after a restart approximates LRU by write time.
pub struct CacheLayer {
    kv: Arc<KvStore>,
    config: CacheConfig,
    index: Mutex<LruIndex>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

impl CacheLayer {
    /// Opens the cache and indexes the entries already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored entries cannot be listed or read.
    pub fn open(kv: Arc<KvStore>, config: CacheConfig) -> CoreResult<Self> {
        let cache = Self {
            kv,
            config,
            index: Mutex::new(LruIndex::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };
        cache.rebuild_index()?;
        Ok(cache)
    }

    /// Store key for a logical key.
    #[must_use]
    pub fn cache_key(logical_key: &str) -> String {
        format!("{CACHE_PREFIX}{}", harbor_crypto::hash(logical_key))
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Rebuilds the recency index from storage. Returns the number of entries.
    ///
    /// Undecodable entries are removed. If the stored entries exceed the
    /// budget they are evicted oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn rebuild_index(&self) -> CoreResult<usize> {
        let mut entries = Vec::new();
        for key in self.kv.list_keys_with_prefix(CACHE_PREFIX)? {
            match self.kv.get_json::<CacheEntry>(&key) {
                Ok(Some(entry)) => entries.push((key, entry)),
                Ok(None) => {}
                Err(CoreError::Serialization(e)) => {
                    warn!(key = %key, error = %e, "dropping undecodable cache entry");
                    self.kv.remove(&key)?;
                }
                Err(e) => return Err(e),
            }
        }
        entries.sort_by_key(|(_, entry)| entry.last_sync);

        let mut index = self.index.lock();
        *index = LruIndex::default();
        for (key, entry) in &entries {
            index.insert(key.clone(), entry);
        }
        self.evict_locked(&mut index, None)?;

        debug!(entries = index.len(), bytes = index.bytes, "cache index rebuilt");
        Ok(index.len())
    }

    /// Caches `data` under `logical_key` with the default TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntryTooLarge`] if `data` alone exceeds the byte
    /// budget, or a storage error.
    pub fn put(&self, logical_key: &str, data: &[u8]) -> CoreResult<CacheEntry> {
        self.put_with_ttl(logical_key, data, self.config.default_ttl)
    }

    /// Caches `data` under `logical_key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntryTooLarge`] if `data` alone exceeds the byte
    /// budget, or a storage error.
    pub fn put_with_ttl(
        &self,
        logical_key: &str,
        data: &[u8],
        ttl: Duration,
    ) -> CoreResult<CacheEntry> {
        if data.len() > self.config.max_bytes {
            return Err(CoreError::EntryTooLarge {
                size: data.len(),
                limit: self.config.max_bytes,
            });
        }

        let key = Self::cache_key(logical_key);
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let mut index = self.index.lock();

        let entry = CacheEntry {
            data: data.to_vec(),
            last_sync: self.kv.now_ms(),
            version: index.version(&key).map_or(1, |v| v + 1),
            ttl_millis,
        };

        let mut options = SetOptions::new().ttl_millis(ttl_millis);
        if self.config.encrypt {
            options = options.encrypted();
        }
        self.kv.set_json(&key, &entry, options)?;
        index.insert(key.clone(), &entry);
        self.evict_locked(&mut index, Some(&key))?;

        debug!(key = %key, version = entry.version, size = data.len(), "cached");
        Ok(entry)
    }

    /// Serializes `value` as JSON and caches it with the default TTL.
    ///
    /// # Errors
    ///
    /// See [`put`](Self::put).
    pub fn put_json<T: Serialize + ?Sized>(
        &self,
        logical_key: &str,
        value: &T,
    ) -> CoreResult<CacheEntry> {
        let bytes = serde_json::to_vec(value)?;
        self.put(logical_key, &bytes)
    }

    /// Returns the cached bytes, or `None` on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get(&self, logical_key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.get_entry(logical_key)?.map(|entry| entry.data))
    }

    /// Reads cached JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the data is not a `T`.
    pub fn get_json<T: DeserializeOwned>(&self, logical_key: &str) -> CoreResult<Option<T>> {
        match self.get(logical_key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the cached entry, or `None` on a miss. Hits refresh recency.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_entry(&self, logical_key: &str) -> CoreResult<Option<CacheEntry>> {
        let key = Self::cache_key(logical_key);
        let now = self.kv.now_ms();

        let stored = match self.kv.get_json::<CacheEntry>(&key) {
            Ok(stored) => stored,
            Err(CoreError::Serialization(e)) => {
                warn!(key = %key, error = %e, "dropping undecodable cache entry");
                self.kv.remove(&key)?;
                None
            }
            Err(e) => return Err(e),
        };

        let mut index = self.index.lock();
        match stored {
            Some(entry) if entry.is_expired(now) => {
                self.kv.remove(&key)?;
                index.remove(&key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Some(entry) => {
                if !index.touch(&key) {
                    index.insert(key, &entry);
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            None => {
                // The store drops records whose TTL elapsed before we see them.
                if let Some(slot) = index.remove(&key) {
                    if now.saturating_sub(slot.last_sync) > slot.ttl_millis {
                        self.expirations.fetch_add(1, Ordering::Relaxed);
                    }
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Returns cached data, calling `fetch` and caching its result on a miss.
    ///
    /// Failing to cache the fetched data is logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns the error from `fetch`, or a storage error from the lookup.
    pub fn get_or_fetch<F, E>(
        &self,
        logical_key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Vec<u8>, E>
    where
        F: FnOnce() -> Result<Vec<u8>, E>,
        E: From<CoreError>,
    {
        if let Some(data) = self.get(logical_key)? {
            return Ok(data);
        }

        let data = fetch()?;
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        if let Err(e) = self.put_with_ttl(logical_key, &data, ttl) {
            warn!(logical_key, error = %e, "fetched data not cached");
        }
        Ok(data)
    }

    /// Removes the entry for `logical_key`. Returns true if one was indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn invalidate(&self, logical_key: &str) -> CoreResult<bool> {
        let key = Self::cache_key(logical_key);
        let mut index = self.index.lock();
        self.kv.remove(&key)?;
        Ok(index.remove(&key).is_some())
    }

    /// Removes every cache entry. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed or written.
    pub fn clear(&self) -> CoreResult<usize> {
        let mut index = self.index.lock();
        let keys = self.kv.list_keys_with_prefix(CACHE_PREFIX)?;
        for key in &keys {
            self.kv.remove(key)?;
        }
        *index = LruIndex::default();
        debug!(removed = keys.len(), "cache cleared");
        Ok(keys.len())
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    /// Returns true if no entries are indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes indexed.
    pub fn size_bytes(&self) -> usize {
        self.index.lock().bytes
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: index.len(),
            bytes: index.bytes,
        }
    }

    fn evict_locked(&self, index: &mut LruIndex, keep: Option<&str>) -> CoreResult<usize> {
        let mut evicted = 0;
        while index.len() > self.config.max_items || index.bytes > self.config.max_bytes {
            let Some(victim) = index.least_recent().cloned() else {
                break;
            };
            if keep == Some(victim.as_str()) {
                break;
            }
            self.kv.remove(&victim)?;
            index.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            evicted += 1;
            debug!(key = %victim, "evicted cache entry");
        }
        Ok(evicted)
    }
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
