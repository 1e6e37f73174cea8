//! Configuration for the sync coordinator and the engine.

use std::time::Duration;

use harbor_core::{BackoffPolicy, CacheConfig, QueueConfig, StoreConfig};

/// Configuration for draining the action queue.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum actions replayed per drain pass.
    pub batch_size: usize,
    /// Period of the background drain; `None` disables it.
    pub sync_interval: Option<Duration>,
    /// Whether regaining connectivity triggers a drain.
    pub drain_on_reconnect: bool,
}

impl SyncConfig {
    /// Creates a sync configuration with default values.
    pub fn new() -> Self {
        Self {
            batch_size: 50,
            sync_interval: Some(Duration::from_secs(30)),
            drain_on_reconnect: true,
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the interval of the background drain.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disables the background drain.
    pub fn without_sync_interval(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    /// Sets whether regaining connectivity triggers a drain.
    pub fn with_drain_on_reconnect(mut self, enabled: bool) -> Self {
        self.drain_on_reconnect = enabled;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for an [`OfflineEngine`](crate::OfflineEngine).
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Key-value store configuration.
    pub store: StoreConfig,
    /// Cache configuration.
    pub cache: CacheConfig,
    /// Queue configuration.
    pub queue: QueueConfig,
    /// Sync configuration.
    pub sync: SyncConfig,
    /// Skip the maintenance sweep at init.
    pub skip_init_sweep: bool,
}

impl EngineConfig {
    /// Creates an engine configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the store namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.store.namespace = namespace.into();
        self
    }

    /// Sets the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the queue configuration.
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Sets the retry backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.queue.backoff = backoff;
        self
    }

    /// Sets the sync configuration.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Skips the maintenance sweep at init.
    pub fn with_skip_init_sweep(mut self, skip: bool) -> Self {
        self.skip_init_sweep = skip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_batch_size(10)
            .with_sync_interval(Duration::from_secs(5))
            .with_drain_on_reconnect(false);

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.sync_interval, Some(Duration::from_secs(5)));
        assert!(!config.drain_on_reconnect);
        assert_eq!(config.without_sync_interval().sync_interval, None);
    }

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new()
            .with_namespace("user-7")
            .with_backoff(BackoffPolicy::new().with_base(Duration::from_secs(1)));

        assert_eq!(config.store.namespace, "user-7");
        assert_eq!(config.queue.backoff.base, Duration::from_secs(1));
        assert_eq!(config.sync.sync_interval, Some(Duration::from_secs(30)));
        assert!(!config.skip_init_sweep);
    }
}
