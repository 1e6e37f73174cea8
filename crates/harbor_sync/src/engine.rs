//! The offline engine facade.

use std::sync::Arc;

use harbor_core::{
    ActionQueue, ActionRequest, CacheLayer, Clock, FailedAction, KvStore, QueuedAction,
    StoredKeyStore, SystemClock,
};
use harbor_crypto::{resolve_key, Crypto, CryptoHealth, KeyStore};
use harbor_storage::StorageBackend;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::connectivity::{ConnectivityObserver, ManualConnectivity};
use crate::coordinator::{DrainOutcome, DrainTrigger, SyncCoordinator};
use crate::error::{SyncError, SyncResult};
use crate::replay::ActionReplayer;
use crate::scheduler::{SchedulerHandle, SyncScheduler};

/// Assembles an [`OfflineEngine`].
///
/// Only the backend and the replayer are required. The key store defaults to
/// a [`StoredKeyStore`] on the same backend, the clock to [`SystemClock`],
/// and connectivity to an always-online [`ManualConnectivity`].
#[derive(Default)]
pub struct EngineBuilder {
    backend: Option<Arc<dyn StorageBackend>>,
    key_store: Option<Arc<dyn KeyStore>>,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
    replayer: Option<Arc<dyn ActionReplayer>>,
    connectivity: Option<Arc<dyn ConnectivityObserver>>,
}

impl EngineBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage backend.
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the key store.
    pub fn key_store(mut self, key_store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(key_store);
        self
    }

    /// Sets the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the replayer.
    pub fn replayer(mut self, replayer: Arc<dyn ActionReplayer>) -> Self {
        self.replayer = Some(replayer);
        self
    }

    /// Sets the connectivity observer.
    pub fn connectivity(mut self, connectivity: Arc<dyn ConnectivityObserver>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Resolves the key, opens the store, queue and cache, and runs a
    /// maintenance sweep.
    ///
    /// A sweep failure is logged and does not fail init.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the backend or replayer is missing,
    /// or an error if the queue or cache cannot be loaded.
    pub fn init(self) -> SyncResult<OfflineEngine> {
        let backend = self
            .backend
            .ok_or_else(|| SyncError::Config("storage backend is required".into()))?;
        let replayer = self
            .replayer
            .ok_or_else(|| SyncError::Config("replayer is required".into()))?;
        if self.config.sync.batch_size == 0 {
            return Err(SyncError::Config("batch size must be positive".into()));
        }

        let key_store = self.key_store.unwrap_or_else(|| {
            Arc::new(StoredKeyStore::new(Arc::clone(&backend), &self.config.store))
        });
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(ManualConnectivity::new(true)));

        let resolved = resolve_key(key_store.as_ref())?;
        let resolved_weakened = resolved.source.is_weakened();
        if resolved_weakened {
            warn!(key_source = ?resolved.source, "encryption key is weakened");
        }
        let crypto = Arc::new(Crypto::new(resolved.key, resolved.source));
        let kv = Arc::new(KvStore::new(backend, crypto, clock, &self.config.store));

        if self.config.skip_init_sweep {
            debug!("init sweep skipped by config");
        } else if resolved_weakened {
            warn!("init sweep skipped while running on a fallback key");
        } else {
            match kv.sweep() {
                Ok(report) if report.total() > 0 => info!(
                    expired = report.expired.len(),
                    corrupt = report.corrupt.len(),
                    "init sweep removed records"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "init sweep failed"),
            }
        }

        let queue = Arc::new(ActionQueue::open(Arc::clone(&kv), self.config.queue.clone())?);
        let cache = Arc::new(CacheLayer::open(Arc::clone(&kv), self.config.cache.clone())?);
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            replayer,
            Arc::clone(&connectivity),
            self.config.sync.clone(),
        ));

        info!(
            namespace = kv.namespace(),
            key_source = ?resolved.source,
            pending = queue.len(),
            cached = cache.len(),
            "engine initialized"
        );
        Ok(OfflineEngine {
            kv,
            cache,
            queue,
            coordinator,
            connectivity,
            config: self.config,
            scheduler: Mutex::new(None),
        })
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("has_backend", &self.backend.is_some())
            .field("has_replayer", &self.replayer.is_some())
            .finish_non_exhaustive()
    }
}

/// An initialized storage and sync engine.
///
/// Each engine owns its store, cache, queue and coordinator; several engines
/// can coexist on different backends or namespaces.
pub struct OfflineEngine {
    kv: Arc<KvStore>,
    cache: Arc<CacheLayer>,
    queue: Arc<ActionQueue>,
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<dyn ConnectivityObserver>,
    config: EngineConfig,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl OfflineEngine {
    /// Returns a new [`EngineBuilder`].
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// The key-value store.
    pub fn store(&self) -> &Arc<KvStore> {
        &self.kv
    }

    /// The cache layer.
    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    /// The action queue.
    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    /// The sync coordinator.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// The connectivity observer.
    pub fn connectivity(&self) -> &Arc<dyn ConnectivityObserver> {
        &self.connectivity
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawns the background scheduler on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyRunning`] if started twice, or
    /// [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn start(&self) -> SyncResult<()> {
        let mut scheduler = self.scheduler.lock();
        if scheduler.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(SyncError::AlreadyRunning);
        }
        *scheduler = Some(SyncScheduler::spawn(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.connectivity),
            &self.config.sync,
        )?);
        Ok(())
    }

    /// Returns true while the scheduler is running.
    pub fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the scheduler, if running, and flushes the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let handle = self.scheduler.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        self.kv.flush()?;
        info!("engine shut down");
        Ok(())
    }

    /// Number of pending actions.
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Actions that will not be retried automatically.
    pub fn failed_actions(&self) -> Vec<FailedAction> {
        self.queue.failed_actions()
    }

    /// Queues an action for replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is full or cannot be written.
    pub fn enqueue(&self, request: ActionRequest) -> SyncResult<QueuedAction> {
        Ok(self.queue.enqueue_request(request)?)
    }

    /// Runs a drain pass on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if an outcome cannot be persisted.
    pub fn sync_now(&self) -> SyncResult<DrainOutcome> {
        self.coordinator.drain(DrainTrigger::Manual)
    }

    /// Snapshot of crypto health.
    pub fn crypto_health(&self) -> CryptoHealth {
        self.kv.crypto().health()
    }

    /// Deletes every record in the namespace, including the queue and the
    /// cache. The encryption key is kept.
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Busy`] while a drain is running, or an error if
    /// the backend cannot be written.
    pub fn reset(&self) -> SyncResult<usize> {
        let _guard = self.coordinator.try_lock_drain().ok_or(SyncError::Busy)?;
        let removed = self.kv.clear()?;
        self.queue.reload()?;
        self.cache.rebuild_index()?;
        info!(removed, namespace = self.kv.namespace(), "engine reset");
        Ok(removed)
    }
}

impl std::fmt::Debug for OfflineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineEngine")
            .field("namespace", &self.kv.namespace())
            .field("pending", &self.queue.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::{ActionType, ManualClock, ReplayOutcome};
    use harbor_crypto::{KeySource, MemoryKeyStore};
    use harbor_storage::InMemoryBackend;

    fn engine(backend: Arc<InMemoryBackend>) -> OfflineEngine {
        OfflineEngine::builder()
            .backend(backend)
            .clock(Arc::new(ManualClock::new(1_700_000_000_000)))
            .replayer(Arc::new(|_: &QueuedAction| ReplayOutcome::Synced))
            .init()
            .unwrap()
    }

    #[test]
    fn init_requires_backend_and_replayer() {
        let err = EngineBuilder::new().init().unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let err = EngineBuilder::new()
            .backend(Arc::new(InMemoryBackend::new()))
            .init()
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(msg) if msg.contains("replayer")));
    }

    #[test]
    fn key_is_generated_then_loaded() {
        let backend = Arc::new(InMemoryBackend::new());
        let first = engine(Arc::clone(&backend));
        assert_eq!(first.crypto_health().key_source, KeySource::Generated);
        drop(first);

        let second = engine(backend);
        assert_eq!(second.crypto_health().key_source, KeySource::Loaded);
    }

    #[test]
    fn explicit_key_store_is_used() {
        let engine = OfflineEngine::builder()
            .backend(Arc::new(InMemoryBackend::new()))
            .key_store(Arc::new(MemoryKeyStore::new()))
            .replayer(Arc::new(|_: &QueuedAction| ReplayOutcome::Synced))
            .init()
            .unwrap();
        assert_eq!(engine.crypto_health().key_source, KeySource::Generated);
        assert!(engine.store().list_keys().unwrap().is_empty());
    }

    #[test]
    fn sync_now_drains_queue() {
        let engine = engine(Arc::new(InMemoryBackend::new()));
        engine
            .enqueue(ActionRequest::new(ActionType::TrackUsage, serde_json::json!({"n": 1})))
            .unwrap();
        assert_eq!(engine.queue_size(), 1);

        let outcome = engine.sync_now().unwrap();
        assert_eq!(outcome.report().map(|r| r.synced.len()), Some(1));
        assert_eq!(engine.queue_size(), 0);
    }

    #[test]
    fn reset_clears_everything_but_the_key() {
        let backend = Arc::new(InMemoryBackend::new());
        let engine = engine(Arc::clone(&backend));
        engine
            .store()
            .set("profile", b"ada", Default::default())
            .unwrap();
        engine.cache().put("feed", b"[]").unwrap();
        engine
            .enqueue(ActionRequest::new(ActionType::SyncData, serde_json::Value::Null))
            .unwrap();

        assert!(engine.reset().unwrap() >= 3);
        assert_eq!(engine.queue_size(), 0);
        assert!(engine.cache().is_empty());
        assert_eq!(engine.store().get("profile").unwrap(), None);
        drop(engine);

        let reopened = self::engine(backend);
        assert_eq!(reopened.crypto_health().key_source, KeySource::Loaded);
    }

    #[test]
    fn reset_holds_off_drains() {
        let engine = engine(Arc::new(InMemoryBackend::new()));
        engine
            .enqueue(ActionRequest::new(ActionType::SyncData, serde_json::Value::Null))
            .unwrap();

        let guard = engine.coordinator().try_lock_drain().unwrap();
        assert!(engine.coordinator().try_lock_drain().is_none());
        assert!(matches!(engine.reset(), Err(SyncError::Busy)));
        assert!(matches!(
            engine.sync_now().unwrap(),
            DrainOutcome::AlreadyDraining
        ));
        assert_eq!(engine.queue_size(), 1);
        drop(guard);

        engine.reset().unwrap();
        assert!(!engine.coordinator().is_draining());
        assert_eq!(engine.queue_size(), 0);
        assert!(matches!(engine.sync_now().unwrap(), DrainOutcome::Completed(_)));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let engine = engine(Arc::new(InMemoryBackend::new()));
        assert!(matches!(engine.start(), Err(SyncError::NoRuntime)));
        assert!(!engine.is_running());
    }
}
