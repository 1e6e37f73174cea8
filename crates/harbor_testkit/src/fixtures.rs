//! Test fixtures and engine helpers.
//!
//! Engines built here run on a [`ManualClock`] and a [`ManualConnectivity`]
//! flag, with a [`ScriptedReplayer`] standing in for the remote.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use harbor_core::ManualClock;
use harbor_storage::{FileBackend, InMemoryBackend, StorageBackend};
use harbor_sync::{EngineConfig, ManualConnectivity, OfflineEngine, SyncConfig};

use crate::replayers::ScriptedReplayer;

/// Start time of every fixture clock, in epoch milliseconds.
pub const START_MS: u64 = 1_700_000_000_000;

/// Default fixture configuration: no background timer, no init sweep.
pub fn test_config() -> EngineConfig {
    EngineConfig::new()
        .with_sync(SyncConfig::new().without_sync_interval())
        .with_skip_init_sweep(true)
}

/// An engine wired to test doubles.
pub struct TestEngine {
    /// The engine.
    pub engine: OfflineEngine,
    /// The backend the engine writes to.
    pub backend: Arc<dyn StorageBackend>,
    /// The engine clock.
    pub clock: Arc<ManualClock>,
    /// The connectivity flag, initially online.
    pub connectivity: Arc<ManualConnectivity>,
    /// The replayer, which syncs everything unless scripted otherwise.
    pub replayer: Arc<ScriptedReplayer>,
}

impl TestEngine {
    /// Creates an engine on a fresh in-memory backend.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates an engine with `config` on a fresh in-memory backend.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::open(Arc::new(InMemoryBackend::new()), config)
    }

    /// Creates an engine on `backend`.
    pub fn open(backend: Arc<dyn StorageBackend>, config: EngineConfig) -> Self {
        Self::open_with(
            backend,
            config,
            Arc::new(ManualClock::new(START_MS)),
            Arc::new(ScriptedReplayer::new()),
        )
    }

    /// Creates an engine on a [`FileBackend`] rooted at `path`.
    pub fn open_dir(path: &Path, clock: Arc<ManualClock>) -> Self {
        let backend = FileBackend::open(path).expect("Failed to open file backend");
        Self::open_with(
            Arc::new(backend),
            test_config(),
            clock,
            Arc::new(ScriptedReplayer::new()),
        )
    }

    /// Creates an engine from explicit parts.
    pub fn open_with(
        backend: Arc<dyn StorageBackend>,
        config: EngineConfig,
        clock: Arc<ManualClock>,
        replayer: Arc<ScriptedReplayer>,
    ) -> Self {
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let engine = OfflineEngine::builder()
            .backend(Arc::clone(&backend))
            .clock(clock.clone())
            .connectivity(connectivity.clone())
            .replayer(replayer.clone())
            .config(config)
            .init()
            .expect("Failed to init engine");

        Self {
            engine,
            backend,
            clock,
            connectivity,
            replayer,
        }
    }

    /// Advances the clock.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Goes offline or online.
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestEngine {
    type Target = OfflineEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Runs a test with an in-memory engine.
pub fn with_test_engine<F, R>(f: F) -> R
where
    F: FnOnce(&TestEngine) -> R,
{
    let engine = TestEngine::new();
    f(&engine)
}
