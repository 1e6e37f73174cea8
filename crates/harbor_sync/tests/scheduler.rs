//! Integration tests for the engine and its background scheduler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use harbor_core::{ActionRequest, ActionType, QueuedAction, ReplayOutcome};
use harbor_storage::{FileBackend, InMemoryBackend};
use harbor_sync::{
    ActionReplayer, DrainOutcome, EngineConfig, ManualConnectivity, OfflineEngine, SyncConfig,
    SyncError, SyncScheduler,
};

/// Counts replays and reports every action as synced.
#[derive(Default)]
struct CountingReplayer {
    calls: AtomicUsize,
}

impl ActionReplayer for CountingReplayer {
    fn replay(&self, _action: &QueuedAction) -> ReplayOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ReplayOutcome::Synced
    }
}

fn engine(
    sync: SyncConfig,
    connectivity: Arc<ManualConnectivity>,
    replayer: Arc<CountingReplayer>,
) -> OfflineEngine {
    OfflineEngine::builder()
        .backend(Arc::new(InMemoryBackend::new()))
        .connectivity(connectivity)
        .replayer(replayer)
        .config(EngineConfig::new().with_sync(sync))
        .init()
        .unwrap()
}

fn track(n: u64) -> ActionRequest {
    ActionRequest::new(ActionType::TrackUsage, serde_json::json!({ "n": n }))
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn reconnect_triggers_drain() {
    let connectivity = Arc::new(ManualConnectivity::new(false));
    let replayer = Arc::new(CountingReplayer::default());
    let engine = engine(
        SyncConfig::new().without_sync_interval(),
        Arc::clone(&connectivity),
        Arc::clone(&replayer),
    );
    engine.start().unwrap();

    engine.enqueue(track(1)).unwrap();
    engine.enqueue(track(2)).unwrap();
    assert!(matches!(engine.sync_now().unwrap(), DrainOutcome::Offline));

    connectivity.set_online(true);
    assert!(wait_until(|| engine.queue_size() == 0).await);
    assert_eq!(replayer.calls.load(Ordering::SeqCst), 2);

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_right_after_start_still_drains() {
    for _ in 0..5 {
        let connectivity = Arc::new(ManualConnectivity::new(false));
        let replayer = Arc::new(CountingReplayer::default());
        let engine = engine(
            SyncConfig::new().without_sync_interval(),
            Arc::clone(&connectivity),
            Arc::clone(&replayer),
        );
        engine.enqueue(track(1)).unwrap();

        engine.start().unwrap();
        connectivity.set_online(true);
        assert!(wait_until(|| engine.queue_size() == 0).await);
        assert_eq!(replayer.calls.load(Ordering::SeqCst), 1);

        engine.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn reconnect_drain_can_be_disabled() {
    let connectivity = Arc::new(ManualConnectivity::new(false));
    let replayer = Arc::new(CountingReplayer::default());
    let engine = engine(
        SyncConfig::new()
            .without_sync_interval()
            .with_drain_on_reconnect(false),
        Arc::clone(&connectivity),
        Arc::clone(&replayer),
    );
    engine.start().unwrap();
    engine.enqueue(track(1)).unwrap();

    connectivity.set_online(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.queue_size(), 1);
    assert_eq!(replayer.calls.load(Ordering::SeqCst), 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn periodic_drain_runs_while_online() {
    let connectivity = Arc::new(ManualConnectivity::new(true));
    let replayer = Arc::new(CountingReplayer::default());
    let engine = engine(
        SyncConfig::new().with_sync_interval(Duration::from_millis(20)),
        Arc::clone(&connectivity),
        Arc::clone(&replayer),
    );
    engine.start().unwrap();

    engine.enqueue(track(1)).unwrap();
    assert!(wait_until(|| engine.queue_size() == 0).await);
    assert!(engine.coordinator().stats().passes >= 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn periodic_drain_waits_for_connectivity() {
    let connectivity = Arc::new(ManualConnectivity::new(false));
    let replayer = Arc::new(CountingReplayer::default());
    let engine = engine(
        SyncConfig::new()
            .with_sync_interval(Duration::from_millis(20))
            .with_drain_on_reconnect(false),
        Arc::clone(&connectivity),
        Arc::clone(&replayer),
    );
    engine.start().unwrap();
    engine.enqueue(track(1)).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.queue_size(), 1);

    connectivity.set_online(true);
    assert!(wait_until(|| engine.queue_size() == 0).await);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let engine = engine(
        SyncConfig::new(),
        Arc::new(ManualConnectivity::default()),
        Arc::new(CountingReplayer::default()),
    );
    engine.start().unwrap();
    assert!(engine.is_running());
    assert!(matches!(engine.start(), Err(SyncError::AlreadyRunning)));

    engine.shutdown().await.unwrap();
    assert!(!engine.is_running());

    engine.start().unwrap();
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn handle_sync_now_reports_outcome() {
    let connectivity = Arc::new(ManualConnectivity::default());
    let replayer = Arc::new(CountingReplayer::default());
    let engine = engine(
        SyncConfig::new().without_sync_interval(),
        Arc::clone(&connectivity),
        Arc::clone(&replayer),
    );
    engine.enqueue(track(1)).unwrap();

    let handle = SyncScheduler::spawn(
        Arc::clone(engine.coordinator()),
        connectivity,
        &engine.config().sync,
    )
    .unwrap();

    let outcome = handle.sync_now().await.unwrap();
    assert_eq!(outcome.report().map(|r| r.synced.len()), Some(1));

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_flushes_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let replayer = Arc::new(CountingReplayer::default());

    {
        let engine = OfflineEngine::builder()
            .backend(Arc::new(FileBackend::open(dir.path()).unwrap()))
            .connectivity(Arc::new(ManualConnectivity::new(false)))
            .replayer(Arc::clone(&replayer) as Arc<dyn ActionReplayer>)
            .init()
            .unwrap();
        engine.start().unwrap();
        engine.enqueue(track(1)).unwrap();
        engine.enqueue(track(2)).unwrap();
        engine.shutdown().await.unwrap();
    }

    let engine = OfflineEngine::builder()
        .backend(Arc::new(FileBackend::open(dir.path()).unwrap()))
        .replayer(replayer)
        .init()
        .unwrap();
    assert_eq!(engine.queue_size(), 2);
    let payloads: Vec<_> = engine
        .queue()
        .pending()
        .into_iter()
        .map(|action| action.payload["n"].as_u64())
        .collect();
    assert_eq!(payloads, vec![Some(1), Some(2)]);
}
