//! Queue replay and sync coordination scenarios.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use harbor_core::{
    ActionId, ActionRequest, ActionType, BackoffPolicy, FailureReason, ManualClock, QueueConfig,
    ReplayOutcome,
};
use harbor_storage::InMemoryBackend;
use harbor_sync::{DrainOutcome, OfflineEngine, SyncConfig};
use harbor_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::json;

fn enqueue(engine: &TestEngine, action_type: ActionType) -> ActionId {
    engine
        .enqueue(ActionRequest::new(action_type, json!({})))
        .unwrap()
        .id
}

fn report(outcome: DrainOutcome) -> harbor_core::DrainReport {
    match outcome {
        DrainOutcome::Completed(report) => report,
        other => panic!("expected a completed pass, got {other:?}"),
    }
}

#[test]
fn drain_replays_in_fifo_order() {
    let engine = TestEngine::new();
    let ids: Vec<_> = [ActionType::SyncData, ActionType::SchedulePost, ActionType::TrackUsage]
        .into_iter()
        .map(|t| enqueue(&engine, t))
        .collect();

    let report = report(engine.sync_now().unwrap());
    assert_eq!(report.synced.len(), 3);
    assert_eq!(engine.replayer.call_ids(), ids);
    assert_eq!(engine.queue_size(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn fifo_holds_for_any_requests(requests in prop::collection::vec(action_request_strategy(), 1..20)) {
        let engine = TestEngine::new();
        let ids: Vec<_> = requests
            .into_iter()
            .map(|r| engine.enqueue(r).unwrap().id)
            .collect();

        engine.sync_now().unwrap();
        prop_assert_eq!(engine.replayer.call_ids(), ids);
    }

    #[test]
    fn next_attempt_strictly_increases(max_retries in 1u32..8) {
        let engine = TestEngine::new();
        engine.replayer.set_default(ReplayOutcome::retryable("503"));
        let id = engine
            .enqueue(ActionRequest::new(ActionType::SyncData, json!({})).max_retries(max_retries))
            .unwrap()
            .id;

        let mut previous = engine.queue().get(id).unwrap().next_attempt_at;
        for expected_count in 1..max_retries {
            engine.sync_now().unwrap();
            let action = engine.queue().get(id).unwrap();
            prop_assert_eq!(action.retry_count, expected_count);
            prop_assert!(action.next_attempt_at > previous);
            previous = action.next_attempt_at;
            engine.clock.set_ms(previous);
        }

        engine.sync_now().unwrap();
        prop_assert!(engine.queue().get(id).is_none());
        let failed = engine.failed_actions();
        prop_assert_eq!(failed.len(), 1);
        prop_assert_eq!(failed[0].action.id, id);
        prop_assert!(matches!(failed[0].reason, FailureReason::RetriesExhausted(_)));
    }

    #[test]
    fn backoff_delay_never_decreases(retry_count in 0u32..40) {
        let policy = BackoffPolicy::new();
        prop_assert!(policy.delay_for(retry_count + 1) >= policy.delay_for(retry_count));
        prop_assert!(policy.delay_for(retry_count) <= Duration::from_secs(3600));
    }
}

#[test]
fn update_profile_recovers_after_two_failures() {
    let engine = TestEngine::new();
    engine.replayer.push_n(ReplayOutcome::retryable("timeout"), 2);
    let id = engine
        .enqueue(
            ActionRequest::new(ActionType::UpdateProfile, json!({ "name": "Ana" })).max_retries(3),
        )
        .unwrap()
        .id;

    let mut counts = vec![engine.queue().get(id).unwrap().retry_count];
    for _ in 0..2 {
        engine.sync_now().unwrap();
        let action = engine.queue().get(id).unwrap();
        counts.push(action.retry_count);
        engine.clock.set_ms(action.next_attempt_at);
    }
    let last = report(engine.sync_now().unwrap());

    assert_eq!(counts, vec![0, 1, 2]);
    assert_eq!(last.synced.len(), 1);
    assert!(engine.queue().get(id).is_none());
    assert_eq!(engine.queue_size(), 0);
    assert!(engine.failed_actions().is_empty());
    assert_eq!(engine.replayer.call_count(), 3);
}

#[test]
fn rescheduled_action_waits_for_backoff() {
    let engine = TestEngine::new();
    engine.replayer.push(ReplayOutcome::retryable("503"));
    enqueue(&engine, ActionType::SyncData);

    engine.sync_now().unwrap();
    let second = report(engine.sync_now().unwrap());
    assert_eq!(second.attempted(), 0);

    engine.advance(Duration::from_secs(60));
    let third = report(engine.sync_now().unwrap());
    assert_eq!(third.synced.len(), 1);
}

#[test]
fn fatal_outcome_fails_immediately() {
    let engine = TestEngine::new();
    engine.replayer.push(ReplayOutcome::fatal("422 invalid payload"));
    let id = enqueue(&engine, ActionType::SchedulePost);

    let report = report(engine.sync_now().unwrap());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(
        report.failed[0].reason,
        FailureReason::Fatal("422 invalid payload".into())
    );
    assert!(engine.queue().get(id).is_none());
    assert_eq!(engine.failed_actions()[0].action.id, id);
}

#[test]
fn unreachable_leaves_untried_actions_untouched() {
    let engine = TestEngine::new();
    engine.replayer.push(ReplayOutcome::Synced);
    engine
        .replayer
        .push(ReplayOutcome::unreachable("connection refused"));
    let ids: Vec<_> = (0..3).map(|_| enqueue(&engine, ActionType::TrackUsage)).collect();
    let before: Vec<_> = ids.iter().map(|id| engine.queue().get(*id).unwrap()).collect();

    let report = report(engine.sync_now().unwrap());
    assert_eq!(report.synced.len(), 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.aborted.as_deref(), Some("connection refused"));

    for action in &before[1..] {
        assert_eq!(engine.queue().get(action.id).as_ref(), Some(action));
    }
    assert!(engine.failed_actions().is_empty());
}

#[test]
fn offline_drain_does_nothing() {
    let engine = TestEngine::new();
    enqueue(&engine, ActionType::SyncData);
    engine.set_online(false);

    assert!(matches!(engine.sync_now().unwrap(), DrainOutcome::Offline));
    assert_eq!(engine.replayer.call_count(), 0);
    assert_eq!(engine.queue_size(), 1);
}

#[test]
fn synced_actions_invalidate_cache() {
    let engine = TestEngine::new();
    engine.cache().put("profile:7", b"{\"name\":\"Ana\"}").unwrap();
    engine
        .enqueue(
            ActionRequest::new(ActionType::UpdateProfile, json!({ "name": "Bea" }))
                .invalidates("profile:7"),
        )
        .unwrap();

    engine.sync_now().unwrap();
    assert_eq!(engine.cache().get("profile:7").unwrap(), None);
}

#[test]
fn concurrent_drain_is_rejected() {
    let gate = Arc::new(GatedReplayer::new());
    let engine = OfflineEngine::builder()
        .backend(Arc::new(InMemoryBackend::new()))
        .clock(Arc::new(ManualClock::new(START_MS)))
        .replayer(gate.clone())
        .config(test_config())
        .init()
        .unwrap();
    engine
        .enqueue(ActionRequest::new(ActionType::SyncData, json!({})))
        .unwrap();

    thread::scope(|s| {
        let first = s.spawn(|| engine.sync_now());
        assert!(gate.wait_entered(Duration::from_secs(5)));

        assert!(matches!(
            engine.sync_now().unwrap(),
            DrainOutcome::AlreadyDraining
        ));
        gate.open();

        let first = first.join().unwrap().unwrap();
        assert_eq!(first.report().map(|r| r.synced.len()), Some(1));
    });

    assert_eq!(gate.entered(), 1);
    let stats = engine.coordinator().stats();
    assert_eq!(stats.passes, 1);
    assert_eq!(stats.rejected, 1);
}

#[test]
fn full_queue_rejects_enqueue() {
    let engine = TestEngine::with_config(test_config().with_queue(QueueConfig::new().max_len(2)));
    enqueue(&engine, ActionType::TrackUsage);
    enqueue(&engine, ActionType::TrackUsage);

    let err = engine
        .enqueue(ActionRequest::new(ActionType::TrackUsage, json!({})))
        .unwrap_err();
    assert!(err.to_string().contains("2"));
}

#[test]
fn batch_size_limits_each_pass() {
    let engine = TestEngine::with_config(
        test_config().with_sync(SyncConfig::new().without_sync_interval().with_batch_size(2)),
    );
    for _ in 0..5 {
        enqueue(&engine, ActionType::TrackUsage);
    }

    assert_eq!(report(engine.sync_now().unwrap()).synced.len(), 2);
    assert_eq!(engine.queue_size(), 3);
}

#[test]
fn queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let (retried, failed) = {
        let engine = TestEngine::open_dir(dir.path(), clock.clone());
        let retried = enqueue(&engine, ActionType::SyncData);
        let failed = enqueue(&engine, ActionType::SchedulePost);
        engine.replayer.push(ReplayOutcome::retryable("503"));
        engine.replayer.push(ReplayOutcome::fatal("gone"));
        engine.sync_now().unwrap();
        (retried, failed)
    };

    let engine = TestEngine::open_dir(dir.path(), clock);
    let pending = engine.queue().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, retried);
    assert_eq!(pending[0].retry_count, 1);
    assert_eq!(pending[0].last_error.as_deref(), Some("503"));

    let failed_actions = engine.failed_actions();
    assert_eq!(failed_actions.len(), 1);
    assert_eq!(failed_actions[0].action.id, failed);

    let next = enqueue(&engine, ActionType::TrackUsage);
    assert!(next > failed);
}

#[test]
fn failed_action_can_be_retried() {
    let engine = TestEngine::new();
    engine.replayer.push(ReplayOutcome::fatal("401"));
    let id = enqueue(&engine, ActionType::SyncData);
    engine.sync_now().unwrap();
    assert_eq!(engine.queue_size(), 0);

    let retried = engine.queue().retry_failed(id).unwrap();
    assert_eq!(retried.retry_count, 0);
    assert!(engine.failed_actions().is_empty());

    report(engine.sync_now().unwrap());
    assert_eq!(engine.queue_size(), 0);
}
