//! Durable queue of actions waiting for connectivity.
//!
//! Each action is its own record, so enqueue and replay rewrite a single
//! small value instead of the whole queue:
//!
//! ```text
//! queue:meta                   {"nextId": 43}
//! queue:action:00000000000000000042   QueuedAction
//! queue:failed:00000000000000000017   FailedAction
//! ```
//!
//! Storage is written first; the in-memory mirror changes only after the
//! write succeeds.

mod action;

pub use action::{
    ActionId, ActionRequest, ActionType, Disposition, DrainReport, FailedAction, FailureReason,
    QueuedAction, ReplayOutcome,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{CoreError, CoreResult};
use crate::kv::{KvStore, SetOptions};

/// Sub-namespace of the key-value store owned by the queue.
pub const QUEUE_PREFIX: &str = "queue:";

const META_KEY: &str = "queue:meta";
const ACTION_PREFIX: &str = "queue:action:";
const FAILED_PREFIX: &str = "queue:failed:";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueMeta {
    next_id: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: BTreeMap<ActionId, QueuedAction>,
    failed: BTreeMap<ActionId, FailedAction>,
    next_id: u64,
}

fn action_key(id: ActionId) -> String {
    format!("{ACTION_PREFIX}{:020}", id.0)
}

fn failed_key(id: ActionId) -> String {
    format!("{FAILED_PREFIX}{:020}", id.0)
}

/// FIFO queue of remote mutations with retry backoff and a failed pool.
///
/// Actions are replayed in id order. A retryable failure pushes the action's
/// next attempt out by the backoff policy; once `max_retries` attempts have
/// failed, or on a fatal failure, it moves to the failed pool where it stays
/// until retried or discarded.
pub struct ActionQueue {
    kv: Arc<KvStore>,
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl ActionQueue {
    /// Opens the queue, loading pending and failed actions from storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn open(kv: Arc<KvStore>, config: QueueConfig) -> CoreResult<Self> {
        let state = load_state(&kv)?;
        info!(
            pending = state.pending.len(),
            failed = state.failed.len(),
            next_id = state.next_id,
            "action queue opened"
        );
        Ok(Self {
            kv,
            config,
            state: Mutex::new(state),
        })
    }

    /// Replaces the in-memory mirror with what is in storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn reload(&self) -> CoreResult<()> {
        let state = load_state(&self.kv)?;
        *self.state.lock() = state;
        Ok(())
    }

    /// The queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The store's current time in epoch milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.kv.now_ms()
    }

    /// Enqueues an action. `max_retries` defaults per type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueueFull`] at capacity, or a storage error.
    pub fn enqueue(
        &self,
        action_type: ActionType,
        payload: serde_json::Value,
        max_retries: Option<u32>,
    ) -> CoreResult<QueuedAction> {
        self.enqueue_request(ActionRequest {
            action_type,
            payload,
            max_retries,
            invalidates: Vec::new(),
        })
    }

    /// Enqueues an action built with [`ActionRequest`].
    ///
    /// The action is eligible immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueueFull`] at capacity, or a storage error.
    pub fn enqueue_request(&self, request: ActionRequest) -> CoreResult<QueuedAction> {
        let mut state = self.state.lock();
        if state.pending.len() >= self.config.max_len {
            return Err(CoreError::QueueFull {
                capacity: self.config.max_len,
            });
        }

        let id = ActionId(state.next_id);
        let now = self.kv.now_ms();
        let action = QueuedAction {
            id,
            action_type: request.action_type,
            max_retries: request.effective_max_retries(),
            payload: request.payload,
            enqueued_at: now,
            retry_count: 0,
            next_attempt_at: now,
            last_error: None,
            invalidates: request.invalidates,
        };

        // The counter is persisted first so an id is never handed out twice.
        self.kv.set_json(
            META_KEY,
            &QueueMeta { next_id: id.0 + 1 },
            SetOptions::new(),
        )?;
        state.next_id = id.0 + 1;
        self.kv
            .set_json(&action_key(id), &action, SetOptions::new())?;
        state.pending.insert(id, action.clone());

        info!(id = %id, action_type = %action.action_type, "action enqueued");
        Ok(action)
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending actions in id order.
    pub fn pending(&self) -> Vec<QueuedAction> {
        self.state.lock().pending.values().cloned().collect()
    }

    /// Actions in the failed pool in id order.
    pub fn failed_actions(&self) -> Vec<FailedAction> {
        self.state.lock().failed.values().cloned().collect()
    }

    /// Looks up a pending action.
    pub fn get(&self, id: ActionId) -> Option<QueuedAction> {
        self.state.lock().pending.get(&id).cloned()
    }

    /// Up to `limit` pending actions eligible at `now_ms`, in id order.
    pub fn eligible(&self, now_ms: u64, limit: usize) -> Vec<QueuedAction> {
        self.state
            .lock()
            .pending
            .values()
            .filter(|action| action.is_eligible(now_ms))
            .take(limit)
            .cloned()
            .collect()
    }

    /// The earliest `next_attempt_at` among pending actions.
    pub fn next_attempt_at(&self) -> Option<u64> {
        self.state
            .lock()
            .pending
            .values()
            .map(|action| action.next_attempt_at)
            .min()
    }

    /// Applies a replay outcome to a pending action.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ActionNotFound`] if the action is not pending,
    /// [`CoreError::InvalidOperation`] for [`ReplayOutcome::Unreachable`]
    /// (which never changes an action), or a storage error.
    pub fn record_outcome(&self, id: ActionId, outcome: &ReplayOutcome) -> CoreResult<Disposition> {
        let mut state = self.state.lock();
        let action = state
            .pending
            .get(&id)
            .cloned()
            .ok_or(CoreError::ActionNotFound { id: id.0 })?;
        let now = self.kv.now_ms();

        match outcome {
            ReplayOutcome::Synced => {
                self.kv.remove(&action_key(id))?;
                state.pending.remove(&id);
                debug!(id = %id, "action synced");
                Ok(Disposition::Synced(action))
            }
            ReplayOutcome::Retryable(reason) => {
                let attempts = action.retry_count.saturating_add(1);
                if attempts >= action.max_retries {
                    return self.fail_locked(
                        &mut state,
                        action,
                        attempts,
                        now,
                        FailureReason::RetriesExhausted(reason.clone()),
                    );
                }

                let delay = self.config.backoff.delay_for(action.retry_count);
                let mut updated = action;
                updated.retry_count = attempts;
                updated.next_attempt_at = now.saturating_add(delay.as_millis() as u64);
                updated.last_error = Some(reason.clone());

                self.kv
                    .set_json(&action_key(id), &updated, SetOptions::new())?;
                state.pending.insert(id, updated.clone());
                debug!(
                    id = %id,
                    retry_count = updated.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "action rescheduled"
                );
                Ok(Disposition::Rescheduled(updated))
            }
            ReplayOutcome::Fatal(reason) => {
                let attempts = action.retry_count.saturating_add(1);
                self.fail_locked(
                    &mut state,
                    action,
                    attempts,
                    now,
                    FailureReason::Fatal(reason.clone()),
                )
            }
            ReplayOutcome::Unreachable(_) => Err(CoreError::invalid_operation(
                "unreachable outcomes are not recorded",
            )),
        }
    }

    /// Replays up to `batch_size` eligible actions in id order.
    ///
    /// `replay` is called without any queue lock held. An
    /// [`ReplayOutcome::Unreachable`] stops the pass; that action and the
    /// rest of the batch are left exactly as they were.
    ///
    /// # Errors
    ///
    /// Returns a storage error if an outcome cannot be persisted. Outcomes
    /// recorded before the error are kept.
    pub fn drain<F>(&self, batch_size: usize, mut replay: F) -> CoreResult<DrainReport>
    where
        F: FnMut(&QueuedAction) -> ReplayOutcome,
    {
        let batch = self.eligible(self.kv.now_ms(), batch_size);
        let mut report = DrainReport::default();

        for (position, action) in batch.iter().enumerate() {
            let outcome = replay(action);
            if let ReplayOutcome::Unreachable(reason) = &outcome {
                debug!(id = %action.id, %reason, "drain stopped, remote unreachable");
                report.skipped = batch.len() - position;
                report.aborted = Some(reason.clone());
                break;
            }

            match self.record_outcome(action.id, &outcome) {
                Ok(disposition) => report.record(disposition),
                Err(CoreError::ActionNotFound { .. }) => {
                    debug!(id = %action.id, "action left the queue during replay");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Moves a failed action back to pending with a reset retry count.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ActionNotFound`], [`CoreError::QueueFull`] or a
    /// storage error.
    pub fn retry_failed(&self, id: ActionId) -> CoreResult<QueuedAction> {
        let mut state = self.state.lock();
        let failed = state
            .failed
            .get(&id)
            .cloned()
            .ok_or(CoreError::ActionNotFound { id: id.0 })?;
        if state.pending.len() >= self.config.max_len {
            return Err(CoreError::QueueFull {
                capacity: self.config.max_len,
            });
        }

        let mut action = failed.action;
        action.retry_count = 0;
        action.next_attempt_at = self.kv.now_ms();

        self.kv
            .set_json(&action_key(id), &action, SetOptions::new())?;
        self.kv.remove(&failed_key(id))?;
        state.failed.remove(&id);
        state.pending.insert(id, action.clone());

        info!(id = %id, "failed action requeued");
        Ok(action)
    }

    /// Removes an action from the failed pool.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ActionNotFound`] or a storage error.
    pub fn discard_failed(&self, id: ActionId) -> CoreResult<FailedAction> {
        let mut state = self.state.lock();
        if !state.failed.contains_key(&id) {
            return Err(CoreError::ActionNotFound { id: id.0 });
        }
        self.kv.remove(&failed_key(id))?;
        let failed = state
            .failed
            .remove(&id)
            .ok_or(CoreError::ActionNotFound { id: id.0 })?;
        Ok(failed)
    }

    /// Empties the failed pool. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn clear_failed(&self) -> CoreResult<usize> {
        let mut state = self.state.lock();
        let ids: Vec<ActionId> = state.failed.keys().copied().collect();
        for id in &ids {
            self.kv.remove(&failed_key(*id))?;
            state.failed.remove(id);
        }
        Ok(ids.len())
    }

    fn fail_locked(
        &self,
        state: &mut QueueState,
        mut action: QueuedAction,
        attempts: u32,
        now: u64,
        reason: FailureReason,
    ) -> CoreResult<Disposition> {
        let id = action.id;
        action.retry_count = attempts;
        action.last_error = Some(reason.message().to_string());
        let failed = FailedAction {
            action,
            failed_at: now,
            reason,
        };

        // Written before the pending record goes; a crash in between is
        // resolved on load in favour of the failed copy.
        self.kv
            .set_json(&failed_key(id), &failed, SetOptions::new())?;
        self.kv.remove(&action_key(id))?;
        state.pending.remove(&id);
        state.failed.insert(id, failed.clone());

        warn!(
            id = %id,
            action_type = %failed.action.action_type,
            reason = %failed.reason,
            "action failed"
        );
        Ok(Disposition::Failed(failed))
    }
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ActionQueue")
            .field("pending", &state.pending.len())
            .field("failed", &state.failed.len())
            .field("next_id", &state.next_id)
            .finish_non_exhaustive()
    }
}

fn load_state(kv: &KvStore) -> CoreResult<QueueState> {
    let meta: QueueMeta = read_lenient(kv, META_KEY)?.unwrap_or_default();

    let mut failed = BTreeMap::new();
    for key in kv.list_keys_with_prefix(FAILED_PREFIX)? {
        if let Some(entry) = read_lenient::<FailedAction>(kv, &key)? {
            failed.insert(entry.action.id, entry);
        }
    }

    let mut pending = BTreeMap::new();
    for key in kv.list_keys_with_prefix(ACTION_PREFIX)? {
        if let Some(action) = read_lenient::<QueuedAction>(kv, &key)? {
            if failed.contains_key(&action.id) {
                kv.remove(&key)?;
                continue;
            }
            pending.insert(action.id, action);
        }
    }

    let highest = pending
        .keys()
        .chain(failed.keys())
        .map(|id: &ActionId| id.0)
        .max()
        .unwrap_or(0);
    let next_id = meta.next_id.max(highest + 1).max(1);

    Ok(QueueState {
        pending,
        failed,
        next_id,
    })
}

fn read_lenient<T: DeserializeOwned>(kv: &KvStore, key: &str) -> CoreResult<Option<T>> {
    match kv.get_json(key) {
        Ok(value) => Ok(value),
        Err(CoreError::Serialization(e)) => {
            warn!(key, error = %e, "skipping undecodable queue record");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
