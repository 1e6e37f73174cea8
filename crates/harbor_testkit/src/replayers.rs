//! Replayers for driving the sync coordinator in tests.

use std::collections::VecDeque;
use std::time::Duration;

use harbor_core::{ActionId, QueuedAction, ReplayOutcome};
use harbor_sync::ActionReplayer;
use parking_lot::{Condvar, Mutex};

/// Returns queued outcomes in order, then a default.
///
/// Every call is recorded, so tests can assert replay order.
#[derive(Debug)]
pub struct ScriptedReplayer {
    script: Mutex<VecDeque<ReplayOutcome>>,
    default: Mutex<ReplayOutcome>,
    calls: Mutex<Vec<QueuedAction>>,
}

impl ScriptedReplayer {
    /// Creates a replayer whose default outcome is `Synced`.
    pub fn new() -> Self {
        Self::with_default(ReplayOutcome::Synced)
    }

    /// Creates a replayer with the given default outcome.
    pub fn with_default(default: ReplayOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(default),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues an outcome for the next unscripted call.
    pub fn push(&self, outcome: ReplayOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Queues `outcome` `n` times.
    pub fn push_n(&self, outcome: ReplayOutcome, n: usize) {
        let mut script = self.script.lock();
        script.extend(std::iter::repeat(outcome).take(n));
    }

    /// Replaces the default outcome.
    pub fn set_default(&self, outcome: ReplayOutcome) {
        *self.default.lock() = outcome;
    }

    /// Actions replayed so far, in call order.
    pub fn calls(&self) -> Vec<QueuedAction> {
        self.calls.lock().clone()
    }

    /// Ids replayed so far, in call order.
    pub fn call_ids(&self) -> Vec<ActionId> {
        self.calls.lock().iter().map(|a| a.id).collect()
    }

    /// Number of replays so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for ScriptedReplayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionReplayer for ScriptedReplayer {
    fn replay(&self, action: &QueuedAction) -> ReplayOutcome {
        self.calls.lock().push(action.clone());
        match self.script.lock().pop_front() {
            Some(outcome) => outcome,
            None => self.default.lock().clone(),
        }
    }
}

/// Wraps another replayer and records each action with its outcome.
pub struct RecordingReplayer<R> {
    inner: R,
    log: Mutex<Vec<(QueuedAction, ReplayOutcome)>>,
}

impl<R: ActionReplayer> RecordingReplayer<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Recorded `(action, outcome)` pairs in call order.
    pub fn log(&self) -> Vec<(QueuedAction, ReplayOutcome)> {
        self.log.lock().clone()
    }

    /// Retry counts seen for `id`, in call order.
    pub fn retry_counts(&self, id: ActionId) -> Vec<u32> {
        self.log
            .lock()
            .iter()
            .filter(|(action, _)| action.id == id)
            .map(|(action, _)| action.retry_count)
            .collect()
    }
}

impl<R: ActionReplayer> ActionReplayer for RecordingReplayer<R> {
    fn replay(&self, action: &QueuedAction) -> ReplayOutcome {
        let outcome = self.inner.replay(action);
        self.log.lock().push((action.clone(), outcome.clone()));
        outcome
    }
}

impl<R> std::fmt::Debug for RecordingReplayer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingReplayer")
            .field("calls", &self.log.lock().len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct GateState {
    entered: usize,
    open: bool,
}

/// Blocks every replay until [`open`](Self::open) is called.
///
/// Used to hold a drain pass in flight while a second trigger arrives.
#[derive(Debug, Default)]
pub struct GatedReplayer {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl GatedReplayer {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until a replay is blocked on the gate. Returns false on timeout.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.changed
            .wait_while_for(&mut state, |state| state.entered == 0, timeout);
        state.entered > 0
    }

    /// Lets blocked and future replays through.
    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }

    /// Number of replays that reached the gate.
    pub fn entered(&self) -> usize {
        self.state.lock().entered
    }
}

impl ActionReplayer for GatedReplayer {
    fn replay(&self, _action: &QueuedAction) -> ReplayOutcome {
        let mut state = self.state.lock();
        state.entered += 1;
        self.changed.notify_all();
        self.changed.wait_while(&mut state, |state| !state.open);
        ReplayOutcome::Synced
    }
}
