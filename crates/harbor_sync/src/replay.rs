//! Replaying queued actions against the remote.

use std::collections::HashMap;

use harbor_core::{ActionType, QueuedAction, ReplayOutcome};
use tracing::warn;

/// Sends one queued action to the remote and classifies the result.
///
/// Implementations own their transport and per-call timeouts. The outcome
/// decides what the queue does next:
///
/// - [`ReplayOutcome::Synced`] removes the action
/// - [`ReplayOutcome::Retryable`] reschedules it with backoff
/// - [`ReplayOutcome::Fatal`] moves it to the failed pool
/// - [`ReplayOutcome::Unreachable`] stops the pass, changing nothing
///
/// Replays are at-least-once: a crash between a successful remote call and
/// the removal of the action replays it again, so the remote side must
/// tolerate duplicates.
pub trait ActionReplayer: Send + Sync {
    /// Replays `action`.
    fn replay(&self, action: &QueuedAction) -> ReplayOutcome;
}

impl<F> ActionReplayer for F
where
    F: Fn(&QueuedAction) -> ReplayOutcome + Send + Sync,
{
    fn replay(&self, action: &QueuedAction) -> ReplayOutcome {
        self(action)
    }
}

/// Dispatches actions to a replayer per [`ActionType`].
///
/// An action whose type has no replayer fails fatally.
///
/// # Example
///
/// ```rust
/// use harbor_core::{ActionType, ReplayOutcome};
/// use harbor_sync::ReplayRouter;
///
/// let router = ReplayRouter::new()
///     .route(ActionType::TrackUsage, |_: &harbor_core::QueuedAction| ReplayOutcome::Synced);
/// assert!(router.handles(ActionType::TrackUsage));
/// assert!(!router.handles(ActionType::SyncData));
/// ```
#[derive(Default)]
pub struct ReplayRouter {
    routes: HashMap<ActionType, Box<dyn ActionReplayer>>,
}

impl ReplayRouter {
    /// Creates a router with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the replayer for `action_type`.
    pub fn route(mut self, action_type: ActionType, replayer: impl ActionReplayer + 'static) -> Self {
        self.register(action_type, replayer);
        self
    }

    /// Adds or replaces the replayer for `action_type`.
    pub fn register(&mut self, action_type: ActionType, replayer: impl ActionReplayer + 'static) {
        self.routes.insert(action_type, Box::new(replayer));
    }

    /// Returns true if `action_type` has a replayer.
    pub fn handles(&self, action_type: ActionType) -> bool {
        self.routes.contains_key(&action_type)
    }
}

impl ActionReplayer for ReplayRouter {
    fn replay(&self, action: &QueuedAction) -> ReplayOutcome {
        match self.routes.get(&action.action_type) {
            Some(replayer) => replayer.replay(action),
            None => {
                warn!(id = %action.id, action_type = %action.action_type, "no replayer registered");
                ReplayOutcome::fatal(format!(
                    "no replayer registered for {}",
                    action.action_type
                ))
            }
        }
    }
}

impl std::fmt::Debug for ReplayRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.routes.keys().map(ActionType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("ReplayRouter").field("routes", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::ActionId;

    fn action(action_type: ActionType) -> QueuedAction {
        QueuedAction {
            id: ActionId(1),
            action_type,
            payload: serde_json::Value::Null,
            enqueued_at: 0,
            retry_count: 0,
            max_retries: 3,
            next_attempt_at: 0,
            last_error: None,
            invalidates: vec![],
        }
    }

    #[test]
    fn closures_are_replayers() {
        let replayer = |_: &QueuedAction| ReplayOutcome::retryable("503");
        assert_eq!(
            replayer.replay(&action(ActionType::SyncData)),
            ReplayOutcome::retryable("503")
        );
    }

    #[test]
    fn router_dispatches_by_type() {
        let router = ReplayRouter::new()
            .route(ActionType::UpdateProfile, |_: &QueuedAction| {
                ReplayOutcome::Synced
            })
            .route(ActionType::TrackUsage, |_: &QueuedAction| {
                ReplayOutcome::fatal("gone")
            });

        assert!(router.replay(&action(ActionType::UpdateProfile)).is_synced());
        assert_eq!(
            router.replay(&action(ActionType::TrackUsage)),
            ReplayOutcome::fatal("gone")
        );
    }

    #[test]
    fn unrouted_type_is_fatal() {
        let router = ReplayRouter::new();
        assert!(matches!(
            router.replay(&action(ActionType::SchedulePost)),
            ReplayOutcome::Fatal(reason) if reason.contains("SCHEDULE_POST")
        ));
    }
}
