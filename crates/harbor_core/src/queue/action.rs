//! Queued action types and replay outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The closed set of deferrable remote mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Push locally changed data.
    SyncData,
    /// Update the user profile.
    UpdateProfile,
    /// Schedule a post for publication.
    SchedulePost,
    /// Report usage events.
    TrackUsage,
}

impl ActionType {
    /// Every action type.
    pub const ALL: [ActionType; 4] = [
        ActionType::SyncData,
        ActionType::UpdateProfile,
        ActionType::SchedulePost,
        ActionType::TrackUsage,
    ];

    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActionType::SyncData => "SYNC_DATA",
            ActionType::UpdateProfile => "UPDATE_PROFILE",
            ActionType::SchedulePost => "SCHEDULE_POST",
            ActionType::TrackUsage => "TRACK_USAGE",
        }
    }

    /// Default number of attempts before an action of this type fails.
    #[must_use]
    pub const fn default_max_retries(&self) -> u32 {
        match self {
            ActionType::SyncData | ActionType::SchedulePost => 5,
            ActionType::UpdateProfile => 3,
            ActionType::TrackUsage => 2,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::invalid_operation(format!("unknown action type: {s}")))
    }
}

/// Identifier of a queued action. Ordering matches enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub u64);

impl ActionId {
    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A remote mutation waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    /// Unique, monotonically increasing id.
    pub id: ActionId,
    /// What the action does.
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Opaque request body.
    pub payload: serde_json::Value,
    /// Enqueue time in epoch milliseconds.
    pub enqueued_at: u64,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Failed attempts after which the action is abandoned.
    pub max_retries: u32,
    /// Earliest time of the next attempt in epoch milliseconds.
    pub next_attempt_at: u64,
    /// Reason given by the latest failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Logical cache keys made stale once this action is synced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalidates: Vec<String>,
}

impl QueuedAction {
    /// Returns true if the action may be attempted at `now_ms`.
    #[must_use]
    pub fn is_eligible(&self, now_ms: u64) -> bool {
        self.next_attempt_at <= now_ms
    }
}

/// Parameters for a new action.
///
/// # Example
///
/// ```rust
/// use harbor_core::{ActionRequest, ActionType};
///
/// let request = ActionRequest::new(ActionType::UpdateProfile, serde_json::json!({"name": "Ada"}))
///     .invalidates("/api/profile");
/// assert_eq!(request.effective_max_retries(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    /// What the action does.
    pub action_type: ActionType,
    /// Opaque request body.
    pub payload: serde_json::Value,
    /// Overrides the type's default retry limit.
    pub max_retries: Option<u32>,
    /// Logical cache keys made stale once synced.
    pub invalidates: Vec<String>,
}

impl ActionRequest {
    /// Creates a request with the type's default retry limit.
    #[must_use]
    pub fn new(action_type: ActionType, payload: serde_json::Value) -> Self {
        Self {
            action_type,
            payload,
            max_retries: None,
            invalidates: Vec::new(),
        }
    }

    /// Sets the retry limit.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Adds a logical cache key to invalidate on success.
    #[must_use]
    pub fn invalidates(mut self, logical_key: impl Into<String>) -> Self {
        self.invalidates.push(logical_key.into());
        self
    }

    /// The retry limit that will be stored.
    #[must_use]
    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries
            .unwrap_or_else(|| self.action_type.default_max_retries())
    }
}

/// Why an action left the queue without syncing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum FailureReason {
    /// The remote rejected the action permanently.
    Fatal(String),
    /// The last allowed attempt failed.
    RetriesExhausted(String),
}

impl FailureReason {
    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            FailureReason::Fatal(m) | FailureReason::RetriesExhausted(m) => m,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Fatal(m) => write!(f, "fatal: {m}"),
            FailureReason::RetriesExhausted(m) => write!(f, "retries exhausted: {m}"),
        }
    }
}

/// An action in the terminal failed pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAction {
    /// The action as it was when it failed.
    pub action: QueuedAction,
    /// Failure time in epoch milliseconds.
    pub failed_at: u64,
    /// Why it failed.
    pub reason: FailureReason,
}

/// Result of replaying one action against the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The remote accepted the action.
    Synced,
    /// A transient failure; try again later.
    Retryable(String),
    /// A permanent rejection; do not retry.
    Fatal(String),
    /// The remote cannot be reached; stop the pass without penalty.
    Unreachable(String),
}

impl ReplayOutcome {
    /// Creates a retryable outcome.
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable(reason.into())
    }

    /// Creates a fatal outcome.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    /// Creates an unreachable outcome.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::Unreachable(reason.into())
    }

    /// Returns true for [`ReplayOutcome::Synced`].
    #[must_use]
    pub fn is_synced(&self) -> bool {
        matches!(self, ReplayOutcome::Synced)
    }
}

/// What the queue did with an action after an outcome was recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Removed from the queue.
    Synced(QueuedAction),
    /// Kept pending with a later attempt time.
    Rescheduled(QueuedAction),
    /// Moved to the failed pool.
    Failed(FailedAction),
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Actions that synced, in replay order.
    pub synced: Vec<QueuedAction>,
    /// Actions that will be retried.
    pub rescheduled: Vec<QueuedAction>,
    /// Actions moved to the failed pool.
    pub failed: Vec<FailedAction>,
    /// Eligible actions left untouched because the pass stopped early.
    pub skipped: usize,
    /// Why the pass stopped early.
    pub aborted: Option<String>,
}

impl DrainReport {
    /// Number of actions attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.synced.len() + self.rescheduled.len() + self.failed.len()
    }

    /// Returns true if nothing was attempted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempted() == 0 && self.aborted.is_none()
    }

    pub(crate) fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Synced(action) => self.synced.push(action),
            Disposition::Rescheduled(action) => self.rescheduled.push(action),
            Disposition::Failed(failed) => self.failed.push(failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_wire_names() {
        let json = serde_json::to_string(&ActionType::UpdateProfile).unwrap();
        assert_eq!(json, "\"UPDATE_PROFILE\"");
        for t in ActionType::ALL {
            assert_eq!(t.as_str().parse::<ActionType>().unwrap(), t);
        }
        assert!("NOPE".parse::<ActionType>().is_err());
    }

    #[test]
    fn default_retry_limits() {
        assert_eq!(ActionType::SyncData.default_max_retries(), 5);
        assert_eq!(ActionType::UpdateProfile.default_max_retries(), 3);
        assert_eq!(ActionType::SchedulePost.default_max_retries(), 5);
        assert_eq!(ActionType::TrackUsage.default_max_retries(), 2);
    }

    #[test]
    fn queued_action_json_shape() {
        let action = QueuedAction {
            id: ActionId(7),
            action_type: ActionType::TrackUsage,
            payload: serde_json::json!({"event": "open"}),
            enqueued_at: 1,
            retry_count: 0,
            max_retries: 2,
            next_attempt_at: 1,
            last_error: None,
            invalidates: vec![],
        };
        let json = serde_json::to_value(&action).unwrap();

        assert_eq!(json["id"], 7);
        assert_eq!(json["type"], "TRACK_USAGE");
        assert_eq!(json["nextAttemptAt"], 1);
        assert!(json.get("lastError").is_none());
        assert!(json.get("invalidates").is_none());

        let back: QueuedAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn failure_reason_json() {
        let reason = FailureReason::Fatal("400".into());
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "Fatal", "message": "400"}));
        assert_eq!(reason.to_string(), "fatal: 400");
    }

    #[test]
    fn request_overrides_retry_limit() {
        let request = ActionRequest::new(ActionType::SyncData, serde_json::Value::Null);
        assert_eq!(request.effective_max_retries(), 5);
        assert_eq!(request.max_retries(0).effective_max_retries(), 0);
    }
}
