//! Error types for the sync layer.

use harbor_core::{CoreError, ReplayOutcome};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store, cache or queue error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Key resolution failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] harbor_crypto::CryptoError),

    /// Replaying an action against the remote failed.
    #[error("replay error: {message}")]
    Replay {
        /// Error message.
        message: String,
        /// Whether the action can be retried.
        retryable: bool,
    },

    /// The remote cannot be reached.
    #[error("not connected to server")]
    NotConnected,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// The engine was built with missing or invalid parts.
    #[error("configuration error: {0}")]
    Config(String),

    /// The scheduler is already running.
    #[error("scheduler already running")]
    AlreadyRunning,

    /// The scheduler task has stopped.
    #[error("scheduler stopped")]
    SchedulerStopped,

    /// A drain running on the blocking pool panicked or was cancelled.
    #[error("drain task failed: {0}")]
    TaskFailed(String),

    /// No tokio runtime is available to run the scheduler.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The operation conflicts with a drain in progress.
    #[error("a drain is in progress")]
    Busy,
}

impl SyncError {
    /// Creates a retryable replay error.
    pub fn replay_retryable(message: impl Into<String>) -> Self {
        Self::Replay {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable replay error.
    pub fn replay_fatal(message: impl Into<String>) -> Self {
        Self::Replay {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Replay { retryable, .. } => *retryable,
            SyncError::NotConnected | SyncError::Timeout | SyncError::Busy => true,
            SyncError::Core(e) => e.is_storage(),
            _ => false,
        }
    }

    /// Maps the error to the queue outcome a replayer should report.
    pub fn to_outcome(&self) -> ReplayOutcome {
        match self {
            SyncError::NotConnected => ReplayOutcome::unreachable(self.to_string()),
            e if e.is_retryable() => ReplayOutcome::retryable(e.to_string()),
            e => ReplayOutcome::fatal(e.to_string()),
        }
    }
}
