//! Error types for Harbor core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Harbor core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] harbor_storage::StorageError),

    /// Crypto error outside the fail-open paths (e.g. key store access).
    #[error("crypto error: {0}")]
    Crypto(#[from] harbor_crypto::CryptoError),

    /// JSON encoding or decoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored record cannot be decoded.
    #[error("corrupt record under {key}: {message}")]
    Corrupt {
        /// The store key.
        key: String,
        /// Description of the problem.
        message: String,
    },

    /// The action queue is at capacity.
    #[error("action queue is full ({capacity} actions)")]
    QueueFull {
        /// Configured maximum queue length.
        capacity: usize,
    },

    /// No pending or failed action has this id.
    #[error("action not found: {id}")]
    ActionNotFound {
        /// The action id.
        id: u64,
    },

    /// A cache entry is larger than the whole cache budget.
    #[error("cache entry of {size} bytes exceeds the {limit} byte budget")]
    EntryTooLarge {
        /// Entry size in bytes.
        size: usize,
        /// Configured byte budget.
        limit: usize,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a corrupt record error.
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error came from the storage backend.
    pub fn is_storage(&self) -> bool {
        matches!(self, CoreError::Storage(_))
    }
}
