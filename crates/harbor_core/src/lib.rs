//! # Harbor Core
//!
//! The offline-first local data layer: an encrypted key-value store with TTL
//! expiry, a content-addressed LRU cache and a durable queue of actions
//! waiting for connectivity.
//!
//! This crate provides:
//! - [`KvStore`] - records with optional TTL and encryption
//! - [`CacheLayer`] - read-through cache keyed by a hash of a logical key
//! - [`ActionQueue`] - FIFO queue of pending remote mutations with backoff
//! - [`Clock`] - injectable time source
//!
//! ## Layout in the backend
//!
//! ```text
//! <namespace>/<key>                 # KvStore records
//! <namespace>/cache:<sha256>        # CacheLayer entries
//! <namespace>/queue:meta            # ActionQueue id counter
//! <namespace>/queue:action:<id>     # one record per pending action
//! <namespace>/queue:failed:<id>     # one record per failed action
//! <namespace>/__harbor:key          # persisted encryption key
//! ```
//!
//! The cache and queue never read each other's records. `__harbor:` keys are
//! engine internals: they are hidden from listings and survive `clear`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod error;
mod keys;
mod kv;
mod queue;
mod record;

#[cfg(test)]
mod testutil;

pub use cache::{CacheEntry, CacheLayer, CacheStats, CACHE_PREFIX};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackoffPolicy, CacheConfig, QueueConfig, StoreConfig};
pub use error::{CoreError, CoreResult};
pub use keys::StoredKeyStore;
pub use kv::{KvStore, SetOptions, StorageUsage, SweepReport};
pub use queue::{
    ActionId, ActionQueue, ActionRequest, ActionType, Disposition, DrainReport, FailedAction,
    FailureReason, QueuedAction, ReplayOutcome, QUEUE_PREFIX,
};
pub use record::Record;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
