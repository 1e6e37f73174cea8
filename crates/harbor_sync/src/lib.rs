//! # Harbor Sync
//!
//! Replays the offline action queue against a remote and ties the engine
//! together.
//!
//! This crate provides:
//! - The replay contract ([`ActionReplayer`]) and a per-type router
//! - Connectivity observation
//! - The sync coordinator, which runs at most one drain pass at a time
//! - A tokio scheduler that drains on reconnect, on a timer and on demand
//! - The [`OfflineEngine`] facade
//!
//! ## Drain Triggers
//!
//! ```text
//!   offline -> online ──┐
//!   interval tick ──────┼──> SyncCoordinator::drain ──> ActionQueue::drain
//!   sync_now ───────────┘            │                         │
//!                                    │                   ActionReplayer
//!                                    └──> CacheLayer::invalidate (synced)
//! ```
//!
//! ## Key Invariants
//!
//! - At most one drain pass runs at a time; concurrent triggers are rejected
//! - An unreachable remote stops the pass without touching retry counters
//! - Replays are at-least-once
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use harbor_core::{ActionRequest, ActionType, QueuedAction, ReplayOutcome};
//! use harbor_storage::InMemoryBackend;
//! use harbor_sync::OfflineEngine;
//!
//! let engine = OfflineEngine::builder()
//!     .backend(Arc::new(InMemoryBackend::new()))
//!     .replayer(Arc::new(|_: &QueuedAction| ReplayOutcome::Synced))
//!     .init()
//!     .unwrap();
//!
//! engine
//!     .enqueue(ActionRequest::new(ActionType::TrackUsage, serde_json::json!({"screen": "home"})))
//!     .unwrap();
//! engine.sync_now().unwrap();
//! assert_eq!(engine.queue_size(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod coordinator;
mod engine;
mod error;
mod replay;
mod scheduler;

pub use config::{EngineConfig, SyncConfig};
pub use connectivity::{ConnectivityObserver, ManualConnectivity};
pub use coordinator::{
    DrainGuard, DrainOutcome, DrainTrigger, SyncCoordinator, SyncState, SyncStats,
};
pub use engine::{EngineBuilder, OfflineEngine};
pub use error::{SyncError, SyncResult};
pub use replay::{ActionReplayer, ReplayRouter};
pub use scheduler::{SchedulerHandle, SyncScheduler};
