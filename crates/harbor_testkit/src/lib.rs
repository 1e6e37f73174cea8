//! # Harbor Testkit
//!
//! Test utilities for Harbor.
//!
//! This crate provides:
//! - Engine fixtures on a manual clock and manual connectivity
//! - Scripted and recording replayers
//! - Fault injection: failing backends, key stores and ciphers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use harbor_core::{ActionRequest, ActionType, ReplayOutcome};
//! use harbor_testkit::prelude::*;
//!
//! let engine = TestEngine::new();
//! engine.replayer.push(ReplayOutcome::retryable("503"));
//! engine
//!     .enqueue(ActionRequest::new(ActionType::SyncData, serde_json::Value::Null))
//!     .unwrap();
//!
//! engine.sync_now().unwrap();
//! assert_eq!(engine.queue().pending()[0].retry_count, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod replayers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::replayers::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use replayers::*;
