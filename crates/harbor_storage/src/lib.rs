//! # Harbor Storage
//!
//! Persistent storage backends for Harbor.
//!
//! This crate provides the lowest-level storage abstraction: a flat, durable
//! map from string keys to string values. Backends are **opaque string
//! stores** - they know nothing about records, TTLs, encryption or queues.
//!
//! ## Design Principles
//!
//! - Backends expose four primitives: get, set, remove, list
//! - No partial updates; a value is always replaced whole
//! - Must be `Send + Sync` so one backend can be shared by every layer
//! - Harbor core owns all interpretation of the stored strings
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - Directory-backed persistent storage with an advisory lock
//!
//! ## Example
//!
//! ```rust
//! use harbor_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.set_string("greeting", "hello").unwrap();
//! assert_eq!(backend.get_string("greeting").unwrap().as_deref(), Some("hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
