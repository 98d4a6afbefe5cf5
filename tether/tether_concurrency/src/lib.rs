#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Tether Concurrency
//!
//! Coordination primitives for a bounded number of concurrent workers that
//! share mutable state under time pressure.
//!
//! This crate provides:
//!
//! - Exactly-once lazy initialization with an explicit fallback policy
//! - Object pooling to cut allocation churn on hot paths
//! - Exclusive and shared-read locking behind one substitutable interface
//! - Deadline-bounded task dispatch that never leaks the spawned task
//!
//! The four mechanisms are peers; none of them depends on another. The task
//! runner only needs something that implements [`dispatch::Dispatch`].
//!
//! ## Caller obligations
//!
//! - Never re-enter a lock you already hold from the same thread. Asking for
//!   write access while holding read access self-deadlocks and is not
//!   detected.
//! - Pooled objects come back exactly as they were released. Overwrite every
//!   per-use field before relying on it.

/// Toolkit configuration and string-keyed configuration sources
pub mod config;

/// Task dispatch onto threads and worker pools
pub mod dispatch;

/// Error types shared across the toolkit
pub mod error;

/// One-time guarded initialization
pub mod once;

/// Object pooling and reusable decode targets
pub mod pool;

/// Deadline-bounded task execution
pub mod runner;

/// Contention locks and live-task accounting
pub mod sync;

// Re-export key types for easier access
pub use config::ToolkitConfig;
pub use dispatch::{Dispatch, ThreadDispatcher, WorkerPool};
pub use error::{Error, Result};
pub use once::GuardedInitializer;
pub use pool::ResourcePool;
pub use runner::{BoundedTaskRunner, Outcome, RunError};
pub use sync::{ContentionLock, ExclusiveLock, LiveGauge, Lock, LockDiscipline, SharedLock};
