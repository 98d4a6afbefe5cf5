//! Contention locks and live-task accounting.
//!
//! This module provides the synchronization pieces of the toolkit:
//!
//! - Exclusive and shared-read locks behind one capability trait
//! - A live-task gauge for proving background work drains
//! - A reader/writer workload for comparing lock disciplines

pub mod gauge;
pub mod lock;
pub mod workload;

// Re-export key types from gauge
pub use gauge::{GaugeGuard, GaugeSnapshot, LiveGauge};

// Re-export key types from lock
pub use lock::{
    ContentionLock, ExclusiveGuard, ExclusiveLock, Lock, LockDiscipline, LockError, LockStats,
    SharedLock, SharedReadGuard, SharedWriteGuard,
};

// Re-export key types from workload
pub use workload::{Counter, WorkloadConfig, WorkloadReport};
