//! Contention locks with two interchangeable disciplines.
//!
//! [`ExclusiveLock`] hands every reader and writer the same single slot.
//! [`SharedLock`] lets readers proceed together and gives writers sole
//! access. Both implement [`ContentionLock`], and [`Lock`] picks one at
//! runtime from a [`LockDiscipline`], so code written against the trait
//! never changes when the discipline does.
//!
//! Access is scoped: the closure passed to `read`/`write` runs while the
//! slot is held, and the guard releases it on every exit path, including a
//! panic unwinding out of the closure. The underlying `parking_lot` locks do
//! not poison.
//!
//! Re-entering a lock from a thread that already holds it deadlocks. This is
//! not detected.

use log::{trace, warn};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error when acquiring a lock
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The lock could not be acquired within the specified timeout
    #[error("lock acquisition timed out after {0:?}")]
    Timeout(Duration),
}

/// How concurrent readers and writers are ordered relative to one another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockDiscipline {
    /// Every access takes the same exclusive slot
    Exclusive,

    /// Reads share a slot, writes exclude everyone
    #[default]
    Shared,
}

impl LockDiscipline {
    /// Get the name of this discipline.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Shared => "shared",
        }
    }
}

impl fmt::Display for LockDiscipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockDiscipline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exclusive" | "mutex" => Ok(Self::Exclusive),
            "shared" | "rwlock" => Ok(Self::Shared),
            other => Err(format!("unknown lock discipline: {}", other)),
        }
    }
}

/// Statistics about lock usage for one role
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockStats {
    /// Number of successful lock acquisitions
    pub acquisition_count: usize,

    /// Number of timed acquisitions that gave up
    pub failed_count: usize,

    /// Total time spent waiting for the lock (microseconds)
    pub total_wait_time_us: u64,

    /// Total time the lock was held (microseconds)
    pub total_hold_time_us: u64,

    /// Maximum time spent waiting for the lock (microseconds)
    pub max_wait_time_us: u64,

    /// Maximum time the lock was held (microseconds)
    pub max_hold_time_us: u64,
}

/// Atomic counters behind [`LockStats`]
#[derive(Debug, Default)]
struct RoleMetrics {
    acquisition_count: AtomicUsize,
    failed_count: AtomicUsize,
    total_wait_time_us: AtomicUsize,
    total_hold_time_us: AtomicUsize,
    max_wait_time_us: AtomicUsize,
    max_hold_time_us: AtomicUsize,
}

impl RoleMetrics {
    fn record_acquired(&self, wait_time: Duration) {
        let wait_time_us = wait_time.as_micros() as usize;
        self.total_wait_time_us
            .fetch_add(wait_time_us, Ordering::Relaxed);
        update_max(&self.max_wait_time_us, wait_time_us);
        self.acquisition_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_released(&self, hold_time: Duration) {
        let hold_time_us = hold_time.as_micros() as usize;
        self.total_hold_time_us
            .fetch_add(hold_time_us, Ordering::Relaxed);
        update_max(&self.max_hold_time_us, hold_time_us);
    }

    fn record_failed(&self) {
        self.failed_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LockStats {
        LockStats {
            acquisition_count: self.acquisition_count.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
            total_wait_time_us: self.total_wait_time_us.load(Ordering::Relaxed) as u64,
            total_hold_time_us: self.total_hold_time_us.load(Ordering::Relaxed) as u64,
            max_wait_time_us: self.max_wait_time_us.load(Ordering::Relaxed) as u64,
            max_hold_time_us: self.max_hold_time_us.load(Ordering::Relaxed) as u64,
        }
    }

    fn reset(&self) {
        self.acquisition_count.store(0, Ordering::Relaxed);
        self.failed_count.store(0, Ordering::Relaxed);
        self.total_wait_time_us.store(0, Ordering::Relaxed);
        self.total_hold_time_us.store(0, Ordering::Relaxed);
        self.max_wait_time_us.store(0, Ordering::Relaxed);
        self.max_hold_time_us.store(0, Ordering::Relaxed);
    }
}

/// Raise `slot` to `value` if it is larger, without locking.
pub(crate) fn update_max(slot: &AtomicUsize, value: usize) {
    let mut current_max = slot.load(Ordering::Relaxed);

    while value > current_max {
        match slot.compare_exchange(current_max, value, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Per-lock bookkeeping shared by both disciplines
#[derive(Debug, Default)]
struct Tracker {
    name: Option<String>,
    read: RoleMetrics,
    write: RoleMetrics,
}

impl Tracker {
    fn named(name: Option<String>) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    fn timed_out(&self, role: Role, start: Instant, timeout: Duration) -> LockError {
        self.metrics(role).record_failed();
        warn!(
            "{} lock timeout: {} (waited: {:.2}ms, timeout: {:.2}ms)",
            role.as_str(),
            self.label(),
            start.elapsed().as_secs_f64() * 1000.0,
            timeout.as_secs_f64() * 1000.0
        );
        LockError::Timeout(timeout)
    }

    fn acquired(&self, role: Role, start: Instant) -> Instant {
        let wait_time = start.elapsed();
        self.metrics(role).record_acquired(wait_time);
        trace!(
            "{} lock acquired: {} (wait time: {:.2}ms)",
            role.as_str(),
            self.label(),
            wait_time.as_secs_f64() * 1000.0
        );
        Instant::now()
    }

    fn released(&self, role: Role, acquired_at: Instant) {
        let hold_time = acquired_at.elapsed();
        self.metrics(role).record_released(hold_time);
        trace!(
            "{} lock released: {} (held for: {:.2}ms)",
            role.as_str(),
            self.label(),
            hold_time.as_secs_f64() * 1000.0
        );
    }

    fn metrics(&self, role: Role) -> &RoleMetrics {
        match role {
            Role::Read => &self.read,
            Role::Write => &self.write,
        }
    }
}

/// Which side of the lock an access is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Read,
    Write,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "Read",
            Self::Write => "Write",
        }
    }
}

/// The capability shared by both locking disciplines.
///
/// `read` hands the closure a shared view, `write` an exclusive one. Writes
/// are serialized against each other and against reads under either
/// discipline, so no read ever observes a partially applied write.
pub trait ContentionLock<T> {
    /// Inspect the guarded value.
    fn read<R>(&self, inspect: impl FnOnce(&T) -> R) -> R;

    /// Mutate the guarded value with sole access.
    fn write<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> R;

    /// Inspect the guarded value, giving up after `timeout`.
    fn try_read_for<R>(
        &self,
        timeout: Duration,
        inspect: impl FnOnce(&T) -> R,
    ) -> Result<R, LockError>;

    /// Mutate the guarded value, giving up after `timeout`.
    fn try_write_for<R>(
        &self,
        timeout: Duration,
        mutate: impl FnOnce(&mut T) -> R,
    ) -> Result<R, LockError>;

    /// The discipline this lock applies.
    fn discipline(&self) -> LockDiscipline;

    /// Statistics for the reader role.
    fn read_stats(&self) -> LockStats;

    /// Statistics for the writer role.
    fn write_stats(&self) -> LockStats;
}

/// A lock where readers and writers share a single exclusive slot
#[derive(Debug)]
pub struct ExclusiveLock<T> {
    /// The underlying mutex
    mutex: Mutex<T>,

    /// Usage statistics and debug name
    tracker: Tracker,
}

/// A guard for an [`ExclusiveLock`]
pub struct ExclusiveGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    acquired_at: Instant,
    role: Role,
    tracker: &'a Tracker,
}

impl<T> ExclusiveLock<T> {
    /// Create a new exclusive lock
    pub fn new(value: T) -> Self {
        Self {
            mutex: Mutex::new(value),
            tracker: Tracker::default(),
        }
    }

    /// Create a new exclusive lock with a name for debugging
    pub fn with_name(value: T, name: impl Into<String>) -> Self {
        Self {
            mutex: Mutex::new(value),
            tracker: Tracker::named(Some(name.into())),
        }
    }

    /// Acquire the slot, accounting the access to the writer role
    pub fn lock(&self) -> ExclusiveGuard<'_, T> {
        self.lock_as(Role::Write)
    }

    /// Try to acquire the slot without waiting
    pub fn try_lock(&self) -> Option<ExclusiveGuard<'_, T>> {
        let start = Instant::now();
        let guard = self.mutex.try_lock()?;
        Some(self.guard(guard, Role::Write, start))
    }

    /// Try to acquire the slot with a timeout
    pub fn try_lock_for(&self, timeout: Duration) -> Result<ExclusiveGuard<'_, T>, LockError> {
        self.try_lock_for_as(Role::Write, timeout)
    }

    /// Get the name of this lock
    pub fn name(&self) -> Option<&str> {
        self.tracker.name.as_deref()
    }

    /// Reset the statistics for both roles
    pub fn reset_stats(&self) {
        self.tracker.read.reset();
        self.tracker.write.reset();
    }

    /// Consume the lock and return the guarded value
    pub fn into_inner(self) -> T {
        self.mutex.into_inner()
    }

    fn lock_as(&self, role: Role) -> ExclusiveGuard<'_, T> {
        let start = Instant::now();
        let guard = self.mutex.lock();
        self.guard(guard, role, start)
    }

    fn try_lock_for_as(
        &self,
        role: Role,
        timeout: Duration,
    ) -> Result<ExclusiveGuard<'_, T>, LockError> {
        let start = Instant::now();
        let guard = self
            .mutex
            .try_lock_for(timeout)
            .ok_or_else(|| self.tracker.timed_out(role, start, timeout))?;
        Ok(self.guard(guard, role, start))
    }

    fn guard<'a>(
        &'a self,
        guard: MutexGuard<'a, T>,
        role: Role,
        start: Instant,
    ) -> ExclusiveGuard<'a, T> {
        ExclusiveGuard {
            guard,
            acquired_at: self.tracker.acquired(role, start),
            role,
            tracker: &self.tracker,
        }
    }
}

impl<T: Default> Default for ExclusiveLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> ContentionLock<T> for ExclusiveLock<T> {
    fn read<R>(&self, inspect: impl FnOnce(&T) -> R) -> R {
        let guard = self.lock_as(Role::Read);
        inspect(&guard)
    }

    fn write<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock_as(Role::Write);
        mutate(&mut guard)
    }

    fn try_read_for<R>(
        &self,
        timeout: Duration,
        inspect: impl FnOnce(&T) -> R,
    ) -> Result<R, LockError> {
        let guard = self.try_lock_for_as(Role::Read, timeout)?;
        Ok(inspect(&guard))
    }

    fn try_write_for<R>(
        &self,
        timeout: Duration,
        mutate: impl FnOnce(&mut T) -> R,
    ) -> Result<R, LockError> {
        let mut guard = self.try_lock_for_as(Role::Write, timeout)?;
        Ok(mutate(&mut guard))
    }

    fn discipline(&self) -> LockDiscipline {
        LockDiscipline::Exclusive
    }

    fn read_stats(&self) -> LockStats {
        self.tracker.read.snapshot()
    }

    fn write_stats(&self) -> LockStats {
        self.tracker.write.snapshot()
    }
}

impl<T> Drop for ExclusiveGuard<'_, T> {
    fn drop(&mut self) {
        self.tracker.released(self.role, self.acquired_at);
    }
}

impl<T> std::ops::Deref for ExclusiveGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for ExclusiveGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// A lock where readers share and writers exclude everyone
#[derive(Debug)]
pub struct SharedLock<T> {
    /// The underlying RwLock
    rwlock: RwLock<T>,

    /// Usage statistics and debug name
    tracker: Tracker,
}

/// A read guard for a [`SharedLock`]
pub struct SharedReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, T>,
    acquired_at: Instant,
    tracker: &'a Tracker,
}

/// A write guard for a [`SharedLock`]
pub struct SharedWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    acquired_at: Instant,
    tracker: &'a Tracker,
}

impl<T> SharedLock<T> {
    /// Create a new shared lock
    pub fn new(value: T) -> Self {
        Self {
            rwlock: RwLock::new(value),
            tracker: Tracker::default(),
        }
    }

    /// Create a new shared lock with a name for debugging
    pub fn with_name(value: T, name: impl Into<String>) -> Self {
        Self {
            rwlock: RwLock::new(value),
            tracker: Tracker::named(Some(name.into())),
        }
    }

    /// Acquire a shared read slot
    pub fn read_guard(&self) -> SharedReadGuard<'_, T> {
        let start = Instant::now();
        let guard = self.rwlock.read();
        SharedReadGuard {
            guard,
            acquired_at: self.tracker.acquired(Role::Read, start),
            tracker: &self.tracker,
        }
    }

    /// Acquire a shared read slot with a timeout
    pub fn try_read_guard_for(
        &self,
        timeout: Duration,
    ) -> Result<SharedReadGuard<'_, T>, LockError> {
        let start = Instant::now();
        let guard = self
            .rwlock
            .try_read_for(timeout)
            .ok_or_else(|| self.tracker.timed_out(Role::Read, start, timeout))?;
        Ok(SharedReadGuard {
            guard,
            acquired_at: self.tracker.acquired(Role::Read, start),
            tracker: &self.tracker,
        })
    }

    /// Acquire the exclusive write slot
    pub fn write_guard(&self) -> SharedWriteGuard<'_, T> {
        let start = Instant::now();
        let guard = self.rwlock.write();
        SharedWriteGuard {
            guard,
            acquired_at: self.tracker.acquired(Role::Write, start),
            tracker: &self.tracker,
        }
    }

    /// Acquire the exclusive write slot with a timeout
    pub fn try_write_guard_for(
        &self,
        timeout: Duration,
    ) -> Result<SharedWriteGuard<'_, T>, LockError> {
        let start = Instant::now();
        let guard = self
            .rwlock
            .try_write_for(timeout)
            .ok_or_else(|| self.tracker.timed_out(Role::Write, start, timeout))?;
        Ok(SharedWriteGuard {
            guard,
            acquired_at: self.tracker.acquired(Role::Write, start),
            tracker: &self.tracker,
        })
    }

    /// Get the name of this lock
    pub fn name(&self) -> Option<&str> {
        self.tracker.name.as_deref()
    }

    /// Reset the statistics for both roles
    pub fn reset_stats(&self) {
        self.tracker.read.reset();
        self.tracker.write.reset();
    }

    /// Consume the lock and return the guarded value
    pub fn into_inner(self) -> T {
        self.rwlock.into_inner()
    }
}

impl<T: Default> Default for SharedLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> ContentionLock<T> for SharedLock<T> {
    fn read<R>(&self, inspect: impl FnOnce(&T) -> R) -> R {
        let guard = self.read_guard();
        inspect(&guard)
    }

    fn write<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.write_guard();
        mutate(&mut guard)
    }

    fn try_read_for<R>(
        &self,
        timeout: Duration,
        inspect: impl FnOnce(&T) -> R,
    ) -> Result<R, LockError> {
        let guard = self.try_read_guard_for(timeout)?;
        Ok(inspect(&guard))
    }

    fn try_write_for<R>(
        &self,
        timeout: Duration,
        mutate: impl FnOnce(&mut T) -> R,
    ) -> Result<R, LockError> {
        let mut guard = self.try_write_guard_for(timeout)?;
        Ok(mutate(&mut guard))
    }

    fn discipline(&self) -> LockDiscipline {
        LockDiscipline::Shared
    }

    fn read_stats(&self) -> LockStats {
        self.tracker.read.snapshot()
    }

    fn write_stats(&self) -> LockStats {
        self.tracker.write.snapshot()
    }
}

impl<T> Drop for SharedReadGuard<'_, T> {
    fn drop(&mut self) {
        self.tracker.released(Role::Read, self.acquired_at);
    }
}

impl<T> std::ops::Deref for SharedReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> Drop for SharedWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.tracker.released(Role::Write, self.acquired_at);
    }
}

impl<T> std::ops::Deref for SharedWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for SharedWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// A lock whose discipline is chosen at construction time.
///
/// Benchmarks and production code can share call sites and switch
/// disciplines through configuration alone.
#[derive(Debug)]
pub enum Lock<T> {
    /// Single exclusive slot for everyone
    Exclusive(ExclusiveLock<T>),

    /// Shared readers, exclusive writers
    Shared(SharedLock<T>),
}

impl<T> Lock<T> {
    /// Create a lock applying the given discipline
    pub fn new(discipline: LockDiscipline, value: T) -> Self {
        match discipline {
            LockDiscipline::Exclusive => Self::Exclusive(ExclusiveLock::new(value)),
            LockDiscipline::Shared => Self::Shared(SharedLock::new(value)),
        }
    }

    /// Create a named lock applying the given discipline
    pub fn with_name(discipline: LockDiscipline, value: T, name: impl Into<String>) -> Self {
        match discipline {
            LockDiscipline::Exclusive => Self::Exclusive(ExclusiveLock::with_name(value, name)),
            LockDiscipline::Shared => Self::Shared(SharedLock::with_name(value, name)),
        }
    }

    /// Consume the lock and return the guarded value
    pub fn into_inner(self) -> T {
        match self {
            Self::Exclusive(lock) => lock.into_inner(),
            Self::Shared(lock) => lock.into_inner(),
        }
    }
}

impl<T> ContentionLock<T> for Lock<T> {
    fn read<R>(&self, inspect: impl FnOnce(&T) -> R) -> R {
        match self {
            Self::Exclusive(lock) => lock.read(inspect),
            Self::Shared(lock) => lock.read(inspect),
        }
    }

    fn write<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> R {
        match self {
            Self::Exclusive(lock) => lock.write(mutate),
            Self::Shared(lock) => lock.write(mutate),
        }
    }

    fn try_read_for<R>(
        &self,
        timeout: Duration,
        inspect: impl FnOnce(&T) -> R,
    ) -> Result<R, LockError> {
        match self {
            Self::Exclusive(lock) => lock.try_read_for(timeout, inspect),
            Self::Shared(lock) => lock.try_read_for(timeout, inspect),
        }
    }

    fn try_write_for<R>(
        &self,
        timeout: Duration,
        mutate: impl FnOnce(&mut T) -> R,
    ) -> Result<R, LockError> {
        match self {
            Self::Exclusive(lock) => lock.try_write_for(timeout, mutate),
            Self::Shared(lock) => lock.try_write_for(timeout, mutate),
        }
    }

    fn discipline(&self) -> LockDiscipline {
        match self {
            Self::Exclusive(_) => LockDiscipline::Exclusive,
            Self::Shared(_) => LockDiscipline::Shared,
        }
    }

    fn read_stats(&self) -> LockStats {
        match self {
            Self::Exclusive(lock) => lock.read_stats(),
            Self::Shared(lock) => lock.read_stats(),
        }
    }

    fn write_stats(&self) -> LockStats {
        match self {
            Self::Exclusive(lock) => lock.write_stats(),
            Self::Shared(lock) => lock.write_stats(),
        }
    }
}
