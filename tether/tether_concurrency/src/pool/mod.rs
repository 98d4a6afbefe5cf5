//! Object reuse to reduce allocation pressure.
//!
//! A [`ResourcePool`] keeps released objects around so the next borrower can
//! reuse them instead of allocating. The pool hands out whatever it has; it
//! does not reset objects. Callers must overwrite every per-use field before
//! relying on it (see [`record`] for a decode target that does exactly that).
//!
//! Releasing an object the pool never produced is accepted silently. The pool
//! has no way to tell and does not try.

pub mod record;

use log::{debug, trace};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub use record::{RecordError, Student, REMARK_LEN};

/// Configuration for a resource pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of idle objects retained; `None` keeps everything
    pub max_idle: Option<usize>,
}

/// Counters describing how a pool has been used
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects built by the factory
    pub created: u64,

    /// Acquisitions served from the idle set
    pub reused: u64,

    /// Objects returned to the idle set
    pub released: u64,

    /// Objects dropped instead of being kept (idle cap, shrink, clear)
    pub discarded: u64,
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// A pool of reusable objects of one type
pub struct ResourcePool<T> {
    /// Idle objects, most recently released last
    idle: Mutex<Vec<T>>,

    /// Builds a new object when the idle set is empty
    factory: Factory<T>,

    /// Configuration for this pool
    config: PoolConfig,

    created: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

impl<T: Send> ResourcePool<T> {
    /// Create an unbounded pool that builds objects with `factory`
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_config(factory, PoolConfig::default())
    }

    /// Create a pool with the given configuration
    pub fn with_config<F>(factory: F, config: PoolConfig) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            idle: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            config,
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            released: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Take an idle object, or build a new one if none is idle.
    ///
    /// Never waits for another borrower. The object may hold state from its
    /// previous use.
    pub fn acquire(&self) -> T {
        // Factory runs outside the critical section
        let reused = self.idle.lock().pop();

        match reused {
            Some(object) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                trace!("Reusing pooled object");
                object
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                trace!("Pool empty, creating object");
                (self.factory)()
            }
        }
    }

    /// Return an object to the idle set.
    ///
    /// When the idle set is at `max_idle` the object is dropped instead.
    pub fn release(&self, object: T) {
        let rejected = {
            let mut idle = self.idle.lock();
            match self.config.max_idle {
                Some(max) if idle.len() >= max => Some(object),
                _ => {
                    idle.push(object);
                    None
                }
            }
        };

        match rejected {
            Some(object) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                trace!("Idle set full, discarding object");
                drop(object);
            }
            None => {
                self.released.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Borrow an object that goes back to the pool when the handle drops
    pub fn checkout(self: &Arc<Self>) -> PoolHandle<T> {
        PoolHandle {
            object: Some(self.acquire()),
            pool: Arc::downgrade(self),
        }
    }

    /// Drop idle objects until at most `keep` remain, returning how many were
    /// dropped
    pub fn shrink(&self, keep: usize) -> usize {
        let excess: Vec<T> = {
            let mut idle = self.idle.lock();
            let len = idle.len();
            if len <= keep {
                return 0;
            }
            // Keep the most recently released objects
            idle.drain(..len - keep).collect()
        };

        let dropped = excess.len();
        self.discarded.fetch_add(dropped as u64, Ordering::Relaxed);
        debug!("Shrunk pool by {} idle objects", dropped);
        dropped
    }

    /// Drop every idle object
    pub fn clear(&self) -> usize {
        self.shrink(0)
    }

    /// Number of idle objects
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Get the pool's configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get usage counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl<T> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("idle", &self.idle.lock().len())
            .field("config", &self.config)
            .finish()
    }
}

/// A borrowed object that returns to its pool when dropped.
///
/// If the pool has been dropped in the meantime the object is dropped too.
pub struct PoolHandle<T: Send> {
    /// Always `Some` until the handle is consumed
    object: Option<T>,

    /// The pool this object came from
    pool: Weak<ResourcePool<T>>,
}

impl<T: Send> PoolHandle<T> {
    /// Keep the object and forget the pool
    pub fn detach(mut self) -> T {
        self.object.take().expect("pooled object missing")
    }

    /// Return the object to the pool now
    pub fn release(self) {
        drop(self);
    }
}

impl<T: Send> Deref for PoolHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.object.as_ref().expect("pooled object missing")
    }
}

impl<T: Send> DerefMut for PoolHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.object.as_mut().expect("pooled object missing")
    }
}

impl<T: Send> Drop for PoolHandle<T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            match self.pool.upgrade() {
                Some(pool) => pool.release(object),
                None => trace!("Pool gone, dropping object"),
            }
        }
    }
}

impl<T: Send + fmt::Debug> fmt::Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PoolHandle").field(&self.object).finish()
    }
}
