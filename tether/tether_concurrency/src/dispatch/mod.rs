//! Where background work runs.
//!
//! The [`Dispatch`] trait is the seam between code that has work to start and
//! the threads that run it. Two implementations ship with the crate:
//!
//! - [`ThreadDispatcher`] gives every job its own named OS thread, so live
//!   jobs never wait behind each other.
//! - [`WorkerPool`] queues jobs for a fixed set of workers, which caps how
//!   many run at once.

pub mod worker;

use log::trace;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolStats};

/// A unit of background work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Error when handing a job to a dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The dispatcher no longer accepts work
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// The job queue is full
    #[error("dispatch queue is full")]
    QueueFull,

    /// The dispatcher was configured with unusable values
    #[error("invalid dispatcher configuration: {0}")]
    InvalidConfig(String),

    /// The operating system refused to start a thread
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Starts jobs somewhere other than the calling thread
pub trait Dispatch: Send + Sync {
    /// Start `job`, or hand it back to the caller as an error.
    ///
    /// On error the job has been dropped without running.
    fn dispatch(&self, job: Job) -> Result<(), DispatchError>;
}

impl<D: Dispatch + ?Sized> Dispatch for Arc<D> {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        (**self).dispatch(job)
    }
}

/// Runs every job on a fresh, detached OS thread
#[derive(Debug)]
pub struct ThreadDispatcher {
    /// Name prefix for spawned threads
    prefix: String,

    /// Stack size for spawned threads, or the platform default
    stack_size: Option<usize>,

    /// Suffix for the next thread name
    next_id: AtomicUsize,
}

impl ThreadDispatcher {
    /// Create a dispatcher naming its threads `{prefix}-{n}`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            stack_size: None,
            next_id: AtomicUsize::new(0),
        }
    }

    /// Set the stack size of spawned threads
    pub fn with_stack_size(mut self, stack_size: Option<usize>) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Number of threads spawned so far
    pub fn spawned(&self) -> usize {
        self.next_id.load(Ordering::Relaxed)
    }
}

impl Default for ThreadDispatcher {
    fn default() -> Self {
        Self::new("tether-task")
    }
}

impl Dispatch for ThreadDispatcher {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.prefix, id);

        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        trace!("Spawning thread {}-{}", self.prefix, id);
        // Detached: the job owns everything it needs
        builder.spawn(job)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    #[test]
    fn test_thread_dispatcher_names_threads() {
        let dispatcher = ThreadDispatcher::new("unit");
        let (tx, rx) = bounded(2);

        for _ in 0..2 {
            let tx = tx.clone();
            dispatcher
                .dispatch(Box::new(move || {
                    let name = thread::current().name().map(str::to_owned);
                    let _ = tx.send(name);
                }))
                .unwrap();
        }

        let mut names: Vec<_> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        names.sort();

        assert_eq!(
            names,
            vec![Some("unit-0".to_string()), Some("unit-1".to_string())]
        );
        assert_eq!(dispatcher.spawned(), 2);
    }

    #[test]
    fn test_dispatch_through_arc() {
        let dispatcher: Arc<dyn Dispatch> = Arc::new(ThreadDispatcher::default());
        let (tx, rx) = bounded(1);

        dispatcher
            .dispatch(Box::new(move || {
                let _ = tx.send(7);
            }))
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
    }
}
