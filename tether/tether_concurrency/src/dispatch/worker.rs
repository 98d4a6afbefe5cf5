//! Fixed-size worker pool with a bounded job queue.
//!
//! Workers block on the queue and leave once it is closed and empty, so
//! shutdown never abandons queued work and never polls a flag.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, trace};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::{Dispatch, DispatchError, Job};
use crate::sync::lock::update_max;

/// Statistics about the worker pool
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerPoolStats {
    /// Number of jobs queued
    pub jobs_queued: usize,

    /// Number of jobs that returned normally
    pub jobs_completed: usize,

    /// Number of jobs that panicked
    pub jobs_panicked: usize,

    /// Total job execution time (microseconds)
    pub total_execution_time_us: u64,

    /// Total time jobs spent queued (microseconds)
    pub total_queue_time_us: u64,

    /// Maximum job execution time (microseconds)
    pub max_execution_time_us: u64,
}

/// Configuration for the worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub threads: usize,

    /// Maximum number of queued jobs
    pub queue_size: usize,

    /// Name prefix for worker threads
    pub thread_name_prefix: String,

    /// Whether to collect timing statistics
    pub collect_stats: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            queue_size: 1000,
            thread_name_prefix: "tether-worker".to_string(),
            collect_stats: true,
        }
    }
}

/// Job with its enqueue time
struct Queued {
    job: Job,
    enqueued_at: Instant,
}

/// Counters shared between the pool and its workers
#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
    execution_time_us: AtomicUsize,
    queue_time_us: AtomicUsize,
    max_execution_time_us: AtomicUsize,
}

/// A fixed set of worker threads fed from a bounded queue
pub struct WorkerPool {
    /// Queue sender; taken on shutdown to close the queue
    sender: Mutex<Option<Sender<Queued>>>,

    /// Worker threads
    workers: Vec<JoinHandle<()>>,

    /// Set once shutdown begins
    shutting_down: AtomicBool,

    /// Shared statistics
    counters: Arc<Counters>,

    /// Configuration
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Create a pool of `threads` workers with the default queue size
    pub fn new(threads: usize) -> Result<Self, DispatchError> {
        Self::with_config(WorkerPoolConfig {
            threads,
            ..Default::default()
        })
    }

    /// Create a pool with the specified configuration
    pub fn with_config(config: WorkerPoolConfig) -> Result<Self, DispatchError> {
        if config.threads == 0 {
            return Err(DispatchError::InvalidConfig(
                "worker pool needs at least one thread".to_string(),
            ));
        }
        if config.queue_size == 0 {
            return Err(DispatchError::InvalidConfig(
                "worker pool queue size must be positive".to_string(),
            ));
        }

        let (sender, receiver) = bounded(config.queue_size);
        let counters = Arc::new(Counters::default());

        info!(
            "Creating worker pool with {} workers and queue size {}",
            config.threads, config.queue_size
        );

        let mut workers = Vec::with_capacity(config.threads);
        for id in 0..config.threads {
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            let collect_stats = config.collect_stats;

            // On failure the sender drops here, so workers already started exit
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, id))
                .spawn(move || worker_loop(id, receiver, counters, collect_stats))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers,
            shutting_down: AtomicBool::new(false),
            counters,
            config,
        })
    }

    fn sender(&self) -> Result<Sender<Queued>, DispatchError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(DispatchError::ShuttingDown);
        }
        self.sender.lock().clone().ok_or(DispatchError::ShuttingDown)
    }

    fn accepted(&self) {
        if self.config.collect_stats {
            self.counters.queued.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Queue a job without waiting for room
    pub fn execute<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_job(Box::new(f))
    }

    fn execute_job(&self, job: Job) -> Result<(), DispatchError> {
        let queued = Queued {
            job,
            enqueued_at: Instant::now(),
        };

        match self.sender()?.try_send(queued) {
            Ok(()) => {
                self.accepted();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(DispatchError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(DispatchError::ShuttingDown),
        }
    }

    /// Queue a job, waiting for room if the queue is full
    pub fn execute_blocking<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        let queued = Queued {
            job: Box::new(f),
            enqueued_at: Instant::now(),
        };

        match self.sender()?.send(queued) {
            Ok(()) => {
                self.accepted();
                Ok(())
            }
            Err(_) => Err(DispatchError::ShuttingDown),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> WorkerPoolStats {
        if !self.config.collect_stats {
            return WorkerPoolStats::default();
        }

        let c = &self.counters;
        WorkerPoolStats {
            jobs_queued: c.queued.load(Ordering::Relaxed),
            jobs_completed: c.completed.load(Ordering::Relaxed),
            jobs_panicked: c.panicked.load(Ordering::Relaxed),
            total_execution_time_us: c.execution_time_us.load(Ordering::Relaxed) as u64,
            total_queue_time_us: c.queue_time_us.load(Ordering::Relaxed) as u64,
            max_execution_time_us: c.max_execution_time_us.load(Ordering::Relaxed) as u64,
        }
    }

    /// Stop accepting jobs. Queued jobs still run.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down worker pool");
        // Workers see the queue close once it drains
        self.sender.lock().take();
    }

    /// Stop accepting jobs and wait for the workers to finish the queue
    pub fn shutdown_and_join(mut self) {
        self.shutdown();

        for worker in self.workers.drain(..) {
            if let Err(e) = worker.join() {
                error!("Worker thread panicked during shutdown: {:?}", e);
            }
        }

        info!("Worker pool shutdown complete");
    }

    /// Get the number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Check if the pool has stopped accepting jobs
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Get the configuration
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl Dispatch for WorkerPool {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        self.execute_job(job)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        debug!("Worker pool dropped; workers exit once the queue drains");
    }
}

fn worker_loop(id: usize, receiver: Receiver<Queued>, counters: Arc<Counters>, stats: bool) {
    debug!("Worker {}: Starting", id);

    // Ends when every sender is gone and the queue is empty
    for queued in receiver.iter() {
        let queue_time = queued.enqueued_at.elapsed();
        trace!(
            "Worker {}: Executing job (queue time: {:.2}ms)",
            id,
            queue_time.as_micros() as f64 / 1000.0
        );

        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(queued.job));
        let exec_time = start.elapsed();

        if stats {
            let exec_us = exec_time.as_micros() as usize;
            counters
                .queue_time_us
                .fetch_add(queue_time.as_micros() as usize, Ordering::Relaxed);
            counters
                .execution_time_us
                .fetch_add(exec_us, Ordering::Relaxed);
            update_max(&counters.max_execution_time_us, exec_us);
        }

        match result {
            Ok(()) => {
                trace!(
                    "Worker {}: Job completed in {:.2}ms",
                    id,
                    exec_time.as_micros() as f64 / 1000.0
                );
                if stats {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                let message = e
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| e.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("<unknown panic>");
                error!("Worker {}: Job panicked: {}", id, message);
                if stats {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    debug!("Worker {}: Queue closed, exiting", id);
}
