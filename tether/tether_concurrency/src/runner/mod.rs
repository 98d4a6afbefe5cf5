//! Deadline-bounded task execution.
//!
//! [`BoundedTaskRunner`] starts a task in the background and waits for its
//! result for at most a deadline. Whichever comes first, result or deadline,
//! decides the outcome; the other is ignored.
//!
//! Losing the race does not stop the task. It keeps running until it
//! finishes on its own, then reports through a [`Completion`] that never
//! blocks, so it always exits and its channel is always freed. Every task
//! is counted in a [`LiveGauge`] for its whole body, which makes leaks
//! observable.

pub mod completion;

use crossbeam_channel::{after, select, Receiver};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use completion::{Checkpoint, Completion, CompletionMode, Delivery};

use crate::dispatch::{Dispatch, DispatchError, Job, ThreadDispatcher};
use crate::sync::LiveGauge;

/// Error returned by a bounded run
#[derive(Error, Debug)]
pub enum RunError {
    /// The deadline passed before the task reported
    #[error("task timed out after {0:?}")]
    TimedOut(Duration),

    /// The task ended without reporting a result
    #[error("task ended without reporting a result")]
    Cancelled,

    /// The task could not be started
    #[error("failed to dispatch task: {0}")]
    Dispatch(#[from] DispatchError),
}

/// How a bounded wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<R> {
    /// The task reported in time
    Completed(R),

    /// The deadline passed first
    TimedOut,

    /// The task ended without reporting
    Cancelled,
}

impl<R> Outcome<R> {
    /// Whether the task reported in time
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    /// Whether the deadline passed first
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut)
    }

    /// Convert into a `Result`, naming `deadline` in a timeout error
    pub fn into_result(self, deadline: Duration) -> Result<R, RunError> {
        match self {
            Outcome::Completed(value) => Ok(value),
            Outcome::TimedOut => Err(RunError::TimedOut(deadline)),
            Outcome::Cancelled => Err(RunError::Cancelled),
        }
    }
}

/// Configuration for a bounded task runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Deadline used by `run_default` (milliseconds)
    pub deadline_ms: u64,

    /// How tasks report their results
    pub completion: CompletionMode,

    /// Name prefix for task threads
    pub thread_name_prefix: String,

    /// Stack size for task threads, or the platform default
    pub stack_size: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 1000,
            completion: CompletionMode::Buffered,
            thread_name_prefix: "tether-task".to_string(),
            stack_size: None,
        }
    }
}

impl RunnerConfig {
    /// Default deadline
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Counters describing how runs have ended
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunnerStats {
    /// Tasks started
    pub dispatched: u64,

    /// Runs that returned a result
    pub completed: u64,

    /// Runs that hit their deadline
    pub timed_out: u64,

    /// Runs whose task ended without a result
    pub cancelled: u64,

    /// Task reports that found nobody waiting
    pub abandoned: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    abandoned: Arc<AtomicU64>,
}

/// Runs tasks in the background and waits for them up to a deadline
pub struct BoundedTaskRunner {
    /// Where tasks run
    dispatcher: Arc<dyn Dispatch>,

    /// Live-task accounting
    gauge: Arc<LiveGauge>,

    /// Configuration
    config: RunnerConfig,

    /// Outcome counters
    counters: Counters,
}

impl BoundedTaskRunner {
    /// Create a runner with the default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a runner that starts one thread per task
    pub fn with_config(config: RunnerConfig) -> Self {
        let dispatcher = ThreadDispatcher::new(config.thread_name_prefix.clone())
            .with_stack_size(config.stack_size);

        Self {
            dispatcher: Arc::new(dispatcher),
            gauge: LiveGauge::shared(),
            config,
            counters: Counters::default(),
        }
    }

    /// Run tasks through `dispatcher` instead
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatch>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Count live tasks in `gauge` instead of a private one
    pub fn with_gauge(mut self, gauge: Arc<LiveGauge>) -> Self {
        self.gauge = gauge;
        self
    }

    /// Gauge counting this runner's live tasks
    pub fn gauge(&self) -> &Arc<LiveGauge> {
        &self.gauge
    }

    /// Get the configuration
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `task`, waiting at most `deadline` for its result
    pub fn run<F, R>(&self, task: F, deadline: Duration) -> Result<R, RunError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.run_outcome(task, deadline)?.into_result(deadline)
    }

    /// Run `task` with the configured deadline
    pub fn run_default<F, R>(&self, task: F) -> Result<R, RunError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.run(task, self.config.deadline())
    }

    /// Run `task`, waiting at most `deadline`, and report how the wait ended
    pub fn run_outcome<F, R>(&self, task: F, deadline: Duration) -> Result<Outcome<R>, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.run_reporting(
            move |completion| {
                completion.deliver(task());
            },
            deadline,
        )
    }

    /// Run a task that reports through its own [`Completion`].
    ///
    /// The task may deliver from anywhere, including another thread it hands
    /// the completion to. Dropping the completion without delivering ends the
    /// run as [`Outcome::Cancelled`].
    pub fn run_reporting<F, R>(&self, task: F, deadline: Duration) -> Result<Outcome<R>, DispatchError>
    where
        F: FnOnce(Completion<R>) + Send + 'static,
        R: Send + 'static,
    {
        let (completion, receiver) =
            completion::channel(self.config.completion, &self.counters.abandoned);

        self.spawn(move || task(completion))?;

        let outcome = wait(&receiver, deadline);
        self.record(&outcome, deadline);
        Ok(outcome)
    }

    /// Run a two-stage task, bounding only its first stage.
    ///
    /// The task receives a [`Checkpoint`] to reach when its first stage is
    /// done. The caller waits up to `deadline` for the checkpoint; once it is
    /// seen, the caller waits for the final result with no deadline. A task
    /// that drops its checkpoint without reaching it is treated as having
    /// passed it.
    ///
    /// After a timeout, whatever the task does next is not observed.
    pub fn run_two_phase<F, R>(&self, task: F, deadline: Duration) -> Result<R, RunError>
    where
        F: FnOnce(Checkpoint) -> R + Send + 'static,
        R: Send + 'static,
    {
        let abandoned = &self.counters.abandoned;
        let (checkpoint, reached) = completion::checkpoint(self.config.completion, abandoned);
        // The caller may not be parked on the final channel yet when it fires
        let (completion, receiver) = completion::channel(CompletionMode::Buffered, abandoned);

        self.spawn(move || {
            let value = task(checkpoint);
            completion.deliver(value);
        })?;

        let outcome = match wait(&reached, deadline) {
            Outcome::TimedOut => Outcome::TimedOut,
            Outcome::Completed(()) | Outcome::Cancelled => match receiver.recv() {
                Ok(value) => Outcome::Completed(value),
                Err(_) => Outcome::Cancelled,
            },
        };

        self.record(&outcome, deadline);
        outcome.into_result(deadline)
    }

    /// Get outcome counters
    pub fn stats(&self) -> RunnerStats {
        let c = &self.counters;
        RunnerStats {
            dispatched: c.dispatched.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
        }
    }

    fn spawn<F>(&self, body: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        // Taken before dispatch so a task is never live but uncounted
        let guard = self.gauge.enter();

        let job: Job = Box::new(move || {
            let _guard = guard;
            if let Err(e) = panic::catch_unwind(AssertUnwindSafe(body)) {
                warn!("Task panicked: {}", panic_message(&*e));
            }
        });

        // A rejected job is dropped here, releasing its gauge guard
        self.dispatcher.dispatch(job)?;
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn record<R>(&self, outcome: &Outcome<R>, deadline: Duration) {
        let c = &self.counters;
        match outcome {
            Outcome::Completed(_) => {
                c.completed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::TimedOut => {
                c.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Task timed out after {:.2}ms",
                    deadline.as_micros() as f64 / 1000.0
                );
            }
            Outcome::Cancelled => {
                c.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!("Task ended without reporting");
            }
        }
    }
}

impl Default for BoundedTaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Race `receiver` against a timer that starts now
fn wait<R>(receiver: &Receiver<R>, deadline: Duration) -> Outcome<R> {
    select! {
        recv(receiver) -> msg => match msg {
            Ok(value) => Outcome::Completed(value),
            Err(_) => Outcome::Cancelled,
        },
        recv(after(deadline)) -> _ => Outcome::TimedOut,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<unknown panic>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::WorkerPool;
    use crate::sync::lock::update_max;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_run_completes() {
        let runner = BoundedTaskRunner::new();
        let value = runner.run(|| 6 * 7, Duration::from_secs(1)).unwrap();

        assert_eq!(value, 42);
        assert!(runner.gauge().wait_idle(Duration::from_secs(1)));
        assert_eq!(runner.stats().completed, 1);
    }

    #[test]
    fn test_run_times_out_promptly() {
        let runner = BoundedTaskRunner::new();

        let start = Instant::now();
        let result = runner.run(
            || thread::sleep(Duration::from_millis(300)),
            Duration::from_millis(10),
        );

        assert!(matches!(result, Err(RunError::TimedOut(d)) if d == Duration::from_millis(10)));
        assert!(start.elapsed() < Duration::from_millis(200));

        // The abandoned task still finishes and leaves
        assert_eq!(runner.gauge().live(), 1);
        assert!(runner.gauge().wait_idle(Duration::from_secs(2)));

        let stats = runner.stats();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.abandoned, 1);
    }

    #[test]
    fn test_panicking_task_is_cancelled() {
        let runner = BoundedTaskRunner::new();
        let result = runner.run(|| -> u32 { panic!("boom") }, Duration::from_secs(1));

        assert!(matches!(result, Err(RunError::Cancelled)));
        assert!(runner.gauge().wait_idle(Duration::from_secs(1)));
        assert_eq!(runner.stats().cancelled, 1);
    }

    #[test]
    fn test_dropped_completion_is_cancelled() {
        let runner = BoundedTaskRunner::new();
        let outcome = runner
            .run_reporting(|completion: Completion<u8>| drop(completion), Duration::from_secs(1))
            .unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
    }

    #[test]
    fn test_rendezvous_late_result_is_dropped() {
        let runner = BoundedTaskRunner::with_config(RunnerConfig {
            completion: CompletionMode::Rendezvous,
            ..Default::default()
        });

        let outcome = runner
            .run_outcome(
                || {
                    thread::sleep(Duration::from_millis(50));
                    1
                },
                Duration::from_millis(5),
            )
            .unwrap();
        assert!(outcome.is_timed_out());

        // The task's report found nobody and did not block
        assert!(runner.gauge().wait_idle(Duration::from_secs(1)));
        assert_eq!(runner.stats().abandoned, 1);
    }

    #[test]
    fn test_two_phase_completes_after_checkpoint() {
        let runner = BoundedTaskRunner::new();

        let result = runner.run_two_phase(
            |checkpoint| {
                thread::sleep(Duration::from_millis(5));
                checkpoint.reach();
                // Second stage outlasts the deadline
                thread::sleep(Duration::from_millis(100));
                "done"
            },
            Duration::from_millis(50),
        );

        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn test_two_phase_times_out_before_checkpoint() {
        let runner = BoundedTaskRunner::new();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let result = runner.run_two_phase(
            move |checkpoint| {
                thread::sleep(Duration::from_millis(100));
                let _ = tx.send(checkpoint.reach());
            },
            Duration::from_millis(1),
        );

        assert!(matches!(result, Err(RunError::TimedOut(_))));
        // The task learns nobody is waiting
        assert!(!rx.recv_timeout(Duration::from_secs(1)).unwrap());
        assert!(runner.gauge().wait_idle(Duration::from_secs(1)));
    }

    #[test]
    fn test_two_phase_panic_in_second_stage() {
        let runner = BoundedTaskRunner::new();
        let result = runner.run_two_phase(
            |checkpoint| -> u8 {
                checkpoint.reach();
                panic!("second stage failed");
            },
            Duration::from_secs(1),
        );

        assert!(matches!(result, Err(RunError::Cancelled)));
    }

    #[test]
    fn test_worker_pool_bounds_concurrency() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let runner = BoundedTaskRunner::new().with_dispatcher(pool.clone());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let result = runner.run(
                move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    update_max(&peak, now);
                    thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                },
                Duration::from_millis(1),
            );
            assert!(matches!(result, Err(RunError::TimedOut(_))));
        }

        assert!(runner.gauge().wait_idle(Duration::from_secs(2)));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(runner.stats().dispatched, 6);
    }

    #[test]
    fn test_dispatch_failure_releases_gauge() {
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        pool.shutdown();
        let runner = BoundedTaskRunner::new().with_dispatcher(pool);

        let result = runner.run(|| 1, Duration::from_secs(1));
        assert!(matches!(
            result,
            Err(RunError::Dispatch(DispatchError::ShuttingDown))
        ));
        assert_eq!(runner.gauge().live(), 0);
        assert_eq!(runner.stats().dispatched, 0);
    }

    #[test]
    fn test_run_default_uses_config() {
        let runner = BoundedTaskRunner::with_config(RunnerConfig {
            deadline_ms: 5,
            ..Default::default()
        });

        let result = runner.run_default(|| thread::sleep(Duration::from_millis(100)));
        assert!(matches!(result, Err(RunError::TimedOut(d)) if d == Duration::from_millis(5)));
    }
}
