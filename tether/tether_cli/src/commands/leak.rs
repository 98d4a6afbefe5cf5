//! The `leak-check` command
//!
//! Starts many tasks that outlive their deadline, then waits for the live
//! task count to return to zero. A count stuck above zero means abandoned
//! tasks are blocked trying to report.

use anyhow::{bail, Result};
use clap::Args;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tether_concurrency::dispatch::{WorkerPool, WorkerPoolConfig};
use tether_concurrency::runner::{CompletionMode, RunnerConfig};
use tether_concurrency::{BoundedTaskRunner, Dispatch, RunError, ToolkitConfig};

use super::millis;

/// Arguments for the leak-check command
#[derive(Args)]
pub struct LeakCheckArgs {
    /// Number of runs
    #[clap(long, default_value_t = 1000)]
    runs: usize,

    /// Caller deadline per run, in milliseconds
    #[clap(long)]
    deadline_ms: Option<u64>,

    /// Time each task works before reporting, in milliseconds
    #[clap(long, default_value_t = 1000)]
    task_ms: u64,

    /// How tasks report (buffered or rendezvous)
    #[clap(long)]
    completion: Option<CompletionMode>,

    /// Run tasks on a worker pool of this many threads instead of one
    /// thread per task
    #[clap(long)]
    workers: Option<usize>,

    /// How long to wait for tasks to drain after the runs, in milliseconds
    #[clap(long, default_value_t = 10_000)]
    drain_ms: u64,
}

/// Implementation of the leak-check command
pub fn execute(args: &LeakCheckArgs, toolkit: &ToolkitConfig) -> Result<()> {
    let config = RunnerConfig {
        deadline_ms: args.deadline_ms.unwrap_or(1),
        completion: args.completion.unwrap_or(toolkit.runner.completion),
        ..toolkit.runner.clone()
    };
    let deadline = config.deadline();
    let task_time = Duration::from_millis(args.task_ms);

    let mut runner = BoundedTaskRunner::with_config(config);
    if let Some(threads) = args.workers {
        let pool = WorkerPool::with_config(WorkerPoolConfig {
            threads,
            queue_size: args.runs.max(1),
            ..toolkit.workers.clone()
        })?;
        let pool: Arc<dyn Dispatch> = Arc::new(pool);
        runner = runner.with_dispatcher(pool);
    }

    println!(
        "Running {} tasks of {} against a {} deadline ({} completion)",
        args.runs,
        millis(task_time),
        millis(deadline),
        runner.config().completion
    );

    let start = Instant::now();
    let mut rejected = 0usize;
    let mut first_rejection = None;
    for _ in 0..args.runs {
        // Other outcomes are tallied in the runner's stats
        if let Err(RunError::Dispatch(e)) = runner.run(move || thread::sleep(task_time), deadline) {
            rejected += 1;
            first_rejection.get_or_insert(e);
        }
    }
    let calls = start.elapsed();

    let stats = runner.stats();
    println!("All calls returned in {}", millis(calls));
    println!(
        "completed: {}  timed out: {}  cancelled: {}",
        stats.completed, stats.timed_out, stats.cancelled
    );
    println!("not started: {}", rejected);
    println!("peak live tasks: {}", runner.gauge().peak());

    let drained = runner.gauge().wait_idle(Duration::from_millis(args.drain_ms));
    let live = runner.gauge().live();
    println!("live tasks after drain: {}", live);
    println!("results abandoned: {}", runner.stats().abandoned);

    if !drained {
        bail!("{} tasks still live after {}ms", live, args.drain_ms);
    }
    if let Some(e) = first_rejection {
        bail!("{} of {} tasks could not be started: {}", rejected, args.runs, e);
    }

    println!("No leaked tasks");
    Ok(())
}
