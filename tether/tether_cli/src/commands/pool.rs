//! The `pool-bench` command

use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tether_concurrency::pool::{record, PoolStats, Student};
use tether_concurrency::{ResourcePool, ToolkitConfig};

use super::millis;

/// Arguments for the pool-bench command
#[derive(Args)]
pub struct PoolBenchArgs {
    /// Decodes per thread
    #[clap(long, default_value_t = 10_000)]
    iterations: usize,

    /// Number of decoding threads
    #[clap(long, default_value_t = 4)]
    threads: usize,
}

/// Implementation of the pool-bench command
pub fn execute(args: &PoolBenchArgs, toolkit: &ToolkitConfig) -> Result<()> {
    let input: Arc<[u8]> = Student::new("Geektutu", 25).encode()?.into();
    let threads = args.threads.max(1);

    let fresh = timed(threads, |_| {
        let input = Arc::clone(&input);
        let iterations = args.iterations;
        move || -> Result<()> {
            for _ in 0..iterations {
                let student = record::decode_fresh(&input)?;
                std::hint::black_box(&student);
            }
            Ok(())
        }
    })?;

    let pool = Arc::new(ResourcePool::with_config(
        Student::default,
        toolkit.pool.clone(),
    ));
    let pooled = timed(threads, |_| {
        let input = Arc::clone(&input);
        let pool = Arc::clone(&pool);
        let iterations = args.iterations;
        move || -> Result<()> {
            for _ in 0..iterations {
                let mut student = pool.checkout();
                record::decode_into(&mut student, &input)?;
                std::hint::black_box(&*student);
            }
            Ok(())
        }
    })?;

    let total = threads * args.iterations;
    println!("{} decodes on {} threads", total, threads);
    println!("fresh:  {} ({} per decode)", millis(fresh), per_op(fresh, total));
    println!("pooled: {} ({} per decode)", millis(pooled), per_op(pooled, total));

    let PoolStats {
        created,
        reused,
        released,
        discarded,
    } = pool.stats();
    println!(
        "pool: created {}  reused {}  released {}  discarded {}  idle {}",
        created,
        reused,
        released,
        discarded,
        pool.idle_count()
    );

    Ok(())
}

/// Run one job per thread, all started together, and time the slowest
fn timed<M, J>(threads: usize, mut make: M) -> Result<Duration>
where
    M: FnMut(usize) -> J,
    J: FnOnce() -> Result<()> + Send + 'static,
{
    let jobs: Vec<J> = (0..threads).map(&mut make).collect();

    let start = Instant::now();
    let handles: Vec<_> = jobs.into_iter().map(thread::spawn).collect();
    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("decode thread panicked"))??;
    }
    Ok(start.elapsed())
}

fn per_op(total: Duration, ops: usize) -> String {
    if ops == 0 {
        return "n/a".to_string();
    }
    format!("{:.2}us", total.as_nanos() as f64 / ops as f64 / 1000.0)
}
