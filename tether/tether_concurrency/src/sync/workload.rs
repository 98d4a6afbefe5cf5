//! Reader/writer workload for comparing lock disciplines.
//!
//! Readers inspect and writers bump a shared [`Counter`], each holding the
//! lock for a fixed time to model work done inside the critical section.
//! With mostly readers, the shared discipline finishes in roughly the time of
//! the longest reader; the exclusive discipline takes the sum. With mostly
//! writers the two converge.

use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use super::lock::{ContentionLock, Lock, LockDiscipline};

/// The shared state a workload contends on
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Number of writes applied
    pub count: u64,
}

/// Shape of a contention workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Discipline of the lock built by [`run_configured`]
    pub discipline: LockDiscipline,

    /// Number of reader threads
    pub readers: usize,

    /// Number of writer threads
    pub writers: usize,

    /// Accesses performed by each thread
    pub ops_per_thread: usize,

    /// Time each access holds the lock (microseconds)
    pub hold_time_us: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            discipline: LockDiscipline::Shared,
            readers: 9,
            writers: 1,
            ops_per_thread: 100,
            hold_time_us: 100,
        }
    }
}

impl WorkloadConfig {
    /// Time each access holds the lock
    pub fn hold_time(&self) -> Duration {
        Duration::from_micros(self.hold_time_us)
    }
}

/// Result of running a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadReport {
    /// Discipline of the lock under test
    pub discipline: LockDiscipline,

    /// Wall time from the common start until the last thread finished
    pub elapsed: Duration,

    /// Completed read accesses
    pub reads: u64,

    /// Completed write accesses
    pub writes: u64,

    /// Counter value observed after all threads finished
    pub final_count: u64,

    /// Longest wait for a read slot (microseconds)
    pub max_read_wait_us: u64,

    /// Longest wait for a write slot (microseconds)
    pub max_write_wait_us: u64,
}

/// Run the workload against `lock` and report how long it took.
///
/// All threads start together behind a barrier. The lock's counter is read
/// once more after every thread has joined.
pub fn run<L>(lock: &L, config: &WorkloadConfig) -> WorkloadReport
where
    L: ContentionLock<Counter> + Sync,
{
    let hold_time = config.hold_time();
    let threads = config.readers + config.writers;
    let barrier = Barrier::new(threads + 1);

    debug!(
        "Running {} workload: {} readers, {} writers, {} ops each",
        lock.discipline(),
        config.readers,
        config.writers,
        config.ops_per_thread
    );

    let start = thread::scope(|scope| {
        for _ in 0..config.readers {
            scope.spawn(|| {
                barrier.wait();
                for _ in 0..config.ops_per_thread {
                    lock.read(|counter| {
                        let _ = counter.count;
                        hold(hold_time);
                    });
                }
            });
        }

        for _ in 0..config.writers {
            scope.spawn(|| {
                barrier.wait();
                for _ in 0..config.ops_per_thread {
                    lock.write(|counter| {
                        counter.count += 1;
                        hold(hold_time);
                    });
                }
            });
        }

        barrier.wait();
        Instant::now()
    });
    let elapsed = start.elapsed();

    WorkloadReport {
        discipline: lock.discipline(),
        elapsed,
        reads: (config.readers * config.ops_per_thread) as u64,
        writes: (config.writers * config.ops_per_thread) as u64,
        final_count: lock.read(|counter| counter.count),
        max_read_wait_us: lock.read_stats().max_wait_time_us,
        max_write_wait_us: lock.write_stats().max_wait_time_us,
    }
}

/// Build a fresh lock of the configured discipline and run the workload
/// against it.
pub fn run_configured(config: &WorkloadConfig) -> WorkloadReport {
    let lock = Lock::with_name(config.discipline, Counter::default(), config.discipline.as_str());
    run(&lock, config)
}

fn hold(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::lock::{ExclusiveLock, Lock, SharedLock};

    fn read_only(readers: usize, hold_time_us: u64) -> WorkloadConfig {
        WorkloadConfig {
            readers,
            writers: 0,
            ops_per_thread: 1,
            hold_time_us,
            ..Default::default()
        }
    }

    #[test]
    fn test_shared_reads_overlap() {
        let lock = SharedLock::new(Counter::default());
        let report = run(&lock, &read_only(5, 50_000));

        // Five 50ms reads in parallel take about one read, not five
        assert!(
            report.elapsed < Duration::from_millis(200),
            "elapsed {:?}",
            report.elapsed
        );
        assert_eq!(report.reads, 5);
        assert_eq!(report.discipline, LockDiscipline::Shared);
    }

    #[test]
    fn test_exclusive_reads_serialize() {
        let lock = ExclusiveLock::new(Counter::default());
        let report = run(&lock, &read_only(5, 50_000));

        assert!(
            report.elapsed >= Duration::from_millis(250),
            "elapsed {:?}",
            report.elapsed
        );
        assert_eq!(report.discipline, LockDiscipline::Exclusive);
    }

    #[test]
    fn test_writes_are_all_applied() {
        let config = WorkloadConfig {
            readers: 4,
            writers: 4,
            ops_per_thread: 25,
            hold_time_us: 0,
            ..Default::default()
        };

        for discipline in [LockDiscipline::Exclusive, LockDiscipline::Shared] {
            let lock = Lock::new(discipline, Counter::default());
            let report = run(&lock, &config);

            assert_eq!(report.writes, 100);
            assert_eq!(report.final_count, 100);
            assert_eq!(lock.write_stats().acquisition_count, 100);
        }
    }

    #[test]
    fn test_run_configured_uses_configured_discipline() {
        for discipline in [LockDiscipline::Exclusive, LockDiscipline::Shared] {
            let config = WorkloadConfig {
                discipline,
                readers: 2,
                writers: 2,
                ops_per_thread: 10,
                hold_time_us: 0,
            };

            let report = run_configured(&config);

            assert_eq!(report.discipline, discipline);
            assert_eq!(report.final_count, 20);
        }
    }
}
