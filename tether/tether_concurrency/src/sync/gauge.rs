//! Live-task accounting.
//!
//! A [`LiveGauge`] counts background tasks that are currently running. Each
//! task holds a [`GaugeGuard`] for its whole body; dropping the guard, even
//! while unwinding from a panic, marks the task as gone. A gauge that does
//! not return to zero once in-flight work drains is a leak.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::lock::update_max;

/// Point-in-time view of a [`LiveGauge`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GaugeSnapshot {
    /// Tasks currently live
    pub live: usize,

    /// Highest live count observed
    pub peak: usize,

    /// Tasks that have entered since creation
    pub entered: u64,

    /// Tasks that have exited since creation
    pub exited: u64,
}

/// Counter of live background tasks with peak tracking
#[derive(Debug, Default)]
pub struct LiveGauge {
    /// Tasks currently live
    live: AtomicUsize,

    /// Highest live count observed
    peak: AtomicUsize,

    /// Total entries
    entered: AtomicU64,

    /// Total exits
    exited: AtomicU64,

    /// Paired with `idle` to wake waiters when `live` drops to zero
    idle_lock: Mutex<()>,

    /// Notified whenever the gauge drains
    idle: Condvar,
}

impl LiveGauge {
    /// Create a new gauge
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared gauge
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Mark a task as live until the returned guard is dropped.
    pub fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.entered.fetch_add(1, Ordering::Relaxed);
        update_max(&self.peak, now);

        GaugeGuard {
            gauge: Arc::clone(self),
        }
    }

    /// Number of tasks currently live
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest live count observed since creation or the last reset
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Get a consistent-enough view of all counters
    pub fn snapshot(&self) -> GaugeSnapshot {
        GaugeSnapshot {
            live: self.live(),
            peak: self.peak(),
            entered: self.entered.load(Ordering::Relaxed),
            exited: self.exited.load(Ordering::Relaxed),
        }
    }

    /// Reset the peak to the current live count
    pub fn reset_peak(&self) {
        self.peak.store(self.live(), Ordering::Relaxed);
    }

    /// Block until no task is live, returning `false` if `timeout` elapses
    /// first.
    ///
    /// A timeout too large to express as a deadline (such as
    /// `Duration::MAX`) waits without one.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.idle_lock.lock();

        while self.live() > 0 {
            match deadline {
                Some(deadline) => {
                    if self.idle.wait_until(&mut guard, deadline).timed_out() {
                        return self.live() == 0;
                    }
                }
                None => self.idle.wait(&mut guard),
            }
        }

        true
    }

    fn exit(&self) {
        self.exited.fetch_add(1, Ordering::Relaxed);
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
    }
}

/// Keeps one task counted as live in a [`LiveGauge`]
#[derive(Debug)]
pub struct GaugeGuard {
    gauge: Arc<LiveGauge>,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_gauge_enter_and_exit() {
        let gauge = LiveGauge::shared();

        let first = gauge.enter();
        let second = gauge.enter();
        assert_eq!(gauge.live(), 2);

        drop(first);
        assert_eq!(gauge.live(), 1);
        drop(second);

        let snapshot = gauge.snapshot();
        assert_eq!(snapshot.live, 0);
        assert_eq!(snapshot.peak, 2);
        assert_eq!(snapshot.entered, 2);
        assert_eq!(snapshot.exited, 2);
    }

    #[test]
    fn test_gauge_guard_dropped_on_panic() {
        let gauge = LiveGauge::shared();

        let gauge_clone = Arc::clone(&gauge);
        let handle = thread::spawn(move || {
            let _guard = gauge_clone.enter();
            panic!("task failed");
        });

        assert!(handle.join().is_err());
        assert_eq!(gauge.live(), 0);
    }

    #[test]
    fn test_wait_idle_wakes_when_drained() {
        let gauge = LiveGauge::shared();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = gauge.enter();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(20));
                    drop(guard);
                })
            })
            .collect();

        assert!(gauge.wait_idle(Duration::from_secs(2)));
        assert_eq!(gauge.live(), 0);
        assert_eq!(gauge.peak(), 8);

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_wait_idle_times_out() {
        let gauge = LiveGauge::shared();
        let _guard = gauge.enter();

        let start = Instant::now();
        assert!(!gauge.wait_idle(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_idle_without_deadline() {
        let gauge = LiveGauge::shared();
        assert!(gauge.wait_idle(Duration::MAX));

        let guard = gauge.enter();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guard);
        });

        assert!(gauge.wait_idle(Duration::MAX));
        assert_eq!(gauge.live(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn test_reset_peak() {
        let gauge = LiveGauge::shared();
        let guard = gauge.enter();
        drop(gauge.enter());
        assert_eq!(gauge.peak(), 2);

        gauge.reset_peak();
        assert_eq!(gauge.peak(), 1);
        drop(guard);
    }
}
