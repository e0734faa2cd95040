//! Bookkeeping for fire-and-forget transform tasks.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Counts in-flight background tasks so shutdown can wait for them.
#[derive(Clone, Default)]
pub struct TaskTracker {
    inner: Arc<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    in_flight: Mutex<usize>,
    idle: Condvar,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task; it counts as finished once the guard drops.
    pub fn track(&self) -> TaskGuard {
        *self.inner.in_flight.lock() += 1;
        TaskGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.lock()
    }

    /// Blocks until no task is in flight or `timeout` elapses.
    /// Returns `true` if the tracker drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut in_flight = self.inner.in_flight.lock();
        while *in_flight > 0 {
            if self
                .inner
                .idle
                .wait_until(&mut in_flight, deadline)
                .timed_out()
            {
                return *in_flight == 0;
            }
        }
        true
    }
}

impl fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTracker")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

pub struct TaskGuard {
    inner: Arc<TrackerState>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.inner.idle.notify_all();
        }
    }
}

impl fmt::Debug for TaskGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn idle_tracker_returns_immediately() {
        assert!(TaskTracker::new().wait_idle(Duration::ZERO));
    }

    #[test]
    fn waits_for_outstanding_guards() {
        let tracker = TaskTracker::new();
        let guards: Vec<_> = (0..3).map(|_| tracker.track()).collect();
        assert_eq!(tracker.in_flight(), 3);

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guards);
        });
        assert!(tracker.wait_idle(Duration::from_secs(5)));
        assert_eq!(tracker.in_flight(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn gives_up_after_timeout() {
        let tracker = TaskTracker::new();
        let _stuck = tracker.track();
        let started = Instant::now();
        assert!(!tracker.wait_idle(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
