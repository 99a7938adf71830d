//! Go-style WaitGroup

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counter that callers can block on until it drops to zero.
///
/// `add` registers outstanding work, `done` retires one unit, and `wait`
/// blocks until nothing is outstanding. This is the bulk-wait core of
/// [`Group`](crate::Group).
#[derive(Default)]
pub struct WaitGroup {
    count: Mutex<usize>,
    zero: Condvar,
}

impl WaitGroup {
    /// Create an empty WaitGroup
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n` units of outstanding work
    pub fn add(&self, n: usize) {
        *self.count.lock() += n;
    }

    /// Retire one unit of work
    ///
    /// # Panics
    ///
    /// Panics if the counter would go negative.
    pub fn done(&self) {
        let mut count = self.count.lock();
        assert!(*count > 0, "negative WaitGroup counter");
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Outstanding units
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Block until the counter reaches zero
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }

    /// Block until the counter reaches zero or `timeout` elapses
    ///
    /// Returns true if the counter reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.zero.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

impl std::fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitGroup").field("count", &self.count()).finish()
    }
}
