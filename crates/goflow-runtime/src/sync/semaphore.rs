//! Counting semaphore with blocking acquire

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Errors that can occur when using a Semaphore
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SemaphoreError {
    /// Requested more permits than the semaphore can ever hold
    #[error("Invalid permit count: {0}")]
    InvalidCount(usize),
}

struct SemaphoreState {
    /// Permits currently available
    permits: usize,
    /// Threads blocked in acquire
    waiting: usize,
}

/// Counting semaphore.
///
/// A semaphore maintains a count of available permits. Callers acquire
/// permits (decrementing the count) and release them (incrementing it).
/// When not enough permits are available, `acquire` blocks the calling
/// thread until a release makes room.
///
/// Used for admission control: a limited [`Group`](crate::Group) and the
/// bounded scheduler both hand out one permit per in-flight task.
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    available: Condvar,
    max_permits: usize,
}

impl Semaphore {
    /// Create a new semaphore with the given number of permits
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                permits,
                waiting: 0,
            }),
            available: Condvar::new(),
            max_permits: permits,
        }
    }

    /// Current number of available permits
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    /// Maximum number of permits (capacity)
    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Number of threads blocked waiting for permits
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting
    }

    /// Acquire `count` permits, blocking until they are available
    pub fn acquire(&self, count: usize) -> Result<(), SemaphoreError> {
        self.check_count(count)?;
        let mut state = self.state.lock();
        if state.permits < count {
            state.waiting += 1;
            while state.permits < count {
                self.available.wait(&mut state);
            }
            state.waiting -= 1;
        }
        state.permits -= count;
        Ok(())
    }

    /// Acquire `count` permits without blocking
    ///
    /// Returns true if the permits were taken.
    pub fn try_acquire(&self, count: usize) -> Result<bool, SemaphoreError> {
        self.check_count(count)?;
        let mut state = self.state.lock();
        if state.permits >= count {
            state.permits -= count;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Acquire `count` permits, giving up after `timeout`
    pub fn acquire_timeout(&self, count: usize, timeout: Duration) -> Result<bool, SemaphoreError> {
        self.check_count(count)?;
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if state.permits < count {
            state.waiting += 1;
            while state.permits < count {
                if self.available.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            state.waiting -= 1;
            if state.permits < count {
                return Ok(false);
            }
        }
        state.permits -= count;
        Ok(true)
    }

    /// Acquire one permit that is returned when the guard drops
    pub fn acquire_owned(self: &Arc<Self>) -> OwnedPermit {
        // A single permit is always within capacity for a non-empty semaphore.
        let mut state = self.state.lock();
        state.waiting += 1;
        while state.permits == 0 {
            self.available.wait(&mut state);
        }
        state.waiting -= 1;
        state.permits -= 1;
        drop(state);
        OwnedPermit {
            semaphore: Arc::clone(self),
        }
    }

    /// Release `count` permits, waking blocked acquirers
    ///
    /// The count never exceeds the initial capacity.
    pub fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.permits = (state.permits + count).min(self.max_permits);
        if state.waiting > 0 {
            self.available.notify_all();
        }
    }

    fn check_count(&self, count: usize) -> Result<(), SemaphoreError> {
        if count > self.max_permits {
            Err(SemaphoreError::InvalidCount(count))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("permits", &state.permits)
            .field("max_permits", &self.max_permits)
            .field("waiting", &state.waiting)
            .finish()
    }
}

/// One permit held until drop
#[must_use = "the permit is released as soon as it is dropped"]
pub struct OwnedPermit {
    semaphore: Arc<Semaphore>,
}

impl Drop for OwnedPermit {
    fn drop(&mut self) {
        self.semaphore.release(1);
    }
}
