//! Scoped mutual-exclusion lock

use parking_lot::{Condvar, Mutex as ParkingLotMutex};
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct LockState {
    /// Whether a guard is outstanding
    locked: bool,
    /// Threads blocked in acquire
    waiting: usize,
}

/// Binary lock protecting a value of type `T`.
///
/// Acquisition returns a guard; the lock is released when the guard is
/// dropped (on every exit path, including unwinding) or explicitly through
/// [`MutexGuard::release`]. Ownership is not tied to the acquiring thread:
/// a guard may be moved to and released from another thread. The lock is
/// not reentrant; acquiring it twice from the same thread deadlocks.
pub struct Mutex<T: ?Sized> {
    state: ParkingLotMutex<LockState>,
    released: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by the `locked` flag; a guard is the
// only way to reach it and at most one guard exists at a time.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create a new unlocked mutex
    pub fn new(value: T) -> Self {
        Self {
            state: ParkingLotMutex::new(LockState {
                locked: false,
                waiting: 0,
            }),
            released: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the mutex and return the protected value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Block until the lock is free, then take it
    pub fn acquire(&self) -> MutexGuard<'_, T> {
        let mut state = self.state.lock();
        if state.locked {
            state.waiting += 1;
            while state.locked {
                self.released.wait(&mut state);
            }
            state.waiting -= 1;
        }
        state.locked = true;
        MutexGuard { mutex: self }
    }

    /// Take the lock if it is free
    pub fn try_acquire(&self) -> Option<MutexGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.locked {
            None
        } else {
            state.locked = true;
            Some(MutexGuard { mutex: self })
        }
    }

    /// Take the lock, giving up after `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if state.locked {
            state.waiting += 1;
            while state.locked {
                if self.released.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            state.waiting -= 1;
            if state.locked {
                return None;
            }
        }
        state.locked = true;
        Some(MutexGuard { mutex: self })
    }

    /// Run `f` with the lock held; the lock is released even if `f` panics
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.acquire();
        f(&mut guard)
    }

    /// Check if the mutex is locked
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Number of threads blocked in acquire
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting
    }

    /// Mutable access without locking; the borrow checker proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        state.locked = false;
        if state.waiting > 0 {
            self.released.notify_one();
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquire through an `Arc`, returning a guard that owns a reference
    pub fn acquire_owned(self: &Arc<Self>) -> OwnedMutexGuard<T> {
        std::mem::forget(self.acquire());
        OwnedMutexGuard {
            mutex: Arc::clone(self),
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mutex")
            .field("locked", &state.locked)
            .field("waiting", &state.waiting)
            .finish_non_exhaustive()
    }
}

/// RAII guard for Mutex (auto-unlocks on drop)
///
/// This guard ensures that a mutex is automatically unlocked when
/// the guard goes out of scope, even in the case of panics.
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

// SAFETY: releasing from another thread is allowed; the guard hands out
// `&mut T`, so moving it requires `T: Send`.
unsafe impl<T: ?Sized + Send> Send for MutexGuard<'_, T> {}
unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    /// Release the lock before the end of scope
    pub fn release(self) {
        drop(self);
    }

    /// The mutex this guard locks
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// RAII guard for `Arc<Mutex<T>>` (owned version)
///
/// This version owns an Arc to the mutex, so it can outlive the borrow it
/// was acquired through and be moved into spawned tasks.
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct OwnedMutexGuard<T: ?Sized> {
    mutex: Arc<Mutex<T>>,
}

// SAFETY: see `MutexGuard`.
unsafe impl<T: ?Sized + Send> Send for OwnedMutexGuard<T> {}
unsafe impl<T: ?Sized + Sync> Sync for OwnedMutexGuard<T> {}

impl<T: ?Sized> OwnedMutexGuard<T> {
    /// Release the lock before the end of scope
    pub fn release(self) {
        drop(self);
    }
}

impl<T: ?Sized> Deref for OwnedMutexGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for OwnedMutexGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for OwnedMutexGuard<T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
