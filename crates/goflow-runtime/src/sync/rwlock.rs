//! Reader-writer lock

use parking_lot::{Condvar, Mutex as ParkingLotMutex};
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

#[derive(Default)]
struct RwState {
    /// Outstanding read guards
    readers: usize,
    /// Whether a write guard is outstanding
    writer: bool,
    /// Threads blocked in `write`
    waiting_writers: usize,
}

/// Lock allowing many readers or one writer.
///
/// Writers are preferred: once a writer is waiting, new readers block until
/// it has had its turn, so a steady stream of readers cannot starve it. As a
/// consequence a thread that already holds a read guard must not take a
/// second one while a writer may be waiting.
pub struct RwLock<T: ?Sized> {
    state: ParkingLotMutex<RwState>,
    readable: Condvar,
    writable: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: the state flags allow either shared `&T` access by read guards or
// exclusive `&mut T` access by a single write guard, never both.
unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Create an unlocked lock
    pub fn new(value: T) -> Self {
        Self {
            state: ParkingLotMutex::new(RwState::default()),
            readable: Condvar::new(),
            writable: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the lock and return the protected value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Block until no writer holds or waits for the lock, then read
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let mut state = self.state.lock();
        while state.writer || state.waiting_writers > 0 {
            self.readable.wait(&mut state);
        }
        state.readers += 1;
        RwLockReadGuard { lock: self }
    }

    /// Read if no writer holds or waits for the lock
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.writer || state.waiting_writers > 0 {
            return None;
        }
        state.readers += 1;
        Some(RwLockReadGuard { lock: self })
    }

    /// Block until the lock is free, then write
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            self.writable.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = true;
        RwLockWriteGuard { lock: self }
    }

    /// Write if the lock is free
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.writer || state.readers > 0 {
            return None;
        }
        state.writer = true;
        Some(RwLockWriteGuard { lock: self })
    }

    /// Write, giving up after `timeout`
    pub fn write_timeout(&self, timeout: Duration) -> Option<RwLockWriteGuard<'_, T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            if self.writable.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.waiting_writers -= 1;
        if state.writer || state.readers > 0 {
            // Readers held back for this writer may go ahead now.
            if state.waiting_writers == 0 {
                self.readable.notify_all();
            }
            return None;
        }
        state.writer = true;
        Some(RwLockWriteGuard { lock: self })
    }

    /// Number of outstanding read guards
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers
    }

    /// Whether a write guard is outstanding
    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer
    }

    /// Mutable access without locking; the borrow checker proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn read_unlock(&self) {
        let mut state = self.state.lock();
        state.readers -= 1;
        if state.readers == 0 && state.waiting_writers > 0 {
            self.writable.notify_one();
        }
    }

    fn write_unlock(&self) {
        let mut state = self.state.lock();
        state.writer = false;
        if state.waiting_writers > 0 {
            self.writable.notify_one();
        } else {
            self.readable.notify_all();
        }
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> std::fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RwLock")
            .field("readers", &state.readers)
            .field("writer", &state.writer)
            .field("waiting_writers", &state.waiting_writers)
            .finish_non_exhaustive()
    }
}

/// Shared access guard returned by [`RwLock::read`]
#[must_use = "if unused the RwLock will immediately unlock"]
pub struct RwLockReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

// SAFETY: a read guard only hands out `&T`.
unsafe impl<T: ?Sized + Sync> Sync for RwLockReadGuard<'_, T> {}

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: no write guard exists while a read guard does.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

/// Exclusive access guard returned by [`RwLock::write`]
#[must_use = "if unused the RwLock will immediately unlock"]
pub struct RwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

// SAFETY: see `MutexGuard`.
unsafe impl<T: ?Sized + Sync> Sync for RwLockWriteGuard<'_, T> {}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the write guard is the only guard.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the write guard is the only guard.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.write_unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_many_readers_share() {
        let lock = RwLock::new(5);
        let a = lock.read();
        let b = lock.try_read().unwrap();
        assert_eq!(*a + *b, 10);
        assert_eq!(lock.reader_count(), 2);
        assert!(lock.try_write().is_none());
        drop((a, b));
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn test_writer_excludes_readers() {
        let lock = RwLock::new(String::new());
        let mut guard = lock.write();
        guard.push_str("written");
        assert!(lock.is_write_locked());
        assert!(lock.try_read().is_none());
        drop(guard);
        assert_eq!(&*lock.read(), "written");
    }

    #[test]
    fn test_waiting_writer_blocks_new_readers() {
        let lock = Arc::new(RwLock::new(0));
        let reader = lock.read();

        let writer_lock = lock.clone();
        let writer = thread::spawn(move || {
            *writer_lock.write() += 1;
        });
        while lock.state.lock().waiting_writers == 0 {
            thread::yield_now();
        }
        assert!(lock.try_read().is_none());

        drop(reader);
        writer.join().unwrap();
        assert_eq!(*lock.read(), 1);
    }

    #[test]
    fn test_write_timeout_releases_readers() {
        let lock = RwLock::new(());
        let _reader = lock.read();
        assert!(lock.write_timeout(Duration::from_millis(20)).is_none());
        assert!(lock.try_read().is_some());
    }

    #[test]
    fn test_readers_and_writers_stress() {
        let lock = Arc::new(RwLock::new(0u64));
        let reads = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    *lock.write() += 1;
                }
            }));
        }
        for _ in 0..4 {
            let lock = lock.clone();
            let reads = reads.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let value = *lock.read();
                    assert!(value <= 200);
                    reads.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.read(), 200);
        assert_eq!(reads.load(Ordering::Relaxed), 800);
    }

    #[test]
    fn test_into_inner_and_get_mut() {
        let mut lock = RwLock::new(vec![1]);
        lock.get_mut().push(2);
        assert_eq!(lock.into_inner(), vec![1, 2]);
    }
}
