//! One-time initialization

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnceState {
    New,
    Running,
    Done,
}

/// Runs a function exactly once across all callers.
///
/// Concurrent callers block until the first call has returned. A call that
/// panics still counts: later callers return immediately without running
/// their function.
pub struct Once {
    done: AtomicBool,
    state: Mutex<OnceState>,
    finished: Condvar,
}

impl Default for Once {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks the Once as done even if the function unwinds
struct Finish<'a> {
    once: &'a Once,
}

impl Drop for Finish<'_> {
    fn drop(&mut self) {
        let mut state = self.once.state.lock();
        *state = OnceState::Done;
        self.once.done.store(true, Ordering::Release);
        self.once.finished.notify_all();
    }
}

impl Once {
    /// A Once whose function has not run
    pub fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            state: Mutex::new(OnceState::New),
            finished: Condvar::new(),
        }
    }

    /// Run `f` if no call has run yet; otherwise wait for that call to end.
    ///
    /// Returns true if this call ran `f`.
    pub fn call_once(&self, f: impl FnOnce()) -> bool {
        if self.done.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut state = self.state.lock();
            match *state {
                OnceState::Done => return false,
                OnceState::Running => {
                    while *state != OnceState::Done {
                        self.finished.wait(&mut state);
                    }
                    return false;
                }
                OnceState::New => *state = OnceState::Running,
            }
        }
        let _finish = Finish { once: self };
        f();
        true
    }

    /// Whether a call has finished
    pub fn is_completed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Once {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Once")
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_runs_once_across_threads() {
        let once = Arc::new(Once::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let once = once.clone();
                let calls = calls.clone();
                thread::spawn(move || {
                    once.call_once(|| {
                        thread::sleep(Duration::from_millis(5));
                        calls.fetch_add(1, Ordering::SeqCst);
                    });
                    // Every caller returns only after the call finished.
                    assert_eq!(calls.load(Ordering::SeqCst), 1);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(once.is_completed());
    }

    #[test]
    fn test_reports_which_call_ran() {
        let once = Once::new();
        assert!(!once.is_completed());
        assert!(once.call_once(|| {}));
        assert!(!once.call_once(|| panic!("must not run")));
    }

    #[test]
    fn test_panicking_call_counts_as_done() {
        let once = Once::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            once.call_once(|| panic!("init failed"));
        }));
        assert!(result.is_err());
        assert!(once.is_completed());
        assert!(!once.call_once(|| panic!("must not run")));
    }
}
