//! Timer thread for deadline-driven callbacks
//!
//! A single thread per scheduler waits for the earliest deadline using
//! condvar timeouts and runs the due callbacks. Callbacks must be short:
//! they deliver a value on a channel or hand a callable to the workers.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Work to do when a deadline passes
pub(crate) enum TimerAction {
    /// Run once, then forget
    Once(Box<dyn FnOnce() + Send>),
    /// Run every `period`; returning false cancels further runs
    Repeat {
        period: Duration,
        tick: Box<dyn FnMut() -> bool + Send>,
    },
}

/// Entry in the timer heap
struct TimerEntry {
    /// When to fire
    deadline: Instant,
    /// Insertion order, breaks ties between equal deadlines
    seq: u64,
    action: TimerAction,
}

// Reverse ordering for min-heap (earliest deadline first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

/// Timer thread state
struct TimerState {
    /// Pending entries, earliest deadline on top
    pending: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerState {
    fn push(&mut self, deadline: Instant, action: TimerAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(TimerEntry {
            deadline,
            seq,
            action,
        });
    }
}

/// Timer thread for deadline-driven callbacks
pub(crate) struct TimerThread {
    /// Internal state protected by mutex
    state: Mutex<TimerState>,
    /// Condvar to wake timer thread when an entry is added or on shutdown
    notify: Condvar,
    /// Shutdown signal
    shutdown: AtomicBool,
    /// Thread handle
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    /// Create a new timer thread
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState {
                pending: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Start the timer thread
    pub(crate) fn start(self: &Arc<Self>, name: String) -> std::io::Result<()> {
        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || timer.run_loop())?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop the timer thread and discard pending entries
    pub(crate) fn stop(&self) {
        if self.shutdown.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        let discarded = {
            let mut state = self.state.lock();
            self.notify.notify_one();
            std::mem::take(&mut state.pending)
        };
        log::debug!("timer stopping, {} entries discarded", discarded.len());
        drop(discarded);

        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Register an action to run at `deadline`
    pub(crate) fn schedule(&self, deadline: Instant, action: TimerAction) {
        let mut state = self.state.lock();
        if self.shutdown.load(AtomicOrdering::Acquire) {
            return;
        }
        state.push(deadline, action);
        // The new entry may be earlier than the one the thread is waiting on.
        self.notify.notify_one();
    }

    /// Number of pending entries
    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Timer thread main loop
    fn run_loop(&self) {
        let mut due = Vec::new();
        loop {
            let mut state = self.state.lock();

            // Checked under the lock so a stop() between iterations is not lost.
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let now = Instant::now();
            while state.pending.peek().is_some_and(|e| e.deadline <= now) {
                if let Some(entry) = state.pending.pop() {
                    due.push(entry);
                }
            }

            if due.is_empty() {
                match state.pending.peek().map(|e| e.deadline) {
                    Some(deadline) => {
                        self.notify.wait_until(&mut state, deadline);
                    }
                    None => self.notify.wait(&mut state),
                }
                continue;
            }

            drop(state);
            for entry in due.drain(..) {
                match entry.action {
                    TimerAction::Once(fire) => fire(),
                    TimerAction::Repeat { period, mut tick } => {
                        if tick() {
                            let next = entry.deadline + period;
                            let mut state = self.state.lock();
                            if !self.shutdown.load(AtomicOrdering::Acquire) {
                                state.push(next, TimerAction::Repeat { period, tick });
                            }
                        }
                    }
                }
            }
        }

        log::trace!("timer thread exiting");
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.stop();
    }
}
