//! Parked channel operations
//!
//! A blocked send, receive or select registers one [`Waiter`] on every
//! channel it is waiting for. Whichever partner reaches it first writes the
//! outcome; later partners find it no longer pending and discard their
//! stale entry. Locks are always taken channel first, then waiter; when two
//! waiters must be held together they are locked in address order.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Instant;

/// How a parked operation was resolved
pub(crate) enum Outcome<T> {
    /// Nobody has completed the operation yet
    Pending,
    /// Send case `case` handed its value over
    Sent { case: usize },
    /// Receive case `case` got a value
    Received { case: usize, value: T },
    /// Receive case `case` observed a closed, drained channel
    RecvClosed { case: usize },
    /// Send case `case` failed because its channel closed; the value is returned
    SendClosed { case: usize, value: T },
    /// Timed out, or the outcome was already consumed by the owner
    Aborted,
}

impl<T> Outcome<T> {
    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

/// One blocked thread's rendezvous point
pub(crate) struct Waiter<T> {
    slot: Mutex<Outcome<T>>,
    ready: Condvar,
}

impl<T> Waiter<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Outcome::Pending),
            ready: Condvar::new(),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Outcome<T>> {
        self.slot.lock()
    }

    /// Resolve the waiter if nobody else has; returns false if it was stale
    pub(crate) fn fire(&self, outcome: Outcome<T>) -> bool {
        let mut slot = self.slot.lock();
        if !slot.is_pending() {
            return false;
        }
        *slot = outcome;
        self.ready.notify_one();
        true
    }

    /// Hand `value` to a parked receive, or get it back if the waiter is stale
    pub(crate) fn deliver(&self, case: usize, value: T) -> Result<(), T> {
        let mut slot = self.slot.lock();
        if !slot.is_pending() {
            return Err(value);
        }
        *slot = Outcome::Received { case, value };
        self.ready.notify_one();
        Ok(())
    }

    /// Wake the owner after its slot was written through [`lock_pair`]
    pub(crate) fn notify(&self) {
        self.ready.notify_one();
    }

    /// Block until resolved and take the outcome
    pub(crate) fn wait(&self) -> Outcome<T> {
        let mut slot = self.slot.lock();
        while slot.is_pending() {
            self.ready.wait(&mut slot);
        }
        std::mem::replace(&mut *slot, Outcome::Aborted)
    }

    /// Block until resolved or `deadline`; a timeout yields `Aborted`
    pub(crate) fn wait_until(&self, deadline: Instant) -> Outcome<T> {
        let mut slot = self.slot.lock();
        while slot.is_pending() {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        // Still pending means timed out; Aborted marks the entries stale.
        std::mem::replace(&mut *slot, Outcome::Aborted)
    }

    pub(crate) fn is(&self, other: &Waiter<T>) -> bool {
        std::ptr::eq(self, other)
    }
}

/// Lock a partner's slot together with our own, in address order.
///
/// Returns `(partner, mine)`. The two waiters must be distinct.
pub(crate) fn lock_pair<'a, T>(
    partner: &'a Waiter<T>,
    mine: &'a Waiter<T>,
) -> (MutexGuard<'a, Outcome<T>>, MutexGuard<'a, Outcome<T>>) {
    debug_assert!(!partner.is(mine));
    if (partner as *const Waiter<T>) < (mine as *const Waiter<T>) {
        let theirs = partner.lock();
        let ours = mine.lock();
        (theirs, ours)
    } else {
        let ours = mine.lock();
        let theirs = partner.lock();
        (theirs, ours)
    }
}
