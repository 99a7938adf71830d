//! Condition variable paired with [`Mutex`]

use super::mutex::{Mutex, MutexGuard};
use parking_lot::{Condvar, Mutex as ParkingLotMutex};

/// Ticket counters, in the order waiters arrived
#[derive(Default)]
struct Tickets {
    /// Next ticket to hand to a waiter
    next: u64,
    /// Waiters holding a ticket below this number have been woken
    notified: u64,
}

/// Lets tasks wait for a condition guarded by a [`Mutex`].
///
/// [`wait`](Self::wait) releases the guard, blocks until signalled and
/// takes the lock again before returning. [`signal`](Self::signal) wakes
/// the longest-waiting task and [`broadcast`](Self::broadcast) wakes all of
/// them. Signals sent while nobody waits are not remembered, so callers
/// re-check their condition in a loop (or use
/// [`wait_while`](Self::wait_while)).
#[derive(Default)]
pub struct Cond {
    tickets: ParkingLotMutex<Tickets>,
    woken: Condvar,
}

impl Cond {
    /// A condition variable with no waiters
    pub fn new() -> Self {
        Self::default()
    }

    /// Release `guard`, block until signalled, then re-acquire the lock
    pub fn wait<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex: &'a Mutex<T> = guard.mutex();
        let mut tickets = self.tickets.lock();
        // Taking the ticket before unlocking means a signal sent right after
        // the unlock still reaches this waiter.
        let ticket = tickets.next;
        tickets.next += 1;
        drop(guard);
        while tickets.notified <= ticket {
            self.woken.wait(&mut tickets);
        }
        drop(tickets);
        mutex.acquire()
    }

    /// Wait until `condition` returns false, re-checking after every wakeup
    pub fn wait_while<'a, T: ?Sized>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut condition: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        while condition(&mut guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// Wake the longest-waiting task, if any
    pub fn signal(&self) {
        let mut tickets = self.tickets.lock();
        if tickets.notified < tickets.next {
            tickets.notified += 1;
            // Only the holder of the oldest ticket proceeds; the rest re-check.
            self.woken.notify_all();
        }
    }

    /// Wake every waiting task
    pub fn broadcast(&self) {
        let mut tickets = self.tickets.lock();
        if tickets.notified < tickets.next {
            tickets.notified = tickets.next;
            self.woken.notify_all();
        }
    }

    /// Number of tasks currently blocked in `wait`
    pub fn waiting_count(&self) -> usize {
        let tickets = self.tickets.lock();
        (tickets.next - tickets.notified) as usize
    }
}

impl std::fmt::Debug for Cond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cond")
            .field("waiting", &self.waiting_count())
            .finish()
    }
}
