//! Blocking channel with optional buffering

use super::waiter::{lock_pair, Outcome, Waiter};
use crate::error::{ChannelError, RecvTimeoutError, SendError, TryRecvError, TrySendError};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A parked sender and the value it is offering
pub(crate) struct SendEntry<T> {
    waiter: Arc<Waiter<T>>,
    case: usize,
    value: T,
}

/// A parked receiver
pub(crate) struct RecvEntry<T> {
    waiter: Arc<Waiter<T>>,
    case: usize,
}

/// Result of pairing our own waiter with a parked partner
pub(crate) enum Paired<T> {
    /// Both sides were resolved
    Matched,
    /// Our waiter was already resolved through another channel
    Preempted,
    /// No live partner; the offered value (if any) is handed back
    NoPartner(T),
}

/// Channel state guarded by one lock
pub(crate) struct State<T> {
    buffer: VecDeque<T>,
    capacity: Option<usize>,
    closed: bool,
    senders: VecDeque<SendEntry<T>>,
    receivers: VecDeque<RecvEntry<T>>,
}

impl<T> State<T> {
    fn has_room(&self) -> bool {
        match self.capacity {
            Some(cap) => self.buffer.len() < cap,
            None => true,
        }
    }

    /// Non-blocking send on behalf of a thread with no waiter
    pub(crate) fn try_send_now(&mut self, value: T) -> Result<(), TrySendError<T>> {
        if self.closed {
            return Err(TrySendError::Closed(value));
        }
        let value = match self.give_to_receiver(value) {
            Ok(()) => return Ok(()),
            Err(value) => value,
        };
        if self.has_room() {
            self.buffer.push_back(value);
            Ok(())
        } else {
            Err(TrySendError::Full(value))
        }
    }

    /// Non-blocking receive on behalf of a thread with no waiter
    pub(crate) fn try_recv_now(&mut self) -> Result<T, TryRecvError> {
        if let Some(value) = self.buffer.pop_front() {
            self.refill();
            return Ok(value);
        }
        if let Some(value) = self.take_from_sender() {
            return Ok(value);
        }
        if self.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Try to complete send case `case` of `mine` right now.
    ///
    /// On `Matched` the outcome is already written into `mine`.
    pub(crate) fn send_for(&mut self, mine: &Waiter<T>, case: usize, value: T) -> Paired<T> {
        if self.closed {
            let mut ours = mine.lock();
            if !ours.is_pending() {
                return Paired::Preempted;
            }
            *ours = Outcome::SendClosed { case, value };
            return Paired::Matched;
        }

        let value = match self.give_to_receiver_for(mine, case, value) {
            Paired::NoPartner(value) => value,
            other => return other,
        };

        if self.has_room() {
            let mut ours = mine.lock();
            if !ours.is_pending() {
                return Paired::Preempted;
            }
            self.buffer.push_back(value);
            *ours = Outcome::Sent { case };
            return Paired::Matched;
        }
        Paired::NoPartner(value)
    }

    /// Try to complete receive case `case` of `mine` right now
    pub(crate) fn recv_for(&mut self, mine: &Waiter<T>, case: usize) -> Paired<()> {
        if !self.buffer.is_empty() {
            let mut ours = mine.lock();
            if !ours.is_pending() {
                return Paired::Preempted;
            }
            if let Some(value) = self.buffer.pop_front() {
                *ours = Outcome::Received { case, value };
            }
            drop(ours);
            self.refill();
            return Paired::Matched;
        }

        match self.take_from_sender_for(mine, case) {
            Paired::NoPartner(()) => {}
            other => return other,
        }

        if self.closed {
            let mut ours = mine.lock();
            if !ours.is_pending() {
                return Paired::Preempted;
            }
            *ours = Outcome::RecvClosed { case };
            return Paired::Matched;
        }
        Paired::NoPartner(())
    }

    pub(crate) fn park_sender(&mut self, waiter: Arc<Waiter<T>>, case: usize, value: T) {
        self.senders.push_back(SendEntry {
            waiter,
            case,
            value,
        });
    }

    pub(crate) fn park_receiver(&mut self, waiter: Arc<Waiter<T>>, case: usize) {
        self.receivers.push_back(RecvEntry { waiter, case });
    }

    /// Drop every entry belonging to `waiter`
    pub(crate) fn deregister(&mut self, waiter: &Waiter<T>) {
        self.senders.retain(|e| !e.waiter.is(waiter));
        self.receivers.retain(|e| !e.waiter.is(waiter));
    }

    /// After a buffered receive, move one parked sender's value into the buffer
    fn refill(&mut self) {
        if let Some(value) = self.take_from_sender() {
            self.buffer.push_back(value);
        }
    }

    fn give_to_receiver(&mut self, mut value: T) -> Result<(), T> {
        while let Some(entry) = self.receivers.pop_front() {
            match entry.waiter.deliver(entry.case, value) {
                Ok(()) => return Ok(()),
                Err(returned) => value = returned,
            }
        }
        Err(value)
    }

    fn take_from_sender(&mut self) -> Option<T> {
        while let Some(entry) = self.senders.pop_front() {
            if entry.waiter.fire(Outcome::Sent { case: entry.case }) {
                return Some(entry.value);
            }
            // Stale: resolved elsewhere; the offered value is dropped.
        }
        None
    }

    fn give_to_receiver_for(&mut self, mine: &Waiter<T>, case: usize, value: T) -> Paired<T> {
        let mut i = 0;
        while i < self.receivers.len() {
            let partner = self.receivers[i].waiter.clone();
            if partner.is(mine) {
                i += 1;
                continue;
            }
            let (mut theirs, mut ours) = lock_pair(&*partner, mine);
            if !ours.is_pending() {
                return Paired::Preempted;
            }
            let stale = !theirs.is_pending();
            let Some(entry) = self.receivers.remove(i) else {
                break;
            };
            if stale {
                continue;
            }
            *theirs = Outcome::Received {
                case: entry.case,
                value,
            };
            *ours = Outcome::Sent { case };
            partner.notify();
            return Paired::Matched;
        }
        Paired::NoPartner(value)
    }

    fn take_from_sender_for(&mut self, mine: &Waiter<T>, case: usize) -> Paired<()> {
        let mut i = 0;
        while i < self.senders.len() {
            let partner = self.senders[i].waiter.clone();
            if partner.is(mine) {
                i += 1;
                continue;
            }
            let (mut theirs, mut ours) = lock_pair(&*partner, mine);
            if !ours.is_pending() {
                return Paired::Preempted;
            }
            let stale = !theirs.is_pending();
            let Some(entry) = self.senders.remove(i) else {
                break;
            };
            if stale {
                continue;
            }
            *theirs = Outcome::Sent { case: entry.case };
            *ours = Outcome::Received {
                case,
                value: entry.value,
            };
            partner.notify();
            return Paired::Matched;
        }
        Paired::NoPartner(())
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::AlreadyClosed);
        }
        self.closed = true;
        for entry in self.receivers.drain(..) {
            entry.waiter.fire(Outcome::RecvClosed { case: entry.case });
        }
        for entry in self.senders.drain(..) {
            entry.waiter.fire(Outcome::SendClosed {
                case: entry.case,
                value: entry.value,
            });
        }
        Ok(())
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

/// Typed, closable, blocking channel.
///
/// Capacity 0 is a synchronous handoff: every send waits for a receiver.
/// A bounded channel buffers up to `n` values and blocks senders when full;
/// an unbounded channel never blocks senders. Values are received in the
/// order they were sent. Once closed, no send succeeds, buffered values
/// remain receivable, and after they are drained every receive returns
/// `None` immediately.
///
/// `Channel` is a handle; clones refer to the same channel.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Channel<T> {
    /// Create a channel with room for `capacity` buffered values (0 = unbuffered)
    pub fn new(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    /// Same as [`Channel::new`]
    pub fn bounded(capacity: usize) -> Self {
        Self::new(capacity)
    }

    /// Create a channel whose buffer grows without limit
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buffer: VecDeque::with_capacity(capacity.unwrap_or(0).min(1024)),
                    capacity,
                    closed: false,
                    senders: VecDeque::new(),
                    receivers: VecDeque::new(),
                }),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared.state.lock()
    }

    /// Number of live handles to this channel
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Send a value, blocking while the channel is full.
    ///
    /// Fails with the value handed back if the channel is closed before or
    /// while waiting, even when buffer space is available.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.lock();
        let value = match state.try_send_now(value) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(value)) => return Err(SendError(value)),
            Err(TrySendError::Full(value)) => value,
        };

        let waiter = Waiter::new();
        state.park_sender(waiter.clone(), 0, value);
        drop(state);

        match waiter.wait() {
            Outcome::SendClosed { value, .. } => Err(SendError(value)),
            _ => Ok(()),
        }
    }

    /// Send without blocking
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.lock().try_send_now(value)
    }

    /// Receive a value, blocking until one is available.
    ///
    /// Returns `None` once the channel is closed and drained.
    pub fn recv(&self) -> Option<T> {
        let mut state = self.lock();
        match state.try_recv_now() {
            Ok(value) => return Some(value),
            Err(TryRecvError::Closed) => return None,
            Err(TryRecvError::Empty) => {}
        }

        let waiter = Waiter::new();
        state.park_receiver(waiter.clone(), 0);
        drop(state);

        match waiter.wait() {
            Outcome::Received { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Receive without blocking
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.lock().try_recv_now()
    }

    /// Receive, giving up after `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        match state.try_recv_now() {
            Ok(value) => return Ok(value),
            Err(TryRecvError::Closed) => return Err(RecvTimeoutError::Closed),
            Err(TryRecvError::Empty) => {}
        }

        let waiter = Waiter::new();
        state.park_receiver(waiter.clone(), 0);
        drop(state);

        match waiter.wait_until(deadline) {
            Outcome::Received { value, .. } => Ok(value),
            Outcome::RecvClosed { .. } => Err(RecvTimeoutError::Closed),
            _ => {
                self.lock().deregister(&waiter);
                Err(RecvTimeoutError::Timeout)
            }
        }
    }

    /// Close the channel, waking every blocked sender and receiver.
    ///
    /// Closing an already closed channel is an error.
    pub fn close(&self) -> Result<(), ChannelError> {
        let result = self.lock().close();
        if result.is_ok() {
            log::trace!("channel closed");
        }
        result
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of buffered values
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Whether no values are buffered
    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    /// Buffer capacity; `None` for unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.lock().capacity
    }

    /// Iterate over received values until the channel is closed and drained
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { channel: self }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Channel")
            .field("len", &state.buffer.len())
            .field("capacity", &state.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Borrowing iterator returned by [`Channel::iter`]
pub struct Iter<'a, T> {
    channel: &'a Channel<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.channel.recv()
    }
}

/// Owning iterator over a channel's values
pub struct IntoIter<T> {
    channel: Channel<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.channel.recv()
    }
}

impl<'a, T> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T> IntoIterator for Channel<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { channel: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_buffered_fifo() {
        let ch = Channel::new(4);
        for i in 0..4 {
            ch.send(i).unwrap();
        }
        assert_eq!(ch.len(), 4);
        let got: Vec<_> = (0..4).map(|_| ch.recv().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
        assert!(ch.is_empty());
    }

    #[test]
    fn test_close_then_drain() {
        let ch = Channel::new(3);
        ch.send("a").unwrap();
        ch.send("b").unwrap();
        ch.close().unwrap();

        assert_eq!(ch.recv(), Some("a"));
        assert_eq!(ch.recv(), Some("b"));
        assert_eq!(ch.recv(), None);
        assert_eq!(ch.recv(), None);
    }

    #[test]
    fn test_send_on_closed_fails_with_room() {
        let ch = Channel::new(10);
        ch.close().unwrap();
        let err = ch.send(5).unwrap_err();
        assert_eq!(err.into_inner(), 5);
        assert!(ch.try_send(6).unwrap_err().is_closed());
    }

    #[test]
    fn test_double_close() {
        let ch = Channel::<()>::unbounded();
        assert_eq!(ch.close(), Ok(()));
        assert_eq!(ch.close(), Err(ChannelError::AlreadyClosed));
        assert!(ch.is_closed());
    }

    #[test]
    fn test_unbuffered_handoff() {
        let ch = Channel::new(0);
        assert_eq!(ch.try_send(1), Err(TrySendError::Full(1)));

        let rx = ch.clone();
        let handle = thread::spawn(move || rx.recv());
        ch.send(7).unwrap();
        assert_eq!(handle.join().unwrap(), Some(7));
        assert_eq!(ch.len(), 0);
    }

    #[test]
    fn test_blocked_sender_refills_buffer() {
        let ch = Channel::new(1);
        ch.send(1).unwrap();

        let tx = ch.clone();
        let handle = thread::spawn(move || tx.send(2));
        // Wait until the sender is parked behind the full buffer.
        while ch.lock().senders.is_empty() {
            thread::yield_now();
        }

        assert_eq!(ch.recv(), Some(1));
        assert_eq!(ch.len(), 1);
        handle.join().unwrap().unwrap();
        assert_eq!(ch.recv(), Some(2));
    }

    #[test]
    fn test_close_wakes_blocked_sender_and_receiver() {
        let full = Channel::new(1);
        full.send(0).unwrap();
        let empty = Channel::<i32>::new(1);

        let tx = full.clone();
        let sender = thread::spawn(move || tx.send(1));
        let rx = empty.clone();
        let receiver = thread::spawn(move || rx.recv());

        while full.lock().senders.is_empty() || empty.lock().receivers.is_empty() {
            thread::yield_now();
        }
        full.close().unwrap();
        empty.close().unwrap();

        assert_eq!(sender.join().unwrap().unwrap_err().into_inner(), 1);
        assert_eq!(receiver.join().unwrap(), None);
        // The value buffered before close is still delivered.
        assert_eq!(full.recv(), Some(0));
        assert_eq!(full.recv(), None);
    }

    #[test]
    fn test_try_recv_states() {
        let ch = Channel::new(1);
        assert_eq!(ch.try_recv(), Err(TryRecvError::Empty));
        ch.send(3).unwrap();
        assert_eq!(ch.try_recv(), Ok(3));
        ch.close().unwrap();
        assert_eq!(ch.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_recv_timeout() {
        let ch = Channel::<u8>::new(0);
        assert_eq!(
            ch.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Timeout)
        );
        assert!(ch.lock().receivers.is_empty());

        ch.close().unwrap();
        assert_eq!(
            ch.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Closed)
        );
    }

    #[test]
    fn test_iteration_until_closed() {
        let ch = Channel::unbounded();
        let tx = ch.clone();
        let producer = thread::spawn(move || {
            for i in 0..100 {
                tx.send(i).unwrap();
            }
            tx.close().unwrap();
        });

        let received: Vec<i32> = ch.iter().collect();
        producer.join().unwrap();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
        assert_eq!(ch.into_iter().next(), None);
    }

    #[test]
    fn test_capacity_reporting() {
        assert_eq!(Channel::<u8>::new(0).capacity(), Some(0));
        assert_eq!(Channel::<u8>::bounded(8).capacity(), Some(8));
        assert_eq!(Channel::<u8>::unbounded().capacity(), None);
    }

    #[test]
    fn test_many_producers_many_consumers() {
        let ch = Channel::new(2);
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let tx = ch.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        tx.send(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let rx = ch.clone();
                thread::spawn(move || rx.iter().count())
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        ch.close().unwrap();
        let total: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(total, 1000);
    }
}
