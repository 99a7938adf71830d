//! High-throughput channel over lock-free queues
//!
//! Values move through a crossbeam `ArrayQueue` (bounded) or `SegQueue`
//! (unbounded) without taking a lock. The mutex/condvar pair is only used
//! to put threads to sleep when the queue is full or empty.

use crate::error::{ChannelError, RecvTimeoutError, SendError, TryRecvError, TrySendError};
use crossbeam::queue::{ArrayQueue, SegQueue};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Queue<T> {
    Bounded(ArrayQueue<T>),
    Unbounded(SegQueue<T>),
}

impl<T> Queue<T> {
    fn push(&self, value: T) -> Result<(), T> {
        match self {
            Queue::Bounded(q) => q.push(value),
            Queue::Unbounded(q) => {
                q.push(value);
                Ok(())
            }
        }
    }

    fn pop(&self) -> Option<T> {
        match self {
            Queue::Bounded(q) => q.pop(),
            Queue::Unbounded(q) => q.pop(),
        }
    }

    fn is_full(&self) -> bool {
        match self {
            Queue::Bounded(q) => q.is_full(),
            Queue::Unbounded(_) => false,
        }
    }

    fn len(&self) -> usize {
        match self {
            Queue::Bounded(q) => q.len(),
            Queue::Unbounded(q) => q.len(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Queue::Bounded(q) => q.is_empty(),
            Queue::Unbounded(q) => q.is_empty(),
        }
    }
}

struct Inner<T> {
    queue: Queue<T>,
    closed: AtomicBool,
    /// Senders between their closed check and the end of their push
    sending: AtomicUsize,
    /// Threads sleeping (or about to) on `changed`
    waiting: AtomicUsize,
    lock: Mutex<()>,
    changed: Condvar,
}

impl<T> Inner<T> {
    /// Wake sleepers after the queue or the closed flag changed
    fn wake(&self) {
        fence(Ordering::SeqCst);
        if self.waiting.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.changed.notify_all();
        }
    }

    /// Sleep until `blocked` turns false or `deadline` passes.
    ///
    /// Returns false on timeout.
    fn sleep_while(&self, blocked: impl Fn() -> bool, deadline: Option<Instant>) -> bool {
        let mut guard = self.lock.lock();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        let mut in_time = true;
        if blocked() {
            in_time = match deadline {
                Some(deadline) => !self.changed.wait_until(&mut guard, deadline).timed_out(),
                None => {
                    self.changed.wait(&mut guard);
                    true
                }
            };
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        in_time
    }
}

/// Buffered channel tuned for throughput.
///
/// Same observable contract as a buffered or unbounded
/// [`Channel`](super::Channel): FIFO delivery, sends fail once closed,
/// buffered values stay receivable after close. Synchronous (capacity 0)
/// handoff and [`Select`](super::Select) are only offered by `Channel`.
pub struct FastChannel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for FastChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> FastChannel<T> {
    /// Create a channel holding at most `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "FastChannel capacity must be at least 1");
        Self::from_queue(Queue::Bounded(ArrayQueue::new(capacity)))
    }

    /// Create a channel whose buffer grows without limit
    pub fn unbounded() -> Self {
        Self::from_queue(Queue::Unbounded(SegQueue::new()))
    }

    fn from_queue(queue: Queue<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                closed: AtomicBool::new(false),
                sending: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                lock: Mutex::new(()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Send a value, blocking while the buffer is full
    pub fn send(&self, mut value: T) -> Result<(), SendError<T>> {
        let inner = &*self.inner;
        loop {
            match self.try_send(value) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(v)) => return Err(SendError(v)),
                Err(TrySendError::Full(v)) => value = v,
            }
            inner.sleep_while(
                || inner.queue.is_full() && !inner.closed.load(Ordering::SeqCst),
                None,
            );
        }
    }

    /// Send without blocking
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let inner = &*self.inner;
        // Announce the send before checking the flag so a receiver that sees
        // the channel closed also sees this push in flight.
        inner.sending.fetch_add(1, Ordering::SeqCst);
        if inner.closed.load(Ordering::SeqCst) {
            inner.sending.fetch_sub(1, Ordering::SeqCst);
            return Err(TrySendError::Closed(value));
        }
        let pushed = inner.queue.push(value);
        inner.sending.fetch_sub(1, Ordering::SeqCst);
        match pushed {
            Ok(()) => {
                inner.wake();
                Ok(())
            }
            Err(value) => Err(TrySendError::Full(value)),
        }
    }

    /// Receive a value, blocking until one arrives.
    ///
    /// Returns `None` once the channel is closed and drained.
    pub fn recv(&self) -> Option<T> {
        let inner = &*self.inner;
        loop {
            match self.try_recv() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Closed) => return None,
                Err(TryRecvError::Empty) => {}
            }
            inner.sleep_while(
                || inner.queue.is_empty() && !inner.closed.load(Ordering::SeqCst),
                None,
            );
        }
    }

    /// Receive without blocking
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let inner = &*self.inner;
        if let Some(value) = inner.queue.pop() {
            inner.wake();
            return Ok(value);
        }
        if inner.closed.load(Ordering::SeqCst) {
            // Sends that passed their closed check before close are still
            // delivered; wait for them before reporting the channel drained.
            while inner.sending.load(Ordering::SeqCst) > 0 {
                if let Some(value) = inner.queue.pop() {
                    inner.wake();
                    return Ok(value);
                }
                std::thread::yield_now();
            }
            return match inner.queue.pop() {
                Some(value) => Ok(value),
                None => Err(TryRecvError::Closed),
            };
        }
        Err(TryRecvError::Empty)
    }

    /// Receive, giving up after `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let inner = &*self.inner;
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_recv() {
                Ok(value) => return Ok(value),
                Err(TryRecvError::Closed) => return Err(RecvTimeoutError::Closed),
                Err(TryRecvError::Empty) => {}
            }
            let in_time = inner.sleep_while(
                || inner.queue.is_empty() && !inner.closed.load(Ordering::SeqCst),
                Some(deadline),
            );
            if !in_time {
                return self.try_recv().map_err(|err| match err {
                    TryRecvError::Closed => RecvTimeoutError::Closed,
                    TryRecvError::Empty => RecvTimeoutError::Timeout,
                });
            }
        }
    }

    /// Close the channel, waking every sleeping sender and receiver
    pub fn close(&self) -> Result<(), ChannelError> {
        let inner = &*self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::AlreadyClosed);
        }
        let _guard = inner.lock.lock();
        inner.changed.notify_all();
        Ok(())
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of buffered values
    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Whether no values are buffered
    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    /// Buffer capacity; `None` for unbounded
    pub fn capacity(&self) -> Option<usize> {
        match &self.inner.queue {
            Queue::Bounded(q) => Some(q.capacity()),
            Queue::Unbounded(_) => None,
        }
    }

    /// Iterate over received values until the channel is closed and drained
    pub fn iter(&self) -> FastIter<'_, T> {
        FastIter { channel: self }
    }
}

impl<T> std::fmt::Debug for FastChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastChannel")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Borrowing iterator returned by [`FastChannel::iter`]
pub struct FastIter<'a, T> {
    channel: &'a FastChannel<T>,
}

impl<T> Iterator for FastIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.channel.recv()
    }
}

/// Owning iterator over a fast channel's values
pub struct FastIntoIter<T> {
    channel: FastChannel<T>,
}

impl<T> Iterator for FastIntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.channel.recv()
    }
}

impl<'a, T> IntoIterator for &'a FastChannel<T> {
    type Item = T;
    type IntoIter = FastIter<'a, T>;

    fn into_iter(self) -> FastIter<'a, T> {
        self.iter()
    }
}

impl<T> IntoIterator for FastChannel<T> {
    type Item = T;
    type IntoIter = FastIntoIter<T>;

    fn into_iter(self) -> FastIntoIter<T> {
        FastIntoIter { channel: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bounded_fifo_and_full() {
        let ch = FastChannel::bounded(2);
        ch.send(1).unwrap();
        ch.send(2).unwrap();
        assert_eq!(ch.try_send(3), Err(TrySendError::Full(3)));
        assert_eq!(ch.recv(), Some(1));
        assert_eq!(ch.recv(), Some(2));
        assert_eq!(ch.capacity(), Some(2));
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn test_zero_capacity_rejected() {
        let _ = FastChannel::<u8>::bounded(0);
    }

    #[test]
    fn test_close_then_drain() {
        let ch = FastChannel::unbounded();
        ch.send("x").unwrap();
        ch.close().unwrap();
        assert_eq!(ch.send("y").unwrap_err().into_inner(), "y");
        assert_eq!(ch.recv(), Some("x"));
        assert_eq!(ch.recv(), None);
        assert_eq!(ch.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(ch.close(), Err(ChannelError::AlreadyClosed));
    }

    #[test]
    fn test_blocked_sender_resumes() {
        let ch = FastChannel::bounded(1);
        ch.send(0).unwrap();
        let tx = ch.clone();
        let handle = thread::spawn(move || tx.send(1));

        thread::sleep(Duration::from_millis(10));
        assert_eq!(ch.recv(), Some(0));
        handle.join().unwrap().unwrap();
        assert_eq!(ch.recv(), Some(1));
    }

    #[test]
    fn test_close_wakes_receiver() {
        let ch = FastChannel::<u32>::bounded(4);
        let rx = ch.clone();
        let handle = thread::spawn(move || rx.recv());
        thread::sleep(Duration::from_millis(10));
        ch.close().unwrap();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn test_recv_timeout() {
        let ch = FastChannel::<u8>::unbounded();
        assert_eq!(
            ch.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Timeout)
        );
        ch.send(4).unwrap();
        assert_eq!(ch.recv_timeout(Duration::from_millis(10)), Ok(4));
    }

    #[test]
    fn test_throughput_no_loss() {
        let ch = FastChannel::bounded(64);
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let tx = ch.clone();
                thread::spawn(move || {
                    for i in 0..10_000u64 {
                        tx.send(p * 10_000 + i).unwrap();
                    }
                })
            })
            .collect();
        let consumer = {
            let rx = ch.clone();
            thread::spawn(move || rx.iter().sum::<u64>())
        };

        for p in producers {
            p.join().unwrap();
        }
        ch.close().unwrap();
        let expected: u64 = (0..40_000u64).sum();
        assert_eq!(consumer.join().unwrap(), expected);
    }

    #[test]
    fn test_receiver_waits_for_send_in_flight_at_close() {
        let ch = FastChannel::bounded(1);
        // A sender that has passed its closed check but not pushed yet.
        ch.inner.sending.fetch_add(1, Ordering::SeqCst);
        ch.close().unwrap();

        let late = ch.clone();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            late.inner.queue.push(9).ok();
            late.inner.sending.fetch_sub(1, Ordering::SeqCst);
        });

        assert_eq!(ch.recv(), Some(9));
        assert_eq!(ch.recv(), None);
        sender.join().unwrap();
    }

    #[test]
    fn test_send_racing_close_is_delivered_or_refused() {
        for _ in 0..2_000 {
            let ch = FastChannel::unbounded();
            let barrier = Arc::new(std::sync::Barrier::new(2));
            let tx = ch.clone();
            let gate = barrier.clone();
            let sender = thread::spawn(move || {
                gate.wait();
                tx.send(1u8).is_ok()
            });

            barrier.wait();
            ch.close().unwrap();
            let drained: Vec<u8> = ch.iter().collect();
            let accepted = sender.join().unwrap();

            assert_eq!(drained.len(), usize::from(accepted));
            assert_eq!(ch.try_recv(), Err(TryRecvError::Closed));
        }
    }
}
