//! Wait on several channel operations and commit to exactly one

use super::channel::{Channel, Paired};
use super::waiter::{Outcome, Waiter};
use crate::error::{TryRecvError, TrySendError};
use rand::seq::SliceRandom;
use std::time::{Duration, Instant};

enum Op<T> {
    Recv,
    Send(Option<T>),
}

struct Case<'a, T> {
    channel: &'a Channel<T>,
    op: Op<T>,
}

/// The case a [`Select`] committed to.
///
/// For a receive case `value` and `ok` mirror [`Channel::recv`]: `ok` is
/// false (and `value` is `None`) when the channel is closed and drained.
/// For a send case `ok` is true when the value was delivered; when the
/// channel was closed `ok` is false and `value` holds the undelivered value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected<T> {
    /// Position of the case in the order it was added
    pub index: usize,
    /// Received value, or an undelivered send value
    pub value: Option<T>,
    /// Whether the operation succeeded
    pub ok: bool,
}

/// Builder for a multi-way channel wait.
///
/// ```ignore
/// let picked = Select::new().recv(&jobs).send(&results, 7).wait();
/// match picked.index {
///     0 => handle(picked.value),
///     _ => {}
/// }
/// ```
///
/// When several cases are ready one is chosen uniformly at random. Values
/// of send cases that were not chosen are dropped.
pub struct Select<'a, T> {
    cases: Vec<Case<'a, T>>,
}

impl<T> Default for Select<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> Select<'a, T> {
    /// Empty select
    pub fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Add a receive case
    pub fn recv(mut self, channel: &'a Channel<T>) -> Self {
        self.cases.push(Case {
            channel,
            op: Op::Recv,
        });
        self
    }

    /// Add a send case
    pub fn send(mut self, channel: &'a Channel<T>, value: T) -> Self {
        self.cases.push(Case {
            channel,
            op: Op::Send(Some(value)),
        });
        self
    }

    /// Number of cases
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Whether no case was added
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Block until one case completes.
    ///
    /// # Panics
    ///
    /// Panics if there are no cases, since such a select could never return.
    pub fn wait(mut self) -> Selected<T> {
        assert!(!self.cases.is_empty(), "select with no cases blocks forever");
        let order = self.shuffled();
        if let Some(selected) = self.poll(&order) {
            return selected;
        }
        match self.park(&order, None) {
            Some(selected) => selected,
            None => unreachable!("a select without deadline cannot time out"),
        }
    }

    /// Complete a ready case without blocking; `None` plays the default case
    pub fn try_wait(mut self) -> Option<Selected<T>> {
        let order = self.shuffled();
        self.poll(&order)
    }

    /// Block until one case completes or `timeout` elapses
    pub fn wait_timeout(mut self, timeout: Duration) -> Option<Selected<T>> {
        let deadline = Instant::now() + timeout;
        let order = self.shuffled();
        if let Some(selected) = self.poll(&order) {
            return Some(selected);
        }
        if self.cases.is_empty() {
            std::thread::sleep(timeout);
            return None;
        }
        self.park(&order, Some(deadline))
    }

    fn shuffled(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.cases.len()).collect();
        order.shuffle(&mut rand::thread_rng());
        order
    }

    /// First pass: complete the first ready case in `order`
    fn poll(&mut self, order: &[usize]) -> Option<Selected<T>> {
        for &index in order {
            let case = &mut self.cases[index];
            match &mut case.op {
                Op::Recv => match case.channel.lock().try_recv_now() {
                    Ok(value) => return Some(selected(index, Some(value), true)),
                    Err(TryRecvError::Closed) => return Some(selected(index, None, false)),
                    Err(TryRecvError::Empty) => {}
                },
                Op::Send(slot) => {
                    let Some(value) = slot.take() else {
                        continue;
                    };
                    match case.channel.lock().try_send_now(value) {
                        Ok(()) => return Some(selected(index, None, true)),
                        Err(TrySendError::Closed(value)) => {
                            return Some(selected(index, Some(value), false))
                        }
                        Err(TrySendError::Full(value)) => *slot = Some(value),
                    }
                }
            }
        }
        None
    }

    /// Second pass: park one waiter on every channel until a case fires
    fn park(self, order: &[usize], deadline: Option<Instant>) -> Option<Selected<T>> {
        let waiter = Waiter::new();
        let mut cases: Vec<Option<Case<'a, T>>> = self.cases.into_iter().map(Some).collect();
        let mut parked_on = Vec::with_capacity(order.len());

        for &index in order {
            let Some(case) = cases[index].take() else {
                continue;
            };
            let mut state = case.channel.lock();
            let resolved = match case.op {
                Op::Recv => match state.recv_for(&waiter, index) {
                    Paired::NoPartner(()) => {
                        state.park_receiver(waiter.clone(), index);
                        false
                    }
                    _ => true,
                },
                Op::Send(Some(value)) => match state.send_for(&waiter, index, value) {
                    Paired::NoPartner(value) => {
                        state.park_sender(waiter.clone(), index, value);
                        false
                    }
                    _ => true,
                },
                Op::Send(None) => false,
            };
            drop(state);
            parked_on.push(case.channel);
            if resolved {
                // Resolved here or through a channel parked on earlier.
                break;
            }
        }

        let outcome = match deadline {
            Some(deadline) => waiter.wait_until(deadline),
            None => waiter.wait(),
        };
        for channel in parked_on {
            channel.lock().deregister(&waiter);
        }

        match outcome {
            Outcome::Sent { case } => Some(selected(case, None, true)),
            Outcome::Received { case, value } => Some(selected(case, Some(value), true)),
            Outcome::RecvClosed { case } => Some(selected(case, None, false)),
            Outcome::SendClosed { case, value } => Some(selected(case, Some(value), false)),
            Outcome::Pending | Outcome::Aborted => None,
        }
    }
}

fn selected<T>(index: usize, value: Option<T>, ok: bool) -> Selected<T> {
    Selected { index, value, ok }
}
