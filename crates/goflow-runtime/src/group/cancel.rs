//! Cooperative cancellation with optional deadlines
//!
//! A token is cancelled explicitly, when its deadline passes, or when its
//! parent is cancelled. Deadlines are enforced by the global scheduler's
//! timer and are also checked whenever the token is polled.

use crate::chan::Channel;
use crate::error::CancelReason;
use crate::scheduler::timer::TimerAction;
use crate::scheduler::Scheduler;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// A channel closed on cancellation, whatever its element type
trait DoneSignal: Send {
    fn close(&self);

    /// Only the token still refers to the channel
    fn is_orphaned(&self) -> bool;
}

impl<T: Send> DoneSignal for Channel<T> {
    fn close(&self) {
        let _ = Channel::close(self);
    }

    fn is_orphaned(&self) -> bool {
        self.handle_count() == 1
    }
}

#[derive(Default)]
struct Listeners {
    reason: Option<CancelReason>,
    done: Vec<Box<dyn DoneSignal>>,
    children: Vec<Weak<TokenState>>,
}

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    listeners: Mutex<Listeners>,
    changed: Condvar,
}

impl TokenState {
    fn with_deadline(deadline: Option<Instant>) -> Arc<Self> {
        Arc::new(Self {
            deadline,
            ..Self::default()
        })
    }

    fn cancel_with(&self, reason: CancelReason) -> bool {
        let (done, children) = {
            let mut listeners = self.listeners.lock();
            if listeners.reason.is_some() {
                return false;
            }
            listeners.reason = Some(reason);
            self.cancelled.store(true, Ordering::Release);
            self.changed.notify_all();
            (
                std::mem::take(&mut listeners.done),
                std::mem::take(&mut listeners.children),
            )
        };
        for signal in done {
            signal.close();
        }
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel_with(reason);
        }
        true
    }

    /// Apply the deadline if it has passed; returns whether cancelled
    fn poll(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.cancel_with(CancelReason::DeadlineExceeded);
                true
            }
            _ => false,
        }
    }
}

/// Shared cancellation flag that long-running tasks may poll to exit early.
///
/// Cancelling never interrupts running code; tasks opt in by checking
/// [`is_cancelled`](Self::is_cancelled), blocking in [`wait`](Self::wait),
/// or selecting on [`done`](Self::done). Clones share state. Children
/// created with [`child`](Self::child) are cancelled with their parent but
/// not the other way round.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token without deadline that is not cancelled
    pub fn new() -> Self {
        Self {
            state: TokenState::with_deadline(None),
        }
    }

    /// A token cancelled with [`CancelReason::DeadlineExceeded`] at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        let token = Self {
            state: TokenState::with_deadline(Some(deadline)),
        };
        token.arm();
        token
    }

    /// A token cancelled once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A token cancelled whenever this one is
    pub fn child(&self) -> Self {
        self.derive(self.state.deadline)
    }

    /// A child that is also cancelled at `deadline`.
    ///
    /// The parent's deadline still applies if it is earlier.
    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.state.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        self.derive(Some(deadline))
    }

    /// A child that is also cancelled after `timeout`
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.child_with_deadline(Instant::now() + timeout)
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        let child = Self {
            state: TokenState::with_deadline(deadline),
        };
        let inherited = {
            let mut listeners = self.state.listeners.lock();
            if listeners.reason.is_none() {
                let children = &mut listeners.children;
                if children.len() == children.capacity() {
                    children.retain(|weak| weak.strong_count() > 0);
                }
                children.push(Arc::downgrade(&child.state));
            }
            listeners.reason
        };
        match inherited {
            Some(reason) => {
                child.state.cancel_with(reason);
            }
            None => child.arm(),
        }
        child
    }

    /// Schedule deadline cancellation on the global timer
    fn arm(&self) {
        let Some(deadline) = self.state.deadline else {
            return;
        };
        if self.state.poll() {
            return;
        }
        let Some(timer) = Scheduler::global().shared().timer() else {
            log::debug!("no timer available; deadline is only checked when polled");
            return;
        };
        let state = Arc::downgrade(&self.state);
        timer.schedule(
            deadline,
            TimerAction::Once(Box::new(move || {
                if let Some(state) = state.upgrade() {
                    state.cancel_with(CancelReason::DeadlineExceeded);
                }
            })),
        );
    }

    /// Cancel the token and its children; returns true if this call did it
    pub fn cancel(&self) -> bool {
        self.state.cancel_with(CancelReason::Cancelled)
    }

    /// Whether the token has been cancelled or its deadline has passed
    pub fn is_cancelled(&self) -> bool {
        self.state.poll()
    }

    /// Why the token was cancelled, or None while it is live
    pub fn reason(&self) -> Option<CancelReason> {
        self.state.poll();
        self.state.listeners.lock().reason
    }

    /// Deadline after which the token cancels itself
    pub fn deadline(&self) -> Option<Instant> {
        self.state.deadline
    }

    /// Channel that is closed when the token is cancelled.
    ///
    /// Nothing is ever sent on it, so a receive case in a
    /// [`Select`](crate::Select) fires with `ok == false` on cancellation.
    /// Each call creates a new channel; keep it rather than calling this
    /// in a loop.
    pub fn done<T: Send + 'static>(&self) -> Channel<T> {
        let channel = Channel::new(0);
        self.state.poll();
        let mut listeners = self.state.listeners.lock();
        if listeners.reason.is_some() {
            let _ = channel.close();
            return channel;
        }
        let done = &mut listeners.done;
        if done.len() == done.capacity() {
            done.retain(|signal| !signal.is_orphaned());
        }
        done.push(Box::new(channel.clone()));
        channel
    }

    /// Block until the token is cancelled
    pub fn wait(&self) -> CancelReason {
        let mut listeners = self.state.listeners.lock();
        loop {
            if let Some(reason) = listeners.reason {
                return reason;
            }
            match self.state.deadline {
                Some(deadline) => {
                    if self
                        .state
                        .changed
                        .wait_until(&mut listeners, deadline)
                        .timed_out()
                    {
                        drop(listeners);
                        self.state.poll();
                        listeners = self.state.listeners.lock();
                    }
                }
                None => self.state.changed.wait(&mut listeners),
            }
        }
    }

    /// Block until the token is cancelled or `timeout` elapses.
    ///
    /// Returns the reason if the token was cancelled in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CancelReason> {
        let limit = Instant::now() + timeout;
        let until = match self.state.deadline {
            Some(deadline) => deadline.min(limit),
            None => limit,
        };
        {
            let mut listeners = self.state.listeners.lock();
            while listeners.reason.is_none() {
                if self
                    .state
                    .changed
                    .wait_until(&mut listeners, until)
                    .timed_out()
                {
                    break;
                }
            }
        }
        self.reason()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("reason", &self.state.listeners.lock().reason)
            .field("deadline", &self.state.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chan::Select;

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(observer.is_cancelled());
        assert_eq!(observer.reason(), Some(CancelReason::Cancelled));
    }

    #[test]
    fn test_timeout_cancels_token() {
        let token = CancelToken::with_timeout(Duration::from_millis(20));
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);
        assert_eq!(token.wait(), CancelReason::DeadlineExceeded);
        assert!(token.is_cancelled());
        assert!(!token.cancel());
        assert_eq!(token.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[test]
    fn test_past_deadline_is_cancelled_at_once() {
        let token = CancelToken::with_deadline(Instant::now());
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[test]
    fn test_parent_cancels_children_only_downward() {
        let parent = CancelToken::new();
        let child = parent.child();
        let grandchild = child.child();
        let sibling = parent.child();

        assert!(sibling.cancel());
        assert!(!parent.is_cancelled());
        assert!(!child.is_cancelled());

        assert!(parent.cancel());
        assert_eq!(child.reason(), Some(CancelReason::Cancelled));
        assert_eq!(grandchild.reason(), Some(CancelReason::Cancelled));

        // Children of a cancelled token start out cancelled.
        assert!(parent.child().is_cancelled());
    }

    #[test]
    fn test_child_keeps_earlier_parent_deadline() {
        let parent = CancelToken::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
        assert_eq!(
            child.wait_timeout(Duration::from_secs(5)),
            Some(CancelReason::DeadlineExceeded)
        );
    }

    #[test]
    fn test_wait_timeout_on_live_token() {
        let token = CancelToken::new();
        assert_eq!(token.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_done_channel_in_select() {
        let token = CancelToken::with_timeout(Duration::from_millis(20));
        let jobs = Channel::<u32>::new(0);
        let done = token.done::<u32>();

        let picked = Select::new().recv(&jobs).recv(&done).wait();
        assert_eq!(picked.index, 1);
        assert!(!picked.ok);
        assert!(token.done::<u32>().is_closed());
    }

    #[test]
    fn test_dropped_done_channels_are_released() {
        let token = CancelToken::new();
        for _ in 0..1_000 {
            drop(token.done::<()>());
        }
        assert!(token.state.listeners.lock().done.len() <= 16);

        let kept = token.done::<()>();
        token.cancel();
        assert!(kept.is_closed());
    }
}
