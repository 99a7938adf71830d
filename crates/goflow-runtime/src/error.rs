//! Error types shared across the runtime

use std::any::Any;
use std::fmt;

/// Outcome of a task that did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task panicked; the payload message is preserved
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was cancelled before it started running
    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    /// Build a `Panicked` error from a `catch_unwind` payload
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::from_panic_ref(&*payload)
    }

    /// Same as [`from_panic`](Self::from_panic) without consuming the payload
    pub(crate) fn from_panic_ref(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        TaskError::Panicked(message)
    }

    /// Returns true if the task was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// Why a [`CancelToken`](crate::CancelToken) was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CancelReason {
    /// `cancel` was called on the token or one of its ancestors
    #[error("operation cancelled")]
    Cancelled,

    /// The token's deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Errors returned by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler no longer accepts new tasks
    #[error("scheduler has been shut down")]
    ShutDown,

    /// The operating system refused to create a runtime thread
    #[error("failed to spawn thread {name}: {reason}")]
    ThreadSpawn {
        /// Thread name
        name: String,
        /// OS error message
        reason: String,
    },
}

/// Invalid runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed
    #[error("invalid value {value:?} for {var}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },
}

/// Channel protocol violations that carry no value
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// `close` was called on a channel that is already closed
    #[error("close of closed channel")]
    AlreadyClosed,
}

/// A blocking send failed because the channel is closed.
///
/// The undelivered value is handed back to the caller.
#[derive(PartialEq, Eq, thiserror::Error)]
#[error("send on closed channel")]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recover the value that could not be sent
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}

/// A non-blocking send could not complete
#[derive(PartialEq, Eq, thiserror::Error)]
pub enum TrySendError<T> {
    /// The buffer is full (or no receiver is waiting on an unbuffered channel)
    #[error("channel is full")]
    Full(T),

    /// The channel is closed
    #[error("send on closed channel")]
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recover the value that could not be sent
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(v) | TrySendError::Closed(v) => v,
        }
    }

    /// Returns true if the send failed because the channel is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, TrySendError::Closed(_))
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("Full(..)"),
            TrySendError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// A non-blocking receive could not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// Nothing is buffered and no sender is waiting
    #[error("channel is empty")]
    Empty,

    /// The channel is closed and drained
    #[error("channel is closed")]
    Closed,
}

/// A receive with a deadline could not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvTimeoutError {
    /// The deadline passed before a value arrived
    #[error("timed out waiting on channel")]
    Timeout,

    /// The channel is closed and drained
    #[error("channel is closed")]
    Closed,
}
