//! Handle to a spawned task's eventual result

use super::task::{Completion, Task, TaskId, TaskState};
use crate::error::TaskError;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handle to the outcome of a spawned task.
///
/// The outcome is produced exactly once: the callable's value, the message
/// of the panic it raised, or [`TaskError::Cancelled`] if it never ran.
/// Reading the outcome blocks the calling thread until it is available.
#[must_use = "dropping a Future detaches the task; its result is discarded"]
pub struct Future<T> {
    task: Arc<Task>,
    completion: Arc<Completion<T>>,
}

impl<T> Future<T> {
    pub(crate) fn new(task: Arc<Task>, completion: Arc<Completion<T>>) -> Self {
        Self { task, completion }
    }

    /// A Future that resolved as cancelled without ever being queued
    pub(crate) fn cancelled() -> Self {
        let (task, completion) = Task::cancelled();
        Self { task, completion }
    }

    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Unique ID of the underlying task
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Current state of the underlying task
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Whether the outcome is available without blocking
    pub fn is_done(&self) -> bool {
        self.completion.is_ready()
    }

    /// Block until the outcome is available
    pub fn wait(&self) {
        self.completion.wait();
    }

    /// Block until the outcome is available or `timeout` elapses
    ///
    /// Returns true if the outcome is available.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_until(Instant::now() + timeout)
    }

    /// Block until done, then return a copy of the outcome.
    ///
    /// Every call returns the same outcome.
    pub fn result(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        self.completion.get()
    }

    /// Block until done, then take the outcome
    pub fn join(self) -> Result<T, TaskError> {
        self.completion.take()
    }

    /// Prevent the task from running if it is still queued.
    ///
    /// Returns false when the task already started or finished; a running
    /// callable is never interrupted.
    pub fn cancel(&self) -> bool {
        self.task.cancel()
    }
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Wait for every future and collect the outcomes in input order
pub fn await_all<T, I>(futures: I) -> Vec<Result<T, TaskError>>
where
    I: IntoIterator<Item = Future<T>>,
{
    futures.into_iter().map(Future::join).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn future_of<T, F>(func: F) -> Future<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (task, completion) = Task::create(func, None);
        Future::new(task, completion)
    }

    #[test]
    fn test_result_is_repeatable() {
        let future = future_of(|| String::from("ready"));
        assert!(!future.is_done());
        future.task().run();
        assert!(future.is_done());
        assert_eq!(future.result(), Ok("ready".to_string()));
        assert_eq!(future.result(), Ok("ready".to_string()));
        assert_eq!(future.state(), TaskState::Completed);
    }

    #[test]
    fn test_join_panic_message() {
        let future = future_of(|| -> u8 { panic!("boom") });
        future.task().run();
        assert_eq!(future.join(), Err(TaskError::Panicked("boom".to_string())));
    }

    #[test]
    fn test_cancel_queued_future() {
        let future = future_of(|| 7);
        assert!(future.cancel());
        assert!(!future.cancel());
        assert_eq!(future.state(), TaskState::Cancelled);
        assert_eq!(future.join(), Err(TaskError::Cancelled));
    }

    #[test]
    fn test_cancelled_constructor() {
        let future: Future<u32> = Future::cancelled();
        assert!(future.is_done());
        assert!(future.wait_timeout(Duration::from_millis(1)));
        assert_eq!(future.result(), Err(TaskError::Cancelled));
    }

    #[test]
    fn test_wait_timeout_pending() {
        let future = future_of(|| 1);
        assert!(!future.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_await_all_preserves_order() {
        let futures: Vec<_> = (0..4).map(|i| future_of(move || i * 10)).collect();
        for future in futures.iter().rev() {
            future.task().run();
        }
        let outcomes = await_all(futures);
        assert_eq!(outcomes, vec![Ok(0), Ok(10), Ok(20), Ok(30)]);
    }
}
