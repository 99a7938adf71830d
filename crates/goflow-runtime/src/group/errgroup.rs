//! Group with first-error capture and sibling cancellation

use super::cancel::CancelToken;
use super::group::Group;
use crate::error::TaskError;
use crate::scheduler::{Future, Scheduler, Task};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

struct Failure<E> {
    first_error: Mutex<Option<E>>,
    token: CancelToken,
    tasks: Mutex<Vec<Weak<Task>>>,
}

impl<E> Failure<E> {
    /// Record `err` if it is the first one, then cancel queued siblings
    fn record(&self, err: E) {
        {
            let mut slot = self.first_error.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(err);
        }
        self.cancel_siblings();
    }

    /// Remember `task` for cancellation, dropping entries for finished tasks
    /// whenever the list would otherwise grow.
    fn track(&self, task: &Arc<Task>) {
        let mut tasks = self.tasks.lock();
        if tasks.len() == tasks.capacity() {
            tasks.retain(|weak| weak.strong_count() > 0);
        }
        tasks.push(Arc::downgrade(task));
    }

    fn cancel_siblings(&self) {
        self.token.cancel();
        let queued: Vec<Arc<Task>> = self.tasks.lock().iter().filter_map(Weak::upgrade).collect();
        let cancelled = queued.iter().filter(|task| task.cancel()).count();
        log::debug!("error group cancelled, {} queued tasks discarded", cancelled);
    }
}

/// A [`Group`] that stops on the first error.
///
/// Each task returns `Result<T, E>`. The first `Err` (or panic, converted
/// through `E: From<TaskError>`) is kept and later ones are discarded. It
/// also sets the group's [`CancelToken`] and cancels tasks that have not
/// started yet; their Futures resolve to `Err(TaskError::Cancelled)`.
/// Running tasks are never interrupted, but may poll the token.
pub struct ErrGroup<E = TaskError> {
    group: Group,
    failure: Arc<Failure<E>>,
}

impl<E> Default for ErrGroup<E>
where
    E: From<TaskError> + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ErrGroup<E>
where
    E: From<TaskError> + Send + 'static,
{
    /// Unlimited group on the global scheduler
    pub fn new() -> Self {
        Self::from_group(Group::new())
    }

    /// Group on the global scheduler with at most `limit` tasks in flight
    pub fn with_limit(limit: usize) -> Self {
        Self::from_group(Group::with_limit(limit))
    }

    /// Group on a specific scheduler, optionally limited
    pub fn with_scheduler(scheduler: &Scheduler, limit: Option<usize>) -> Self {
        Self::from_group(Group::with_scheduler(scheduler, limit))
    }

    fn from_group(group: Group) -> Self {
        Self {
            group,
            failure: Arc::new(Failure {
                first_error: Mutex::new(None),
                token: CancelToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start a tracked fallible task.
    ///
    /// The Future yields `Some(value)` on success and `None` when the task
    /// returned an error (which went to the group). Once the group is
    /// cancelled, new tasks are not started.
    pub fn go<F, T>(&self, f: F) -> Future<Option<T>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_cancelled() {
            return Future::cancelled();
        }

        let failure = self.failure.clone();
        let future = self.group.go(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                failure.record(err);
                None
            }
            Err(payload) => {
                failure.record(E::from(TaskError::from_panic_ref(&*payload)));
                panic::resume_unwind(payload)
            }
        });

        self.failure.track(future.task());
        // A sibling may have failed before this task was registered.
        if self.is_cancelled() {
            future.cancel();
        }
        future
    }

    /// Start a tracked fallible task that calls `f(arg)`
    pub fn go1<F, A, T>(&self, f: F, arg: A) -> Future<Option<T>>
    where
        F: FnOnce(A) -> Result<T, E> + Send + 'static,
        A: Send + 'static,
        T: Send + 'static,
    {
        self.go(move || f(arg))
    }

    /// Run `f` once per item and collect results in input order.
    ///
    /// Returns the group's first error if any task failed.
    pub fn go_map<I, T, F>(&self, f: F, items: impl IntoIterator<Item = I>) -> Result<Vec<T>, E>
    where
        F: Fn(I) -> Result<T, E> + Send + Sync + 'static,
        I: Send + 'static,
        T: Send + 'static,
    {
        let f = Arc::new(f);
        let futures: Vec<_> = items
            .into_iter()
            .map(|item| {
                let f = f.clone();
                self.go(move || f(item))
            })
            .collect();
        self.collect(futures)
    }

    /// Like [`go_map`](Self::go_map) but with one task per contiguous chunk.
    ///
    /// A chunk stops at its first error.
    pub fn go_batch<I, T, F>(&self, f: F, items: Vec<I>) -> Result<Vec<T>, E>
    where
        F: Fn(I) -> Result<T, E> + Send + Sync + 'static,
        I: Send + 'static,
        T: Send + 'static,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let f = Arc::new(f);
        let chunk_size = items
            .len()
            .div_ceil(self.group.scheduler().worker_count().max(1));

        let mut futures = Vec::new();
        let mut items = items.into_iter();
        loop {
            let chunk: Vec<I> = items.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let f = f.clone();
            futures.push(self.go(move || {
                chunk
                    .into_iter()
                    .map(|item| f(item))
                    .collect::<Result<Vec<T>, E>>()
            }));
        }

        Ok(self.collect(futures)?.into_iter().flatten().collect())
    }

    fn collect<T>(&self, futures: Vec<Future<Option<T>>>) -> Result<Vec<T>, E> {
        let mut values = Vec::with_capacity(futures.len());
        let mut missing = false;
        for future in futures {
            match future.join() {
                Ok(Some(value)) => values.push(value),
                Ok(None) | Err(_) => missing = true,
            }
        }
        if let Some(err) = self.failure.first_error.lock().take() {
            return Err(err);
        }
        if missing {
            // Cancelled without an error of our own: another caller took it.
            return Err(E::from(TaskError::Cancelled));
        }
        Ok(values)
    }

    /// Block until every tracked task has finished, then hand out the first error.
    ///
    /// The error is returned once; later calls return `Ok(())`.
    pub fn wait(&self) -> Result<(), E> {
        self.group.wait();
        match self.failure.first_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Token set when the first error is recorded
    pub fn token(&self) -> CancelToken {
        self.failure.token.clone()
    }

    /// Whether a task has failed
    pub fn is_cancelled(&self) -> bool {
        self.failure.token.is_cancelled()
    }

    /// Run `body` with a fresh group, wait for it, and return the first error
    pub fn scope<R>(body: impl FnOnce(&ErrGroup<E>) -> R) -> Result<R, E> {
        let group = ErrGroup::new();
        let result = body(&group);
        group.wait()?;
        Ok(result)
    }
}

impl<E> std::fmt::Debug for ErrGroup<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrGroup")
            .field("group", &self.group)
            .field("cancelled", &self.failure.token.is_cancelled())
            .finish()
    }
}
