//! Task structure and execution state

use crate::error::TaskError;
use crate::sync::Semaphore;
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Waiting in a queue for a worker
    Queued = 0,
    /// Currently executing on a worker
    Running = 1,
    /// Finished and produced a value
    Completed = 2,
    /// Panicked while running
    Failed = 3,
    /// Discarded before it started
    Cancelled = 4,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Queued,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Failed,
            _ => TaskState::Cancelled,
        }
    }

    /// Whether the task has reached a final state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Per-scheduler bookkeeping updated once per task as it leaves the system
#[derive(Default)]
pub(crate) struct TaskAccounting {
    /// Backpressure permits for the bounded scheduler
    pub(crate) admission: Option<Semaphore>,
    pub(crate) spawned: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) stolen: AtomicU64,
    /// Signalled whenever the active count drops to zero
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl TaskAccounting {
    pub(crate) fn with_admission(max_pending: Option<usize>) -> Self {
        Self {
            admission: max_pending.map(Semaphore::new),
            ..Self::default()
        }
    }

    pub(crate) fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::SeqCst);
    }

    /// Tasks spawned but not yet finished
    pub(crate) fn active(&self) -> u64 {
        let spawned = self.spawned.load(Ordering::SeqCst);
        let finished = self.completed.load(Ordering::SeqCst)
            + self.failed.load(Ordering::SeqCst)
            + self.cancelled.load(Ordering::SeqCst);
        spawned.saturating_sub(finished)
    }

    fn record(&self, state: TaskState, holds_permit: bool) {
        let counter = match state {
            TaskState::Completed => &self.completed,
            TaskState::Failed => &self.failed,
            TaskState::Cancelled => &self.cancelled,
            TaskState::Queued | TaskState::Running => return,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        if holds_permit {
            if let Some(admission) = &self.admission {
                admission.release(1);
            }
        }
        if self.active() == 0 {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
    }

    /// Block until no task is queued or running, or `deadline` passes
    pub(crate) fn wait_idle(&self, deadline: Instant) -> bool {
        let mut guard = self.idle_lock.lock();
        while self.active() > 0 {
            if self.idle.wait_until(&mut guard, deadline).timed_out() {
                return self.active() == 0;
            }
        }
        true
    }
}

/// Type-erased body of a task
pub(crate) trait Runnable: Send {
    /// Execute the callable and publish its outcome
    fn run(self: Box<Self>, task: &Task);

    /// Drop the callable unexecuted and publish cancellation
    fn cancel(self: Box<Self>);
}

/// Callable plus the completion slot its Future observes
struct Job<F, T> {
    func: F,
    completion: Arc<Completion<T>>,
}

impl<F, T> Runnable for Job<F, T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    fn run(self: Box<Self>, task: &Task) {
        let Job { func, completion } = *self;
        match panic::catch_unwind(AssertUnwindSafe(func)) {
            Ok(value) => {
                task.finish(TaskState::Completed);
                completion.complete(Ok(value));
            }
            Err(payload) => {
                let err = TaskError::from_panic(payload);
                log::debug!("task {} failed: {}", task.id(), err);
                task.finish(TaskState::Failed);
                completion.complete(Err(err));
            }
        }
    }

    fn cancel(self: Box<Self>) {
        let Job { func, completion } = *self;
        drop(func);
        completion.complete(Err(TaskError::Cancelled));
    }
}

/// A scheduled unit of work
pub struct Task {
    /// Unique identifier
    id: TaskId,

    /// Current state (a `TaskState` discriminant)
    state: AtomicU8,

    /// Callable, taken exactly once by run or cancel
    job: Mutex<Option<Box<dyn Runnable>>>,

    /// Owning scheduler's bookkeeping
    accounting: Option<Arc<TaskAccounting>>,

    /// Whether finishing returns an admission permit
    holds_permit: bool,

    /// When the task was created
    created_at: Instant,
}

impl Task {
    /// Create a queued task and the completion slot its Future will observe
    pub(crate) fn create<F, T>(
        func: F,
        accounting: Option<Arc<TaskAccounting>>,
    ) -> (Arc<Task>, Arc<Completion<T>>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Self::create_admitted(func, accounting, true)
    }

    /// Like [`create`](Self::create); `holds_permit` is false for tasks
    /// admitted past a full bounded scheduler.
    pub(crate) fn create_admitted<F, T>(
        func: F,
        accounting: Option<Arc<TaskAccounting>>,
        holds_permit: bool,
    ) -> (Arc<Task>, Arc<Completion<T>>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let completion = Arc::new(Completion::new());
        let job = Job {
            func,
            completion: completion.clone(),
        };
        let task = Arc::new(Task {
            id: TaskId::new(),
            state: AtomicU8::new(TaskState::Queued as u8),
            job: Mutex::new(Some(Box::new(job))),
            accounting,
            holds_permit,
            created_at: Instant::now(),
        });
        (task, completion)
    }

    /// A task that was cancelled before it was ever queued
    pub(crate) fn cancelled<T>() -> (Arc<Task>, Arc<Completion<T>>) {
        let completion = Arc::new(Completion::new());
        completion.complete(Err(TaskError::Cancelled));
        let task = Arc::new(Task {
            id: TaskId::new(),
            state: AtomicU8::new(TaskState::Cancelled as u8),
            job: Mutex::new(None),
            accounting: None,
            holds_permit: false,
            created_at: Instant::now(),
        });
        (task, completion)
    }

    /// Get the Task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the current state
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Time since the task was created
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Run the task on the current thread.
    ///
    /// Returns false if the task was cancelled before it could start.
    pub(crate) fn run(&self) -> bool {
        if !self.transition(TaskState::Queued, TaskState::Running) {
            return false;
        }
        let job = self.job.lock().take();
        if let Some(job) = job {
            job.run(self);
        }
        true
    }

    /// Cancel the task if it has not started running
    pub(crate) fn cancel(&self) -> bool {
        if !self.transition(TaskState::Queued, TaskState::Cancelled) {
            return false;
        }
        self.finish(TaskState::Cancelled);
        let job = self.job.lock().take();
        if let Some(job) = job {
            job.cancel();
        }
        true
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
        if let Some(accounting) = &self.accounting {
            accounting.record(state, self.holds_permit);
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

enum Slot<T> {
    Pending,
    Ready(Result<T, TaskError>),
    Taken,
}

/// Result slot shared between a running task and its Future
pub(crate) struct Completion<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Completion<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Result<T, TaskError>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Ready(outcome);
            self.ready.notify_all();
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Pending)
    }

    pub(crate) fn wait(&self) {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.ready.wait(&mut slot);
        }
    }

    pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return !matches!(*slot, Slot::Pending);
            }
        }
        true
    }

    pub(crate) fn get(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        let mut slot = self.slot.lock();
        loop {
            match &*slot {
                Slot::Pending => self.ready.wait(&mut slot),
                Slot::Ready(outcome) => return outcome.clone(),
                // Only `take` empties the slot and it consumes the handle.
                Slot::Taken => return Err(TaskError::Cancelled),
            }
        }
    }

    pub(crate) fn take(&self) -> Result<T, TaskError> {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.ready.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(outcome) => outcome,
            Slot::Pending | Slot::Taken => Err(TaskError::Cancelled),
        }
    }
}
