//! Worker thread that executes Tasks
//!
//! Workers pop from their own deque, then the global injector, then steal
//! from siblings. With nothing to do they park on the scheduler's
//! [`IdleSignal`](super::idle::IdleSignal) until a new task is published.

use super::deque::{WorkSource, WorkerDeque};
use super::scheduler::Shared;
use super::task::Task;
use crate::error::SchedulerError;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

/// Deque of the worker running on this thread, if any
struct LocalContext {
    scheduler_id: u64,
    deque: Rc<WorkerDeque>,
}

thread_local! {
    static CURRENT: RefCell<Option<LocalContext>> = const { RefCell::new(None) };
}

/// Push onto the calling worker's own deque.
///
/// Hands the task back when the caller is not a worker of `scheduler_id`.
pub(crate) fn push_local(scheduler_id: u64, task: Arc<Task>) -> Result<(), Arc<Task>> {
    CURRENT.with(|current| match &*current.borrow() {
        Some(ctx) if ctx.scheduler_id == scheduler_id => {
            ctx.deque.push(task);
            Ok(())
        }
        _ => Err(task),
    })
}

/// ID of the scheduler whose worker is running on this thread
pub(crate) fn current_scheduler() -> Option<u64> {
    CURRENT.with(|current| current.borrow().as_ref().map(|ctx| ctx.scheduler_id))
}

/// Worker thread that executes Tasks
pub(crate) struct Worker {
    /// Worker index within the scheduler
    index: usize,

    /// Worker thread handle
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Start a worker thread that owns `deque`
    pub(crate) fn start(
        index: usize,
        deque: WorkerDeque,
        shared: Arc<Shared>,
        name: String,
        stack_size: Option<usize>,
    ) -> Result<Self, SchedulerError> {
        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(bytes) = stack_size {
            builder = builder.stack_size(bytes);
        }

        let handle = builder
            .spawn(move || Worker::run_loop(index, deque, shared))
            .map_err(|err| SchedulerError::ThreadSpawn {
                name,
                reason: err.to_string(),
            })?;

        Ok(Self {
            index,
            handle: Some(handle),
        })
    }

    /// Wait for the thread to exit.
    ///
    /// A worker never joins itself; shutdown triggered from inside a task
    /// lets that worker exit on its own once the task returns.
    pub(crate) fn join(mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("worker {} terminated abnormally", self.index);
        }
    }

    /// Worker thread main loop
    fn run_loop(index: usize, deque: WorkerDeque, shared: Arc<Shared>) {
        let deque = Rc::new(deque);
        CURRENT.with(|current| {
            *current.borrow_mut() = Some(LocalContext {
                scheduler_id: shared.id(),
                deque: deque.clone(),
            });
        });
        log::debug!("worker {} started", index);

        let mut executed = 0u64;
        loop {
            if shared.is_shutdown() {
                break;
            }

            // Snapshot before searching so a concurrent publish is not missed.
            let seen = shared.idle.epoch();
            match deque.find_work() {
                Some((task, source)) => {
                    if source == WorkSource::Stolen {
                        shared.accounting.stolen.fetch_add(1, Ordering::Relaxed);
                        log::trace!("worker {} stole task {} queued {:?}", index, task.id(), task.age());
                    }
                    if task.run() {
                        executed += 1;
                    }
                }
                None => shared.idle.park(seen, || shared.is_shutdown()),
            }
        }

        CURRENT.with(|current| current.borrow_mut().take());

        let mut discarded = 0usize;
        while let Some(task) = deque.pop() {
            if task.cancel() {
                discarded += 1;
            }
        }
        discarded += shared.drain_injector();

        log::debug!(
            "worker {} stopped after {} tasks, {} discarded",
            index,
            executed,
            discarded
        );
    }
}
