//! Work-stealing deque for task scheduling

use super::task::Task;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use rand::Rng;
use std::sync::Arc;

/// Where a worker found its next task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkSource {
    /// Own deque, most recent first
    Local,
    /// Shared injector, oldest first
    Global,
    /// Taken from another worker's deque
    Stolen,
}

/// Work-stealing deque for a single worker
pub(crate) struct WorkerDeque {
    /// Local worker deque (LIFO for own tasks)
    worker: Worker<Arc<Task>>,

    /// Stealer handles for the other workers
    stealers: Vec<Stealer<Arc<Task>>>,

    /// Global injector for tasks submitted from outside the pool
    injector: Arc<Injector<Arc<Task>>>,
}

impl WorkerDeque {
    /// Create a new WorkerDeque
    pub(crate) fn new(
        worker: Worker<Arc<Task>>,
        stealers: Vec<Stealer<Arc<Task>>>,
        injector: Arc<Injector<Arc<Task>>>,
    ) -> Self {
        Self {
            worker,
            stealers,
            injector,
        }
    }

    /// Push a task to the local deque (LIFO)
    pub(crate) fn push(&self, task: Arc<Task>) {
        self.worker.push(task);
    }

    /// Pop a task from the local deque (LIFO) - most recent task
    pub(crate) fn pop(&self) -> Option<Arc<Task>> {
        self.worker.pop()
    }

    /// Try to get work: local pop, then the injector, then steal
    pub(crate) fn find_work(&self) -> Option<(Arc<Task>, WorkSource)> {
        // 1. Local deque (LIFO - cache locality)
        if let Some(task) = self.worker.pop() {
            return Some((task, WorkSource::Local));
        }

        // 2. Global injector (FIFO - submission order)
        loop {
            match self.injector.steal() {
                Steal::Success(task) => return Some((task, WorkSource::Global)),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        // 3. Other workers
        self.steal_from_others()
            .map(|task| (task, WorkSource::Stolen))
    }

    /// Steal from other workers, starting at a random victim.
    ///
    /// A successful steal moves about half of the victim's tasks into the
    /// local deque and returns one of them.
    fn steal_from_others(&self) -> Option<Arc<Task>> {
        if self.stealers.is_empty() {
            return None;
        }

        let mut rng = rand::thread_rng();
        let start = rng.gen_range(0..self.stealers.len());

        for i in 0..self.stealers.len() {
            let stealer = &self.stealers[(start + i) % self.stealers.len()];

            loop {
                match stealer.steal_batch_and_pop(&self.worker) {
                    Steal::Success(task) => return Some(task),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }

    /// Check if the local deque is empty
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.worker.is_empty()
    }
}
