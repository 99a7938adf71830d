//! Work-stealing task scheduler
//!
//! Manages a pool of worker threads that execute Tasks. Each worker owns a
//! LIFO deque; tasks spawned from outside the pool land in a shared FIFO
//! injector, tasks spawned from a worker land in that worker's deque, and
//! idle workers steal from their siblings.

use super::deque::WorkerDeque;
use super::future::Future;
use super::idle::IdleSignal;
use super::task::{Task, TaskAccounting};
use super::timer::TimerThread;
use super::worker::{self, Worker};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crossbeam_deque::{Injector, Steal, Stealer, Worker as CWorker};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL: OnceLock<Scheduler> = OnceLock::new();

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks accepted by `spawn`
    pub spawned: u64,
    /// Tasks that returned a value
    pub completed: u64,
    /// Tasks that panicked
    pub failed: u64,
    /// Tasks discarded before running
    pub cancelled: u64,
    /// Successful steals between workers
    pub stolen: u64,
    /// Tasks queued or running right now
    pub active: u64,
}

/// State shared by the scheduler handle, its workers and its timer
pub(crate) struct Shared {
    id: u64,
    injector: Arc<Injector<Arc<Task>>>,
    pub(crate) idle: IdleSignal,
    shutdown: AtomicBool,
    pub(crate) accounting: Arc<TaskAccounting>,
    /// None inside the cell when the timer thread failed to start
    timer: OnceLock<Option<Arc<TimerThread>>>,
    thread_prefix: String,
}

impl Shared {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Create a task for `func` and publish it to the workers.
    ///
    /// Blocks while a bounded scheduler is full.
    pub(crate) fn spawn_task<F, T>(&self, func: F) -> Result<Future<T>, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(SchedulerError::ShutDown);
        }

        if let Some(admission) = &self.accounting.admission {
            // Capacity is at least one, so a single permit is always valid.
            let _ = admission.acquire(1);
            if self.is_shutdown() {
                admission.release(1);
                return Err(SchedulerError::ShutDown);
            }
        }

        Ok(self.publish(func, true))
    }

    /// Like [`spawn_task`](Self::spawn_task) but never blocks.
    ///
    /// Used from the timer thread. When a bounded scheduler is full the task
    /// is admitted past the cap and does not hold a permit.
    pub(crate) fn spawn_task_nonblocking<F, T>(&self, func: F) -> Result<Future<T>, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(SchedulerError::ShutDown);
        }

        let holds_permit = match &self.accounting.admission {
            Some(admission) => {
                let admitted = admission.try_acquire(1).unwrap_or(false);
                if !admitted {
                    log::debug!("scheduler {} full, admitting timer task over the cap", self.id);
                }
                admitted
            }
            None => false,
        };
        Ok(self.publish(func, holds_permit))
    }

    fn publish<F, T>(&self, func: F, holds_permit: bool) -> Future<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (task, completion) =
            Task::create_admitted(func, Some(self.accounting.clone()), holds_permit);
        self.accounting.record_spawn();
        self.submit(task.clone());
        Future::new(task, completion)
    }

    fn submit(&self, task: Arc<Task>) {
        if let Err(task) = worker::push_local(self.id, task) {
            self.injector.push(task);
        }
        self.idle.notify_one();

        // A shutdown may have drained the injector between the check in
        // spawn_task and the push above.
        if self.is_shutdown() {
            self.drain_injector();
        }
    }

    /// Cancel everything left in the injector; returns how many were discarded
    pub(crate) fn drain_injector(&self) -> usize {
        let mut discarded = 0;
        loop {
            match self.injector.steal() {
                Steal::Success(task) => {
                    if task.cancel() {
                        discarded += 1;
                    }
                }
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
        discarded
    }

    /// Timer thread, started on first use.
    ///
    /// None once shut down or if the thread could not be started.
    pub(crate) fn timer(&self) -> Option<&Arc<TimerThread>> {
        if self.is_shutdown() {
            return None;
        }
        let timer = self
            .timer
            .get_or_init(|| {
                let timer = TimerThread::new();
                let name = format!("{}-timer", self.thread_prefix);
                match timer.start(name) {
                    Ok(()) => Some(timer),
                    Err(err) => {
                        log::error!("failed to start timer thread: {}", err);
                        None
                    }
                }
            })
            .as_ref()?;
        if self.is_shutdown() {
            timer.stop();
            return None;
        }
        Some(timer)
    }

    /// Flip the shutdown flag; returns false if it was already set
    fn begin_shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.idle.notify_all();
        if let Some(Some(timer)) = self.timer.get() {
            timer.stop();
        }
        true
    }

    fn stats(&self) -> SchedulerStats {
        let acc = &self.accounting;
        SchedulerStats {
            spawned: acc.spawned.load(Ordering::Relaxed),
            completed: acc.completed.load(Ordering::Relaxed),
            failed: acc.failed.load(Ordering::Relaxed),
            cancelled: acc.cancelled.load(Ordering::Relaxed),
            stolen: acc.stolen.load(Ordering::Relaxed),
            active: acc.active(),
        }
    }
}

struct Inner {
    shared: Arc<Shared>,
    workers: Mutex<Vec<Worker>>,
    config: SchedulerConfig,
    worker_count: usize,
}

impl Inner {
    fn shutdown(&self) {
        if !self.shared.begin_shutdown() {
            return;
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            worker.join();
        }
        let discarded = self.shared.drain_injector();

        log::debug!(
            "scheduler {} shut down, {} queued tasks discarded",
            self.shared.id,
            discarded
        );
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a work-stealing scheduler.
///
/// Handles are cheap to clone; the worker threads shut down when the last
/// handle is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler with `worker_count` threads (0 = one per CPU).
    ///
    /// # Panics
    ///
    /// Panics if the operating system cannot create the worker threads.
    pub fn new(worker_count: usize) -> Self {
        Self::with_config(SchedulerConfig::new(worker_count))
            .unwrap_or_else(|err| panic!("failed to start scheduler: {}", err))
    }

    /// Create a scheduler from a full configuration
    pub fn with_config(mut config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.max_pending = config.max_pending.map(|n| n.max(1));
        let worker_count = config.effective_workers();

        let shared = Arc::new(Shared {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            injector: Arc::new(Injector::new()),
            idle: IdleSignal::new(),
            shutdown: AtomicBool::new(false),
            accounting: Arc::new(TaskAccounting::with_admission(config.max_pending)),
            timer: OnceLock::new(),
            thread_prefix: config.thread_prefix.clone(),
        });

        // Create all deques first so every worker gets its siblings' stealers
        let locals: Vec<CWorker<Arc<Task>>> =
            (0..worker_count).map(|_| CWorker::new_lifo()).collect();
        let stealers: Vec<Stealer<Arc<Task>>> = locals.iter().map(|w| w.stealer()).collect();

        let mut workers = Vec::with_capacity(worker_count);
        for (index, local) in locals.into_iter().enumerate() {
            let siblings = stealers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, s)| s.clone())
                .collect();
            let deque = WorkerDeque::new(local, siblings, shared.injector.clone());
            let name = format!("{}-{}", config.thread_prefix, index);

            match Worker::start(index, deque, shared.clone(), name, config.stack_size) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    shared.begin_shutdown();
                    for worker in workers {
                        worker.join();
                    }
                    return Err(err);
                }
            }
        }

        log::debug!(
            "scheduler {} started with {} workers{}",
            shared.id,
            worker_count,
            match config.max_pending {
                Some(n) => format!(", max {} pending", n),
                None => String::new(),
            }
        );

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                workers: Mutex::new(workers),
                config,
                worker_count,
            }),
        })
    }

    /// The process-wide scheduler, configured from the environment.
    ///
    /// Created on first use and never shut down.
    ///
    /// # Panics
    ///
    /// Panics if the worker threads cannot be created.
    pub fn global() -> &'static Scheduler {
        GLOBAL.get_or_init(|| {
            let config = SchedulerConfig::from_env().unwrap_or_else(|err| {
                log::warn!("{}; using default scheduler configuration", err);
                SchedulerConfig::default()
            });
            Scheduler::with_config(config)
                .unwrap_or_else(|err| panic!("failed to start global scheduler: {}", err))
        })
    }

    /// Run `func` on a worker and return a handle to its result.
    ///
    /// Returns immediately unless the scheduler is bounded and full. After
    /// shutdown the returned Future is already resolved as cancelled.
    pub fn spawn<F, T>(&self, func: F) -> Future<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match self.inner.shared.spawn_task(func) {
            Ok(future) => future,
            Err(err) => {
                log::warn!("spawn rejected: {}", err);
                Future::cancelled()
            }
        }
    }

    /// Like [`spawn`](Self::spawn) but reports a shut-down scheduler as an error
    pub fn try_spawn<F, T>(&self, func: F) -> Result<Future<T>, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.inner.shared.spawn_task(func)
    }

    /// Stop accepting tasks, let running tasks finish and join the workers.
    ///
    /// Queued tasks are discarded and their Futures resolve as cancelled.
    /// Calling this from inside a task does not join the calling worker.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Whether shutdown has begun
    pub fn is_shutdown(&self) -> bool {
        self.inner.shared.is_shutdown()
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    /// Configuration the scheduler was built with
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Whether the calling thread is one of this scheduler's workers
    pub fn is_worker_thread(&self) -> bool {
        worker::current_scheduler() == Some(self.inner.shared.id)
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.inner.shared.stats()
    }

    /// Wait until no task is queued or running, up to `timeout`
    ///
    /// Returns true if the scheduler went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner
            .shared
            .accounting
            .wait_idle(Instant::now() + timeout)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.inner.shared.id)
            .field("workers", &self.inner.worker_count)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
