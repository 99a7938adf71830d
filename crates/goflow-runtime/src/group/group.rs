//! Spawn a set of tasks and wait for all of them

use crate::error::TaskError;
use crate::scheduler::{Future, Scheduler};
use crate::sync::{OwnedPermit, Semaphore, WaitGroup};
use std::sync::Arc;

/// Keeps a task counted by its group until the callable is gone.
///
/// Dropped when the callable returns, panics, or is discarded unexecuted,
/// so the group's counter and limit permit are released on every path.
struct Tracker {
    pending: Arc<WaitGroup>,
    _permit: Option<OwnedPermit>,
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.pending.done();
    }
}

/// A set of tasks waited on together.
///
/// Every task started through [`go`](Self::go) is tracked until it finishes;
/// [`wait`](Self::wait) blocks until none are left. Individual failures are
/// not reported by `wait`: inspect the returned Futures, use
/// [`go_map`](Self::go_map), or use an [`ErrGroup`](crate::ErrGroup).
///
/// Dropping a Group waits for its tasks.
pub struct Group {
    scheduler: Scheduler,
    pending: Arc<WaitGroup>,
    limit: Option<Arc<Semaphore>>,
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl Group {
    /// Unlimited group on the global scheduler
    pub fn new() -> Self {
        Self::with_scheduler(Scheduler::global(), None)
    }

    /// Group on the global scheduler with at most `limit` tasks in flight
    pub fn with_limit(limit: usize) -> Self {
        Self::with_scheduler(Scheduler::global(), Some(limit))
    }

    /// Group on a specific scheduler, optionally limited
    pub fn with_scheduler(scheduler: &Scheduler, limit: Option<usize>) -> Self {
        Self {
            scheduler: scheduler.clone(),
            pending: Arc::new(WaitGroup::new()),
            limit: limit.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    /// Start a tracked task.
    ///
    /// With a limit, blocks while `limit` tracked tasks are in flight.
    pub fn go<F, T>(&self, f: F) -> Future<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.limit.as_ref().map(|limit| limit.acquire_owned());
        self.pending.add(1);
        let tracker = Tracker {
            pending: self.pending.clone(),
            _permit: permit,
        };
        self.scheduler.spawn(move || {
            let _tracker = tracker;
            f()
        })
    }

    /// Start a tracked task that calls `f(arg)`
    pub fn go1<F, A, T>(&self, f: F, arg: A) -> Future<T>
    where
        F: FnOnce(A) -> T + Send + 'static,
        A: Send + 'static,
        T: Send + 'static,
    {
        self.go(move || f(arg))
    }

    /// Run `f` once per item, one task each, and collect results in input order.
    ///
    /// Waits for every task; if any failed, the first failure in input
    /// order is returned.
    pub fn go_map<I, T, F>(&self, f: F, items: impl IntoIterator<Item = I>) -> Result<Vec<T>, TaskError>
    where
        F: Fn(I) -> T + Send + Sync + 'static,
        I: Send + 'static,
        T: Send + 'static,
    {
        let f = Arc::new(f);
        let futures: Vec<Future<T>> = items
            .into_iter()
            .map(|item| {
                let f = f.clone();
                self.go(move || f(item))
            })
            .collect();
        collect_in_order(futures)
    }

    /// Like [`go_map`](Self::go_map) but with one task per contiguous chunk.
    ///
    /// The input is split into as many chunks as the scheduler has workers.
    pub fn go_batch<I, T, F>(&self, f: F, items: Vec<I>) -> Result<Vec<T>, TaskError>
    where
        F: Fn(I) -> T + Send + Sync + 'static,
        I: Send + 'static,
        T: Send + 'static,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let f = Arc::new(f);
        let chunk_size = items.len().div_ceil(self.scheduler.worker_count().max(1));

        let mut futures = Vec::new();
        let mut items = items.into_iter();
        loop {
            let chunk: Vec<I> = items.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let f = f.clone();
            futures.push(self.go(move || chunk.into_iter().map(|item| f(item)).collect::<Vec<T>>()));
        }

        let chunks = collect_in_order(futures)?;
        Ok(chunks.into_iter().flatten().collect())
    }

    /// Block until every tracked task has finished
    pub fn wait(&self) {
        self.pending.wait();
    }

    /// Number of tracked tasks not yet finished
    pub fn pending(&self) -> usize {
        self.pending.count()
    }

    /// Scheduler the group spawns on
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run `body` with a fresh group and wait for it before returning
    pub fn scope<R>(body: impl FnOnce(&Group) -> R) -> R {
        let group = Group::new();
        let result = body(&group);
        group.wait();
        result
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        self.pending.wait();
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("pending", &self.pending())
            .field("limit", &self.limit.as_ref().map(|l| l.max_permits()))
            .finish()
    }
}

/// Join every future, keeping input order; the first failure in that order wins
pub(crate) fn collect_in_order<T>(futures: Vec<Future<T>>) -> Result<Vec<T>, TaskError> {
    let mut values = Vec::with_capacity(futures.len());
    let mut first_error = None;
    for future in futures {
        match future.join() {
            Ok(value) => values.push(value),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_go_map_square() {
        let scheduler = Scheduler::new(4);
        let group = Group::with_scheduler(&scheduler, None);
        let squares = group.go_map(|x: i32| x * x, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(squares, vec![1, 4, 9, 16]);
    }

    #[test]
    fn test_go_map_keeps_input_order_with_uneven_work() {
        let scheduler = Scheduler::new(4);
        let group = Group::with_scheduler(&scheduler, None);
        let out = group
            .go_map(
                |i: u64| {
                    // Early items take longest, so they finish last.
                    std::thread::sleep(Duration::from_millis(20 - i * 2));
                    i
                },
                0..10u64,
            )
            .unwrap();
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_go_map_reports_first_failure_in_input_order() {
        let scheduler = Scheduler::new(2);
        let group = Group::with_scheduler(&scheduler, None);
        let result = group.go_map(
            |i: i32| {
                if i == 1 {
                    std::thread::sleep(Duration::from_millis(20));
                    panic!("first");
                }
                if i == 3 {
                    panic!("second");
                }
                i
            },
            0..5,
        );
        assert_eq!(result, Err(TaskError::Panicked("first".into())));
    }

    #[test]
    fn test_go_batch_matches_go_map() {
        let scheduler = Scheduler::new(3);
        let group = Group::with_scheduler(&scheduler, None);
        let items: Vec<u32> = (0..100).collect();
        let doubled = group.go_batch(|x| x * 2, items).unwrap();
        assert_eq!(doubled, (0..100).map(|x| x * 2).collect::<Vec<_>>());
        assert!(group.go_batch(|x: u32| x, Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_wait_swallows_failures() {
        let scheduler = Scheduler::new(2);
        let group = Group::with_scheduler(&scheduler, None);
        let ok = group.go(|| 1);
        let bad = group.go(|| -> i32 { panic!("ignored by wait") });
        group.wait();
        assert_eq!(group.pending(), 0);
        assert_eq!(ok.join(), Ok(1));
        assert!(matches!(bad.join(), Err(TaskError::Panicked(_))));
    }

    #[test]
    fn test_limit_caps_in_flight() {
        let scheduler = Scheduler::new(8);
        let group = Group::with_scheduler(&scheduler, Some(3));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..24 {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let _ = group.go(move || {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        group.wait();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_go1_and_drop_waits() {
        let scheduler = Scheduler::new(2);
        let done = Arc::new(AtomicUsize::new(0));
        {
            let group = Group::with_scheduler(&scheduler, None);
            for i in 0..5 {
                let done = done.clone();
                let _ = group.go1(
                    move |n: usize| {
                        std::thread::sleep(Duration::from_millis(5));
                        done.fetch_add(n, Ordering::SeqCst);
                    },
                    i,
                );
            }
        }
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_scope_on_global_scheduler() {
        let total = Group::scope(|g| {
            let futures: Vec<_> = (1..=4).map(|i| g.go(move || i)).collect();
            futures.into_iter().map(|f| f.join().unwrap()).sum::<i32>()
        });
        assert_eq!(total, 10);
    }

    #[test]
    fn test_cancelled_task_releases_group() {
        let scheduler = Scheduler::new(1);
        let group = Group::with_scheduler(&scheduler, None);
        let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let blocker = group.go(move || {
            started_tx.send(()).ok();
            rx.recv().ok();
        });
        started_rx.recv().unwrap();
        let queued = group.go(|| 1);
        assert!(queued.cancel());
        assert_eq!(group.pending(), 1);
        tx.send(()).unwrap();
        group.wait();
        blocker.join().unwrap();
    }
}
