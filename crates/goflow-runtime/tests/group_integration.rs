//! Integration tests for groups, error groups and parallel_map

use goflow_runtime::{
    parallel_map_on, try_parallel_map_on, CancelReason, CancelToken, Channel, ErrGroup, Group,
    Scheduler, Select, Semaphore, TaskError, WaitGroup,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, PartialEq, thiserror::Error)]
enum FetchError {
    #[error("not found: {0}")]
    NotFound(u32),
    #[error(transparent)]
    Task(#[from] TaskError),
}

#[test]
fn test_go_map_square() {
    let scheduler = Scheduler::new(4);
    let group = Group::with_scheduler(&scheduler, None);
    assert_eq!(group.go_map(|x: i32| x * x, vec![1, 2, 3, 4]), Ok(vec![1, 4, 9, 16]));
}

#[test]
fn test_errgroup_one_failure_among_nine_successes() {
    let scheduler = Scheduler::new(4);
    let group = ErrGroup::<FetchError>::with_scheduler(&scheduler, None);
    let succeeded = Arc::new(AtomicUsize::new(0));

    let futures: Vec<_> = (0..10u32)
        .map(|id| {
            let succeeded = succeeded.clone();
            group.go(move || {
                if id == 9 {
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while succeeded.load(Ordering::SeqCst) < 9 && Instant::now() < deadline {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    return Err(FetchError::NotFound(id));
                }
                succeeded.fetch_add(1, Ordering::SeqCst);
                Ok(id * 100)
            })
        })
        .collect();

    assert_eq!(group.wait(), Err(FetchError::NotFound(9)));
    let results: Vec<_> = futures.into_iter().map(|f| f.join()).collect();
    for (id, result) in results.iter().enumerate().take(9) {
        assert_eq!(*result, Ok(Some(id as u32 * 100)));
    }
    assert_eq!(results[9], Ok(None));
}

#[test]
fn test_errgroup_cancellation_skips_queued_work() {
    let scheduler = Scheduler::new(2);
    let group = ErrGroup::<FetchError>::with_scheduler(&scheduler, Some(2));
    let executed = Arc::new(AtomicUsize::new(0));

    let _ = group.go(|| Err::<(), _>(FetchError::NotFound(0)));
    let mut futures = Vec::new();
    for _ in 0..50 {
        let executed = executed.clone();
        futures.push(group.go(move || {
            std::thread::sleep(Duration::from_millis(2));
            executed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
    }

    assert_eq!(group.wait(), Err(FetchError::NotFound(0)));
    let cancelled = futures
        .into_iter()
        .filter(|f| f.result() == Err(TaskError::Cancelled))
        .count();
    assert!(cancelled > 0);
    assert_eq!(executed.load(Ordering::SeqCst) + cancelled, 50);
}

#[test]
fn test_group_limit_with_semaphore_accounting() {
    let scheduler = Scheduler::new(8);
    let group = Group::with_scheduler(&scheduler, Some(2));
    let slots = Arc::new(Semaphore::new(2));

    for _ in 0..20 {
        let slots = slots.clone();
        let _ = group.go(move || {
            // Never blocks: the group admits at most two tasks at once.
            assert_eq!(slots.try_acquire(1), Ok(true));
            std::thread::sleep(Duration::from_millis(1));
            slots.release(1);
        });
    }
    group.wait();
    assert_eq!(slots.available_permits(), 2);
}

#[test]
fn test_wait_group_with_scheduler_tasks() {
    let scheduler = Scheduler::new(3);
    let wg = Arc::new(WaitGroup::new());
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..30 {
        wg.add(1);
        let wg = wg.clone();
        let counter = counter.clone();
        let _ = scheduler.spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            wg.done();
        });
    }
    assert!(wg.wait_timeout(Duration::from_secs(5)));
    assert_eq!(counter.load(Ordering::SeqCst), 30);
}

#[test]
fn test_parallel_map_large_input() {
    let scheduler = Scheduler::new(4);
    let out = parallel_map_on(&scheduler, |s: String| s.len(), (0..500).map(|i| "x".repeat(i)))
        .unwrap();
    assert_eq!(out, (0..500).collect::<Vec<_>>());
}

#[test]
fn test_try_parallel_map_custom_error() {
    let scheduler = Scheduler::new(4);
    let result: Result<Vec<u32>, FetchError> = try_parallel_map_on(
        &scheduler,
        |id: u32| if id == 13 { Err(FetchError::NotFound(id)) } else { Ok(id) },
        0..40,
    );
    assert_eq!(result, Err(FetchError::NotFound(13)));
}

#[test]
fn test_nested_groups_inside_tasks() {
    let scheduler = Scheduler::new(4);
    let outer = Group::with_scheduler(&scheduler, None);
    let inner_scheduler = scheduler.clone();
    let sums = outer
        .go_map(
            move |base: u64| {
                let inner = Group::with_scheduler(&inner_scheduler, None);
                let parts = inner.go_map(move |x: u64| base * 10 + x, 0..3u64).unwrap();
                parts.into_iter().sum::<u64>()
            },
            1..=2u64,
        )
        .unwrap();
    assert_eq!(sums, vec![10 + 11 + 12, 20 + 21 + 22]);
}

#[test]
fn test_workers_stop_at_timeout() {
    let scheduler = Scheduler::new(3);
    let group = Group::with_scheduler(&scheduler, None);
    let token = CancelToken::with_timeout(Duration::from_millis(30));

    let steps: Vec<_> = (0..3)
        .map(|_| {
            let token = token.child();
            group.go(move || {
                let mut steps = 0u32;
                while !token.is_cancelled() && steps < 10_000 {
                    steps += 1;
                    std::thread::sleep(Duration::from_millis(1));
                }
                (steps, token.reason())
            })
        })
        .collect();
    group.wait();

    for future in steps {
        let (steps, reason) = future.join().unwrap();
        assert!(steps < 10_000);
        assert_eq!(reason, Some(CancelReason::DeadlineExceeded));
    }
}

#[test]
fn test_select_on_work_or_cancellation() {
    let token = CancelToken::new();
    let jobs = Channel::<u32>::unbounded();
    let done = token.done::<u32>();
    jobs.send(1).unwrap();

    let first = Select::new().recv(&jobs).recv(&done).wait();
    assert_eq!((first.index, first.value), (0, Some(1)));

    let canceller = token.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        canceller.cancel();
    });
    let second = Select::new().recv(&jobs).recv(&done).wait();
    assert_eq!((second.index, second.ok), (1, false));
    handle.join().unwrap();
}
