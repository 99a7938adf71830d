//! Integration tests for the work-stealing scheduler

use goflow_runtime::{
    await_all, go, Mutex, Scheduler, SchedulerConfig, SchedulerError, TaskError, TaskState,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_ten_thousand_tasks_run_exactly_once() {
    let scheduler = Scheduler::new(4);
    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..10_000).map(|_| AtomicUsize::new(0)).collect());

    let futures: Vec<_> = (0..10_000)
        .map(|i| {
            let runs = runs.clone();
            scheduler.spawn(move || {
                runs[i].fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    for result in await_all(futures) {
        assert_eq!(result, Ok(()));
    }

    assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));
    let stats = scheduler.stats();
    assert_eq!(stats.spawned, 10_000);
    assert_eq!(stats.completed, 10_000);
    assert_eq!(stats.active, 0);
}

#[test]
fn test_nested_spawns_are_stolen_by_idle_workers() {
    let scheduler = Scheduler::new(4);
    let inner = scheduler.clone();
    let threads = Arc::new(parking_lot::Mutex::new(HashSet::new()));
    let seen = threads.clone();

    // One task fans out from a worker; its children land in that worker's
    // deque and the other workers have to steal them.
    let parent = scheduler.spawn(move || {
        let children: Vec<_> = (0..64)
            .map(|_| {
                let seen = seen.clone();
                inner.spawn(move || {
                    std::thread::sleep(Duration::from_millis(2));
                    seen.lock().insert(std::thread::current().id());
                })
            })
            .collect();
        children.len()
    });
    assert_eq!(parent.join(), Ok(64));
    assert!(scheduler.wait_idle(Duration::from_secs(10)));

    assert!(threads.lock().len() > 1);
    assert!(scheduler.stats().stolen > 0);
}

#[test]
fn test_panicking_tasks_do_not_poison_the_pool() {
    let scheduler = Scheduler::new(2);
    let failures: Vec<_> = (0..8)
        .map(|i| scheduler.spawn(move || -> i32 { panic!("task {}", i) }))
        .collect();
    for (i, future) in failures.into_iter().enumerate() {
        assert_eq!(future.join(), Err(TaskError::Panicked(format!("task {}", i))));
    }

    let ok = scheduler.spawn(|| "still alive");
    assert_eq!(ok.join(), Ok("still alive"));
    assert_eq!(scheduler.stats().failed, 8);
}

#[test]
fn test_future_result_is_replayable() {
    let scheduler = Scheduler::new(1);
    let future = scheduler.spawn(|| String::from("value"));
    assert_eq!(future.result(), Ok("value".to_string()));
    assert_eq!(future.result(), Ok("value".to_string()));
    assert_eq!(future.state(), TaskState::Completed);
    assert!(future.is_done());
}

#[test]
fn test_wait_timeout_on_slow_task() {
    let scheduler = Scheduler::new(1);
    let future = scheduler.spawn(|| std::thread::sleep(Duration::from_millis(100)));
    assert!(!future.wait_timeout(Duration::from_millis(5)));
    assert!(future.wait_timeout(Duration::from_secs(5)));
}

#[test]
fn test_mutex_counter_across_workers() {
    let scheduler = Scheduler::new(4);
    let counter = Arc::new(Mutex::new(0u64));
    let futures: Vec<_> = (0..100)
        .map(|_| {
            let counter = counter.clone();
            scheduler.spawn(move || {
                for _ in 0..100 {
                    *counter.acquire() += 1;
                }
            })
        })
        .collect();
    await_all(futures);
    assert_eq!(*counter.acquire(), 10_000);
}

#[test]
fn test_mutex_released_when_task_panics() {
    let scheduler = Scheduler::new(2);
    let lock = Arc::new(Mutex::new(0));
    let held = lock.clone();
    let failed = scheduler.spawn(move || {
        let _guard = held.acquire();
        panic!("holding the lock");
    });
    assert!(matches!(failed.join(), Err(TaskError::Panicked(_))));
    assert!(!lock.is_locked());
    assert!(lock.try_acquire().is_some());
}

#[test]
fn test_try_spawn_after_shutdown() -> anyhow::Result<()> {
    let scheduler = Scheduler::with_config(SchedulerConfig::new(2).with_thread_prefix("it"))?;
    assert_eq!(scheduler.try_spawn(|| 1)?.join(), Ok(1));
    scheduler.shutdown();
    assert_eq!(scheduler.try_spawn(|| 1).unwrap_err(), SchedulerError::ShutDown);
    Ok(())
}

#[test]
fn test_global_go() {
    let futures: Vec<_> = (0..16).map(|i| go(move || i * 2)).collect();
    let values: Vec<i32> = await_all(futures).into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(values, (0..16).map(|i| i * 2).collect::<Vec<_>>());
}
