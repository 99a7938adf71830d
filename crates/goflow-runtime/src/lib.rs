//! goflow runtime
//!
//! Go-style concurrency on OS threads:
//! - **Scheduler**: work-stealing pool that runs tasks and hands back Futures (`scheduler` module)
//! - **Channels**: closable FIFO channels, a lock-free variant and multi-way select (`chan` module)
//! - **Groups**: wait for a set of tasks, optionally stopping at the first error (`group` module)
//! - **Sync**: Mutex, RwLock, Cond, Once, Semaphore and WaitGroup (`sync` module)
//! - **Cancellation**: `CancelToken` with deadlines and child tokens (`group` module)
//! - **Timers**: `after`, `after_func` and `Ticker` (`time` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use goflow_runtime::{go, Channel, Group};
//!
//! let results = Channel::bounded(4);
//! let group = Group::new();
//! for i in 0..4 {
//!     let tx = results.clone();
//!     let _ = group.go(move || tx.send(i * i));
//! }
//! group.wait();
//! results.close().unwrap();
//! let total: i32 = results.iter().sum();
//!
//! let answer = go(|| 42).join().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Modules
// ============================================================================

/// Channels and select
pub mod chan;

/// Scheduler configuration
pub mod config;

/// Error types
pub mod error;

/// Task groups
pub mod group;

/// Ordered parallel map
pub mod parallel;

/// Work-stealing scheduler, tasks and futures
pub mod scheduler;

/// Blocking synchronization primitives
pub mod sync;

/// Timers driven by the scheduler
pub mod time;

// ============================================================================
// Re-exports
// ============================================================================

pub use chan::{Channel, FastChannel, Select, Selected};
pub use config::SchedulerConfig;
pub use error::{
    CancelReason, ChannelError, ConfigError, RecvTimeoutError, SchedulerError, SendError, TaskError,
    TryRecvError, TrySendError,
};
pub use group::{CancelToken, ErrGroup, Group};
pub use parallel::{parallel_map, parallel_map_on, try_parallel_map, try_parallel_map_on};
pub use scheduler::{await_all, Future, Scheduler, SchedulerStats, TaskId, TaskState};
pub use sync::{
    Cond, Mutex, MutexGuard, Once, OwnedMutexGuard, OwnedPermit, RwLock, RwLockReadGuard,
    RwLockWriteGuard, Semaphore, SemaphoreError, WaitGroup,
};
pub use time::{after, after_func, Ticker, TimerHandle};

/// Run `f` on the global scheduler
pub fn go<F, T>(f: F) -> Future<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Scheduler::global().spawn(f)
}
