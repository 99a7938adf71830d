//! Task scheduler for goflow
//!
//! Implements work-stealing scheduling over a fixed pool of OS threads.

mod deque;
mod future;
mod idle;
#[allow(clippy::module_inception)]
mod scheduler;
mod task;
pub(crate) mod timer;
mod worker;

pub use future::{await_all, Future};
pub(crate) use scheduler::Shared;
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::{TaskId, TaskState};
pub(crate) use task::Task;
