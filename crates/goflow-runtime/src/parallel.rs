//! Ordered fan-out / fan-in over a sequence
//!
//! Each item becomes one task; results come back in input order no matter
//! which worker finished first. Zero or one item runs on the caller.

use crate::error::TaskError;
use crate::group::{ErrGroup, Group};
use crate::scheduler::Scheduler;

/// Apply `f` to every item on the global scheduler.
///
/// Returns the first failure in input order if any task panicked.
pub fn parallel_map<I, R, F>(f: F, items: impl IntoIterator<Item = I>) -> Result<Vec<R>, TaskError>
where
    F: Fn(I) -> R + Send + Sync + 'static,
    I: Send + 'static,
    R: Send + 'static,
{
    parallel_map_on(Scheduler::global(), f, items)
}

/// [`parallel_map`] on a specific scheduler
pub fn parallel_map_on<I, R, F>(
    scheduler: &Scheduler,
    f: F,
    items: impl IntoIterator<Item = I>,
) -> Result<Vec<R>, TaskError>
where
    F: Fn(I) -> R + Send + Sync + 'static,
    I: Send + 'static,
    R: Send + 'static,
{
    let items: Vec<I> = items.into_iter().collect();
    if items.len() <= 1 {
        return items
            .into_iter()
            .map(|item| run_inline(|| f(item)))
            .collect();
    }
    Group::with_scheduler(scheduler, None).go_map(f, items)
}

/// Fail-fast variant: the first error cancels items not yet started.
pub fn try_parallel_map<I, R, E, F>(f: F, items: impl IntoIterator<Item = I>) -> Result<Vec<R>, E>
where
    F: Fn(I) -> Result<R, E> + Send + Sync + 'static,
    I: Send + 'static,
    R: Send + 'static,
    E: From<TaskError> + Send + 'static,
{
    try_parallel_map_on(Scheduler::global(), f, items)
}

/// [`try_parallel_map`] on a specific scheduler
pub fn try_parallel_map_on<I, R, E, F>(
    scheduler: &Scheduler,
    f: F,
    items: impl IntoIterator<Item = I>,
) -> Result<Vec<R>, E>
where
    F: Fn(I) -> Result<R, E> + Send + Sync + 'static,
    I: Send + 'static,
    R: Send + 'static,
    E: From<TaskError> + Send + 'static,
{
    let items: Vec<I> = items.into_iter().collect();
    if items.len() <= 1 {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(run_inline(|| f(item)).map_err(E::from)??);
        }
        return Ok(out);
    }
    ErrGroup::with_scheduler(scheduler, None).go_map(f, items)
}

/// Run on the calling thread, reporting a panic the way a task would
fn run_inline<R>(f: impl FnOnce() -> R) -> Result<R, TaskError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(TaskError::from_panic)
}
