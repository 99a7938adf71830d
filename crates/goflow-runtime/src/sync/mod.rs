//! Synchronization primitives for task coordination
//!
//! All primitives block the calling OS thread. When the caller is itself a
//! scheduler worker, that worker is unavailable for other tasks until the
//! call returns.

mod cond;
mod mutex;
mod once;
mod rwlock;
mod semaphore;
mod wait_group;

pub use cond::Cond;
pub use mutex::{Mutex, MutexGuard, OwnedMutexGuard};
pub use once::Once;
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use semaphore::{OwnedPermit, Semaphore, SemaphoreError};
pub use wait_group::WaitGroup;
