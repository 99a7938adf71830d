//! Structured groups of tasks
//!
//! [`Group`] waits for a set of tasks; [`ErrGroup`] additionally keeps the
//! first error and cancels whatever has not started yet.

mod cancel;
mod errgroup;
#[allow(clippy::module_inception)]
mod group;

pub use cancel::CancelToken;
pub use errgroup::ErrGroup;
pub use group::Group;
