//! Channels and multi-way select
//!
//! [`Channel`] is the general-purpose primitive: unbuffered, bounded or
//! unbounded, usable in a [`Select`]. [`FastChannel`] trades those two
//! features for lock-free buffering.

mod channel;
mod fast;
mod select;
mod waiter;

pub use channel::{Channel, IntoIter, Iter};
pub use fast::{FastChannel, FastIntoIter, FastIter};
pub use select::{Select, Selected};
