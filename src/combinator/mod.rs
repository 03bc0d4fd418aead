//! Fork-join combinators.
//!
//! - [`join`](join::join): run two closures in parallel, waiting for both
//! - [`fork`]: submit a closure and get a guard that cancels it when dropped
//! - [`ParallelReducer`]: divide-and-conquer reduction over a shared slice

pub mod join;
pub mod reduce;

pub use join::{Fork, fork, join};
pub use reduce::ParallelReducer;
