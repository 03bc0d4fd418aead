//! Execution substrate.
//!
//! [`WorkerPool`] runs CPU-bound jobs on a fixed set of work-stealing worker
//! threads. It is passed explicitly to the components that fork work; nothing
//! in the crate creates a pool implicitly.

pub mod pool;
pub mod scheduler;

pub use pool::{PoolHandle, TaskHandle, WorkerPool};
