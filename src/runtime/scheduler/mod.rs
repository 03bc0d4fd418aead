//! Job queues used by the worker pool.
//!
//! Each worker owns a LIFO deque; jobs spawned from outside the pool land in
//! the [`GlobalQueue`]. Idle workers drain the global queue and then steal
//! from their peers.

pub mod global_queue;
pub mod stealing;

pub use global_queue::GlobalQueue;
pub use stealing::steal_task;
