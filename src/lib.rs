//! Turnstile: cancel-aware concurrency building blocks for threaded Rust.
//!
//! # Overview
//!
//! Turnstile packages four primitives that show up in almost every
//! producer/consumer or fork-join program, each with an explicit
//! cancellation story:
//!
//! - [`AccessGate`]: bounds how many holders may use a scarce resource at once
//! - [`BoundedChannel`]: multi-producer multi-consumer FIFO with backpressure
//!   and a `Stop` sentinel for termination
//! - [`DelayScheduler`]: releases items no earlier than their scheduled time,
//!   earliest first, ties in insertion order
//! - [`ParallelReducer`]: divide-and-conquer reduction on a work-stealing
//!   [`WorkerPool`]
//!
//! # Core Guarantees
//!
//! - **Observable cancellation**: every blocking call takes a [`Cx`] and
//!   returns a distinct cancellation error; a cancelled `put` never inserts
//!   and a cancelled `take` never removes
//! - **No silent drops**: rejected values are handed back in the error
//! - **Explicit substrate**: pools are created by the caller and passed in
//! - **Deterministic testing**: delays run against [`time::VirtualClock`]
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, instants, cancellation reasons
//! - [`cx`]: cancellation context
//! - [`sync`]: access gate and countdown latch
//! - [`channel`]: bounded channel and the producer/consumer pipeline runner
//! - [`time`]: clocks and the delay scheduler
//! - [`runtime`]: work-stealing worker pool
//! - [`combinator`]: fork-join and parallel reduction
//! - [`config`]: configuration with env and TOML overrides
//! - [`error`](mod@error): error types
//! - [`tracing_compat`]: optional tracing integration (requires `tracing-integration` feature)
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use turnstile::{Cx, ParallelReducer, WorkerPool};
//!
//! let pool = WorkerPool::with_threads(2).unwrap();
//! let reducer = ParallelReducer::new(pool.handle(), 10);
//! let data: Arc<[u64]> = (1..=100).collect::<Vec<_>>().into();
//! assert_eq!(reducer.sum(&Cx::for_request(), data).unwrap(), 5050);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod channel;
pub mod combinator;
pub mod config;
pub mod cx;
pub mod error;
pub mod runtime;
pub mod sync;
pub mod time;
pub mod tracing_compat;
pub mod types;
pub mod util;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use channel::{BoundedChannel, Message, Pipeline, StopPlan};
pub use combinator::ParallelReducer;
pub use config::ToolkitConfig;
pub use cx::Cx;
pub use error::{
    AcquireError, Error, ErrorKind, JoinError, LatchError, RecvError, ReduceError, ReleaseError,
    Result, SendError,
};
pub use runtime::{PoolHandle, TaskHandle, WorkerPool};
pub use sync::{AccessGate, CountdownLatch, GatePermit};
pub use time::DelayScheduler;
pub use types::{CancelKind, CancelReason, TaskId, Time};
