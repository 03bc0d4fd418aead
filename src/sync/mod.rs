//! Blocking synchronization primitives.
//!
//! # Primitives
//!
//! - [`AccessGate`]: Bounded concurrent-permit gate (counting semaphore)
//! - [`CountdownLatch`]: One-shot countdown that releases all waiters at zero
//!
//! # Cancel Safety
//!
//! - Cancellation during wait: clean abort, no permit held
//! - Cancellation while holding: the [`GatePermit`] is dropped and released
//! - Panic while holding: the permit is released via unwind

mod gate;
mod latch;

pub use gate::{AccessGate, GatePermit};
pub use latch::CountdownLatch;
