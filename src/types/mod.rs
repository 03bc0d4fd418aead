//! Core types shared by every primitive.
//!
//! - [`id`]: Identifier and instant types (`TaskId`, `Time`)
//! - [`cancel`]: Cancellation reason and kind types

pub mod cancel;
pub mod id;

pub use cancel::{CancelKind, CancelReason};
pub use id::{TaskId, Time};
