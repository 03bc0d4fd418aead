//! Bounded channels and the producer/consumer pipeline built on them.
//!
//! # Termination Protocol
//!
//! Items travel as [`Message::Data`]; a producer that is done enqueues
//! [`Message::Stop`] once per consumer that should exit. Which producer emits
//! how many stops is decided up front by a [`StopPlan`].
//!
//! # Example
//!
//! ```ignore
//! use turnstile::channel::{BoundedChannel, Message};
//!
//! let channel = BoundedChannel::new(10);
//! channel.put(&cx, 42)?;
//! channel.finish(&cx, 1)?;
//!
//! assert_eq!(channel.take(&cx)?, Message::Data(42));
//! assert_eq!(channel.take(&cx)?, Message::Stop);
//! ```
//!
//! # Module Contents
//!
//! - [`bounded`]: The channel itself
//! - [`pipeline`]: Stop planning and a scoped-thread pipeline runner

pub mod bounded;
pub mod pipeline;

pub use bounded::{BoundedChannel, Message};
pub use pipeline::{Emitter, Pipeline, PipelineError, PipelineReport, StopPlan};
