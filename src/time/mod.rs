//! Clocks and the release-time ordered [`DelayScheduler`].
//!
//! # Clock Choice
//!
//! [`WallClock`] is monotonic: it is built on `Instant`, so adjusting the
//! system clock neither releases items early nor holds them back. Tests use
//! [`VirtualClock`] and advance it by hand.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use turnstile::time::DelayScheduler;
//!
//! let scheduler = DelayScheduler::new();
//! scheduler.put_after("later", Duration::from_secs(60));
//! scheduler.put_after("now", Duration::ZERO);
//!
//! assert_eq!(scheduler.try_take(), Some("now"));
//! assert_eq!(scheduler.try_take(), None);
//! ```

mod clock;
mod delay_queue;

pub use clock::{TimeSource, VirtualClock, WallClock};
pub use delay_queue::DelayScheduler;
