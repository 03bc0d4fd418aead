//! Clock sources.
//!
//! Delay computations go through [`TimeSource`] so the same scheduler runs
//! against the monotonic [`WallClock`] in production and a manually advanced
//! [`VirtualClock`] in tests.

use crate::types::Time;
use crate::types::id::duration_to_nanos_saturating;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Time source abstraction for getting the current time.
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Time;
}

impl<C: TimeSource + ?Sized> TimeSource for Arc<C> {
    fn now(&self) -> Time {
        (**self).now()
    }
}

/// Monotonic clock for production use.
///
/// Uses `std::time::Instant` internally, so wall-clock adjustments never move
/// it. The epoch is the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        Time::from_nanos(duration_to_nanos_saturating(self.epoch.elapsed()))
    }
}

/// Virtual time source for tests.
///
/// Time only advances when explicitly told to.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use turnstile::time::{TimeSource, VirtualClock};
/// use turnstile::types::Time;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Time::ZERO);
///
/// clock.advance(Duration::from_secs(1));
/// assert_eq!(clock.now(), Time::from_secs(1));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a virtual clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a virtual clock starting at the given time.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Advances time by `by`, saturating at [`Time::MAX`].
    pub fn advance(&self, by: Duration) {
        let nanos = duration_to_nanos_saturating(by);
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(nanos))
            });
    }

    /// Advances time to the given absolute time.
    ///
    /// A target in the past is a no-op; virtual time never goes backwards.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}
