//! Identifier and instant types.
//!
//! [`TaskId`] names a unit of work submitted to a [`WorkerPool`]; [`Time`] is a
//! nanosecond instant measured from the epoch of some [`TimeSource`].
//!
//! [`WorkerPool`]: crate::runtime::WorkerPool
//! [`TimeSource`]: crate::time::TimeSource

use core::fmt;
use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static EPHEMERAL_TASK_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a task submitted to a worker pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    /// Creates a task ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Allocates a process-unique ID for work that runs outside any pool.
    #[must_use]
    pub fn new_ephemeral() -> Self {
        Self(EPHEMERAL_TASK_COUNTER.fetch_add(1, Ordering::Relaxed) | (1 << 63))
    }

    /// Returns true if this ID was allocated by [`new_ephemeral`](Self::new_ephemeral).
    #[inline]
    #[must_use]
    pub const fn is_ephemeral(self) -> bool {
        self.0 & (1 << 63) != 0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ephemeral() {
            write!(f, "TaskId(~{})", self.0 & !(1 << 63))
        } else {
            write!(f, "TaskId({})", self.0)
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An instant on a toolkit clock.
///
/// With [`WallClock`](crate::time::WallClock) this is the monotonic time
/// elapsed since the clock was created. With
/// [`VirtualClock`](crate::time::VirtualClock) it is whatever the test
/// advanced it to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Time(u64);

impl Time {
    /// The zero instant (epoch).
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new time from nanoseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a new time from milliseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a new time from seconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns the time as nanoseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time as milliseconds since epoch (truncated).
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Adds a duration in nanoseconds, saturating on overflow.
    #[inline]
    #[must_use]
    pub const fn saturating_add_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Subtracts a duration in nanoseconds, saturating at zero.
    #[inline]
    #[must_use]
    pub const fn saturating_sub_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_sub(nanos))
    }

    /// Returns the nanoseconds between two times.
    ///
    /// Returns 0 if `self` is before `earlier`.
    #[inline]
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Returns how long from `now` until `self`, or zero if already reached.
    #[inline]
    #[must_use]
    pub const fn remaining_from(self, now: Self) -> Duration {
        Duration::from_nanos(self.duration_since(now))
    }
}

#[inline]
pub(crate) fn duration_to_nanos_saturating(duration: Duration) -> u64 {
    duration.as_nanos().min(u128::from(u64::MAX)) as u64
}

impl Add<Duration> for Time {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add_nanos(duration_to_nanos_saturating(rhs))
    }
}

impl fmt::Debug for Time {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_conversions() {
        assert_eq!(Time::from_secs(1).as_nanos(), 1_000_000_000);
        assert_eq!(Time::from_millis(1).as_nanos(), 1_000_000);
        assert_eq!(Time::from_nanos(1_500_000_000).as_millis(), 1500);
    }

    #[test]
    fn time_arithmetic_saturates() {
        let t1 = Time::from_secs(1);
        let t2 = t1.saturating_add_nanos(500_000_000);
        assert_eq!(t2.as_millis(), 1500);
        assert_eq!(t2.saturating_sub_nanos(2_000_000_000), Time::ZERO);
        assert_eq!(Time::MAX + Duration::from_secs(1), Time::MAX);
    }

    #[test]
    fn remaining_from_is_zero_once_reached() {
        let deadline = Time::from_millis(200);
        assert_eq!(
            deadline.remaining_from(Time::from_millis(50)),
            Duration::from_millis(150)
        );
        assert_eq!(deadline.remaining_from(Time::from_millis(300)), Duration::ZERO);
    }

    #[test]
    fn time_display_picks_unit() {
        assert_eq!(Time::from_nanos(12).to_string(), "12ns");
        assert_eq!(Time::from_millis(42).to_string(), "42ms");
        assert_eq!(Time::from_millis(1_250).to_string(), "1.250s");
    }

    #[test]
    fn ephemeral_task_ids_are_distinct() {
        let a = TaskId::new_ephemeral();
        let b = TaskId::new_ephemeral();
        assert_ne!(a, b);
        assert!(a.is_ephemeral());
        assert!(!TaskId::from_raw(7).is_ephemeral());
        assert_eq!(format!("{:?}", TaskId::from_raw(7)), "TaskId(7)");
    }
}
