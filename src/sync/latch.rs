//! One-shot countdown latch.
//!
//! A latch starts at a count and releases every waiter once the count reaches
//! zero. It never resets; counting down past zero is a no-op.

use crate::cx::Cx;
use crate::error::LatchError;
use crate::tracing_compat::debug;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A countdown latch.
#[derive(Debug)]
pub struct CountdownLatch {
    count: Mutex<usize>,
    reached_zero: Condvar,
}

impl CountdownLatch {
    /// Creates a latch that opens after `count` calls to
    /// [`count_down`](Self::count_down).
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            reached_zero: Condvar::new(),
        }
    }

    /// Decrements the count, waking all waiters when it reaches zero.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            drop(count);
            self.reached_zero.notify_all();
            debug!("countdown latch opened");
        }
    }

    /// Returns the current count.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Blocks until the count reaches zero.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::Cancelled`] if `cx` is cancelled first.
    pub fn wait(&self, cx: &Cx) -> Result<(), LatchError> {
        let mut count = self.count.lock();
        loop {
            if *count == 0 {
                return Ok(());
            }
            if let Some(reason) = cx.cancel_reason() {
                return Err(LatchError::Cancelled(reason));
            }
            let _ = self.reached_zero.wait_for(&mut count, cx.poll_interval());
        }
    }

    /// Blocks until the count reaches zero or `timeout` elapses.
    ///
    /// Returns `Ok(true)` if the latch opened, `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::Cancelled`] if `cx` is cancelled first.
    pub fn wait_timeout(&self, cx: &Cx, timeout: Duration) -> Result<bool, LatchError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut count = self.count.lock();
        loop {
            if *count == 0 {
                return Ok(true);
            }
            if let Some(reason) = cx.cancel_reason() {
                return Err(LatchError::Cancelled(reason));
            }
            let mut slice = cx.poll_interval();
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                slice = slice.min(deadline - now);
            }
            let _ = self.reached_zero.wait_for(&mut count, slice);
        }
    }
}
