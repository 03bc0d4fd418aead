//! Bounded concurrent-permit gate.
//!
//! An [`AccessGate`] admits at most `capacity` concurrent holders of some
//! scarce resource. Contention on the non-blocking path is a boolean, never an
//! error; the blocking path is cancellable through a [`Cx`].
//!
//! # Over-release
//!
//! Releasing a permit that was never acquired is a caller bug. The gate clamps
//! the count at `capacity`, logs a warning, and reports
//! [`ReleaseError::Overflow`]. The permit count can never exceed capacity.
//!
//! # Example
//!
//! ```ignore
//! use turnstile::sync::AccessGate;
//!
//! let gate = AccessGate::new(3);
//! if gate.try_acquire() {
//!     // use the resource
//!     gate.release()?;
//! }
//!
//! // Or hold a permit for a scope:
//! let permit = gate.enter(&cx)?;
//! drop(permit);
//! ```

use crate::cx::Cx;
use crate::error::{AcquireError, ReleaseError};
use crate::tracing_compat::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct GateState {
    available: usize,
    closed: bool,
    waiters: usize,
}

/// A counting gate limiting concurrent access to `capacity` holders.
#[derive(Debug)]
pub struct AccessGate {
    capacity: usize,
    state: Mutex<GateState>,
    permit_freed: Condvar,
}

impl AccessGate {
    /// Creates a gate with `capacity` permits, all available.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "access gate created");
        Self {
            capacity,
            state: Mutex::new(GateState {
                available: capacity,
                closed: false,
                waiters: 0,
            }),
            permit_freed: Condvar::new(),
        }
    }

    /// Returns the fixed number of permits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a snapshot of the available permit count.
    ///
    /// Diagnostic only; the value may be stale as soon as it is returned.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.state.lock().available
    }

    /// Takes a permit if one is free. Never blocks.
    ///
    /// Returns false when every permit is held or the gate is closed.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.available == 0 {
            trace!(capacity = self.capacity, "try_acquire rejected");
            return false;
        }
        state.available -= 1;
        true
    }

    /// Takes a permit, blocking until one is free.
    ///
    /// Returns without holding a permit on any error.
    ///
    /// # Errors
    ///
    /// - [`AcquireError::Cancelled`] if `cx` is cancelled while waiting.
    /// - [`AcquireError::Closed`] if the gate is closed.
    pub fn acquire(&self, cx: &Cx) -> Result<(), AcquireError> {
        let mut state = self.state.lock();
        loop {
            if let Some(reason) = cx.cancel_reason() {
                // A wakeup meant for us must not be lost to the remaining waiters.
                if state.available > 0 && state.waiters > 0 {
                    self.permit_freed.notify_one();
                }
                cx.trace("access_gate::acquire cancelled");
                return Err(AcquireError::Cancelled(reason));
            }
            if state.closed {
                return Err(AcquireError::Closed);
            }
            if state.available > 0 {
                state.available -= 1;
                return Ok(());
            }

            state.waiters += 1;
            if state.waiters == 1 {
                debug!(capacity = self.capacity, "access gate contended");
            }
            let _ = self.permit_freed.wait_for(&mut state, cx.poll_interval());
            state.waiters -= 1;
        }
    }

    /// Returns a permit to the gate.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::Overflow`] if every permit was already
    /// available. The count stays at `capacity`.
    pub fn release(&self) -> Result<(), ReleaseError> {
        let mut state = self.state.lock();
        if state.available >= self.capacity {
            drop(state);
            warn!(capacity = self.capacity, "release without matching acquire");
            return Err(ReleaseError::Overflow {
                capacity: self.capacity,
            });
        }
        state.available += 1;
        if state.waiters > 0 {
            self.permit_freed.notify_one();
        }
        Ok(())
    }

    /// Acquires a permit that is released when the guard drops.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn enter(&self, cx: &Cx) -> Result<GatePermit<'_>, AcquireError> {
        self.acquire(cx)?;
        Ok(GatePermit { gate: self })
    }

    /// Non-blocking [`enter`](Self::enter).
    #[must_use]
    pub fn try_enter(&self) -> Option<GatePermit<'_>> {
        self.try_acquire().then_some(GatePermit { gate: self })
    }

    /// Returns true if any caller is blocked in [`acquire`](Self::acquire).
    ///
    /// Diagnostic only.
    #[must_use]
    pub fn has_queued_waiters(&self) -> bool {
        self.queued_waiters() > 0
    }

    /// Returns the number of callers blocked in [`acquire`](Self::acquire).
    #[must_use]
    pub fn queued_waiters(&self) -> usize {
        self.state.lock().waiters
    }

    /// Closes the gate.
    ///
    /// Blocked acquirers return [`AcquireError::Closed`] and `try_acquire`
    /// returns false from now on. Held permits may still be released.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        debug!(
            capacity = self.capacity,
            waiters = state.waiters,
            "access gate closed"
        );
        drop(state);
        self.permit_freed.notify_all();
    }

    /// Returns true if the gate is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// A held gate permit, released on drop.
#[must_use = "permit will be immediately released if not held"]
#[derive(Debug)]
pub struct GatePermit<'a> {
    gate: &'a AccessGate,
}

impl GatePermit<'_> {
    /// Keeps the permit held without releasing it.
    ///
    /// The caller becomes responsible for a matching
    /// [`AccessGate::release`].
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        // Over-release here means someone also called `release` by hand; the
        // gate already logged it.
        let _ = self.gate.release();
    }
}
