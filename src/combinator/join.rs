//! Fork-join primitive.
//!
//! `join(pool, left, right)` submits `right` to the pool, runs `left` on the
//! calling thread, then waits for `right`. The left result is always the
//! first element of the returned pair, so callers that combine the two get
//! left-to-right order regardless of which half finished first.
//!
//! [`Fork`] is the guard behind it: dropping a fork without joining it
//! cancels the job if it has not started yet. If `left` panics, the fork is
//! cancelled during unwinding and the panic continues to the caller.

use crate::error::JoinError;
use crate::runtime::{PoolHandle, TaskHandle};

/// A job submitted by [`fork`] that is cancelled if dropped unjoined.
#[derive(Debug)]
#[must_use = "dropping a Fork cancels it"]
pub struct Fork<T> {
    handle: Option<TaskHandle<T>>,
}

impl<T> Fork<T> {
    /// Waits for the forked job's result.
    ///
    /// # Errors
    ///
    /// See [`TaskHandle::join`].
    pub fn join(mut self) -> Result<T, JoinError> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Err(JoinError::Cancelled),
        }
    }

    /// Cancels the job if it has not started. Returns true if it was stopped.
    pub fn cancel(mut self) -> bool {
        self.handle.take().is_some_and(|handle| handle.cancel())
    }
}

impl<T> Drop for Fork<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
    }
}

/// Submits `f` to the pool and returns a guard for its result.
pub fn fork<F, T>(pool: &PoolHandle, f: F) -> Fork<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Fork {
        handle: Some(pool.spawn(f)),
    }
}

/// Runs `left` inline and `right` on the pool, returning both results.
///
/// # Errors
///
/// The second element is `Err` if `right` panicked or the pool refused it.
pub fn join<L, R, RA, RB>(pool: &PoolHandle, left: L, right: R) -> (RA, Result<RB, JoinError>)
where
    L: FnOnce() -> RA,
    R: FnOnce() -> RB + Send + 'static,
    RB: Send + 'static,
{
    let forked = fork(pool, right);
    let left_result = left();
    (left_result, forked.join())
}
