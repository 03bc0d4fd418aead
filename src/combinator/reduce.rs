//! Parallel divide-and-conquer reduction.
//!
//! A range `[start, end)` no longer than the threshold is reduced by the leaf
//! function directly. A longer range is split at its midpoint; the right half
//! is forked onto the pool, the left half is computed inline, and the two are
//! merged as `combine(left, right)`. The merge tree therefore preserves
//! left-to-right order, so an order-sensitive combine such as concatenation
//! gives the same answer as a sequential fold.
//!
//! The threshold only changes how the work is cut, never the result of an
//! associative combine.
//!
//! # Failure
//!
//! The first leaf error, panic, or pool rejection wins. It cancels the
//! reduction's context so branches still splitting stop at their next split,
//! unstarted forks are cancelled as their guards drop, and the caller gets
//! that first failure. A cancelled caller context ends the reduction with
//! [`ReduceError::Cancelled`].

use parking_lot::Mutex;
use std::convert::Infallible;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Range};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::combinator::join::fork;
use crate::config::{DEFAULT_REDUCE_THRESHOLD, ReducerConfig};
use crate::cx::Cx;
use crate::error::ReduceError;
use crate::runtime::PoolHandle;
use crate::tracing_compat::{debug, trace};
use crate::types::CancelReason;
use crate::util::panic_message;

/// Fork-join reducer bound to a worker pool.
#[derive(Debug, Clone)]
pub struct ParallelReducer {
    pool: PoolHandle,
    threshold: usize,
}

impl ParallelReducer {
    /// Creates a reducer that splits ranges longer than `threshold`.
    ///
    /// A threshold of 0 is treated as 1.
    #[must_use]
    pub fn new(pool: PoolHandle, threshold: usize) -> Self {
        Self {
            pool,
            threshold: threshold.max(1),
        }
    }

    /// Creates a reducer with the default threshold.
    #[must_use]
    pub fn with_default_threshold(pool: PoolHandle) -> Self {
        Self::new(pool, DEFAULT_REDUCE_THRESHOLD)
    }

    /// Creates a reducer using the threshold from configuration.
    #[must_use]
    pub fn from_config(pool: PoolHandle, config: &ReducerConfig) -> Self {
        Self::new(pool, config.threshold)
    }

    /// Returns the sequential cutoff.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Sums `data` in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::Cancelled`] if `cx` is cancelled,
    /// [`ReduceError::Panicked`] if an addition panics (for example on
    /// overflow in a debug build), or [`ReduceError::Shutdown`] if the pool
    /// stopped accepting work.
    pub fn sum<T>(&self, cx: &Cx, data: Arc<[T]>) -> Result<T, ReduceError<Infallible>>
    where
        T: Copy + Add<Output = T> + Sum<T> + Send + Sync + 'static,
    {
        self.reduce(
            cx,
            data,
            |chunk: &[T]| Ok(chunk.iter().copied().sum()),
            |left, right| left + right,
        )
    }

    /// Reduces all of `data`.
    ///
    /// `leaf` reduces a slice no longer than the threshold, including the
    /// empty slice when `data` is empty. `combine` receives the left half's
    /// result first.
    ///
    /// # Errors
    ///
    /// - [`ReduceError::Failed`] with the first leaf error.
    /// - [`ReduceError::Panicked`] if a leaf or combine panicked.
    /// - [`ReduceError::Cancelled`] if `cx` was cancelled.
    /// - [`ReduceError::Shutdown`] if the pool stopped accepting work.
    pub fn reduce<T, R, E, L, C>(
        &self,
        cx: &Cx,
        data: Arc<[T]>,
        leaf: L,
        combine: C,
    ) -> Result<R, ReduceError<E>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
        E: Send + 'static,
        L: Fn(&[T]) -> Result<R, E> + Send + Sync + 'static,
        C: Fn(R, R) -> R + Send + Sync + 'static,
    {
        let len = data.len();
        self.reduce_range(cx, data, 0..len, leaf, combine)
    }

    /// Reduces `data[range]`.
    ///
    /// # Errors
    ///
    /// As [`reduce`](Self::reduce).
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds or decreasing.
    pub fn reduce_range<T, R, E, L, C>(
        &self,
        cx: &Cx,
        data: Arc<[T]>,
        range: Range<usize>,
        leaf: L,
        combine: C,
    ) -> Result<R, ReduceError<E>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
        E: Send + 'static,
        L: Fn(&[T]) -> Result<R, E> + Send + Sync + 'static,
        C: Fn(R, R) -> R + Send + Sync + 'static,
    {
        assert!(
            range.start <= range.end && range.end <= data.len(),
            "range {range:?} out of bounds for length {}",
            data.len()
        );

        let run_cx = cx.child();
        let reduction = Reduction {
            data,
            leaf: Arc::new(leaf),
            combine: Arc::new(combine),
            threshold: self.threshold,
            pool: self.pool.clone(),
            cx: run_cx,
            first_failure: Arc::new(Mutex::new(None)),
        };
        debug!(
            start = range.start,
            end = range.end,
            threshold = self.threshold,
            "parallel reduction started"
        );

        match reduction.compute(range.start, range.end) {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Some(first) = reduction.first_failure.lock().take() {
                    return Err(first);
                }
                match cx.cancel_reason() {
                    Some(reason) => Err(ReduceError::Cancelled(reason)),
                    None => Err(err),
                }
            }
        }
    }
}

struct Reduction<T, L, C, E> {
    data: Arc<[T]>,
    leaf: Arc<L>,
    combine: Arc<C>,
    threshold: usize,
    pool: PoolHandle,
    cx: Cx,
    first_failure: Arc<Mutex<Option<ReduceError<E>>>>,
}

impl<T, L, C, E> Clone for Reduction<T, L, C, E> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            leaf: Arc::clone(&self.leaf),
            combine: Arc::clone(&self.combine),
            threshold: self.threshold,
            pool: self.pool.clone(),
            cx: self.cx.clone(),
            first_failure: Arc::clone(&self.first_failure),
        }
    }
}

impl<T, L, C, E> Reduction<T, L, C, E>
where
    T: Send + Sync + 'static,
    E: Send + 'static,
{
    fn compute<R>(&self, start: usize, end: usize) -> Result<R, ReduceError<E>>
    where
        R: Send + 'static,
        L: Fn(&[T]) -> Result<R, E> + Send + Sync + 'static,
        C: Fn(R, R) -> R + Send + Sync + 'static,
    {
        if let Some(reason) = self.cx.cancel_reason() {
            return Err(ReduceError::Cancelled(reason));
        }

        if end - start <= self.threshold {
            let chunk = &self.data[start..end];
            return match panic::catch_unwind(AssertUnwindSafe(|| (self.leaf)(chunk))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(self.fail(ReduceError::Failed(e))),
                Err(payload) => Err(self.fail(ReduceError::Panicked(panic_message(payload.as_ref())))),
            };
        }

        let mid = start + (end - start) / 2;
        trace!(start, mid, end, "splitting reduction range");

        let right_half = self.clone();
        let right = fork(&self.pool, move || right_half.compute(mid, end));
        // An early return drops `right`, which cancels it if still queued.
        let left = self.compute(start, mid)?;
        let right = match right.join() {
            Ok(result) => result?,
            Err(join_err) => return Err(self.fail(join_err.into())),
        };

        panic::catch_unwind(AssertUnwindSafe(|| (self.combine)(left, right)))
            .map_err(|payload| self.fail(ReduceError::Panicked(panic_message(payload.as_ref()))))
    }

    /// Records `err` if it is the first failure and cancels the reduction.
    ///
    /// The first failure is parked in `first_failure` and replaced on the
    /// unwinding path by a cancellation; the entry point swaps it back.
    fn fail(&self, err: ReduceError<E>) -> ReduceError<E> {
        let mut first = self.first_failure.lock();
        if first.is_some() {
            return err;
        }
        *first = Some(err);
        drop(first);
        let reason = CancelReason::sibling_failed();
        self.cx.cancel(reason.clone());
        debug!("reduction failed; cancelling remaining branches");
        ReduceError::Cancelled(reason)
    }
}

impl<T, L, C, E> fmt::Debug for Reduction<T, L, C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reduction")
            .field("len", &self.data.len())
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
