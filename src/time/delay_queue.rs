//! Release-time ordered queue.
//!
//! A [`DelayScheduler`] holds items until their release time and serves them
//! in release-time order. Items with equal release times come out in
//! insertion order.
//!
//! Readiness is judged by one [`TimeSource`] for the scheduler's whole life.
//! A blocked `take` waits for the head's remaining delay, capped at the
//! context's poll interval, and re-evaluates after every wakeup. Inserting a
//! new head wakes all blocked consumers so they can recompute their wait.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::cx::Cx;
use crate::error::RecvError;
use crate::time::{TimeSource, WallClock};
use crate::tracing_compat::trace;
use crate::types::Time;

struct DelayEntry<T> {
    release_at: Time,
    seq: u64,
    item: T,
}

impl<T> PartialEq for DelayEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.release_at == other.release_at && self.seq == other.seq
    }
}

impl<T> Eq for DelayEntry<T> {}

impl<T> Ord for DelayEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest release first, then FIFO).
        other
            .release_at
            .cmp(&self.release_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for DelayEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct DelayState<T> {
    heap: BinaryHeap<DelayEntry<T>>,
    next_seq: u64,
}

impl<T> DelayState<T> {
    fn pop_ready(&mut self, now: Time) -> Option<DelayEntry<T>> {
        if self.heap.peek()?.release_at <= now {
            self.heap.pop()
        } else {
            None
        }
    }
}

/// An unbounded queue whose items become visible at their release time.
pub struct DelayScheduler<T, C: TimeSource = WallClock> {
    clock: C,
    state: Mutex<DelayState<T>>,
    head_changed: Condvar,
}

impl<T> DelayScheduler<T, WallClock> {
    /// Creates a scheduler on a fresh monotonic clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(WallClock::new())
    }
}

impl<T> Default for DelayScheduler<T, WallClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: TimeSource> DelayScheduler<T, C> {
    /// Creates a scheduler that reads time from `clock`.
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            state: Mutex::new(DelayState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            head_changed: Condvar::new(),
        }
    }

    /// Returns the scheduler's clock.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Returns the current time on the scheduler's clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Schedules `item` for release at `release_at`. Never blocks.
    ///
    /// A release time already in the past makes the item ready at once.
    pub fn put(&self, item: T, release_at: Time) {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(DelayEntry {
            release_at,
            seq,
            item,
        });
        let new_head = state.heap.peek().is_some_and(|head| head.seq == seq);
        drop(state);
        if new_head {
            self.head_changed.notify_all();
        }
    }

    /// Schedules `item` for release `delay` from now and returns the release
    /// time.
    pub fn put_after(&self, item: T, delay: Duration) -> Time {
        let release_at = self.clock.now() + delay;
        self.put(item, release_at);
        release_at
    }

    /// Removes the earliest ready item, blocking until one is ready.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Cancelled` if `cx` is cancelled while waiting.
    pub fn take(&self, cx: &Cx) -> Result<T, RecvError> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.release(&mut state) {
                return Ok(item);
            }
            if cx.is_cancel_requested() {
                cx.trace("delay_scheduler::take cancelled");
                return Err(RecvError::Cancelled);
            }
            self.wait(&mut state, cx.poll_interval(), None);
        }
    }

    /// Like [`take`](Self::take) but gives up once `timeout` has elapsed on
    /// the scheduler's clock.
    ///
    /// Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Cancelled` if `cx` is cancelled while waiting.
    pub fn take_timeout(&self, cx: &Cx, timeout: Duration) -> Result<Option<T>, RecvError> {
        let deadline = self.clock.now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.release(&mut state) {
                return Ok(Some(item));
            }
            if cx.is_cancel_requested() {
                cx.trace("delay_scheduler::take_timeout cancelled");
                return Err(RecvError::Cancelled);
            }
            if self.clock.now() >= deadline {
                return Ok(None);
            }
            self.wait(&mut state, cx.poll_interval(), Some(deadline));
        }
    }

    /// Removes the earliest item if it is ready. Never blocks.
    pub fn try_take(&self) -> Option<T> {
        let mut state = self.state.lock();
        self.release(&mut state)
    }

    /// Removes every ready item, in release order.
    pub fn drain_ready(&self) -> Vec<T> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let mut ready = Vec::new();
        while let Some(entry) = state.pop_ready(now) {
            ready.push(entry.item);
        }
        drop(state);
        if !ready.is_empty() {
            self.head_changed.notify_all();
        }
        ready
    }

    /// Returns the release time of the earliest item, ready or not.
    #[must_use]
    pub fn peek_release_at(&self) -> Option<Time> {
        self.state.lock().heap.peek().map(|e| e.release_at)
    }

    /// Returns the number of items held, ready or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Returns true if no items are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, state: &mut MutexGuard<'_, DelayState<T>>) -> Option<T> {
        let now = self.clock.now();
        let entry = state.pop_ready(now)?;
        trace!(
            release_at = %entry.release_at,
            late_ns = now.duration_since(entry.release_at),
            "delayed item released"
        );
        if !state.heap.is_empty() {
            // Other consumers may be sleeping on the entry we just took.
            self.head_changed.notify_all();
        }
        Some(entry.item)
    }

    fn wait(
        &self,
        state: &mut MutexGuard<'_, DelayState<T>>,
        poll_interval: Duration,
        deadline: Option<Time>,
    ) {
        let now = self.clock.now();
        let mut slice = poll_interval;
        if let Some(head) = state.heap.peek() {
            slice = slice.min(head.release_at.remaining_from(now));
        }
        if let Some(deadline) = deadline {
            slice = slice.min(deadline.remaining_from(now));
        }
        let _ = self.head_changed.wait_for(state, slice);
    }
}

impl<T, C: TimeSource + fmt::Debug> fmt::Debug for DelayScheduler<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DelayScheduler")
            .field("clock", &self.clock)
            .field("len", &state.heap.len())
            .field("next_release", &state.heap.peek().map(|e| e.release_at))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::time::VirtualClock;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn virtual_scheduler<T>() -> (Arc<VirtualClock>, DelayScheduler<T, Arc<VirtualClock>>) {
        let clock = Arc::new(VirtualClock::new());
        let scheduler = DelayScheduler::with_clock(Arc::clone(&clock));
        (clock, scheduler)
    }

    #[test]
    fn items_hidden_until_release() {
        init_test("items_hidden_until_release");
        let (clock, scheduler) = virtual_scheduler();
        scheduler.put("late", Time::from_millis(100));

        let early = scheduler.try_take();
        crate::assert_with_log!(early.is_none(), "not ready yet", None::<&str>, early);

        clock.advance_to(Time::from_millis(100));
        let ready = scheduler.try_take();
        crate::assert_with_log!(ready == Some("late"), "ready at release", Some("late"), ready);
        crate::test_complete!("items_hidden_until_release");
    }

    #[test]
    fn release_order_with_stable_ties() {
        init_test("release_order_with_stable_ties");
        let (clock, scheduler) = virtual_scheduler();
        scheduler.put("t3", Time::from_millis(30));
        scheduler.put("t1-a", Time::from_millis(10));
        scheduler.put("t2", Time::from_millis(20));
        scheduler.put("t1-b", Time::from_millis(10));
        scheduler.put("t1-c", Time::from_millis(10));

        clock.advance_to(Time::from_millis(30));
        let order = scheduler.drain_ready();
        let expected = vec!["t1-a", "t1-b", "t1-c", "t2", "t3"];
        crate::assert_with_log!(order == expected, "release then insertion order", expected, order);
        crate::test_complete!("release_order_with_stable_ties");
    }

    #[test]
    fn drain_ready_leaves_future_items() {
        init_test("drain_ready_leaves_future_items");
        let (clock, scheduler) = virtual_scheduler();
        scheduler.put(1, Time::from_millis(5));
        scheduler.put(2, Time::from_millis(50));
        clock.advance_to(Time::from_millis(10));

        let ready = scheduler.drain_ready();
        crate::assert_with_log!(ready == vec![1], "only due items", vec![1], ready);
        let next = scheduler.peek_release_at();
        crate::assert_with_log!(
            next == Some(Time::from_millis(50)),
            "future item kept",
            Some(Time::from_millis(50)),
            next
        );
        crate::assert_with_log!(scheduler.len() == 1, "one left", 1, scheduler.len());
        crate::test_complete!("drain_ready_leaves_future_items");
    }

    #[test]
    fn take_waits_for_virtual_time() {
        init_test("take_waits_for_virtual_time");
        let (clock, scheduler) = virtual_scheduler();
        let release = scheduler.put_after('x', Duration::from_secs(60));
        crate::assert_with_log!(
            release == Time::from_secs(60),
            "put_after is relative to now",
            Time::from_secs(60),
            release
        );

        thread::scope(|s| {
            let consumer = s.spawn(|| scheduler.take(&Cx::for_testing()));
            thread::sleep(Duration::from_millis(20));
            crate::assert_with_log!(
                !consumer.is_finished(),
                "consumer still blocked",
                false,
                consumer.is_finished()
            );
            clock.advance(Duration::from_secs(60));
            let taken = consumer.join().expect("consumer panicked");
            crate::assert_with_log!(taken == Ok('x'), "released after advance", Ok::<char, RecvError>('x'), taken);
        });
        crate::test_complete!("take_waits_for_virtual_time");
    }

    #[test]
    fn new_head_wakes_blocked_consumer() {
        init_test("new_head_wakes_blocked_consumer");
        let scheduler = DelayScheduler::new();
        scheduler.put_after("slow", Duration::from_secs(30));

        let cx = Cx::new(crate::types::TaskId::from_raw(1), Duration::from_secs(5));
        let start = Instant::now();
        thread::scope(|s| {
            let consumer = s.spawn(|| scheduler.take(&cx));
            thread::sleep(Duration::from_millis(10));
            scheduler.put_after("fast", Duration::from_millis(5));
            let taken = consumer.join().expect("consumer panicked");
            crate::assert_with_log!(
                taken == Ok("fast"),
                "new head served",
                Ok::<&str, RecvError>("fast"),
                taken
            );
        });
        let elapsed = start.elapsed();
        crate::assert_with_log!(
            elapsed < Duration::from_secs(2),
            "woken by new head, not poll interval",
            "< 2s",
            elapsed
        );
        crate::test_complete!("new_head_wakes_blocked_consumer");
    }

    #[test]
    fn take_timeout_returns_none() {
        init_test("take_timeout_returns_none");
        let scheduler: DelayScheduler<u8> = DelayScheduler::new();
        scheduler.put_after(1, Duration::from_secs(10));
        let start = Instant::now();
        let result = scheduler.take_timeout(&Cx::for_testing(), Duration::from_millis(30));
        crate::assert_with_log!(result == Ok(None), "timed out", Ok::<Option<u8>, RecvError>(None), result);
        let elapsed = start.elapsed();
        crate::assert_with_log!(
            elapsed >= Duration::from_millis(30),
            "waited the timeout",
            Duration::from_millis(30),
            elapsed
        );
        crate::assert_with_log!(scheduler.len() == 1, "item kept", 1, scheduler.len());
        crate::test_complete!("take_timeout_returns_none");
    }

    #[test]
    fn take_is_cancellable() {
        init_test("take_is_cancellable");
        let scheduler: DelayScheduler<u8> = DelayScheduler::new();
        let cx = Cx::for_testing();
        thread::scope(|s| {
            let consumer = s.spawn(|| scheduler.take(&cx));
            thread::sleep(Duration::from_millis(15));
            cx.set_cancel_requested(true);
            let result = consumer.join().expect("consumer panicked");
            crate::assert_with_log!(
                result == Err(RecvError::Cancelled),
                "cancel observed",
                RecvError::Cancelled,
                result
            );
        });
        crate::test_complete!("take_is_cancellable");
    }
}
