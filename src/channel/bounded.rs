//! Fixed-capacity FIFO channel with a stop-message termination protocol.
//!
//! Items travel as [`Message::Data`]. When a producer finishes it enqueues
//! [`Message::Stop`] once for every consumer that should terminate on its
//! behalf; a consumer that takes a `Stop` exits its loop and does not put it
//! back. The number of stops is an explicit input (see
//! [`StopPlan`](super::StopPlan)), never discovered at runtime.
//!
//! `Stop` occupies a slot like any other message, so [`finish`] blocks while
//! the channel is full.
//!
//! # Cancel Safety
//!
//! Blocking operations check the [`Cx`] before every wait. A cancelled `put`
//! hands the item back inside [`SendError::Cancelled`] and has enqueued
//! nothing; a cancelled `take` has removed nothing.
//!
//! [`finish`]: BoundedChannel::finish

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::ChannelConfig;
use crate::cx::Cx;
use crate::error::{RecvError, SendError};
use crate::tracing_compat::{debug, trace};

/// An item travelling through a [`BoundedChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Message<T> {
    /// A payload.
    Data(T),
    /// The sentinel: the consumer that takes it stops.
    Stop,
}

impl<T> Message<T> {
    /// Returns true for the sentinel.
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }

    /// Returns the payload, or `None` for the sentinel.
    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Data(value) => Some(value),
            Self::Stop => None,
        }
    }

    /// Borrows the payload, or `None` for the sentinel.
    pub const fn as_data(&self) -> Option<&T> {
        match self {
            Self::Data(value) => Some(value),
            Self::Stop => None,
        }
    }
}

#[derive(Debug)]
struct ChannelState<T> {
    queue: VecDeque<Message<T>>,
    closed: bool,
    high_water_mark: usize,
}

/// A bounded multi-producer multi-consumer FIFO channel.
///
/// Share it between threads by reference (scoped threads) or inside an
/// `Arc`.
#[derive(Debug)]
pub struct BoundedChannel<T> {
    capacity: usize,
    state: Mutex<ChannelState<T>>,
    space_available: Condvar,
    message_available: Condvar,
}

impl<T> BoundedChannel<T> {
    /// Creates a channel holding at most `capacity` messages.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be non-zero");
        Self {
            capacity,
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                high_water_mark: 0,
            }),
            space_available: Condvar::new(),
            message_available: Condvar::new(),
        }
    }

    /// Creates a channel sized from configuration.
    #[must_use]
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.capacity.max(1))
    }

    /// Enqueues an item, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// - `SendError::Cancelled(item)` if `cx` is cancelled while waiting.
    /// - `SendError::Closed(item)` if the channel is closed.
    pub fn put(&self, cx: &Cx, item: T) -> Result<(), SendError<T>> {
        self.push(cx, item, Message::Data)
    }

    /// Enqueues a single stop message, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put), carrying `()`.
    pub fn put_stop(&self, cx: &Cx) -> Result<(), SendError<()>> {
        self.push(cx, (), |()| Message::Stop)
    }

    /// Enqueues `stop_count` stop messages, one per consumer that should
    /// terminate.
    ///
    /// On error some stops may already be queued; the error reports the
    /// first one that was not.
    ///
    /// # Errors
    ///
    /// Same as [`put_stop`](Self::put_stop).
    pub fn finish(&self, cx: &Cx, stop_count: usize) -> Result<(), SendError<()>> {
        for _ in 0..stop_count {
            self.put_stop(cx)?;
        }
        debug!(stop_count, "producer finished");
        Ok(())
    }

    /// Enqueues any message, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put), carrying the message.
    pub fn send(&self, cx: &Cx, msg: Message<T>) -> Result<(), SendError<Message<T>>> {
        self.push(cx, msg, |msg| msg)
    }

    fn push<V>(
        &self,
        cx: &Cx,
        value: V,
        wrap: impl FnOnce(V) -> Message<T>,
    ) -> Result<(), SendError<V>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(SendError::Closed(value));
            }
            if state.queue.len() < self.capacity {
                self.enqueue(&mut state, wrap(value));
                drop(state);
                self.message_available.notify_one();
                return Ok(());
            }
            if cx.is_cancel_requested() {
                cx.trace("bounded_channel::put cancelled while waiting for space");
                return Err(SendError::Cancelled(value));
            }
            let _ = self
                .space_available
                .wait_for(&mut state, cx.poll_interval());
        }
    }

    /// Enqueues an item without blocking.
    ///
    /// # Errors
    ///
    /// - `SendError::Full(item)` if the channel is at capacity.
    /// - `SendError::Closed(item)` if the channel is closed.
    pub fn try_put(&self, item: T) -> Result<(), SendError<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SendError::Closed(item));
        }
        if state.queue.len() >= self.capacity {
            return Err(SendError::Full(item));
        }
        self.enqueue(&mut state, Message::Data(item));
        drop(state);
        self.message_available.notify_one();
        Ok(())
    }

    /// Removes the oldest message, blocking while the channel is empty.
    ///
    /// # Errors
    ///
    /// - `RecvError::Cancelled` if `cx` is cancelled while waiting.
    /// - `RecvError::Closed` if the channel is closed and drained.
    pub fn take(&self, cx: &Cx) -> Result<Message<T>, RecvError> {
        self.take_until(cx, None)
    }

    /// Like [`take`](Self::take) but gives up after `timeout`.
    ///
    /// A timeout too large to represent as an instant waits without a
    /// deadline.
    ///
    /// # Errors
    ///
    /// Same as [`take`](Self::take), plus `RecvError::Timeout`.
    pub fn take_timeout(&self, cx: &Cx, timeout: Duration) -> Result<Message<T>, RecvError> {
        self.take_until(cx, Instant::now().checked_add(timeout))
    }

    fn take_until(&self, cx: &Cx, deadline: Option<Instant>) -> Result<Message<T>, RecvError> {
        let mut state = self.state.lock();
        loop {
            if let Some(msg) = state.queue.pop_front() {
                drop(state);
                self.space_available.notify_one();
                if msg.is_stop() {
                    trace!(task_id = ?cx.task_id(), "stop message delivered");
                }
                return Ok(msg);
            }
            if state.closed {
                return Err(RecvError::Closed);
            }
            if cx.is_cancel_requested() {
                cx.trace("bounded_channel::take cancelled while waiting for message");
                return Err(RecvError::Cancelled);
            }
            let mut slice = cx.poll_interval();
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(RecvError::Timeout);
                }
                slice = slice.min(deadline - now);
            }
            let _ = self.message_available.wait_for(&mut state, slice);
        }
    }

    /// Removes the oldest message without blocking.
    ///
    /// # Errors
    ///
    /// - `RecvError::Empty` if nothing is queued.
    /// - `RecvError::Closed` if the channel is closed and drained.
    pub fn try_take(&self) -> Result<Message<T>, RecvError> {
        let mut state = self.state.lock();
        match state.queue.pop_front() {
            Some(msg) => {
                drop(state);
                self.space_available.notify_one();
                Ok(msg)
            }
            None if state.closed => Err(RecvError::Closed),
            None => Err(RecvError::Empty),
        }
    }

    /// Runs a consumer loop, handing each payload to `f` until a stop message
    /// arrives.
    ///
    /// Returns the number of payloads processed. The stop message is consumed
    /// and not re-enqueued.
    ///
    /// # Errors
    ///
    /// Same as [`take`](Self::take). Payloads already passed to `f` stay
    /// processed.
    pub fn consume<F>(&self, cx: &Cx, mut f: F) -> Result<usize, RecvError>
    where
        F: FnMut(T),
    {
        let mut processed = 0usize;
        loop {
            match self.take(cx)? {
                Message::Data(item) => {
                    f(item);
                    processed += 1;
                }
                Message::Stop => return Ok(processed),
            }
        }
    }

    /// Closes the channel.
    ///
    /// Blocked and future `put`s fail with `Closed`. Messages already queued
    /// can still be taken; once drained, `take` fails with `Closed`.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        debug!(
            capacity = self.capacity,
            queued = state.queue.len(),
            "bounded channel closed"
        );
        drop(state);
        self.space_available.notify_all();
        self.message_available.notify_all();
    }

    /// Returns true if the channel is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the number of queued messages, stops included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the largest occupancy observed so far.
    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        self.state.lock().high_water_mark
    }

    fn enqueue(&self, state: &mut ChannelState<T>, msg: Message<T>) {
        state.queue.push_back(msg);
        let len = state.queue.len();
        debug_assert!(len <= self.capacity);
        if len > state.high_water_mark {
            state.high_water_mark = len;
        }
    }
}
