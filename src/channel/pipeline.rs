//! Producer/consumer pipeline over a [`BoundedChannel`].
//!
//! [`StopPlan`] splits the stop messages between producers: every producer
//! emits `consumers / producers` stops and the last one also emits the
//! remainder, so exactly one stop reaches each consumer.
//!
//! [`Pipeline::run`] wires producers and consumers to one channel, each on its
//! own scoped thread. Producers and consumers block, so they never run on the
//! compute pool. Stops are emitted only after every producer has finished its
//! data; with FIFO delivery no consumer can stop while data is still queued.
//!
//! On the first failure the pipeline cancels its run context, every stage
//! unblocks within one poll interval, and the first error is returned.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;

use super::bounded::{BoundedChannel, Message};
use crate::config::ChannelConfig;
use crate::cx::Cx;
use crate::error::{LatchError, RecvError, SendError};
use crate::sync::CountdownLatch;
use crate::tracing_compat::{debug, warn};
use crate::types::CancelReason;
use crate::util::panic_message;

/// How many stop messages each producer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPlan {
    producers: usize,
    consumers: usize,
}

impl StopPlan {
    /// Creates a plan for `producers` producers stopping `consumers` consumers.
    ///
    /// # Panics
    ///
    /// Panics if `producers` is 0.
    #[must_use]
    pub fn new(producers: usize, consumers: usize) -> Self {
        assert!(producers > 0, "stop plan needs at least one producer");
        Self {
            producers,
            consumers,
        }
    }

    /// Returns the number of stops producer `index` must emit.
    ///
    /// Indices at or past the producer count emit nothing.
    #[must_use]
    pub fn stops_for(&self, index: usize) -> usize {
        if index >= self.producers {
            return 0;
        }
        let share = self.consumers / self.producers;
        if index + 1 == self.producers {
            share + self.consumers % self.producers
        } else {
            share
        }
    }

    /// Returns the total number of stops, equal to the consumer count.
    #[must_use]
    pub fn total(&self) -> usize {
        self.consumers
    }

    /// Returns the producer count.
    #[must_use]
    pub fn producers(&self) -> usize {
        self.producers
    }

    /// Returns the consumer count.
    #[must_use]
    pub fn consumers(&self) -> usize {
        self.consumers
    }
}

/// Error returned by [`Pipeline::run`].
#[derive(Clone, PartialEq, Eq)]
pub enum PipelineError<E> {
    /// A producer returned an error.
    Producer {
        /// Index of the failing producer.
        index: usize,
        /// The producer's error.
        source: E,
    },
    /// A consumer returned an error.
    Consumer {
        /// Index of the failing consumer.
        index: usize,
        /// The consumer's error.
        source: E,
    },
    /// A producer panicked.
    ProducerPanicked {
        /// Index of the panicking producer.
        index: usize,
        /// The panic message.
        message: String,
    },
    /// A consumer panicked.
    ConsumerPanicked {
        /// Index of the panicking consumer.
        index: usize,
        /// The panic message.
        message: String,
    },
    /// Emitting stop messages failed.
    Send(SendError<()>),
    /// A consumer could not take from the channel.
    Recv(RecvError),
    /// The caller's context was cancelled.
    Cancelled(CancelReason),
    /// A stage thread could not be started.
    Spawn(String),
}

impl<E: fmt::Debug> fmt::Debug for PipelineError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer { index, source } => f
                .debug_struct("Producer")
                .field("index", index)
                .field("source", source)
                .finish(),
            Self::Consumer { index, source } => f
                .debug_struct("Consumer")
                .field("index", index)
                .field("source", source)
                .finish(),
            Self::ProducerPanicked { index, message } => f
                .debug_struct("ProducerPanicked")
                .field("index", index)
                .field("message", message)
                .finish(),
            Self::ConsumerPanicked { index, message } => f
                .debug_struct("ConsumerPanicked")
                .field("index", index)
                .field("message", message)
                .finish(),
            Self::Send(e) => f.debug_tuple("Send").field(e).finish(),
            Self::Recv(e) => f.debug_tuple("Recv").field(e).finish(),
            Self::Cancelled(r) => f.debug_tuple("Cancelled").field(r).finish(),
            Self::Spawn(msg) => f.debug_tuple("Spawn").field(msg).finish(),
        }
    }
}

impl<E: fmt::Display> fmt::Display for PipelineError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer { index, source } => write!(f, "producer {index} failed: {source}"),
            Self::Consumer { index, source } => write!(f, "consumer {index} failed: {source}"),
            Self::ProducerPanicked { index, message } => {
                write!(f, "producer {index} panicked: {message}")
            }
            Self::ConsumerPanicked { index, message } => {
                write!(f, "consumer {index} panicked: {message}")
            }
            Self::Send(e) => write!(f, "stop delivery failed: {e}"),
            Self::Recv(e) => write!(f, "consumer receive failed: {e}"),
            Self::Cancelled(r) => write!(f, "pipeline cancelled: {r}"),
            Self::Spawn(msg) => write!(f, "failed to start pipeline stage: {msg}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for PipelineError<E> {}

/// Outcome of a successful [`Pipeline::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Items emitted, per producer.
    pub produced: Vec<usize>,
    /// Items processed, per consumer.
    pub consumed: Vec<usize>,
    /// Stop messages enqueued.
    pub stops_delivered: usize,
    /// Largest channel occupancy observed.
    pub high_water_mark: usize,
}

impl PipelineReport {
    /// Total items emitted by all producers.
    #[must_use]
    pub fn total_produced(&self) -> usize {
        self.produced.iter().sum()
    }

    /// Total items processed by all consumers.
    #[must_use]
    pub fn total_consumed(&self) -> usize {
        self.consumed.iter().sum()
    }
}

/// Producer-side handle for putting items into a running pipeline.
pub struct Emitter<'a, T> {
    channel: &'a BoundedChannel<T>,
    cx: &'a Cx,
    emitted: Cell<usize>,
}

impl<T> Emitter<'_, T> {
    /// Puts an item into the pipeline channel, blocking while it is full.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Cancelled(item)` once the pipeline is cancelled.
    pub fn emit(&self, item: T) -> Result<(), SendError<T>> {
        self.channel.put(self.cx, item)?;
        self.emitted.set(self.emitted.get() + 1);
        Ok(())
    }

    /// Returns the pipeline's run context.
    ///
    /// It is cancelled when any stage fails or the caller's context is.
    #[must_use]
    pub fn cx(&self) -> &Cx {
        self.cx
    }

    /// Returns the number of items emitted so far.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted.get()
    }
}

impl<T> fmt::Debug for Emitter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("emitted", &self.emitted.get())
            .finish_non_exhaustive()
    }
}

/// A fixed-shape producer/consumer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipeline {
    capacity: usize,
    producers: usize,
    consumers: usize,
}

impl Pipeline {
    /// Creates a pipeline description.
    ///
    /// # Panics
    ///
    /// Panics if any argument is 0.
    #[must_use]
    pub fn new(capacity: usize, producers: usize, consumers: usize) -> Self {
        assert!(capacity > 0, "pipeline capacity must be non-zero");
        assert!(producers > 0, "pipeline needs at least one producer");
        assert!(consumers > 0, "pipeline needs at least one consumer");
        Self {
            capacity,
            producers,
            consumers,
        }
    }

    /// Creates a pipeline whose channel capacity comes from configuration.
    ///
    /// # Panics
    ///
    /// Panics if `producers` or `consumers` is 0.
    #[must_use]
    pub fn from_config(config: &ChannelConfig, producers: usize, consumers: usize) -> Self {
        Self::new(config.capacity.max(1), producers, consumers)
    }

    /// Returns the stop plan used by [`run`](Self::run).
    #[must_use]
    pub fn stop_plan(&self) -> StopPlan {
        StopPlan::new(self.producers, self.consumers)
    }

    /// Runs the pipeline to completion.
    ///
    /// `produce(index, emitter)` is called once per producer; `consume(index,
    /// item)` once per item a consumer takes.
    ///
    /// # Errors
    ///
    /// Returns the first failure: a stage error, a stage panic, or the
    /// caller's cancellation. All stages have stopped when this returns.
    pub fn run<T, E, P, C>(
        &self,
        cx: &Cx,
        produce: P,
        consume: C,
    ) -> Result<PipelineReport, PipelineError<E>>
    where
        T: Send,
        E: Send,
        P: Fn(usize, &Emitter<'_, T>) -> Result<(), E> + Sync,
        C: Fn(usize, T) -> Result<(), E> + Sync,
    {
        let channel = BoundedChannel::new(self.capacity);
        let plan = self.stop_plan();
        let run_cx = cx.child();
        let producers_done = CountdownLatch::new(self.producers);
        let stops_delivered = AtomicUsize::new(0);
        let failure: Mutex<Option<PipelineError<E>>> = Mutex::new(None);

        let fail = |err: PipelineError<E>| {
            {
                let mut slot = failure.lock();
                if slot.is_none() {
                    *slot = Some(err);
                }
            }
            run_cx.cancel(CancelReason::sibling_failed().with_message("pipeline stage failed"));
        };
        let cancelled = || {
            PipelineError::Cancelled(
                cx.cancel_reason()
                    .or_else(|| run_cx.cancel_reason())
                    .unwrap_or_default(),
            )
        };

        debug!(
            capacity = self.capacity,
            producers = self.producers,
            consumers = self.consumers,
            "pipeline starting"
        );

        let (produced, consumed) = thread::scope(|s| {
            let channel = &channel;
            let run_cx = &run_cx;
            let producers_done = &producers_done;
            let stops_delivered = &stops_delivered;
            let produce = &produce;
            let consume = &consume;
            let fail = &fail;
            let cancelled = &cancelled;

            let mut producer_handles = Vec::with_capacity(self.producers);
            for index in 0..self.producers {
                let body = move || {
                    let emitter = Emitter {
                        channel,
                        cx: run_cx,
                        emitted: Cell::new(0),
                    };
                    match panic::catch_unwind(AssertUnwindSafe(|| produce(index, &emitter))) {
                        Ok(Ok(())) => {
                            producers_done.count_down();
                            match producers_done.wait(run_cx) {
                                Ok(()) if run_cx.is_cancel_requested() => fail(cancelled()),
                                Ok(()) => match channel.finish(run_cx, plan.stops_for(index)) {
                                    Ok(()) => {
                                        stops_delivered
                                            .fetch_add(plan.stops_for(index), Ordering::SeqCst);
                                    }
                                    Err(SendError::Cancelled(())) => fail(cancelled()),
                                    Err(e) => fail(PipelineError::Send(e)),
                                },
                                Err(LatchError::Cancelled(_)) => fail(cancelled()),
                            }
                        }
                        Ok(Err(source)) => fail(PipelineError::Producer { index, source }),
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            warn!(index, message = %message, "pipeline producer panicked");
                            fail(PipelineError::ProducerPanicked { index, message });
                        }
                    }
                    emitter.emitted()
                };
                match thread::Builder::new()
                    .name(format!("turnstile-producer-{index}"))
                    .spawn_scoped(s, body)
                {
                    Ok(handle) => producer_handles.push((index, handle)),
                    Err(e) => fail(PipelineError::Spawn(e.to_string())),
                }
            }

            let mut consumer_handles = Vec::with_capacity(self.consumers);
            for index in 0..self.consumers {
                let body = move || {
                    let mut processed = 0usize;
                    loop {
                        if run_cx.is_cancel_requested() {
                            fail(cancelled());
                            break;
                        }
                        match channel.take(run_cx) {
                            Ok(Message::Data(item)) => {
                                match panic::catch_unwind(AssertUnwindSafe(|| consume(index, item)))
                                {
                                    Ok(Ok(())) => processed += 1,
                                    Ok(Err(source)) => {
                                        fail(PipelineError::Consumer { index, source });
                                        break;
                                    }
                                    Err(payload) => {
                                        let message = panic_message(payload.as_ref());
                                        warn!(index, message = %message, "pipeline consumer panicked");
                                        fail(PipelineError::ConsumerPanicked { index, message });
                                        break;
                                    }
                                }
                            }
                            Ok(Message::Stop) => break,
                            Err(RecvError::Cancelled) => {
                                fail(cancelled());
                                break;
                            }
                            Err(e) => {
                                fail(PipelineError::Recv(e));
                                break;
                            }
                        }
                    }
                    processed
                };
                match thread::Builder::new()
                    .name(format!("turnstile-consumer-{index}"))
                    .spawn_scoped(s, body)
                {
                    Ok(handle) => consumer_handles.push((index, handle)),
                    Err(e) => fail(PipelineError::Spawn(e.to_string())),
                }
            }

            // Stage bodies catch their own panics, so join only fails if the
            // failure path itself panicked.
            let produced: Vec<usize> = producer_handles
                .into_iter()
                .map(|(index, h)| {
                    h.join().unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        fail(PipelineError::ProducerPanicked { index, message });
                        0
                    })
                })
                .collect();
            let consumed: Vec<usize> = consumer_handles
                .into_iter()
                .map(|(index, h)| {
                    h.join().unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        fail(PipelineError::ConsumerPanicked { index, message });
                        0
                    })
                })
                .collect();
            (produced, consumed)
        });

        if let Some(err) = failure.into_inner() {
            debug!("pipeline failed");
            return Err(err);
        }

        let report = PipelineReport {
            produced,
            consumed,
            stops_delivered: stops_delivered.into_inner(),
            high_water_mark: channel.high_water_mark(),
        };
        debug!(
            produced = report.total_produced(),
            consumed = report.total_consumed(),
            stops = report.stops_delivered,
            "pipeline finished"
        );
        Ok(report)
    }
}
