//! Global injection queue.
//!
//! A thread-safe unbounded queue for jobs spawned from outside the pool's
//! worker threads.

use crossbeam_queue::SegQueue;

/// A global job queue.
#[derive(Debug)]
pub struct GlobalQueue<J> {
    inner: SegQueue<J>,
}

impl<J> GlobalQueue<J> {
    /// Creates a new global queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    /// Pushes a job to the global queue.
    pub fn push(&self, job: J) {
        self.inner.push(job);
    }

    /// Pops a job from the global queue.
    pub fn pop(&self) -> Option<J> {
        self.inner.pop()
    }

    /// Returns the number of jobs in the queue.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<J> Default for GlobalQueue<J> {
    fn default() -> Self {
        Self::new()
    }
}
