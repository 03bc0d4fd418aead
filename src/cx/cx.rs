//! The cancellation context type.
//!
//! `Cx` is a cheaply cloneable handle. Clones share one cancellation state;
//! [`Cx::child`] creates a new state that also observes its parent.
//!
//! # Thread Safety
//!
//! `Cx` is `Send + Sync`. It is normal to clone a context into every producer
//! and consumer thread of a pipeline and cancel all of them from one place.

use crate::config::WaitConfig;
use crate::error::Error;
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelKind, CancelReason, TaskId};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default interval at which blocked operations re-check cancellation.
pub const DEFAULT_CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct CxState {
    cancel_requested: bool,
    cancel_reason: Option<CancelReason>,
    checkpoints: u64,
}

struct CxInner {
    task: TaskId,
    poll_interval: Duration,
    parent: Option<Cx>,
    state: RwLock<CxState>,
}

/// The cancellation context for one unit of work.
///
/// Blocking primitives check [`is_cancel_requested`](Self::is_cancel_requested)
/// before every wait and wait no longer than
/// [`poll_interval`](Self::poll_interval) at a time, so a cancellation is
/// observed within one interval.
#[derive(Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Cx {
    /// Creates a context for the given task.
    #[must_use]
    pub fn new(task: TaskId, poll_interval: Duration) -> Self {
        Self::with_parent(task, poll_interval, None)
    }

    fn with_parent(task: TaskId, poll_interval: Duration, parent: Option<Self>) -> Self {
        Self {
            inner: Arc::new(CxInner {
                task,
                poll_interval: poll_interval.max(Duration::from_millis(1)),
                parent,
                state: RwLock::new(CxState::default()),
            }),
        }
    }

    /// Creates a context with a process-unique task ID and the default poll
    /// interval.
    #[must_use]
    pub fn for_request() -> Self {
        Self::new(TaskId::new_ephemeral(), DEFAULT_CANCEL_POLL_INTERVAL)
    }

    /// Creates a context using the wait settings from a configuration.
    #[must_use]
    pub fn from_config(config: &WaitConfig) -> Self {
        Self::new(TaskId::new_ephemeral(), config.cancel_poll_interval)
    }

    /// Creates a test-only context.
    ///
    /// Production code should create contexts with [`for_request`](Self::for_request)
    /// or [`from_config`](Self::from_config).
    #[must_use]
    pub fn for_testing() -> Self {
        Self::new(TaskId::from_raw(0), DEFAULT_CANCEL_POLL_INTERVAL)
    }

    /// Creates a child context.
    ///
    /// The child is cancelled whenever this context is. Cancelling the child
    /// does not affect the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::with_parent(
            TaskId::new_ephemeral(),
            self.inner.poll_interval,
            Some(self.clone()),
        )
    }

    /// Returns the task this context belongs to.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.inner.task
    }

    /// Returns how long a blocked operation may wait before re-checking
    /// cancellation.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Returns true if cancellation has been requested on this context or any
    /// ancestor.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        if self.inner.state.read().cancel_requested {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(Self::is_cancel_requested)
    }

    /// Checks for cancellation and returns an error if cancelled.
    ///
    /// Each call is counted; see [`checkpoint_count`](Self::checkpoint_count).
    ///
    /// # Errors
    ///
    /// Returns an `Err` with kind `ErrorKind::Cancelled` if cancellation is
    /// pending on this context or an ancestor.
    pub fn checkpoint(&self) -> Result<(), Error> {
        self.inner.state.write().checkpoints += 1;
        match self.cancel_reason() {
            Some(reason) => {
                trace!(task_id = ?self.inner.task, reason = %reason, "checkpoint observed cancel");
                Err(Error::cancelled(reason))
            }
            None => Ok(()),
        }
    }

    /// Returns how many times [`checkpoint`](Self::checkpoint) has been called.
    #[must_use]
    pub fn checkpoint_count(&self) -> u64 {
        self.inner.state.read().checkpoints
    }

    /// Requests cancellation with the given reason.
    ///
    /// If the context is already cancelled the stored reason is strengthened,
    /// keeping the more severe of the two.
    pub fn cancel(&self, reason: CancelReason) {
        debug!(task_id = ?self.inner.task, cancel_kind = ?reason.kind, "cancel requested");
        let mut state = self.inner.state.write();
        state.cancel_requested = true;
        if let Some(existing) = state.cancel_reason.as_mut() {
            existing.strengthen(&reason);
        } else {
            state.cancel_reason = Some(reason);
        }
    }

    /// Requests cancellation with a kind and optional message.
    pub fn cancel_with(&self, kind: CancelKind, message: Option<&'static str>) {
        let mut reason = CancelReason::new(kind);
        if let Some(msg) = message {
            reason = reason.with_message(msg);
        }
        self.cancel(reason);
    }

    /// Sets or clears the local cancellation flag.
    ///
    /// Clearing also drops the stored reason. A cancelled ancestor still
    /// cancels this context.
    pub fn set_cancel_requested(&self, value: bool) {
        let mut state = self.inner.state.write();
        state.cancel_requested = value;
        if value {
            state.cancel_reason.get_or_insert_with(CancelReason::default);
        } else {
            state.cancel_reason = None;
        }
    }

    /// Returns the cancellation reason, if cancelled.
    ///
    /// A context cancelled only through an ancestor reports
    /// [`CancelKind::ParentCancelled`] carrying the ancestor's message.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        {
            let state = self.inner.state.read();
            if state.cancel_requested {
                return Some(state.cancel_reason.clone().unwrap_or_default());
            }
        }
        let parent = self.inner.parent.as_ref()?.cancel_reason()?;
        let mut reason = CancelReason::parent_cancelled();
        reason.message = parent.message;
        Some(reason)
    }

    /// Emits a trace event tagged with this context's task.
    #[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
    pub fn trace(&self, message: &str) {
        trace!(task_id = ?self.inner.task, message = %message, "cx trace");
    }
}

impl Default for Cx {
    fn default() -> Self {
        Self::for_request()
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("task", &self.inner.task)
            .field("cancel_requested", &self.is_cancel_requested())
            .field("has_parent", &self.inner.parent.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::init_test_logging;

    fn init_test(test_name: &str) {
        init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn checkpoint_ok_until_cancelled() {
        init_test("checkpoint_ok_until_cancelled");
        let cx = Cx::for_testing();
        let ok = cx.checkpoint().is_ok();
        crate::assert_with_log!(ok, "fresh context passes checkpoint", true, ok);

        cx.set_cancel_requested(true);
        let err = cx.checkpoint().expect_err("cancelled");
        crate::assert_with_log!(
            err.kind() == ErrorKind::Cancelled,
            "checkpoint reports cancellation",
            ErrorKind::Cancelled,
            err.kind()
        );
        let count = cx.checkpoint_count();
        crate::assert_with_log!(count == 2, "checkpoints counted", 2, count);
        crate::test_complete!("checkpoint_ok_until_cancelled");
    }

    #[test]
    fn clones_share_state() {
        init_test("clones_share_state");
        let cx = Cx::for_testing();
        let clone = cx.clone();
        cx.cancel_with(CancelKind::Timeout, Some("deadline"));
        let reason = clone.cancel_reason();
        crate::assert_with_log!(
            reason == Some(CancelReason::timeout().with_message("deadline")),
            "clone observes reason",
            "timeout: deadline",
            reason
        );
        crate::test_complete!("clones_share_state");
    }

    #[test]
    fn child_observes_parent_as_parent_cancelled() {
        init_test("child_observes_parent_as_parent_cancelled");
        let parent = Cx::for_testing();
        let child = parent.child();
        crate::assert_with_log!(
            !child.is_cancel_requested(),
            "child starts live",
            false,
            child.is_cancel_requested()
        );

        parent.cancel(CancelReason::user("stop"));
        let reason = child.cancel_reason().map(|r| (r.kind, r.message));
        crate::assert_with_log!(
            reason == Some((CancelKind::ParentCancelled, Some("stop"))),
            "child reason is ParentCancelled",
            (CancelKind::ParentCancelled, Some("stop")),
            reason
        );
        crate::assert_with_log!(
            child.task_id() != parent.task_id(),
            "child has its own task id",
            parent.task_id(),
            child.task_id()
        );
        crate::test_complete!("child_observes_parent_as_parent_cancelled");
    }

    #[test]
    fn cancelling_child_leaves_parent_live() {
        init_test("cancelling_child_leaves_parent_live");
        let parent = Cx::for_testing();
        let child = parent.child();
        child.cancel(CancelReason::sibling_failed());
        crate::assert_with_log!(
            !parent.is_cancel_requested(),
            "parent untouched",
            false,
            parent.is_cancel_requested()
        );
        crate::test_complete!("cancelling_child_leaves_parent_live");
    }

    #[test]
    fn repeated_cancel_strengthens() {
        init_test("repeated_cancel_strengthens");
        let cx = Cx::for_testing();
        cx.cancel(CancelReason::shutdown());
        cx.cancel(CancelReason::user("late"));
        let kind = cx.cancel_reason().map(|r| r.kind);
        crate::assert_with_log!(
            kind == Some(CancelKind::Shutdown),
            "more severe reason wins",
            Some(CancelKind::Shutdown),
            kind
        );

        cx.set_cancel_requested(false);
        crate::assert_with_log!(
            cx.cancel_reason().is_none(),
            "clearing drops the reason",
            None::<CancelReason>,
            cx.cancel_reason()
        );
        crate::test_complete!("repeated_cancel_strengthens");
    }

    #[test]
    fn poll_interval_from_config() {
        init_test("poll_interval_from_config");
        let config = WaitConfig {
            cancel_poll_interval: Duration::from_millis(3),
        };
        let cx = Cx::from_config(&config);
        crate::assert_with_log!(
            cx.poll_interval() == Duration::from_millis(3),
            "poll interval copied",
            Duration::from_millis(3),
            cx.poll_interval()
        );
        crate::assert_with_log!(
            cx.child().poll_interval() == Duration::from_millis(3),
            "child inherits poll interval",
            Duration::from_millis(3),
            cx.child().poll_interval()
        );
        cx.trace("config applied");
        crate::test_complete!("poll_interval_from_config");
    }
}
