//! Error types and error handling strategy.
//!
//! Every primitive reports one of three outcomes to its immediate caller: a
//! value, a cancellation, or a failure. Nothing is swallowed.
//!
//! - Small purpose-built enums are returned by each primitive
//!   ([`SendError`], [`RecvError`], [`AcquireError`], ...).
//! - [`Error`] is the crate-level error those enums convert into, classified
//!   by [`ErrorKind`] and [`ErrorCategory`].
//!
//! Sentinel delivery on a channel is not an error: `take` returns
//! [`Message::Stop`](crate::channel::Message::Stop) as an ordinary value.

use core::fmt;

use crate::types::CancelReason;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// Operation was cancelled.
    Cancelled,
    /// A bounded wait elapsed.
    TimedOut,

    // === Channels ===
    /// Channel is closed.
    ChannelClosed,
    /// Channel is full (would block).
    ChannelFull,
    /// Channel is empty (would block).
    ChannelEmpty,

    // === Gates ===
    /// Gate was closed while acquiring.
    GateClosed,
    /// A permit was released without a matching acquire.
    PermitOverflow,

    // === Tasks ===
    /// A pool task panicked.
    TaskPanicked,
    /// The pool was shut down before the task ran.
    PoolShutdown,

    // === Configuration ===
    /// A configuration value was invalid.
    InvalidConfig,

    // === User ===
    /// User-provided error surfaced through a reduction.
    User,
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cancellation and timeouts.
    Cancellation,
    /// Channel failures.
    Channel,
    /// Access gate failures.
    Gate,
    /// Execution substrate failures.
    Task,
    /// Configuration failures.
    Config,
    /// User-originated errors.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled | Self::TimedOut => ErrorCategory::Cancellation,
            Self::ChannelClosed | Self::ChannelFull | Self::ChannelEmpty => ErrorCategory::Channel,
            Self::GateClosed | Self::PermitOverflow => ErrorCategory::Gate,
            Self::TaskPanicked | Self::PoolShutdown => ErrorCategory::Task,
            Self::InvalidConfig => ErrorCategory::Config,
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ChannelFull | Self::ChannelEmpty | Self::TimedOut)
    }
}

/// The crate-level error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    cancel_reason: Option<CancelReason>,
}

impl Error {
    /// Creates an error of the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            cancel_reason: None,
        }
    }

    /// Creates a cancellation error carrying its reason.
    #[must_use]
    pub const fn cancelled(reason: CancelReason) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            context: None,
            cancel_reason: Some(reason),
        }
    }

    /// Adds human-readable context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the context message, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns the cancellation reason for `Cancelled` errors.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        self.cancel_reason.as_ref()
    }

    /// Returns true if this error reports a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(reason) = &self.cancel_reason {
            write!(f, " ({reason})")?;
        }
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Convenience alias for results carrying [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

/// Error when sending into a channel. The rejected value is handed back.
#[derive(Clone, PartialEq, Eq)]
pub enum SendError<T> {
    /// Channel was closed.
    Closed(T),
    /// Would block (channel is full).
    Full(T),
    /// The send was cancelled while waiting for space.
    Cancelled(T),
}

impl<T> SendError<T> {
    /// Returns the value that was not sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(v) | Self::Full(v) | Self::Cancelled(v) => v,
        }
    }

    /// Drops the carried value, keeping the variant.
    pub fn discard(self) -> SendError<()> {
        match self {
            Self::Closed(_) => SendError::Closed(()),
            Self::Full(_) => SendError::Full(()),
            Self::Cancelled(_) => SendError::Cancelled(()),
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(_) => write!(f, "Closed(..)"),
            Self::Full(_) => write!(f, "Full(..)"),
            Self::Cancelled(_) => write!(f, "Cancelled(..)"),
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(_) => write!(f, "sending on a closed channel"),
            Self::Full(_) => write!(f, "channel is full"),
            Self::Cancelled(_) => write!(f, "send cancelled"),
        }
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Error when receiving from a channel or delay scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// Would block (nothing ready).
    #[error("nothing ready to receive")]
    Empty,
    /// Closed and drained.
    #[error("receiving on a closed channel")]
    Closed,
    /// The receive was cancelled while waiting.
    #[error("receive cancelled")]
    Cancelled,
    /// A bounded wait elapsed.
    #[error("receive timed out")]
    Timeout,
}

/// Error returned by a blocking gate acquire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// The gate was closed.
    #[error("access gate closed")]
    Closed,
    /// Cancelled while waiting for a permit.
    #[error("access gate acquire cancelled: {0}")]
    Cancelled(CancelReason),
}

/// Error returned when a release has no matching acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    /// Every permit was already available; the count was clamped.
    #[error("release without matching acquire (capacity {capacity})")]
    Overflow {
        /// The gate capacity the count was clamped to.
        capacity: usize,
    },
}

/// Error returned when waiting on a latch fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LatchError {
    /// Cancelled while waiting.
    #[error("latch wait cancelled: {0}")]
    Cancelled(CancelReason),
}

/// Outcome of a pool task that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The task was cancelled before it started.
    #[error("task cancelled before it ran")]
    Cancelled,
    /// The task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The pool was shut down before the task could run.
    #[error("worker pool is shut down")]
    Shutdown,
}

/// Error returned by a parallel reduction.
#[derive(Clone, PartialEq, Eq)]
pub enum ReduceError<E> {
    /// A leaf computation failed.
    Failed(E),
    /// The reduction was cancelled.
    Cancelled(CancelReason),
    /// A leaf or combine panicked.
    Panicked(String),
    /// The pool was shut down mid-reduction.
    Shutdown,
}

impl<E> ReduceError<E> {
    /// Returns the leaf failure, if that is what this is.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<JoinError> for ReduceError<E> {
    fn from(e: JoinError) -> Self {
        match e {
            JoinError::Cancelled => Self::Cancelled(CancelReason::sibling_failed()),
            JoinError::Panicked(msg) => Self::Panicked(msg),
            JoinError::Shutdown => Self::Shutdown,
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for ReduceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
            Self::Cancelled(r) => f.debug_tuple("Cancelled").field(r).finish(),
            Self::Panicked(msg) => f.debug_tuple("Panicked").field(msg).finish(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl<E: fmt::Display> fmt::Display for ReduceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "reduction failed: {e}"),
            Self::Cancelled(r) => write!(f, "reduction cancelled: {r}"),
            Self::Panicked(msg) => write!(f, "reduction panicked: {msg}"),
            Self::Shutdown => write!(f, "reduction aborted: worker pool is shut down"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ReduceError<E> {}

impl From<RecvError> for Error {
    fn from(e: RecvError) -> Self {
        match e {
            RecvError::Empty => Self::new(ErrorKind::ChannelEmpty),
            RecvError::Closed => Self::new(ErrorKind::ChannelClosed),
            RecvError::Cancelled => Self::new(ErrorKind::Cancelled),
            RecvError::Timeout => Self::new(ErrorKind::TimedOut),
        }
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(e: SendError<T>) -> Self {
        match e {
            SendError::Closed(_) => Self::new(ErrorKind::ChannelClosed),
            SendError::Full(_) => Self::new(ErrorKind::ChannelFull),
            SendError::Cancelled(_) => Self::new(ErrorKind::Cancelled),
        }
    }
}

impl From<AcquireError> for Error {
    fn from(e: AcquireError) -> Self {
        match e {
            AcquireError::Closed => Self::new(ErrorKind::GateClosed),
            AcquireError::Cancelled(reason) => Self::cancelled(reason),
        }
    }
}

impl From<ReleaseError> for Error {
    fn from(e: ReleaseError) -> Self {
        Self::new(ErrorKind::PermitOverflow).with_context(e.to_string())
    }
}

impl From<LatchError> for Error {
    fn from(e: LatchError) -> Self {
        match e {
            LatchError::Cancelled(reason) => Self::cancelled(reason),
        }
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        match e {
            JoinError::Cancelled => Self::cancelled(CancelReason::sibling_failed()),
            JoinError::Panicked(msg) => Self::new(ErrorKind::TaskPanicked).with_context(msg),
            JoinError::Shutdown => Self::new(ErrorKind::PoolShutdown),
        }
    }
}

impl<E: fmt::Display> From<ReduceError<E>> for Error {
    fn from(e: ReduceError<E>) -> Self {
        match e {
            ReduceError::Failed(inner) => Self::new(ErrorKind::User).with_context(inner.to_string()),
            ReduceError::Cancelled(reason) => Self::cancelled(reason),
            ReduceError::Panicked(msg) => Self::new(ErrorKind::TaskPanicked).with_context(msg),
            ReduceError::Shutdown => Self::new(ErrorKind::PoolShutdown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;

    #[test]
    fn kinds_map_to_categories() {
        assert_eq!(ErrorKind::Cancelled.category(), ErrorCategory::Cancellation);
        assert_eq!(ErrorKind::ChannelFull.category(), ErrorCategory::Channel);
        assert_eq!(ErrorKind::PermitOverflow.category(), ErrorCategory::Gate);
        assert_eq!(ErrorKind::PoolShutdown.category(), ErrorCategory::Task);
        assert!(ErrorKind::ChannelFull.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn send_error_returns_value() {
        let err = SendError::Cancelled(41);
        assert_eq!(format!("{err:?}"), "Cancelled(..)");
        assert_eq!(err.clone().discard(), SendError::Cancelled(()));
        assert_eq!(err.into_inner(), 41);
    }

    #[test]
    fn cancellation_keeps_reason() {
        let err: Error = AcquireError::Cancelled(CancelReason::timeout()).into();
        assert!(err.is_cancelled());
        assert_eq!(
            err.cancel_reason().map(CancelReason::kind),
            Some(CancelKind::Timeout)
        );
        assert_eq!(err.to_string(), "Cancelled (timeout)");
    }

    #[test]
    fn reduce_error_converts_join_error() {
        let err: ReduceError<()> = JoinError::Panicked("boom".into()).into();
        assert_eq!(err, ReduceError::Panicked("boom".into()));
        let err: Error = ReduceError::<String>::Failed("bad leaf".into()).into();
        assert_eq!(err.kind(), ErrorKind::User);
        assert_eq!(err.context(), Some("bad leaf"));
    }
}
