//! Why a blocking call or a reduction was asked to stop.
//!
//! A [`CancelReason`] travels with the [`Cx`](crate::Cx) that was cancelled
//! and is copied into the error the caller receives. When several parties
//! cancel the same context, the reasons are merged with
//! [`CancelReason::strengthen`] so the most severe one is reported.

use core::cmp::Ordering;
use core::fmt;

/// What triggered a cancellation, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CancelKind {
    /// The caller gave up.
    User = 0,
    /// A deadline elapsed.
    Timeout = 1,
    /// Another stage of the same pipeline or reduction failed.
    FailFast = 2,
    /// An enclosing context was cancelled.
    ParentCancelled = 3,
    /// The owner of the work is shutting down.
    Shutdown = 4,
}

impl CancelKind {
    /// Returns the severity rank. A higher rank wins when reasons merge.
    #[must_use]
    pub const fn severity(self) -> u8 {
        self as u8
    }

    /// Short lowercase name used in log fields and messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Timeout => "timeout",
            Self::FailFast => "fail-fast",
            Self::ParentCancelled => "parent cancelled",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A cancellation kind plus an optional static note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// What triggered the cancellation.
    pub kind: CancelKind,
    /// Free-form note from whoever cancelled.
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// A reason of `kind` with no note.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// The caller gave up, saying why.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self::new(CancelKind::User).with_message(message)
    }

    /// A deadline elapsed.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// A sibling stage or branch failed first.
    #[must_use]
    pub const fn sibling_failed() -> Self {
        Self::new(CancelKind::FailFast)
    }

    /// An enclosing context was cancelled.
    #[must_use]
    pub const fn parent_cancelled() -> Self {
        Self::new(CancelKind::ParentCancelled)
    }

    /// The owner is shutting down.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(CancelKind::Shutdown)
    }

    /// Replaces the note.
    #[must_use]
    pub const fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    /// Returns the kind.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns true for [`CancelKind::Shutdown`].
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, CancelKind::Shutdown)
    }

    /// Merges `other` into `self`, returning true if `self` changed.
    ///
    /// The more severe kind wins, along with its note. Between equal kinds
    /// the lexically smallest note wins, so the merged reason does not
    /// depend on the order the cancels arrived in.
    pub fn strengthen(&mut self, other: &Self) -> bool {
        let replace = match other.kind.cmp(&self.kind) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match (self.message, other.message) {
                (None, Some(_)) => true,
                (Some(current), Some(candidate)) => candidate < current,
                (_, None) => false,
            },
        };
        if replace {
            self.clone_from(other);
        }
        replace
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message {
            Some(note) => write!(f, "{}: {note}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn shutdown_outranks_everything() {
        init_test("shutdown_outranks_everything");
        let ranks: Vec<u8> = [
            CancelKind::User,
            CancelKind::Timeout,
            CancelKind::FailFast,
            CancelKind::ParentCancelled,
            CancelKind::Shutdown,
        ]
        .into_iter()
        .map(CancelKind::severity)
        .collect();
        crate::assert_with_log!(
            ranks == vec![0, 1, 2, 3, 4],
            "ranks rise with severity",
            vec![0, 1, 2, 3, 4],
            ranks
        );
        crate::test_complete!("shutdown_outranks_everything");
    }

    #[test]
    fn fail_fast_replaces_user_note() {
        init_test("fail_fast_replaces_user_note");
        let mut reason = CancelReason::user("operator stop");
        let changed = reason.strengthen(&CancelReason::sibling_failed());
        crate::assert_with_log!(changed, "stronger kind applied", true, changed);
        crate::assert_with_log!(
            reason == CancelReason::sibling_failed(),
            "note travels with the kind",
            CancelReason::sibling_failed(),
            reason
        );

        let changed = reason.strengthen(&CancelReason::timeout());
        crate::assert_with_log!(!changed, "weaker kind ignored", false, changed);
        crate::test_complete!("fail_fast_replaces_user_note");
    }

    #[test]
    fn merge_order_does_not_matter_for_equal_kinds() {
        init_test("merge_order_does_not_matter_for_equal_kinds");
        let mut first = CancelReason::user("zeta");
        first.strengthen(&CancelReason::user("alpha"));
        let mut second = CancelReason::user("alpha");
        second.strengthen(&CancelReason::user("zeta"));
        crate::assert_with_log!(first == second, "same merged reason", second, first);
        crate::assert_with_log!(
            first.message == Some("alpha"),
            "smallest note kept",
            Some("alpha"),
            first.message
        );

        let mut bare = CancelReason::timeout();
        let changed = bare.strengthen(&CancelReason::timeout().with_message("deadline"));
        crate::assert_with_log!(changed, "note fills an empty slot", true, changed);
        crate::test_complete!("merge_order_does_not_matter_for_equal_kinds");
    }

    #[test]
    fn display_includes_message() {
        init_test("display_includes_message");
        let text = CancelReason::sibling_failed()
            .with_message("producer failed")
            .to_string();
        crate::assert_with_log!(
            text == "fail-fast: producer failed",
            "display format",
            "fail-fast: producer failed",
            text
        );
        let bare = CancelReason::parent_cancelled().to_string();
        crate::assert_with_log!(
            bare == "parent cancelled",
            "bare kind",
            "parent cancelled",
            bare
        );
        crate::test_complete!("display_includes_message");
    }
}
