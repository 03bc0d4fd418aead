//! Logging macros for crate internals.
//!
//! With `tracing-integration` these are the `tracing` macros, so structured
//! fields reach whatever subscriber the application installed. Without it
//! they expand to nothing and the crate carries no logging cost.
//!
//! ```rust,ignore
//! use turnstile::tracing_compat::{debug, warn};
//!
//! debug!(capacity = 8, "channel created");
//! warn!(capacity = 3, "release without matching acquire");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! Empty expansions used when `tracing-integration` is off.

    /// Discards a `trace!` event.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// Discards a `debug!` event.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// Discards a `info!` event.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// Discards a `warn!` event.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// Discards a `error!` event.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Returns true when logging macros are backed by `tracing`.
#[must_use]
pub const fn is_enabled() -> bool {
    cfg!(feature = "tracing-integration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
    fn macros_accept_structured_fields() {
        let capacity = 4usize;
        trace!(capacity, "trace event");
        debug!(capacity = capacity, "debug event");
        info!("info event");
        warn!(capacity, "warn event");
        error!("error event");
        assert_eq!(is_enabled(), cfg!(feature = "tracing-integration"));
    }
}
