//! Cancellation context.
//!
//! Every blocking operation in this crate takes a [`Cx`]. The context carries
//! the cancellation flag and reason for one unit of work and the interval at
//! which blocked waiters re-check it.
//!
//! ```ignore
//! use turnstile::Cx;
//!
//! let cx = Cx::for_request();
//! let worker_cx = cx.child();
//!
//! cx.cancel_with(CancelKind::User, Some("operator stop"));
//! assert!(worker_cx.is_cancel_requested());
//! ```

pub mod cx;

pub use cx::Cx;
