//! Helpers shared by unit and integration tests.
//!
//! Tests open with [`init_test_logging`] and [`test_phase!`](crate::test_phase),
//! check with [`assert_with_log!`](crate::assert_with_log), and close with
//! [`test_complete!`](crate::test_complete). Blocking bodies that could hang
//! run under [`assert_completes_within`].
//!
//! ```
//! use turnstile::test_utils::init_test_logging;
//!
//! init_test_logging();
//! turnstile::test_phase!("gate_smoke");
//! let gate = turnstile::AccessGate::new(1);
//! let admitted = gate.try_acquire();
//! turnstile::assert_with_log!(admitted, "first acquire", true, admitted);
//! turnstile::test_complete!("gate_smoke");
//! ```

use crate::cx::Cx;
use std::sync::Once;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

static INIT_LOGGING: Once = Once::new();

/// Default seed used by randomized test workloads.
pub const DEFAULT_TEST_SEED: u64 = 0x7475_726E_7374_696C;

/// Installs a trace-level subscriber that writes through the test harness.
///
/// Every test calls this; only the first call installs anything.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Like [`init_test_logging`] with a chosen maximum level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Creates a cancellation context for a test body.
#[must_use]
pub fn test_cx() -> Cx {
    Cx::for_testing()
}

/// Runs a blocking closure on its own thread and fails the test if it does
/// not finish within `limit`.
///
/// Panics inside `f` are re-raised on the calling thread.
pub fn assert_completes_within<F, T>(limit: Duration, description: &str, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let worker = thread::Builder::new()
        .name(format!("test-{description}"))
        .spawn(move || {
            let value = f();
            let _ = tx.send(());
            value
        })
        .expect("spawn test thread");

    match rx.recv_timeout(limit) {
        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {}
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("operation '{description}' did not complete within {limit:?}");
        }
    }

    let value = match worker.join() {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    };
    tracing::debug!(
        description = %description,
        timeout_ms = limit.as_millis(),
        "operation completed within timeout"
    );
    value
}

/// Marks the start of a test in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "---- begin {} ----", $name);
    };
}

/// Marks a section inside a test.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "section: {}", $name);
    };
}

/// Marks a test as passed, optionally with summary fields.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "---- passed {} ----", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "---- passed {} ----",
            $name
        );
    };
}

/// Asserts `cond`, logging expected and actual values first.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "check: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, actual {:?}", $msg, $expected, $actual);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_within_returns_value() {
        init_test_logging();
        crate::test_phase!("completes_within_returns_value");
        let value = assert_completes_within(Duration::from_secs(5), "quick", || 7 * 6);
        crate::assert_with_log!(value == 42, "closure result", 42, value);
        crate::test_complete!("completes_within_returns_value");
    }

    #[test]
    #[should_panic(expected = "did not complete")]
    fn completes_within_flags_hangs() {
        init_test_logging();
        assert_completes_within(Duration::from_millis(20), "slow", || {
            thread::sleep(Duration::from_millis(500));
        });
    }
}
