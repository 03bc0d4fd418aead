//! Shared helpers for integration tests.

#![allow(dead_code)]

pub use turnstile::test_utils::{assert_completes_within, init_test_logging, test_cx};

pub fn init_test(name: &str) {
    init_test_logging();
    turnstile::test_phase!(name);
}
