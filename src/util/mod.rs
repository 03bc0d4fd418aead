//! Internal utilities.

pub mod det_rng;

pub use det_rng::DetRng;

use std::any::Any;

/// Extracts a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(f: impl FnOnce() + std::panic::UnwindSafe) -> Box<dyn Any + Send> {
        std::panic::catch_unwind(f).expect_err("closure should panic")
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let payload = payload_of(|| panic!("static message"));
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let code = 7;
        let payload = payload_of(|| panic!("code {code}"));
        assert_eq!(panic_message(payload.as_ref()), "code 7");

        let payload = payload_of(|| std::panic::panic_any(42u8));
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
