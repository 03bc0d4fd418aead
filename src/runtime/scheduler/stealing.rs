//! Work stealing logic.

use crossbeam_deque::{Steal, Stealer};

use crate::util::DetRng;

/// Tries to steal a job from a list of stealers.
///
/// Starts at a random index and iterates through all stealers, retrying a
/// victim while it reports contention.
pub fn steal_task<J>(stealers: &[Stealer<J>], rng: &mut DetRng) -> Option<J> {
    if stealers.is_empty() {
        return None;
    }

    let len = stealers.len();
    let start = rng.next_usize(len);

    for i in 0..len {
        let idx = (start + i) % len;
        loop {
            match stealers[idx].steal() {
                Steal::Success(job) => return Some(job),
                Steal::Empty => break,
                Steal::Retry => {}
            }
        }
    }

    None
}
