//! Seeded xorshift generator for steal-victim selection.
//!
//! Each pool worker owns one, seeded from its index, so the order in which a
//! worker probes its peers is reproducible from run to run.

/// Xorshift64 state. Not suitable for anything security related.
#[derive(Debug, Clone)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// Seeds a generator. Xorshift is stuck at zero, so a zero seed becomes 1.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Seeds a generator for pool worker `index`.
    #[must_use]
    pub const fn for_worker(index: usize) -> Self {
        Self::new((index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    /// Advances the state and returns it.
    pub fn next_u64(&mut self) -> u64 {
        let mut s = self.state;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.state = s;
        s
    }

    /// Returns a value in `0..bound`.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_usize(&mut self, bound: usize) -> usize {
        assert!(bound > 0, "next_usize bound must be positive");
        (self.next_u64() as usize) % bound
    }
}
