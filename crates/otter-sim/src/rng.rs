use serde::{Deserialize, Serialize};

/// Seeded pseudo-random stream driving every choice the simulator makes.
///
/// A 64-bit LCG: not statistically strong, but identical on every platform,
/// so a seed replays the same campaign anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    /// Independent stream for a sub-component (fault injector, replica).
    #[must_use]
    pub const fn fork(seed: u64, stream: u64) -> Self {
        Self::new(seed.wrapping_mul(0x0100_0000_01B3).wrapping_add(stream))
    }

    pub const fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        // High bits of an LCG cycle far better than the low ones.
        self.state >> 16
    }

    /// Value in `[0, upper_exclusive)`; `0` when the range is empty.
    pub const fn next_bounded(&mut self, upper_exclusive: u64) -> u64 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u64() % upper_exclusive
    }

    /// Index into a collection of `len` items.
    pub fn pick(&mut self, len: usize) -> usize {
        let bound = u64::try_from(len).unwrap_or(u64::MAX);
        usize::try_from(self.next_bounded(bound)).unwrap_or(0)
    }

    /// Bernoulli trial with an integer percentage.
    pub fn hit_rate_percent(&mut self, percent: u8) -> bool {
        match percent {
            0 => false,
            100.. => true,
            _ => self.next_bounded(100) < u64::from(percent),
        }
    }
}
