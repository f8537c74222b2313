//! Injectable random number sources.
//!
//! Every random roll in the battle goes through a [`RandomSource`] passed in
//! by the caller, so a mission is fully reproducible from its seed and tests
//! can script exact outcomes.

use serde::{Deserialize, Serialize};

/// A source of uniformly distributed 32-bit values.
///
/// Only [`next_u32`](Self::next_u32) must be implemented; the game-facing
/// helpers are derived from it.
pub trait RandomSource {
    /// Next raw value.
    fn next_u32(&mut self) -> u32;

    /// Uniform integer in `min..=max`. Returns `min` when the range is empty.
    fn generate(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        let span = (i64::from(max) - i64::from(min) + 1) as u64;
        let roll = u64::from(self.next_u32()) % span;
        (i64::from(min) + roll as i64) as i32
    }

    /// True with `chance` percent probability.
    fn percent(&mut self, chance: i32) -> bool {
        chance > 0 && self.generate(0, 99) < chance
    }

    /// Approximately normal integer with the given mean and standard deviation.
    ///
    /// Sums twelve uniform draws (Irwin-Hall) so it stays integer-only.
    fn box_muller(&mut self, mean: i32, std_dev: i32) -> i32 {
        let mut sum: i64 = 0;
        for _ in 0..12 {
            sum += i64::from(self.generate(0, 999));
        }
        // sum has mean 5994 and standard deviation ~1000
        let z = sum - 5994;
        mean + (z * i64::from(std_dev) / 1000) as i32
    }
}

/// Shuffle a slice in place (Fisher-Yates) using the given source.
pub fn shuffle<T>(rng: &mut dyn RandomSource, items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = rng.generate(0, i as i32) as usize;
        items.swap(i, j);
    }
}

/// Seeded xorshift64* generator used for real battles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BattleRng {
    state: u64,
}

impl BattleRng {
    /// Create a generator from a seed. Any seed (including zero) is valid.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(0x9E37_79B9_7F4A_7C15) | 1,
        }
    }

    /// Raw generator state, for saving.
    #[must_use]
    pub const fn state(&self) -> u64 {
        self.state
    }

    /// Restore a generator from a saved state.
    #[must_use]
    pub const fn from_state(state: u64) -> Self {
        Self {
            state: if state == 0 { 1 } else { state },
        }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        self.state.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

impl Default for BattleRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RandomSource for BattleRng {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = BattleRng::new(42);
        let mut b = BattleRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_generate_stays_in_range() {
        let mut rng = BattleRng::new(7);
        for _ in 0..1000 {
            let v = rng.generate(-3, 5);
            assert!((-3..=5).contains(&v));
        }
        assert_eq!(rng.generate(4, 4), 4);
        assert_eq!(rng.generate(9, 2), 9);
    }

    #[test]
    fn test_percent_extremes() {
        let mut rng = BattleRng::new(1);
        for _ in 0..200 {
            assert!(!rng.percent(0));
            assert!(rng.percent(100));
        }
    }

    #[test]
    fn test_state_roundtrip_continues_stream() {
        let mut rng = BattleRng::new(99);
        rng.next_u32();
        let mut restored = BattleRng::from_state(rng.state());
        assert_eq!(rng.next_u32(), restored.next_u32());
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = BattleRng::new(3);
        let mut items: Vec<i32> = (0..20).collect();
        shuffle(&mut rng, &mut items);
        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }
}
