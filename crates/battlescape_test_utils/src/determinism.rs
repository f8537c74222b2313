//! Determinism testing utilities.
//!
//! Provides a harness for verifying that a battle produces identical
//! results given identical inputs.
//!
//! # Testing Strategy
//!
//! A battle must replay exactly from its seed, and a battle restored from a
//! save must carry on exactly as the original would have. Sources of
//! non-determinism include:
//!
//! - **Floating-point math**: combat fractions use
//!   [`battlescape_core::math::Fixed`].
//!
//! - **`HashMap` iteration order**: units and items are always visited in id
//!   order.
//!
//! - **System randomness**: every roll goes through an injected
//!   [`RandomSource`](battlescape_core::rng::RandomSource).
//!
//! # Test Levels
//!
//! 1. **Unit tests**: single states and engine passes
//! 2. **Property tests**: random inputs keep the invariants
//! 3. **Integration tests**: whole autoplayed battles are reproducible
//! 4. **Save tests**: a snapshot taken mid-battle resumes identically

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use battlescape_core::battlescape_game::BattlescapeGame;
use battlescape_core::rng::BattleRng;
use battlescape_core::rules::Ruleset;
use serde::Serialize;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for a deterministic battle).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the battle was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Battle is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial state
/// * `step` - Function to advance the state by one tick
/// * `hash` - Function to compute a state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Hash of a battle and its random stream.
#[must_use]
pub fn game_hash(game: &BattlescapeGame<BattleRng>) -> u64 {
    compute_hash(&(game.save().state_hash(), game.rng().state(), game.queue_len()))
}

/// Run the same battle twice and compare the final hashes.
pub fn verify_battle_determinism<F>(setup_fn: F, num_ticks: u64) -> DeterminismResult
where
    F: Fn() -> BattlescapeGame<BattleRng>,
{
    verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |game| {
            game.think();
        },
        game_hash,
    )
}

/// Compare two runs tick by tick, finding the first divergence.
///
/// # Returns
///
/// `None` if the runs agree throughout, `Some(tick)` at the first tick
/// where they differ.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> BattlescapeGame<BattleRng>,
{
    let mut first = setup_fn();
    let mut second = setup_fn();

    if game_hash(&first) != game_hash(&second) {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        first.think();
        second.think();

        if game_hash(&first) != game_hash(&second) {
            tracing::warn!(tick, "Battles diverged");
            return Some(tick);
        }
    }

    None
}

/// Upper bound on ticks spent waiting for a turn boundary.
const TURN_WAIT_LIMIT: u64 = 20_000;

/// Play at least `before` ticks up to the next turn boundary, snapshot,
/// then play `after` more ticks on both the original and a copy restored
/// from bytes. True if both end in the same state.
///
/// The snapshot is taken right after a turn change with the state queue
/// empty: queued states and the per-turn AI bookkeeping of the scheduler
/// are not part of a save.
pub fn verify_snapshot_determinism<F>(setup_fn: F, rules: &Arc<Ruleset>, before: u64, after: u64) -> bool
where
    F: Fn() -> BattlescapeGame<BattleRng>,
{
    let mut original = setup_fn();
    for _ in 0..before {
        original.think();
    }
    let mut turned = false;
    for _ in 0..TURN_WAIT_LIMIT {
        let events = original.think();
        turned |= !events.turn_changes.is_empty();
        if (turned && !original.is_busy()) || original.is_battle_over() {
            break;
        }
    }
    if !turned {
        return false;
    }

    let bytes = match original.snapshot().and_then(|snapshot| snapshot.to_bytes()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let restored = battlescape_core::serialization::BattleSnapshot::from_bytes(&bytes)
        .and_then(|snapshot| BattlescapeGame::restore(&snapshot, Arc::clone(rules), original.config().clone()));
    let Ok(mut restored) = restored else {
        return false;
    };
    restored.set_autoplay(true);

    if original.save().state_hash() != restored.save().state_hash() {
        return false;
    }
    for _ in 0..after {
        original.think();
        restored.think();
    }
    original.save().state_hash() == restored.save().state_hash()
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for battle inputs.
pub mod strategies {
    use battlescape_core::math::{percent_to_fixed, Fixed};
    use battlescape_core::position::{Direction, Position};
    use battlescape_core::rules::DamageType;
    use proptest::prelude::*;

    /// A tile on a `width` by `length` by `height` map.
    pub fn arb_position(width: i32, length: i32, height: i32) -> impl Strategy<Value = Position> {
        (0..width, 0..length, 0..height).prop_map(|(x, y, z)| Position::new(x, y, z))
    }

    /// A battle seed.
    pub fn arb_seed() -> impl Strategy<Value = u64> {
        any::<u64>()
    }

    /// One of the eight compass directions.
    pub fn arb_direction() -> impl Strategy<Value = Direction> {
        (0..8i32).prop_map(Direction::from_index)
    }

    /// A damage type that harms units directly.
    pub fn arb_damage_type() -> impl Strategy<Value = DamageType> {
        prop_oneof![
            Just(DamageType::ArmorPiercing),
            Just(DamageType::Incendiary),
            Just(DamageType::HighExplosive),
            Just(DamageType::Laser),
            Just(DamageType::Plasma),
            Just(DamageType::Stun),
            Just(DamageType::Melee),
            Just(DamageType::Acid),
        ]
    }

    /// An armor damage modifier between 0% and 200%.
    pub fn arb_modifier() -> impl Strategy<Value = Fixed> {
        (0..=200i32).prop_map(percent_to_fixed)
    }

    /// Blast power in the range weapons use.
    pub fn arb_power() -> impl Strategy<Value = i32> {
        1..=200i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{autoplay_skirmish, rules};

    #[test]
    fn test_verify_determinism_counter() {
        let result = verify_determinism(3, 10, || 0u64, |n| *n += 1, |n| *n);
        assert!(result.is_deterministic);
        assert_eq!(result.unique_hashes(), vec![10]);
    }

    #[test]
    fn test_autoplay_skirmish_is_deterministic() {
        verify_battle_determinism(|| autoplay_skirmish(17), 400).assert_deterministic();
    }

    #[test]
    fn test_no_divergence_between_identical_runs() {
        assert_eq!(find_first_divergence(|| autoplay_skirmish(3), 200), None);
    }

    #[test]
    fn test_snapshot_resumes_identically() {
        assert!(verify_snapshot_determinism(|| autoplay_skirmish(5), &rules(), 150, 200));
    }
}
