//! Fixed-point and integer math utilities for deterministic simulation.
//!
//! Fractional combat math (armor multipliers, accuracy, throwing arcs)
//! uses fixed-point arithmetic so that every platform resolves a battle
//! identically. Distances are computed with integer square roots.

use fixed::types::I32F32;

/// Fixed-point number type for all fractional simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
pub type Fixed = I32F32;

/// Integer square root (floor).
#[must_use]
pub fn isqrt(value: i64) -> i64 {
    if value <= 0 {
        return 0;
    }
    let mut x = value;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + value / x) / 2;
    }
    x
}

/// Square root of `value` rounded to the nearest integer.
#[must_use]
pub fn rounded_sqrt(value: i64) -> i32 {
    let root = isqrt(value);
    // round(sqrt(v)) == root + 1 exactly when v > root^2 + root
    if value > root * root + root {
        (root + 1) as i32
    } else {
        root as i32
    }
}

/// Planar Euclidean distance between two integer offsets, rounded.
#[must_use]
pub fn rounded_distance(dx: i32, dy: i32) -> i32 {
    rounded_sqrt(i64::from(dx) * i64::from(dx) + i64::from(dy) * i64::from(dy))
}

/// Convert an integer percentage to a fixed-point fraction (`75` -> `0.75`).
#[must_use]
pub fn percent_to_fixed(percent: i32) -> Fixed {
    Fixed::from_num(percent) / Fixed::from_num(100)
}

/// Apply a multiplier to an integer power value, truncating the result.
///
/// Negative inputs clamp to zero.
#[must_use]
pub fn apply_modifier(power: i32, modifier: Fixed) -> i32 {
    if power <= 0 || modifier <= Fixed::ZERO {
        return 0;
    }
    (Fixed::from_num(power) * modifier).to_num::<i32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(1_000_000), 1000);
    }

    #[test]
    fn test_rounded_distance() {
        assert_eq!(rounded_distance(3, 4), 5);
        assert_eq!(rounded_distance(1, 1), 1);
        assert_eq!(rounded_distance(2, 2), 3);
        assert_eq!(rounded_distance(0, 0), 0);
        assert_eq!(rounded_distance(-6, 0), 6);
    }

    #[test]
    fn test_apply_modifier_truncates() {
        assert_eq!(apply_modifier(10, percent_to_fixed(75)), 7);
        assert_eq!(apply_modifier(99, percent_to_fixed(50)), 49);
        assert_eq!(apply_modifier(-5, Fixed::ONE), 0);
    }
}
