//! Shot and throw trajectories.
//!
//! A shot aims at the most solid thing on the target tile (a unit, then an
//! object, then the walls, then the floor). A hit roll against the firing
//! accuracy decides whether the bullet flies true; a miss spreads the aim
//! point by an amount that grows with distance and with how poor the
//! accuracy was. The aim line is then extended past the target so a miss
//! keeps flying until it hits something or leaves the map.
//!
//! Throws follow a parabola. The arc height is searched for so that the
//! item would land on the target tile; a throw with no such arc is not
//! possible.

use crate::math::Fixed;
use crate::position::{Position, VOXELS_PER_TILE_XY, VOXELS_PER_TILE_Z};
use crate::rng::RandomSource;
use crate::rules::TilePart;
use crate::saved_battle::SavedBattleGame;
use crate::tile_engine::line::{calculate_line, calculate_parabola, LineTrace};
use crate::tile_engine::vision::eye_voxel;
use crate::unit::UnitId;

/// Arc heights tried for a throw, in tenths.
const THROW_CURVATURES: [i32; 7] = [10, 15, 20, 25, 30, 35, 40];

/// Height above the floor a shot aims at when the target tile holds terrain.
const TERRAIN_AIM_HEIGHT: i32 = 10;

/// Voxel a shot leaves from: just below the shooter's eyes.
#[must_use]
pub fn muzzle_voxel(save: &SavedBattleGame, shooter: UnitId) -> Option<Position> {
    eye_voxel(save, shooter).map(|eye| eye + Position::new(0, 0, -2))
}

/// Voxel to aim at on a target tile, or `None` if the tile is empty air.
#[must_use]
pub fn target_voxel(save: &SavedBattleGame, target: Position) -> Option<Position> {
    let tile = save.tile(target)?;
    let base = target.to_voxel();
    let half = VOXELS_PER_TILE_XY / 2;
    if let Some(unit) = tile.unit().and_then(|id| save.unit(id)) {
        let body = unit.height() / 2 + 2 - tile.terrain_level();
        return Some(target.to_voxel_center() + Position::new(0, 0, body));
    }
    if tile.part(TilePart::Object).is_some() {
        return Some(base + Position::new(half, half, TERRAIN_AIM_HEIGHT));
    }
    if tile.part(TilePart::NorthWall).is_some() {
        return Some(base + Position::new(half, 0, TERRAIN_AIM_HEIGHT));
    }
    if tile.part(TilePart::WestWall).is_some() {
        return Some(base + Position::new(0, half, TERRAIN_AIM_HEIGHT));
    }
    if tile.part(TilePart::Floor).is_some() {
        return Some(base + Position::new(half, half, 1));
    }
    None
}

/// Move an aim point by a random spread for a missed shot.
///
/// The spread is one voxel per tile of distance for every ten points of
/// accuracy short of 100, and at least two voxels. Height spreads half as
/// much.
fn apply_accuracy(origin: Position, target: Position, accuracy: i32, rng: &mut dyn RandomSource) -> Position {
    let tiles = (origin.distance(target) / VOXELS_PER_TILE_XY).max(1);
    let miss_by = (100 - accuracy.clamp(0, 100)) / 10 + 1;
    let spread = (tiles * miss_by).max(2);
    let offset = Position::new(
        rng.generate(-spread, spread),
        rng.generate(-spread, spread),
        rng.generate(-spread / 2, spread / 2),
    );
    if offset == Position::ZERO {
        // a miss never lands dead centre
        return target + Position::new(spread, 0, 0);
    }
    target + offset
}

/// Stretch the segment `origin -> target` so that it runs off the map.
fn extend_past(save: &SavedBattleGame, origin: Position, target: Position) -> Position {
    let delta = target - origin;
    let longest = delta.x.abs().max(delta.y.abs()).max(delta.z.abs());
    if longest == 0 {
        return target;
    }
    let (width, length, height) = save.dimensions();
    let span = (width.max(length) * VOXELS_PER_TILE_XY).max(height * VOXELS_PER_TILE_Z);
    let factor = span / longest + 1;
    origin + delta * factor
}

/// Trace a shot at a tile with a chance to hit of `accuracy` percent.
///
/// Returns `None` when there is nothing to aim at on the tile. Otherwise
/// the trace stops at the first solid voxel; a clear trace means the
/// bullet left the map.
pub fn shot_trajectory(
    save: &SavedBattleGame,
    shooter: UnitId,
    target: Position,
    accuracy: i32,
    rng: &mut dyn RandomSource,
) -> Option<LineTrace> {
    let origin = muzzle_voxel(save, shooter)?;
    let aim = target_voxel(save, target)?;
    let aim = if rng.percent(accuracy) {
        aim
    } else {
        apply_accuracy(origin, aim, accuracy, rng)
    };
    Some(calculate_line(save, origin, extend_past(save, origin, aim), Some(shooter)))
}

/// Lowest arc that carries a thrown item from `thrower` onto `target`.
#[must_use]
pub fn validate_throw(save: &SavedBattleGame, thrower: UnitId, target: Position) -> Option<Fixed> {
    let origin = muzzle_voxel(save, thrower)?;
    let aim = throw_aim(save, target)?;
    THROW_CURVATURES.iter().map(|tenths| Fixed::from_num(*tenths) / 10).find(|curvature| {
        let trace = calculate_parabola(save, origin, aim, Some(thrower), *curvature);
        landing_tile(&trace) == Some(target)
    })
}

/// Trace a throw at a tile. A throw that misses lands up to a tile away
/// for every 25 points of accuracy short of 100.
pub fn throw_trajectory(
    save: &SavedBattleGame,
    thrower: UnitId,
    target: Position,
    curvature: Fixed,
    accuracy: i32,
    rng: &mut dyn RandomSource,
) -> Option<LineTrace> {
    let origin = muzzle_voxel(save, thrower)?;
    let mut aim = throw_aim(save, target)?;
    if !rng.percent(accuracy) {
        let spread = ((100 - accuracy.clamp(0, 100)) / 25 + 1) * VOXELS_PER_TILE_XY / 2;
        aim = aim + Position::new(rng.generate(-spread, spread), rng.generate(-spread, spread), 0);
    }
    Some(calculate_parabola(save, origin, aim, Some(thrower), curvature))
}

/// Where a thrown item ends up: the last free voxel before whatever it
/// hit, or the end of its flight.
#[must_use]
pub fn landing_voxel(trace: &LineTrace) -> Option<Position> {
    let voxels = &trace.trajectory;
    if trace.is_clear() {
        voxels.last().copied()
    } else if voxels.len() >= 2 {
        Some(voxels[voxels.len() - 2])
    } else {
        voxels.first().copied()
    }
}

fn landing_tile(trace: &LineTrace) -> Option<Position> {
    landing_voxel(trace).map(Position::voxel_to_tile)
}

fn throw_aim(save: &SavedBattleGame, target: Position) -> Option<Position> {
    let tile = save.tile(target)?;
    Some(target.to_voxel_center() + Position::new(0, 0, 2 - tile.terrain_level()))
}
