//! Voxel ray tracing.
//!
//! One 3D Bresenham walker serves bullets, sight lines and terrain
//! discovery. Each visited voxel is tested against the LOFT template of
//! the unit and the four terrain parts in its tile.

use std::mem::swap;

use crate::math::{isqrt, Fixed};
use crate::position::Position;
use crate::rules::TilePart;
use crate::saved_battle::SavedBattleGame;
use crate::unit::UnitId;

use super::TileEngine;

/// What a voxel (or a ray) ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VoxelType {
    /// Nothing solid.
    #[default]
    Empty,
    /// A floor part.
    Floor,
    /// A west wall part.
    WestWall,
    /// A north wall part.
    NorthWall,
    /// An object part.
    Object,
    /// A unit's body.
    Unit,
    /// Left the map.
    OutOfMap,
}

impl VoxelType {
    /// Voxel type of a terrain part slot.
    #[must_use]
    pub const fn from_part(part: TilePart) -> Self {
        match part {
            TilePart::Floor => Self::Floor,
            TilePart::WestWall => Self::WestWall,
            TilePart::NorthWall => Self::NorthWall,
            TilePart::Object => Self::Object,
        }
    }

    /// Terrain part slot hit, if any.
    #[must_use]
    pub const fn part(self) -> Option<TilePart> {
        match self {
            Self::Floor => Some(TilePart::Floor),
            Self::WestWall => Some(TilePart::WestWall),
            Self::NorthWall => Some(TilePart::NorthWall),
            Self::Object => Some(TilePart::Object),
            _ => None,
        }
    }

    /// Classic integer code: -1 for nothing, 0-3 for parts, 4 unit, 5 off map.
    #[must_use]
    pub const fn to_code(self) -> i32 {
        match self {
            Self::Empty => -1,
            Self::Floor => 0,
            Self::WestWall => 1,
            Self::NorthWall => 2,
            Self::Object => 3,
            Self::Unit => 4,
            Self::OutOfMap => 5,
        }
    }
}

/// Result of tracing a ray.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTrace {
    /// First obstruction, or [`VoxelType::Empty`].
    pub hit: VoxelType,
    /// Voxels visited, ending with the impact voxel when something was hit.
    pub trajectory: Vec<Position>,
}

impl LineTrace {
    /// True if the ray reached its target unobstructed.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.hit == VoxelType::Empty
    }

    /// Voxel where the ray stopped, if it hit something.
    #[must_use]
    pub fn impact(&self) -> Option<Position> {
        if self.is_clear() {
            None
        } else {
            self.trajectory.last().copied()
        }
    }
}

/// Walk a 3D Bresenham line from `origin` towards `target`.
///
/// `visit` is called for every point from `origin` up to but excluding
/// `target`; returning true stops the walk. Returns true if stopped.
pub fn bresenham(origin: Position, target: Position, mut visit: impl FnMut(Position) -> bool) -> bool {
    let (mut x0, mut y0, mut z0) = (origin.x, origin.y, origin.z);
    let (mut x1, mut y1, mut z1) = (target.x, target.y, target.z);

    // make x the longest axis
    let swap_xy = (y1 - y0).abs() > (x1 - x0).abs();
    if swap_xy {
        swap(&mut x0, &mut y0);
        swap(&mut x1, &mut y1);
    }
    let swap_xz = (z1 - z0).abs() > (x1 - x0).abs();
    if swap_xz {
        swap(&mut x0, &mut z0);
        swap(&mut x1, &mut z1);
    }

    let delta_x = (x1 - x0).abs();
    let delta_y = (y1 - y0).abs();
    let delta_z = (z1 - z0).abs();
    let mut drift_xy = delta_x / 2;
    let mut drift_xz = delta_x / 2;
    let step_x = if x0 > x1 { -1 } else { 1 };
    let step_y = if y0 > y1 { -1 } else { 1 };
    let step_z = if z0 > z1 { -1 } else { 1 };

    let (mut y, mut z) = (y0, z0);
    let mut x = x0;
    while x != x1 {
        let (mut cx, mut cy, mut cz) = (x, y, z);
        if swap_xz {
            swap(&mut cx, &mut cz);
        }
        if swap_xy {
            swap(&mut cx, &mut cy);
        }
        if visit(Position::new(cx, cy, cz)) {
            return true;
        }

        drift_xy -= delta_y;
        drift_xz -= delta_z;
        if drift_xy < 0 {
            y += step_y;
            drift_xy += delta_x;
        }
        if drift_xz < 0 {
            z += step_z;
            drift_xz += delta_x;
        }
        x += step_x;
    }
    false
}

/// What occupies a voxel.
///
/// Units are tested before terrain; `exclude` skips one unit (usually the
/// shooter) and `exclude_all_units` skips them all.
#[must_use]
pub fn voxel_check(
    save: &SavedBattleGame,
    voxel: Position,
    exclude: Option<UnitId>,
    exclude_all_units: bool,
) -> VoxelType {
    let Some(tile) = save.tile(voxel.voxel_to_tile()) else {
        return VoxelType::OutOfMap;
    };
    let offset = voxel.voxel_offset();
    let lofts = save.rules().lofts();

    if !exclude_all_units {
        let occupant = tile
            .unit()
            .filter(|id| Some(*id) != exclude)
            .and_then(|id| save.unit(id));
        if let Some(unit) = occupant {
            if offset.z < unit.height()
                && lofts.is_solid(unit.armor_rules().loft_template, offset.x, offset.y)
            {
                return VoxelType::Unit;
            }
        }
    }

    for slot in TilePart::ALL {
        if tile.is_ufo_door_open(slot) {
            continue;
        }
        if let Some(data) = tile.part(slot) {
            if lofts.is_solid(data.loft_at(offset.z), offset.x, offset.y) {
                return VoxelType::from_part(slot);
            }
        }
    }
    VoxelType::Empty
}

/// Trace a straight ray between two voxels, stopping at the first solid
/// voxel.
///
/// Every trace records its full trajectory and tests each voxel against
/// tiles and units. There is no tile-only mode and no visibility filter;
/// callers that only need the hit read `hit` and ignore the trajectory.
#[must_use]
pub fn calculate_line(
    save: &SavedBattleGame,
    origin: Position,
    target: Position,
    exclude: Option<UnitId>,
) -> LineTrace {
    let mut trajectory = Vec::new();
    let mut hit = VoxelType::Empty;
    bresenham(origin, target, |voxel| {
        trajectory.push(voxel);
        hit = voxel_check(save, voxel, exclude, false);
        hit != VoxelType::Empty
    });
    LineTrace { hit, trajectory }
}

/// Trace a throwing arc from `origin` through `target`.
///
/// The arc peaks `sqrt(distance) * curvature` voxels above the straight
/// line halfway along and keeps falling past the target until it lands.
#[must_use]
pub fn calculate_parabola(
    save: &SavedBattleGame,
    origin: Position,
    target: Position,
    exclude: Option<UnitId>,
    curvature: Fixed,
) -> LineTrace {
    let range = isqrt(origin.distance_squared_3d(target)).max(1);
    let ro = Fixed::from_num(range);
    let peak = Fixed::from_num(isqrt(range * 1_000_000)) / Fixed::from_num(1000) * curvature;
    let k = Fixed::from_num(4) * peak / ro / ro;
    let half = ro / Fixed::from_num(2);
    let delta = target - origin;
    let limit = range * 4 + 64;

    let mut trajectory = Vec::new();
    let mut i: i64 = 8;
    let mut z = origin.z;
    while z > 0 && i <= limit {
        let t = Fixed::from_num(i);
        let along = |d: i32| (t * Fixed::from_num(d) / ro).to_num::<i32>();
        let bend = (k * (t - half) * (t - half)).to_num::<i32>();
        let x = origin.x + along(delta.x);
        let y = origin.y + along(delta.y);
        z = origin.z + along(delta.z) - bend + peak.to_num::<i32>();

        let voxel = Position::new(x, y, z);
        trajectory.push(voxel);
        let hit = voxel_check(save, voxel, exclude, false);
        if hit != VoxelType::Empty {
            return LineTrace { hit, trajectory };
        }
        i += 1;
    }
    LineTrace {
        hit: VoxelType::Empty,
        trajectory,
    }
}

impl TileEngine<'_> {
    /// See [`voxel_check`].
    #[must_use]
    pub fn voxel_check(&self, voxel: Position, exclude: Option<UnitId>, exclude_all_units: bool) -> VoxelType {
        voxel_check(self.save, voxel, exclude, exclude_all_units)
    }

    /// See [`calculate_line`].
    #[must_use]
    pub fn calculate_line(&self, origin: Position, target: Position, exclude: Option<UnitId>) -> LineTrace {
        calculate_line(self.save, origin, target, exclude)
    }

    /// See [`calculate_parabola`].
    #[must_use]
    pub fn calculate_parabola(
        &self,
        origin: Position,
        target: Position,
        exclude: Option<UnitId>,
        curvature: Fixed,
    ) -> LineTrace {
        calculate_parabola(self.save, origin, target, exclude, curvature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{flat_battle, parts, place};
    use crate::unit::Faction;

    #[test]
    fn test_bresenham_visits_each_step_once() {
        let mut points = Vec::new();
        bresenham(Position::new(0, 0, 0), Position::new(5, 2, 1), |p| {
            points.push(p);
            false
        });
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], Position::ZERO);
        assert!(points.windows(2).all(|w| (w[1].x - w[0].x) == 1));
        assert!(!bresenham(Position::ZERO, Position::ZERO, |_| true));
    }

    #[test]
    fn test_wall_on_line_truncates_trajectory() {
        let mut save = flat_battle(5, 3, 1);
        place(&mut save, Position::new(3, 1, 0), parts::WEST_WALL);

        let origin = Position::new(0, 1, 0).to_voxel_center() + Position::new(0, 0, 12);
        let target = Position::new(4, 1, 0).to_voxel_center() + Position::new(0, 0, 12);
        let trace = calculate_line(&save, origin, target, None);

        assert_eq!(trace.hit, VoxelType::WestWall);
        let impact = trace.impact().unwrap();
        // the west wall occupies the first two voxel columns of tile x=3
        assert_eq!(impact, Position::new(48, 24, 12));
        assert_eq!(impact.voxel_to_tile(), Position::new(3, 1, 0));
        assert!(trace.trajectory.iter().all(|v| v.x <= 48));
        assert_eq!(trace.trajectory.last(), Some(&impact));
    }

    #[test]
    fn test_clear_line_has_no_impact() {
        let save = flat_battle(5, 3, 1);
        let origin = Position::new(0, 1, 0).to_voxel_center() + Position::new(0, 0, 12);
        let target = Position::new(4, 1, 0).to_voxel_center() + Position::new(0, 0, 12);
        let trace = calculate_line(&save, origin, target, None);
        assert!(trace.is_clear());
        assert_eq!(trace.impact(), None);
        assert_eq!(trace.trajectory.len(), 64);
    }

    #[test]
    fn test_units_block_unless_excluded() {
        let mut save = flat_battle(5, 3, 1);
        let shooter = save.add_unit("soldier", Faction::Player, Position::new(0, 1, 0)).unwrap();
        let blocker = save.add_unit("sectoid", Faction::Hostile, Position::new(2, 1, 0)).unwrap();

        let origin = Position::new(0, 1, 0).to_voxel_center() + Position::new(0, 0, 12);
        let target = Position::new(4, 1, 0).to_voxel_center() + Position::new(0, 0, 12);
        let trace = calculate_line(&save, origin, target, Some(shooter));
        assert_eq!(trace.hit, VoxelType::Unit);
        assert_eq!(trace.impact().unwrap().voxel_to_tile(), Position::new(2, 1, 0));

        let voxel = Position::new(2, 1, 0).to_voxel_center() + Position::new(0, 0, 5);
        assert_eq!(voxel_check(&save, voxel, Some(blocker), false), VoxelType::Empty);
        assert_eq!(voxel_check(&save, voxel, None, true), VoxelType::Empty);
        assert_eq!(voxel_check(&save, Position::new(-1, 0, 0), None, false), VoxelType::OutOfMap);
    }

    #[test]
    fn test_open_ufo_door_lets_rays_through() {
        let mut save = flat_battle(3, 4, 1);
        place(&mut save, Position::new(1, 2, 0), parts::UFO_DOOR);
        let origin = Position::new(1, 3, 0).to_voxel_center() + Position::new(0, 0, 10);
        let target = Position::new(1, 0, 0).to_voxel_center() + Position::new(0, 0, 10);

        assert_eq!(calculate_line(&save, origin, target, None).hit, VoxelType::NorthWall);
        save.tile_mut(Position::new(1, 2, 0))
            .unwrap()
            .set_ufo_door_frame(TilePart::NorthWall, 3);
        assert!(calculate_line(&save, origin, target, None).is_clear());
    }

    #[test]
    fn test_parabola_lands_on_the_floor() {
        let save = flat_battle(8, 3, 2);
        let origin = Position::new(0, 1, 0).to_voxel_center() + Position::new(0, 0, 16);
        let target = Position::new(6, 1, 0).to_voxel_center();
        let trace = calculate_parabola(&save, origin, target, None, Fixed::from_num(2));

        assert_eq!(trace.hit, VoxelType::Floor);
        let landing = trace.impact().unwrap().voxel_to_tile();
        assert!((landing.x - 6).abs() <= 1, "landed at {landing}");
        // the arc rises above its start before coming down
        assert!(trace.trajectory.iter().any(|v| v.z > origin.z));
    }
}
