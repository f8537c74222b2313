//! Fields of view.
//!
//! A unit sees a quarter circle in front of it (a 90 degree cone for
//! cardinal facings, a full quadrant for diagonal ones) out to the
//! configured view distance. Player units also discover the terrain they
//! look at; hostile units only care about who they see.

use tracing::trace;

use crate::position::{Direction, Position};
use crate::rules::Affector;
use crate::saved_battle::SavedBattleGame;
use crate::tile::Discovery;
use crate::unit::{Faction, UnitId};

use super::blockage::step_blockage;
use super::line::{bresenham, calculate_line, VoxelType};
use super::TileEngine;

/// Units closer than this to a changed tile get their view refreshed.
pub const FOV_REFRESH_RANGE: i32 = 20;

/// True if `to` lies inside the view cone of a unit at `from` facing
/// `facing`. The unit's own column is always inside.
#[must_use]
pub fn in_view_cone(facing: Direction, from: Position, to: Position) -> bool {
    let (dx, dy) = (to.x - from.x, to.y - from.y);
    let v = facing.vector();
    if facing.is_diagonal() {
        dx * v.x >= 0 && dy * v.y >= 0
    } else {
        let forward = dx * v.x + dy * v.y;
        let lateral = dx * v.y - dy * v.x;
        forward >= lateral.abs()
    }
}

/// Voxel a unit looks from: the middle of its tile, just below the top of
/// its head.
#[must_use]
pub fn eye_voxel(save: &SavedBattleGame, unit: UnitId) -> Option<Position> {
    let unit = save.unit(unit)?;
    let pos = unit.position();
    let terrain = save.tile(pos).map_or(0, crate::tile::Tile::terrain_level);
    Some(pos.to_voxel_center() + Position::new(0, 0, unit.height() - terrain - 1))
}

/// Line of sight from one unit to another, taking light and smoke into
/// account.
///
/// Several heights of the target are tried from the head down; the target
/// is seen if any of them has a clear line, or the line ends on the target
/// itself. Smoke shortens the view by half its density for every smoky
/// tile the line crosses.
#[must_use]
pub fn check_if_unit_visible(
    save: &SavedBattleGame,
    max_view_distance: i32,
    max_darkness: i32,
    viewer: UnitId,
    target: UnitId,
) -> bool {
    let (Some(observer), Some(seen)) = (save.unit(viewer), save.unit(target)) else {
        return false;
    };
    if viewer == target || seen.is_out() || observer.is_out() {
        return false;
    }
    let target_pos = seen.position();
    let Some(target_tile) = save.tile(target_pos) else {
        return false;
    };
    if target_tile.shade() > max_darkness && target_tile.fire() == 0 {
        return false;
    }
    let distance = observer.position().distance(target_pos);
    if distance > max_view_distance {
        return false;
    }
    let Some(eye) = eye_voxel(save, viewer) else {
        return false;
    };

    let origin_smoke = save.tile(observer.position()).map_or(0, crate::tile::Tile::smoke);
    let base = target_pos.to_voxel_center();
    let mut z = seen.height() - 1;
    while z >= 0 {
        let trace = calculate_line(save, eye, base + Position::new(0, 0, z), Some(viewer));
        let reached = match trace.hit {
            VoxelType::Empty => true,
            VoxelType::Unit => trace.impact().is_some_and(|v| v.voxel_to_tile() == target_pos),
            _ => false,
        };
        if reached {
            let mut visibility = max_view_distance - origin_smoke / 2;
            let mut last_tile = observer.position();
            for voxel in &trace.trajectory {
                let tile_pos = voxel.voxel_to_tile();
                if tile_pos != last_tile {
                    last_tile = tile_pos;
                    visibility -= save.tile(tile_pos).map_or(0, |t| t.smoke() / 2);
                }
            }
            if distance <= visibility {
                return true;
            }
        }
        z -= 2;
    }
    false
}

/// Tiles a unit can see terrain on, walking a tile line to each candidate
/// and stopping at the first step that blocks vision.
fn visible_tiles(save: &SavedBattleGame, origin: Position, facing: Direction, range: i32) -> Vec<Position> {
    let (_, _, height) = save.dimensions();
    let mut seen = vec![false; save.tiles().len()];
    let mut result = Vec::new();
    let mut mark = |pos: Position, result: &mut Vec<Position>| {
        if let Some(index) = save.tile_index(pos) {
            if !seen[index] {
                seen[index] = true;
                result.push(pos);
            }
        }
    };

    for dx in -range..=range {
        for dy in -range..=range {
            let column = Position::new(origin.x + dx, origin.y + dy, origin.z);
            if !save.is_on_map(column)
                || origin.distance(column) > range
                || !in_view_cone(facing, origin, column)
            {
                continue;
            }
            for z in 0..height {
                let target = Position::new(column.x, column.y, z);
                let mut previous = origin;
                let mut blocked = false;
                bresenham(origin, target, |pos| {
                    if pos != previous {
                        if step_blockage(save, previous, pos, Affector::Vision) > 0 {
                            blocked = true;
                            return true;
                        }
                        previous = pos;
                    }
                    mark(pos, &mut result);
                    false
                });
                if !blocked && (target == previous || step_blockage(save, previous, target, Affector::Vision) == 0) {
                    mark(target, &mut result);
                }
            }
        }
    }
    result
}

impl TileEngine<'_> {
    /// See [`check_if_unit_visible`].
    #[must_use]
    pub fn check_if_unit_visible(&self, viewer: UnitId, target: UnitId) -> bool {
        check_if_unit_visible(
            self.save,
            self.config.balance.max_view_distance,
            self.config.balance.max_darkness_to_see_units,
            viewer,
            target,
        )
    }

    /// Recompute what a unit sees.
    ///
    /// Rebuilds the unit's visible-unit list. Player units flag the hostiles
    /// they see as visible and discover terrain; hostile units mark the
    /// units they see as spotted. Returns true if an enemy was seen that
    /// was not seen before.
    pub fn calculate_fov(&mut self, unit: UnitId) -> bool {
        let Some(viewer) = self.save.unit(unit) else {
            return false;
        };
        if viewer.is_out() {
            if let Some(viewer) = self.save.unit_mut(unit) {
                viewer.clear_visible_units();
            }
            return false;
        }
        let faction = viewer.faction();
        let origin = viewer.position();
        let facing = viewer.direction();
        let range = self.config.balance.max_view_distance;

        let seen: Vec<(UnitId, Faction)> = self
            .save
            .units()
            .iter()
            .filter(|other| other.id() != unit && !other.is_out())
            .filter(|other| in_view_cone(facing, origin, other.position()))
            .filter(|other| self.check_if_unit_visible(unit, other.id()))
            .map(|other| (other.id(), other.faction()))
            .collect();
        let tiles = if faction == Faction::Player {
            visible_tiles(self.save, origin, facing, range)
        } else {
            Vec::new()
        };

        let mut spotted_new = false;
        let previous: Vec<UnitId> = self.save.unit(unit).map(|u| u.visible_units().to_vec()).unwrap_or_default();
        if let Some(viewer) = self.save.unit_mut(unit) {
            viewer.clear_visible_units();
        }
        for (other, other_faction) in seen {
            if faction == Faction::Player && other_faction != Faction::Player {
                if let Some(target) = self.save.unit_mut(other) {
                    target.set_visible(true);
                }
            }
            if !faction.is_enemy_of(other_faction) {
                continue;
            }
            if faction == Faction::Hostile {
                if let Some(target) = self.save.unit_mut(other) {
                    target.mark_spotted();
                }
            }
            if let Some(viewer) = self.save.unit_mut(unit) {
                viewer.add_to_visible_units(other);
            }
            if !previous.contains(&other) {
                spotted_new = true;
            }
        }

        for pos in tiles {
            if let Some(tile) = self.save.tile_mut(pos) {
                tile.set_discovered(Discovery::Content, true);
            }
            if let Some(tile) = self.save.tile_mut(Position::new(pos.x + 1, pos.y, pos.z)) {
                tile.set_discovered(Discovery::West, true);
            }
            if let Some(tile) = self.save.tile_mut(Position::new(pos.x, pos.y + 1, pos.z)) {
                tile.set_discovered(Discovery::North, true);
            }
        }

        if spotted_new {
            trace!(%unit, "spotted a new enemy");
        }
        spotted_new
    }

    /// Refresh the view of every unit of the side whose turn it is that is
    /// near a changed position.
    pub fn calculate_fov_at(&mut self, pos: Position) {
        let side = self.save.side();
        let nearby: Vec<UnitId> = self
            .save
            .units()
            .iter()
            .filter(|u| u.faction() == side && !u.is_out())
            .filter(|u| u.position().distance(pos) < FOV_REFRESH_RANGE)
            .map(crate::unit::BattleUnit::id)
            .collect();
        for unit in nearby {
            self.calculate_fov(unit);
        }
    }

    /// Recompute every unit's view from scratch.
    pub fn calculate_all_fov(&mut self) {
        let ids: Vec<UnitId> = self.save.units().iter().map(crate::unit::BattleUnit::id).collect();
        for id in &ids {
            if let Some(unit) = self.save.unit_mut(*id) {
                if unit.faction() != Faction::Player {
                    unit.set_visible(false);
                }
            }
        }
        for id in ids {
            self.calculate_fov(id);
        }
    }
}
