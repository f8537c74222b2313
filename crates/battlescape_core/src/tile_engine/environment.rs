//! Doors, fire and smoke, melee reach.

use tracing::debug;

use crate::position::{Direction, Position};
use crate::rng::RandomSource;
use crate::rules::{Affector, DamageType, TilePart};
use crate::tile::{DoorResult, Tile};
use crate::unit::UnitId;

use super::blockage::{horizontal_blockage, vertical_blockage, wall_between};
use super::TileEngine;

impl TileEngine<'_> {
    // ========================================================================
    // Fire and smoke
    // ========================================================================

    /// Advance fire and smoke by one turn.
    ///
    /// All smoke drifts in one direction rolled for the turn (half to the
    /// next tile, a quarter to the one after) and rises through open
    /// ceilings. Only smoke-free tiles take on drifting smoke. Units
    /// standing in smoke are stunned, units standing in fire burn. Fire
    /// tries to ignite the four neighbours it is not walled off from, with
    /// its own smoke as the ignition power. Finally every tile decays.
    ///
    /// Returns true if anything was burning.
    pub fn prepare_new_turn(&mut self, rng: &mut dyn RandomSource) -> bool {
        let sources: Vec<(Position, i32, i32)> = self
            .save
            .tiles()
            .iter()
            .filter(|t| t.smoke() > 0 || t.fire() > 0)
            .map(|t| (t.position(), t.smoke(), t.fire()))
            .collect();

        let step = Position::new(rng.generate(-1, 1), rng.generate(-1, 1), 0);
        for &(pos, smoke, _) in &sources {
            if smoke <= 0 {
                continue;
            }
            let next = pos + step;
            if step != Position::ZERO
                && self.save.is_on_map(next)
                && horizontal_blockage(self.save, pos, next, Affector::Smoke) == 0
            {
                self.spread_smoke(next, smoke / 2);
                let far = next + step;
                if self.save.is_on_map(far) && horizontal_blockage(self.save, next, far, Affector::Smoke) == 0 {
                    self.spread_smoke(far, smoke / 4);
                }
            }
            let up = pos + Position::UP;
            if self.save.is_on_map(up) && vertical_blockage(self.save, pos, up, Affector::Smoke) == 0 {
                self.spread_smoke(up, smoke / 2);
            }

            if let Some(id) = self.save.tile(pos).and_then(Tile::unit) {
                if let Some(unit) = self.save.unit_mut(id) {
                    if !unit.is_out() {
                        unit.damage(Position::ZERO, smoke / 5 + 1, DamageType::Smoke, true, rng);
                    }
                }
            }
        }

        let mut burning = false;
        for &(pos, smoke, fire) in &sources {
            if fire <= 0 {
                continue;
            }
            burning = true;
            if let Some(id) = self.save.tile(pos).and_then(Tile::unit) {
                let burn = rng.generate(1, 12);
                let catches = rng.generate(0, 2) == 1;
                let turns = rng.generate(1, 5);
                if let Some(unit) = self.save.unit_mut(id) {
                    if !unit.is_out() {
                        unit.damage(Position::ZERO, burn, DamageType::Incendiary, true, rng);
                        if catches {
                            unit.set_fire(turns);
                        }
                    }
                }
            }
            for direction in [Direction::North, Direction::East, Direction::South, Direction::West] {
                let next = pos.step(direction);
                let open = self.save.is_on_map(next)
                    && horizontal_blockage(self.save, pos, next, Affector::Fire) == 0;
                if !open {
                    continue;
                }
                if let Some(tile) = self.save.tile_mut(next) {
                    if tile.fire() == 0 && tile.ignite(smoke, rng) {
                        debug!(%next, "Fire spread");
                    }
                }
            }
        }

        for tile in self.save.tiles_mut() {
            tile.prepare_new_turn();
        }
        if burning {
            self.calculate_terrain_lighting();
        }
        burning
    }

    fn spread_smoke(&mut self, pos: Position, amount: i32) {
        if amount <= 0 {
            return;
        }
        if let Some(tile) = self.save.tile_mut(pos) {
            if tile.smoke() == 0 {
                tile.add_smoke(amount);
            }
        }
    }

    // ========================================================================
    // Doors
    // ========================================================================

    /// Open the door a unit is facing, if any.
    ///
    /// A diagonal facing checks the doors of both its cardinal components.
    /// Starting a UFO door also starts the segments on either side of it.
    /// With `check_tu` the door's TU cost is required and spent.
    pub fn unit_opens_door(&mut self, unit: UnitId, check_tu: bool) -> DoorResult {
        let Some(opener) = self.save.unit(unit) else {
            return DoorResult::NoDoor;
        };
        let pos = opener.position();
        let facing = opener.direction();
        let movement = opener.movement_type();
        let available = check_tu.then(|| opener.time_units());
        let vector = facing.vector();

        let mut candidates: Vec<(Position, TilePart, [Position; 2])> = Vec::with_capacity(2);
        if vector.y < 0 {
            candidates.push((
                pos,
                TilePart::NorthWall,
                [Position::new(pos.x - 1, pos.y, pos.z), Position::new(pos.x + 1, pos.y, pos.z)],
            ));
        }
        if vector.x > 0 {
            candidates.push((
                Position::new(pos.x + 1, pos.y, pos.z),
                TilePart::WestWall,
                [Position::new(pos.x + 1, pos.y - 1, pos.z), Position::new(pos.x + 1, pos.y + 1, pos.z)],
            ));
        }
        if vector.y > 0 {
            candidates.push((
                Position::new(pos.x, pos.y + 1, pos.z),
                TilePart::NorthWall,
                [Position::new(pos.x - 1, pos.y + 1, pos.z), Position::new(pos.x + 1, pos.y + 1, pos.z)],
            ));
        }
        if vector.x < 0 {
            candidates.push((
                pos,
                TilePart::WestWall,
                [Position::new(pos.x, pos.y - 1, pos.z), Position::new(pos.x, pos.y + 1, pos.z)],
            ));
        }

        let rules = self.save.rules_arc();
        for (door_pos, slot, neighbours) in candidates {
            let Some(tile) = self.save.tile_mut(door_pos) else {
                continue;
            };
            let cost = tile.tu_cost(slot, movement);
            let result = tile.open_door(slot, available, movement, &rules);
            if result == DoorResult::NoDoor {
                continue;
            }
            if result == DoorResult::UfoDoorStarted {
                for neighbour in neighbours {
                    if let Some(tile) = self.save.tile_mut(neighbour) {
                        if tile.part(slot).is_some_and(|p| p.ufo_door) {
                            tile.open_door(slot, None, movement, &rules);
                        }
                    }
                }
            }
            if result.changed_terrain() {
                let debug_mode = self.save.debug_mode();
                if check_tu {
                    if let Some(opener) = self.save.unit_mut(unit) {
                        opener.spend_time_units(cost, debug_mode);
                    }
                }
                debug!(%unit, %door_pos, ?result, "Door opened");
                self.calculate_fov(unit);
                self.calculate_fov_at(door_pos);
            }
            return result;
        }
        DoorResult::NoDoor
    }

    /// Advance every opening UFO door by one animation frame.
    pub fn animate_doors(&mut self) {
        for tile in self.save.tiles_mut() {
            tile.animate();
        }
    }

    /// Close UFO doors nobody stands in. Returns how many tiles closed a
    /// door.
    pub fn close_ufo_doors(&mut self) -> usize {
        let occupied = |save: &crate::saved_battle::SavedBattleGame, pos: Position| {
            save.tile(pos).is_some_and(|t| t.unit().is_some())
        };
        // a door in the west wall also serves the tile to the west, a door
        // in the north wall the tile to the north
        let far_side = |pos: Position, slot: TilePart| match slot {
            TilePart::WestWall => Some(Position::new(pos.x - 1, pos.y, pos.z)),
            TilePart::NorthWall => Some(Position::new(pos.x, pos.y - 1, pos.z)),
            TilePart::Floor | TilePart::Object => None,
        };
        let candidates: Vec<Position> = self
            .save
            .tiles()
            .iter()
            .filter(|t| {
                let pos = t.position();
                let mut open = TilePart::ALL.into_iter().filter(|slot| t.is_ufo_door_open(*slot)).peekable();
                open.peek().is_some()
                    && t.unit().is_none()
                    && open.all(|slot| far_side(pos, slot).map_or(true, |p| !occupied(self.save, p)))
            })
            .map(Tile::position)
            .collect();
        let mut closed = 0;
        for pos in candidates {
            if self.save.tile_mut(pos).is_some_and(Tile::close_ufo_door) {
                closed += 1;
            }
        }
        closed
    }

    // ========================================================================
    // Melee
    // ========================================================================

    /// The unit an attacker can reach in melee in `direction`.
    ///
    /// The neighbouring tile must hold a unit (the given `target`, if one is
    /// named) and no wall or closed door may stand in between.
    #[must_use]
    pub fn valid_melee_range(&self, attacker: UnitId, direction: Direction, target: Option<UnitId>) -> Option<UnitId> {
        let from = self.save.unit(attacker)?.position();
        let occupant = self.save.tile(from.step(direction))?.unit()?;
        if target.is_some_and(|t| t != occupant) || occupant == attacker {
            return None;
        }
        if wall_between(self.save, from, direction) {
            return None;
        }
        Some(occupant)
    }
}
