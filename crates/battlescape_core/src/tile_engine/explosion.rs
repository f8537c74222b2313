//! Blasts, direct hits and terrain chain reactions.
//!
//! An explosion is evaluated on the tile grid. Each tile within the radius
//! receives the blast power minus a fixed loss per tile of distance and
//! minus everything the walls and objects on the way soak up. Nothing is
//! applied until every tile's power is known, so the order tiles are
//! visited in never changes the result.

use tracing::debug;

use crate::math::rounded_distance;
use crate::position::Position;
use crate::rng::RandomSource;
use crate::rules::{DamageType, TilePart};
use crate::unit::{UnitId, UnitStatus};

use super::blockage::{affector_for, step_blockage};
use super::line::{bresenham, voxel_check, VoxelType};
use super::TileEngine;

/// Smoke density below which a smoke blast still thickens a tile.
const SMOKE_REFILL_BELOW: i32 = 10;

/// What a blast or a hit did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplosionReport {
    /// Tiles that received power, with the power they received.
    pub tiles: Vec<(Position, i32)>,
    /// Units damaged, with the damage that got through.
    pub units: Vec<(UnitId, i32)>,
    /// Who caused it.
    pub attacker: Option<UnitId>,
    /// A mission objective part was destroyed.
    pub objective_destroyed: bool,
}

impl ExplosionReport {
    /// True if the unit was caught in it.
    #[must_use]
    pub fn hit_unit(&self, unit: UnitId) -> bool {
        self.units.iter().any(|(id, _)| *id == unit)
    }
}

impl TileEngine<'_> {
    /// Power a blast at `center` delivers to `target` on the same level.
    fn blast_power_at(&self, center: Position, target: Position, power: i32, damage_type: DamageType) -> i32 {
        let affector = affector_for(damage_type);
        let decay = self.config.balance.explosion_decay_per_tile;
        let mut remaining = power - decay * rounded_distance(target.x - center.x, target.y - center.y);
        if remaining <= 0 {
            return 0;
        }
        let mut previous = center;
        let mut absorbed = 0;
        bresenham(center, target, |pos| {
            if pos != previous {
                absorbed += step_blockage(self.save, previous, pos, affector);
                previous = pos;
            }
            false
        });
        if target != previous {
            absorbed += step_blockage(self.save, previous, target, affector);
        }
        remaining -= absorbed;
        remaining.max(0)
    }

    /// Detonate a blast centred on a voxel.
    ///
    /// High explosive damages units (from below) and terrain, and chains
    /// into parts that carry explosives. Smoke thickens smoke, incendiary
    /// sets tiles and units on fire, stun gas knocks units out.
    pub fn explode(
        &mut self,
        center: Position,
        power: i32,
        damage_type: DamageType,
        max_radius: i32,
        attacker: Option<UnitId>,
        rng: &mut dyn RandomSource,
    ) -> ExplosionReport {
        let origin = center.voxel_to_tile();
        let radius = max_radius.min(self.config.balance.max_explosion_radius).max(0);
        let mut report = ExplosionReport {
            attacker,
            ..ExplosionReport::default()
        };

        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let target = Position::new(origin.x + dx, origin.y + dy, origin.z);
                if !self.save.is_on_map(target) || rounded_distance(dx, dy) > radius {
                    continue;
                }
                let received = self.blast_power_at(origin, target, power, damage_type);
                if received > 0 {
                    report.tiles.push((target, received));
                }
            }
        }

        for &(pos, received) in &report.tiles.clone() {
            let victim = self
                .save
                .tile(pos)
                .and_then(crate::tile::Tile::unit)
                .filter(|id| self.save.unit(*id).is_some_and(|u| u.status() != UnitStatus::Dead));
            match damage_type {
                DamageType::Smoke => {
                    if let Some(tile) = self.save.tile_mut(pos) {
                        if tile.smoke() < SMOKE_REFILL_BELOW {
                            tile.add_smoke(rng.generate(received / 10, 14));
                        }
                    }
                }
                DamageType::Incendiary => {
                    let heat = received / 2;
                    if heat > 0 {
                        if let Some(tile) = self.save.tile_mut(pos) {
                            tile.start_fire();
                        }
                    }
                    if let Some(id) = victim {
                        let roll = rng.generate(0, heat * 2 / 3);
                        let turns = rng.generate(1, 5);
                        if let Some(unit) = self.save.unit_mut(id) {
                            let dealt = unit.damage(Position::ZERO, roll, DamageType::Incendiary, false, rng);
                            unit.set_fire(turns);
                            report.units.push((id, dealt));
                        }
                    }
                }
                DamageType::Stun => {
                    if let Some(id) = victim {
                        let roll = rng.generate(received / 2, received * 3 / 2);
                        if let Some(unit) = self.save.unit_mut(id) {
                            let dealt = unit.damage(Position::ZERO, roll, DamageType::Stun, false, rng);
                            report.units.push((id, dealt));
                        }
                    }
                }
                _ => {
                    if let Some(id) = victim {
                        let roll = rng.generate(received / 2, received * 3 / 2);
                        if let Some(unit) = self.save.unit_mut(id) {
                            let dealt = unit.damage(Position::ZERO, roll, damage_type, false, rng);
                            report.units.push((id, dealt));
                        }
                    }
                    let structural = received / 2;
                    let rules = self.save.rules_arc();
                    if let Some(tile) = self.save.tile_mut(pos) {
                        for slot in TilePart::ALL {
                            report.objective_destroyed |= tile.damage(slot, structural, &rules);
                        }
                    }
                    if let Some(above) = self.save.tile_mut(pos + Position::UP) {
                        report.objective_destroyed |= above.damage(TilePart::Floor, structural, &rules);
                    }
                }
            }
        }

        if report.objective_destroyed {
            self.save.set_objective_destroyed();
        }
        debug!(
            %center,
            power,
            ?damage_type,
            tiles = report.tiles.len(),
            units = report.units.len(),
            "Explosion"
        );

        self.calculate_sun_shading();
        self.calculate_terrain_lighting();
        self.calculate_fov_at(origin);
        report
    }

    /// Resolve a projectile or melee blow landing on a voxel.
    ///
    /// Terrain takes between a quarter and three quarters of the power.
    /// Units take up to double the power on the side that was struck;
    /// armour piercing rounds also stun a little. Incendiary hits set the
    /// tile and the unit on fire.
    pub fn hit(
        &mut self,
        center: Position,
        power: i32,
        damage_type: DamageType,
        attacker: Option<UnitId>,
        rng: &mut dyn RandomSource,
    ) -> ExplosionReport {
        let tile_pos = center.voxel_to_tile();
        let mut report = ExplosionReport {
            attacker,
            tiles: vec![(tile_pos, power)],
            ..ExplosionReport::default()
        };
        let part = voxel_check(self.save, center, attacker, false);

        match part {
            VoxelType::Unit => {
                let Some(id) = self.save.tile(tile_pos).and_then(crate::tile::Tile::unit) else {
                    return report;
                };
                let terrain = self.save.tile(tile_pos).map_or(0, crate::tile::Tile::terrain_level);
                let roll = rng.generate(0, power * 2);
                let mut burn = 0;
                if damage_type == DamageType::Incendiary {
                    burn = rng.generate(1, 5);
                }
                let Some(unit) = self.save.unit_mut(id) else {
                    return report;
                };
                let body = unit.position().to_voxel_center() + Position::new(0, 0, -terrain);
                let relative = center - body;
                let dealt = unit.damage(relative, roll, damage_type, false, rng);
                if damage_type == DamageType::ArmorPiercing && dealt > 0 {
                    let shock = rng.generate(0, dealt / 4);
                    unit.stun(shock);
                }
                if burn > 0 {
                    unit.set_fire(burn);
                }
                let victim_faction = unit.faction();
                report.units.push((id, dealt));

                if let Some(shooter) = attacker.and_then(|a| self.save.unit_mut(a)) {
                    if shooter.faction().is_enemy_of(victim_faction) {
                        shooter.experience_mut().firing += 1;
                    }
                }
            }
            VoxelType::Floor | VoxelType::WestWall | VoxelType::NorthWall | VoxelType::Object => {
                let Some(slot) = part.part() else {
                    return report;
                };
                let roll = rng.generate(power / 4, power * 3 / 4);
                let rules = self.save.rules_arc();
                if let Some(tile) = self.save.tile_mut(tile_pos) {
                    report.objective_destroyed = tile.damage(slot, roll, &rules);
                }
                if report.objective_destroyed {
                    self.save.set_objective_destroyed();
                }
                self.calculate_sun_shading();
                self.calculate_terrain_lighting();
                self.calculate_fov_at(tile_pos);
            }
            VoxelType::Empty | VoxelType::OutOfMap => {}
        }

        if damage_type == DamageType::Incendiary {
            if let Some(tile) = self.save.tile_mut(tile_pos) {
                tile.start_fire();
            }
        }
        report
    }

    /// Find a tile whose destroyed parts left an explosive payload.
    ///
    /// Returns the voxel to detonate at and the power, clearing the payload
    /// so the same charge never goes off twice.
    pub fn check_for_terrain_explosions(&mut self) -> Option<(Position, i32)> {
        let pos = self
            .save
            .tiles()
            .iter()
            .find(|t| t.explosive() > 0)
            .map(crate::tile::Tile::position)?;
        let tile = self.save.tile_mut(pos)?;
        let power = tile.explosive();
        tile.clear_explosive();
        Some((pos.to_voxel_center() + Position::new(0, 0, 12), power))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::test_fixtures::{flat_battle, parts, place, ScriptedRng};
    use crate::unit::Faction;

    #[test]
    fn test_damage_never_grows_with_distance() {
        let mut save = flat_battle(16, 3, 1);
        let ids: Vec<UnitId> = (1..8)
            .map(|x| save.add_unit("soldier", Faction::Player, Position::new(x, 1, 0)).unwrap())
            .collect();
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let center = Position::new(0, 1, 0).to_voxel_center();
        let report = TileEngine::new(&mut save, &config).explode(center, 80, DamageType::HighExplosive, 8, None, &mut rng);

        let dealt: Vec<i32> = ids
            .iter()
            .map(|id| report.units.iter().find(|(u, _)| u == id).map_or(0, |(_, d)| *d))
            .collect();
        assert!(dealt[0] > 0);
        for pair in dealt.windows(2) {
            assert!(pair[0] >= pair[1], "damage grew with distance: {dealt:?}");
        }
        // 80 - 10 * 7 = 10, halved by the roll, minus 2 under armour
        assert!(dealt[6] <= 3);
    }

    #[test]
    fn test_walls_absorb_blast() {
        let mut open = flat_battle(10, 3, 1);
        let mut walled = flat_battle(10, 3, 1);
        for y in 0..3 {
            place(&mut walled, Position::new(3, y, 0), parts::WEST_WALL);
        }
        let config = SimulationConfig::default();
        let center = Position::new(1, 1, 0);
        let target = Position::new(5, 1, 0);
        let free = TileEngine::new(&mut open, &config).blast_power_at(center, target, 80, DamageType::HighExplosive);
        let blocked =
            TileEngine::new(&mut walled, &config).blast_power_at(center, target, 80, DamageType::HighExplosive);
        assert_eq!(free, 40);
        assert_eq!(blocked, 0);
    }

    #[test]
    fn test_barrel_chain_and_objective() {
        let mut save = flat_battle(8, 3, 1);
        place(&mut save, Position::new(3, 1, 0), parts::BARREL);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut engine = TileEngine::new(&mut save, &config);
        let report = engine.explode(Position::new(2, 1, 0).to_voxel_center(), 60, DamageType::HighExplosive, 6, None, &mut rng);
        assert!(report.objective_destroyed);

        let (voxel, power) = engine.check_for_terrain_explosions().unwrap();
        assert_eq!(voxel.voxel_to_tile(), Position::new(3, 1, 0));
        assert_eq!(power, 40);
        assert!(engine.check_for_terrain_explosions().is_none());
        assert!(save.objective_destroyed());
    }

    #[test]
    fn test_smoke_grenade_fills_tiles() {
        let mut save = flat_battle(8, 8, 1);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[5]);
        let center = Position::new(4, 4, 0);
        TileEngine::new(&mut save, &config).explode(center.to_voxel_center(), 60, DamageType::Smoke, 3, None, &mut rng);
        assert!(save.tile(center).unwrap().smoke() > 0);
        assert!(save.tiles().iter().all(|t| (0..=15).contains(&t.smoke())));
        assert_eq!(save.tile(Position::new(0, 0, 0)).unwrap().smoke(), 0);
    }

    #[test]
    fn test_incendiary_sets_units_alight() {
        let mut save = flat_battle(6, 6, 1);
        let victim = save.add_unit("sectoid", Faction::Hostile, Position::new(3, 3, 0)).unwrap();
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[2]);
        TileEngine::new(&mut save, &config).explode(
            Position::new(3, 3, 0).to_voxel_center(),
            60,
            DamageType::Incendiary,
            2,
            None,
            &mut rng,
        );
        assert!(save.unit(victim).unwrap().fire() > 0);
        assert!(save.tile(Position::new(3, 3, 0)).unwrap().fire() > 0);
    }

    #[test]
    fn test_direct_hit_on_unit_credits_shooter() {
        let mut save = flat_battle(6, 3, 1);
        let shooter = save.add_unit("soldier", Faction::Player, Position::new(0, 1, 0)).unwrap();
        let target = save.add_unit("sectoid", Faction::Hostile, Position::new(4, 1, 0)).unwrap();
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[40]);
        let impact = Position::new(4, 1, 0).to_voxel_center() + Position::new(0, 0, 10);
        let report = TileEngine::new(&mut save, &config).hit(impact, 30, DamageType::Laser, Some(shooter), &mut rng);

        assert!(report.hit_unit(target));
        assert!(save.unit(target).unwrap().health() < 30);
        assert_eq!(save.unit(shooter).unwrap().experience().firing, 1);
    }

    #[test]
    fn test_direct_hit_on_wall_destroys_weak_part() {
        let mut save = flat_battle(6, 3, 1);
        place(&mut save, Position::new(2, 1, 0), parts::CRATE);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[u32::MAX]);
        let impact = Position::new(2, 1, 0).to_voxel_center() + Position::new(0, 0, 4);
        TileEngine::new(&mut save, &config).hit(impact, 80, DamageType::ArmorPiercing, None, &mut rng);
        let tile = save.tile(Position::new(2, 1, 0)).unwrap();
        // crate dies into rubble
        assert_eq!(tile.part_ref(TilePart::Object), Some(crate::rules::PartRef::new(0, 8)));
    }
}
