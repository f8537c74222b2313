//! Light layers: sun (ambient), terrain (static) and units (dynamic).
//!
//! Each layer is recomputed from scratch; a tile's shade comes from the
//! brightest of its three layers.

use crate::math::rounded_distance;
use crate::position::Position;
use crate::rules::{Affector, BattleType, TilePart};
use crate::tile::LightLayer;

use super::blockage::vertical_blockage;
use super::TileEngine;

/// Light given off by a burning tile.
pub const FIRE_LIGHT_POWER: i32 = 15;

/// Light carried by a player unit.
pub const PERSONAL_LIGHT_POWER: i32 = 15;

/// Global shade at or below which roofs cast shadows.
const DAYLIGHT_SHADE: i32 = 5;

impl TileEngine<'_> {
    /// Recompute the ambient layer from the sky.
    ///
    /// In daylight a tile with a floor somewhere above it is two steps
    /// darker.
    pub fn calculate_sun_shading(&mut self) {
        let (width, length, height) = self.save.dimensions();
        let shade = self.save.global_shade();
        let mut lights = Vec::with_capacity(self.save.tiles().len());
        for tile in self.save.tiles() {
            let pos = tile.position();
            let mut power = 15 - shade;
            if shade <= DAYLIGHT_SHADE {
                let sky = Position::new(pos.x, pos.y, height - 1);
                if vertical_blockage(self.save, pos, sky, Affector::Light) > 0 {
                    power -= 2;
                }
            }
            lights.push(power);
        }
        debug_assert_eq!(lights.len(), (width * length * height) as usize);
        for (tile, power) in self.save.tiles_mut().iter_mut().zip(lights) {
            tile.reset_light(LightLayer::Ambient);
            tile.add_light(LightLayer::Ambient, power);
        }
    }

    /// Recompute the static layer from glowing terrain, fires and flares.
    pub fn calculate_terrain_lighting(&mut self) {
        let mut sources = Vec::new();
        for tile in self.save.tiles() {
            let pos = tile.position();
            for slot in [TilePart::Floor, TilePart::Object] {
                if let Some(data) = tile.part(slot) {
                    if data.light_source > 0 {
                        sources.push((pos, data.light_source));
                    }
                }
            }
            if tile.fire() > 0 {
                sources.push((pos, FIRE_LIGHT_POWER));
            }
            for item in tile.inventory() {
                if let Some(item) = self.save.item(*item) {
                    if item.rules().battle_type == BattleType::Flare {
                        sources.push((pos, item.rules().power));
                    }
                }
            }
        }

        for tile in self.save.tiles_mut() {
            tile.reset_light(LightLayer::Static);
        }
        for (pos, power) in sources {
            self.add_light(pos, power, LightLayer::Static);
        }
    }

    /// Recompute the dynamic layer from personal lights of player units.
    pub fn calculate_unit_lighting(&mut self) {
        for tile in self.save.tiles_mut() {
            tile.reset_light(LightLayer::Dynamic);
        }
        if !self.config.personal_lighting {
            return;
        }
        let lit: Vec<Position> = self
            .save
            .units()
            .iter()
            .filter(|u| u.faction() == crate::unit::Faction::Player && !u.is_out())
            .map(crate::unit::BattleUnit::position)
            .collect();
        for pos in lit {
            self.add_light(pos, PERSONAL_LIGHT_POWER, LightLayer::Dynamic);
        }
    }

    /// Spread light from `center`, losing one level per tile of distance,
    /// on every level of the map.
    pub fn add_light(&mut self, center: Position, power: i32, layer: LightLayer) {
        let (_, _, height) = self.save.dimensions();
        for x in 0..=power {
            for y in 0..=power {
                let level = power - rounded_distance(x, y);
                if level <= 0 {
                    continue;
                }
                for z in 0..height {
                    for (sx, sy) in [(1, 1), (-1, -1), (-1, 1), (1, -1)] {
                        let pos = Position::new(center.x + sx * x, center.y + sy * y, z);
                        if let Some(tile) = self.save.tile_mut(pos) {
                            tile.add_light(layer, level);
                        }
                    }
                }
            }
        }
    }
}
