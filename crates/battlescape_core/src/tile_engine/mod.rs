//! Voxel-level spatial queries on a battle map.
//!
//! [`TileEngine`] borrows the battle mutably for the duration of one query
//! or update and works in two resolutions: tiles (lighting, explosions,
//! fire and smoke, terrain discovery) and voxels (line of sight, line of
//! fire, projectile and throw arcs). Every ray in the game, whether a
//! bullet, a glance or a blast front, goes through the same line tracer.
//!
//! ## Module structure
//!
//! - [`blockage`]: how much a wall, floor or object stops an affector
//! - [`line`]: 3D Bresenham voxel tracing, voxel checks, throw arcs
//! - [`lighting`]: sun, terrain and personal light layers
//! - [`vision`]: fields of view and unit spotting
//! - [`explosion`]: direct hits, blasts and chained terrain explosions
//! - [`environment`]: doors, fire and smoke, melee reach
//! - [`reaction`]: reaction fire

pub mod blockage;
pub mod environment;
pub mod explosion;
pub mod lighting;
pub mod line;
pub mod reaction;
pub mod vision;

pub use explosion::ExplosionReport;
pub use line::{LineTrace, VoxelType};

use crate::config::SimulationConfig;
use crate::position::Position;
use crate::saved_battle::SavedBattleGame;

/// Spatial query engine over one battle.
pub struct TileEngine<'a> {
    save: &'a mut SavedBattleGame,
    config: &'a SimulationConfig,
}

impl<'a> TileEngine<'a> {
    /// Borrow a battle for queries and updates.
    pub fn new(save: &'a mut SavedBattleGame, config: &'a SimulationConfig) -> Self {
        Self { save, config }
    }

    /// The battle being worked on.
    #[must_use]
    pub fn save(&self) -> &SavedBattleGame {
        self.save
    }

    /// Planar tile distance, rounded to the nearest tile.
    #[must_use]
    pub fn distance(a: Position, b: Position) -> i32 {
        a.distance(b)
    }

    /// Recompute every light layer and every unit's field of view.
    ///
    /// Used when a battle starts or is loaded.
    pub fn recalculate_all(&mut self) {
        self.calculate_sun_shading();
        self.calculate_terrain_lighting();
        self.calculate_unit_lighting();
        self.calculate_all_fov();
    }
}
