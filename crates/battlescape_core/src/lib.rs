//! # Battlescape Core
//!
//! Deterministic tactical combat simulation: a turn-based squad battle on
//! a three-dimensional tile map.
//!
//! This crate contains **only** simulation logic:
//! - No rendering
//! - No audio
//! - No system randomness (every roll goes through an injected source)
//! - No floating-point math in combat resolution (uses fixed-point)
//!
//! This separation enables:
//! - Headless scenario runs and AI-versus-AI batches
//! - Save and load at any point between ticks
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`rules`] - Immutable ruleset data (terrain parts, items, armor, units)
//! - [`position`] - Tile and voxel coordinates, compass directions
//! - [`tile`] - One map cell: terrain parts, fire, smoke, light, discovery
//! - [`unit`] / [`item`] - Runtime combatants and their equipment
//! - [`saved_battle`] - The battle aggregate owning map, units and items
//! - [`pathfinding`] - TU-weighted path search and reachability
//! - [`tile_engine`] - Lighting, field of view, line of fire, explosions,
//!   reaction fire and doors
//! - [`projectile`] - Shot and throw trajectories
//! - [`ai`] - Alien, civilian and weapon-search behaviour
//! - [`states`] - The timed steps an action plays out as
//! - [`battlescape_game`] - The turn and action scheduler
//! - [`serialization`] - Save files and packed tile tables

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod action;
pub mod ai;
pub mod battlescape_game;
pub mod config;
pub mod error;
pub mod item;
pub mod math;
pub mod node;
pub mod pathfinding;
pub mod position;
pub mod projectile;
pub mod rng;
pub mod rules;
pub mod saved_battle;
pub mod serialization;
pub mod states;
pub mod tile;
pub mod tile_engine;
pub mod unit;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::action::{ActionMessage, BattleAction, BattleActionType, MedikitAction};
    pub use crate::ai::{AiState, AlienState, CivilianState};
    pub use crate::battlescape_game::{BattlescapeGame, MissionOutcome};
    pub use crate::config::{BalanceConfig, PreviewMode, SimulationConfig};
    pub use crate::error::{BattleError, Result};
    pub use crate::item::{BattleItem, InventorySlot, ItemId, ItemLocation};
    pub use crate::math::Fixed;
    pub use crate::node::Node;
    pub use crate::pathfinding::{Path, Pathfinding};
    pub use crate::position::{Direction, Position};
    pub use crate::rng::{BattleRng, RandomSource};
    pub use crate::rules::{BattleType, DamageType, MovementType, RuleItem, Ruleset};
    pub use crate::saved_battle::SavedBattleGame;
    pub use crate::serialization::BattleSnapshot;
    pub use crate::states::{BattleEvents, BattleState};
    pub use crate::tile::Tile;
    pub use crate::tile_engine::TileEngine;
    pub use crate::unit::{BattleUnit, Faction, UnitId, UnitStatus};
}

#[cfg(test)]
mod test_fixtures;
