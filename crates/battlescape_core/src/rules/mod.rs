//! Static rule data for battles.
//!
//! Terrain parts, item types, armors and unit templates are plain data
//! deserialized from RON. A [`Ruleset`] owns them and hands out shared
//! references to the runtime model.

mod armor;
mod item;
mod map_data;
mod ruleset;
mod unit;
mod voxel;

pub use armor::{ArmorSide, RuleArmor};
pub use item::{BattleType, DamageType, RuleItem};
pub use map_data::{Affector, BigWall, MapData, MapDataSet, MovementType, TilePart, IMPASSABLE};
pub use ruleset::{PartRef, Ruleset, RulesetFile};
pub use unit::{UnitStats, UnitTemplate};
pub use voxel::{
    LoftTable, LoftTemplate, LOFT_BLOCK, LOFT_EMPTY, LOFT_FULL, LOFT_NORTH_WALL, LOFT_UNIT,
    LOFT_WEST_WALL,
};
