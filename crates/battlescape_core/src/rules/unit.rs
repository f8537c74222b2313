//! Unit templates.

use serde::{Deserialize, Serialize};

/// Base statistics of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitStats {
    /// Time units per turn.
    pub tu: i32,
    /// Maximum energy.
    pub stamina: i32,
    /// Maximum health.
    pub health: i32,
    /// Resistance to morale loss, 10-100.
    pub bravery: i32,
    /// Reaction fire skill.
    pub reactions: i32,
    /// Shooting accuracy percent.
    pub firing: i32,
    /// Throwing accuracy percent.
    pub throwing: i32,
    /// Carrying and throwing strength.
    pub strength: i32,
    /// Psionic defence.
    #[serde(default)]
    pub psi_strength: i32,
    /// Psionic attack skill.
    #[serde(default)]
    pub psi_skill: i32,
    /// Close combat accuracy percent.
    #[serde(default)]
    pub melee: i32,
}

/// A kind of combatant: soldier, alien race/rank, civilian, tank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTemplate {
    /// Unique id.
    pub id: String,
    /// Statistics.
    pub stats: UnitStats,
    /// Armor id.
    pub armor: String,
    /// Turns an AI remembers a target it can no longer see.
    #[serde(default = "default_intelligence")]
    pub intelligence: i32,
    /// AI aggression, 0 (cautious) to 2 (reckless).
    #[serde(default = "default_aggression")]
    pub aggression: i32,
}

const fn default_intelligence() -> i32 {
    3
}

const fn default_aggression() -> i32 {
    1
}
