//! Simulation configuration.
//!
//! Everything that used to be a process-wide option lives here and is
//! handed to the battle at construction. Every field has a default, so a
//! RON file only needs to name the values it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BattleError, Result};

/// How the path preview marks tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreviewMode {
    /// Walk immediately on click, no preview.
    #[default]
    None,
    /// Direction arrows only.
    Arrows,
    /// Cumulative TU numbers only.
    TimeUnits,
    /// Arrows and numbers.
    Both,
}

impl PreviewMode {
    /// True when a first click only previews and a second click confirms.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Marker colour indices for the path preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewColors {
    /// Reachable with TU to spare for the reserved action.
    pub green: u8,
    /// Reachable, but eats into reserved TU.
    pub yellow: u8,
    /// Not reachable this turn.
    pub red: u8,
}

impl Default for PreviewColors {
    fn default() -> Self {
        Self {
            green: 4,
            yellow: 10,
            red: 3,
        }
    }
}

/// Weights for the civilian escape search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscapeWeights {
    /// Penalty for a tile a hostile can see.
    pub exposure_penalty: i32,
    /// Penalty for a burning tile.
    pub fire_penalty: i32,
    /// Score needed to stop searching early during the systematic phase.
    pub base_systematic_success: i32,
    /// Score needed to stop searching early during the desperate phase.
    pub base_desperate_success: i32,
    /// Score at which the very first candidate is accepted outright.
    pub fast_pass_threshold: i32,
    /// Bonus for staying on the current tile.
    pub current_tile_preference: i32,
    /// Upper bound on search iterations.
    pub max_tries: i32,
    /// Iteration after which candidates are picked at random.
    pub desperate_after: i32,
    /// Distance within which a hostile counts as a threat.
    pub threat_range: i32,
}

impl Default for EscapeWeights {
    fn default() -> Self {
        Self {
            exposure_penalty: 10,
            fire_penalty: 40,
            base_systematic_success: 100,
            base_desperate_success: 110,
            fast_pass_threshold: 100,
            current_tile_preference: 15,
            max_tries: 150,
            desperate_after: 121,
            threat_range: 20,
        }
    }
}

/// Tunable balance parameters.
///
/// These are tuning knobs, not structural invariants; changing them changes
/// the feel of the game but never breaks the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// A ground item is worth fetching when `worth - distance` exceeds this.
    pub weapon_worth_threshold: i32,
    /// Inventory cells an AI unit assumes it has before counting its items.
    pub ai_inventory_cells: i32,
    /// TU cost of picking an item up from the ground.
    pub pickup_tu_cost: i32,
    /// Reaction fire is skipped when a d`reaction_skip_die` roll comes up 1.
    pub reaction_skip_die: i32,
    /// Spotters must be strictly closer than this to react.
    pub reaction_max_distance: i32,
    /// Take-cover roll thresholds for alien aggression 0, 1 and 2.
    pub alien_cover_thresholds: [i32; 3],
    /// Random tiles tried when an alien looks for cover.
    pub cover_search_tries: i32,
    /// Half-width of the square searched for cover.
    pub cover_search_radius: i32,
    /// Explosion power lost per tile of distance from the centre.
    pub explosion_decay_per_tile: i32,
    /// Hard cap on explosion radius in tiles.
    pub max_explosion_radius: i32,
    /// TU cost to kneel.
    pub kneel_tu: i32,
    /// TU cost to stand up.
    pub stand_tu: i32,
    /// Snap shots fired by a berserk unit.
    pub berserk_shots: i32,
    /// Tiles a unit can see.
    pub max_view_distance: i32,
    /// Darkest shade at which a unit standing in the dark can still be seen.
    pub max_darkness_to_see_units: i32,
    /// Civilian escape weights.
    pub escape: EscapeWeights,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            weapon_worth_threshold: 5,
            ai_inventory_cells: 25,
            pickup_tu_cost: 6,
            reaction_skip_die: 5,
            reaction_max_distance: 19,
            alien_cover_thresholds: [10, 50, 90],
            cover_search_tries: 30,
            cover_search_radius: 5,
            explosion_decay_per_tile: 10,
            max_explosion_radius: 16,
            kneel_tu: 4,
            stand_tu: 8,
            berserk_shots: 10,
            max_view_distance: 20,
            max_darkness_to_see_units: 9,
            escape: EscapeWeights::default(),
        }
    }
}

/// Configuration for one battle simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Actions an AI unit may take before the next unit is selected.
    pub ai_actions_per_unit: u32,
    /// Whether units get reaction shots at moving enemies.
    pub reaction_fire: bool,
    /// Path preview behaviour for the player.
    pub preview_mode: PreviewMode,
    /// Path preview marker colours.
    pub preview_colors: PreviewColors,
    /// Player units carry a personal light.
    pub personal_lighting: bool,
    /// Aliens only know about units they have seen this turn.
    pub sneaky_ai: bool,
    /// Log every AI decision at debug level.
    pub trace_ai: bool,
    /// Voxels a bullet travels per tick.
    pub bullet_voxels_per_tick: usize,
    /// Voxels a thrown item travels per tick.
    pub throw_voxels_per_tick: usize,
    /// Ticks spent walking one straight tile; diagonals take twice as long.
    pub walk_ticks_per_step: u32,
    /// Ticks an explosion lasts before its damage lands.
    pub explosion_ticks: u32,
    /// Ticks a dying unit takes to collapse.
    pub collapse_ticks: u32,
    /// Reveal the whole map and log extra detail.
    pub debug_mode: bool,
    /// Balance knobs.
    pub balance: BalanceConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ai_actions_per_unit: 2,
            reaction_fire: true,
            preview_mode: PreviewMode::None,
            preview_colors: PreviewColors::default(),
            personal_lighting: true,
            sneaky_ai: false,
            trace_ai: false,
            bullet_voxels_per_tick: 12,
            throw_voxels_per_tick: 4,
            walk_ticks_per_step: 8,
            explosion_ticks: 3,
            collapse_ticks: 3,
            debug_mode: false,
            balance: BalanceConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Load a configuration from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        ron::from_str(&contents).map_err(|e| BattleError::DataParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Parse a configuration from a RON string.
    pub fn from_ron_str(ron: &str) -> Result<Self> {
        Ok(ron::from_str(ron)?)
    }
}
