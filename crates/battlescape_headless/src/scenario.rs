//! Scenario loading.
//!
//! A scenario names a ruleset file, draws the map as ASCII rows (one block
//! of rows per level, one character per tile, resolved through a legend of
//! terrain part names) and lists the units, ground items and patrol nodes
//! to place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use battlescape_core::config::SimulationConfig;
use battlescape_core::error::BattleError;
use battlescape_core::item::InventorySlot;
use battlescape_core::node::Node;
use battlescape_core::position::Position;
use battlescape_core::rules::Ruleset;
use battlescape_core::saved_battle::SavedBattleGame;
use battlescape_core::unit::Faction;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// The ASCII map is malformed.
    #[error("Bad map: {0}")]
    MapError(String),
    /// The battle rejected part of the setup.
    #[error("Failed to set up battle: {0}")]
    BattleError(#[from] BattleError),
}

/// One legend entry: a map character and the terrain parts it stands for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegendEntry {
    /// Character used in the map rows.
    pub symbol: char,
    /// Part names in the scenario's terrain set; empty for open air.
    #[serde(default)]
    pub parts: Vec<String>,
}

/// A unit to spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitPlacement {
    /// Unit template id.
    pub template: String,
    /// Side it fights for.
    pub faction: Faction,
    /// Tile `(x, y, z)`.
    pub position: (i32, i32, i32),
    /// Weapon for the right hand.
    #[serde(default)]
    pub weapon: Option<String>,
    /// Clip loaded into the weapon.
    #[serde(default)]
    pub ammo: Option<String>,
    /// Items for the belt.
    #[serde(default)]
    pub belt: Vec<String>,
}

/// An item lying on the map at the start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPlacement {
    /// Item rule id.
    pub item: String,
    /// Tile `(x, y, z)`.
    pub position: (i32, i32, i32),
}

/// A patrol node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePlacement {
    /// Tile `(x, y, z)`.
    pub position: (i32, i32, i32),
    /// 0 for scout nodes.
    #[serde(default)]
    pub rank: i32,
    /// Indices of linked nodes in the scenario's node list.
    #[serde(default)]
    pub links: Vec<usize>,
}

const fn default_max_turns() -> i32 {
    20
}

/// A complete scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Ruleset file, relative to the scenario file.
    pub ruleset: PathBuf,
    /// Terrain data set the legend's part names belong to.
    pub terrain_set: String,
    /// Map characters.
    pub legend: Vec<LegendEntry>,
    /// Map rows per level, ground level first; row 0 is the north edge.
    pub levels: Vec<Vec<String>>,
    /// Units to spawn.
    #[serde(default)]
    pub units: Vec<UnitPlacement>,
    /// Items on the ground.
    #[serde(default)]
    pub ground_items: Vec<ItemPlacement>,
    /// Patrol nodes.
    #[serde(default)]
    pub nodes: Vec<NodePlacement>,
    /// Turns to play before calling the mission unresolved.
    #[serde(default = "default_max_turns")]
    pub max_turns: i32,
    /// Simulation settings.
    #[serde(default)]
    pub config: SimulationConfig,
    /// Directory the scenario was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let mut scenario = Self::from_ron_str(&contents)?;
        scenario.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(scenario)
    }

    /// Load from a RON string. The ruleset path is resolved against the
    /// working directory.
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = ron::from_str(ron)?;
        Ok(scenario)
    }

    /// Load the ruleset the scenario names.
    pub fn load_rules(&self) -> Result<Arc<Ruleset>, ScenarioError> {
        let path = self.base_dir.join(&self.ruleset);
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        Ok(Arc::new(Ruleset::load(&path)?))
    }

    /// Map size `(width, length, height)` from the ASCII rows.
    pub fn dimensions(&self) -> Result<(i32, i32, i32), ScenarioError> {
        let first = self
            .levels
            .first()
            .ok_or_else(|| ScenarioError::MapError("no levels".to_string()))?;
        let length = first.len();
        let width = first.first().map_or(0, |row| row.chars().count());
        if width == 0 || length == 0 {
            return Err(ScenarioError::MapError("empty ground level".to_string()));
        }
        for (z, level) in self.levels.iter().enumerate() {
            if level.len() != length {
                return Err(ScenarioError::MapError(format!(
                    "level {z} has {} rows, expected {length}",
                    level.len()
                )));
            }
            if let Some(y) = level.iter().position(|row| row.chars().count() != width) {
                return Err(ScenarioError::MapError(format!(
                    "row {y} of level {z} is not {width} wide"
                )));
            }
        }
        let to_i32 = |n: usize| i32::try_from(n).map_err(|_| ScenarioError::MapError("map too large".to_string()));
        Ok((to_i32(width)?, to_i32(length)?, to_i32(self.levels.len())?))
    }

    /// Build the battle: terrain, units with their gear, ground items and
    /// nodes. The first player unit starts selected.
    pub fn build(&self, rules: Arc<Ruleset>) -> Result<SavedBattleGame, ScenarioError> {
        let (width, length, height) = self.dimensions()?;
        let mut legend = HashMap::new();
        for entry in &self.legend {
            let parts = entry
                .parts
                .iter()
                .map(|name| rules.find_part(&self.terrain_set, name))
                .collect::<Result<Vec<_>, _>>()?;
            legend.insert(entry.symbol, parts);
        }

        let mut save = SavedBattleGame::new(rules, width, length, height);
        for (z, level) in (0..).zip(&self.levels) {
            for (y, row) in (0..).zip(level) {
                for (x, symbol) in (0..).zip(row.chars()) {
                    let parts = legend
                        .get(&symbol)
                        .ok_or_else(|| ScenarioError::MapError(format!("unknown map symbol '{symbol}'")))?;
                    for part in parts {
                        save.set_part(Position::new(x, y, z), *part)?;
                    }
                }
            }
        }

        for placement in &self.units {
            let (x, y, z) = placement.position;
            let unit = save.add_unit(&placement.template, placement.faction, Position::new(x, y, z))?;
            if let Some(weapon) = &placement.weapon {
                let gun = save.create_item(weapon)?;
                if !save.give_item(gun, unit, InventorySlot::RightHand) {
                    return Err(ScenarioError::MapError(format!("{weapon} does not fit {}", placement.template)));
                }
                if let Some(ammo) = &placement.ammo {
                    let clip = save.create_item(ammo)?;
                    if !save.load_ammo(gun, clip) {
                        return Err(ScenarioError::MapError(format!("{ammo} does not fit {weapon}")));
                    }
                }
            }
            for item in &placement.belt {
                let id = save.create_item(item)?;
                if !save.give_item(id, unit, InventorySlot::Belt) {
                    return Err(ScenarioError::MapError(format!("no belt room for {item}")));
                }
            }
        }
        for placement in &self.ground_items {
            let (x, y, z) = placement.position;
            let id = save.create_item(&placement.item)?;
            let ground = save.ground_below(Position::new(x, y, z));
            save.drop_item(id, ground);
        }
        for (id, placement) in self.nodes.iter().enumerate() {
            let (x, y, z) = placement.position;
            let mut node = Node::new(id, Position::new(x, y, z), placement.rank);
            node.links.clone_from(&placement.links);
            save.add_node(node);
        }

        let first = save
            .units()
            .iter()
            .find(|unit| unit.faction() == Faction::Player)
            .map(battlescape_core::unit::BattleUnit::id);
        save.set_selected_unit(first);
        debug!(
            scenario = %self.name,
            width,
            length,
            height,
            units = self.units.len(),
            "Scenario built"
        );
        Ok(save)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use battlescape_test_utils::fixtures::TEST_RULESET;

    const SCENARIO: &str = r#"
Scenario(
    name: "Yard",
    ruleset: "rules.ron",
    terrain_set: "plain",
    legend: [
        (symbol: '.', parts: ["grass"]),
        (symbol: 'c', parts: ["grass", "crate"]),
        (symbol: '|', parts: ["grass", "west_wall"]),
    ],
    levels: [[
        "......",
        "..c...",
        "...|..",
        "......",
    ]],
    units: [
        (template: "soldier", faction: Player, position: (0, 0, 0), weapon: Some("rifle"), ammo: Some("rifle_clip"), belt: ["grenade"]),
        (template: "sectoid", faction: Hostile, position: (5, 3, 0), weapon: Some("plasma_pistol"), ammo: Some("plasma_clip")),
    ],
    ground_items: [(item: "medikit", position: (2, 3, 0))],
    nodes: [(position: (5, 3, 0), links: [1]), (position: (1, 3, 0), rank: 1, links: [0])],
    max_turns: 5,
)
"#;

    fn write_scenario(dir: &Path) -> PathBuf {
        std::fs::write(dir.join("rules.ron"), TEST_RULESET).unwrap();
        let path = dir.join("yard.ron");
        std::fs::write(&path, SCENARIO).unwrap();
        path
    }

    #[test]
    fn test_load_and_build() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = Scenario::load(write_scenario(dir.path())).unwrap();
        assert_eq!(scenario.max_turns, 5);
        assert_eq!(scenario.dimensions().unwrap(), (6, 4, 1));

        let rules = scenario.load_rules().unwrap();
        let save = scenario.build(rules).unwrap();
        assert!(save.check_invariants().is_empty());
        assert_eq!(save.units().len(), 2);
        assert_eq!(save.nodes().len(), 2);
        assert!(save.unit_at(Position::new(0, 0, 0)).is_some());
        let yard = save.tile(Position::new(2, 3, 0)).unwrap();
        assert_eq!(yard.inventory().len(), 1);
        let soldier = save.unit_at(Position::new(0, 0, 0)).unwrap();
        assert_eq!(save.selected_unit(), Some(soldier));
        assert!(save.grenade_from_belt(soldier).is_some());
    }

    #[test]
    fn test_missing_file() {
        let err = Scenario::load("does/not/exist.ron").unwrap_err();
        assert!(matches!(err, ScenarioError::FileNotFound(_)));
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let mut scenario = Scenario::from_ron_str(SCENARIO).unwrap();
        scenario.levels[0][1].push('.');
        assert!(matches!(scenario.dimensions(), Err(ScenarioError::MapError(_))));
    }

    #[test]
    fn test_unknown_symbol_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut scenario = Scenario::load(write_scenario(dir.path())).unwrap();
        scenario.levels[0][0] = "..?...".to_string();
        let rules = scenario.load_rules().unwrap();
        assert!(matches!(scenario.build(rules), Err(ScenarioError::MapError(_))));
    }
}
