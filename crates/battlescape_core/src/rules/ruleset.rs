//! The loaded rule database shared by a battle.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::armor::RuleArmor;
use super::item::RuleItem;
use super::map_data::{MapData, MapDataSet, TilePart};
use super::unit::UnitTemplate;
use super::voxel::{LoftTable, LoftTemplate};
use crate::error::{BattleError, Result};

/// Reference to one terrain part: data set index and part index inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartRef {
    /// Data set index in the ruleset.
    pub set: usize,
    /// Part index in the data set.
    pub id: usize,
}

impl PartRef {
    /// Create a new part reference.
    #[must_use]
    pub const fn new(set: usize, id: usize) -> Self {
        Self { set, id }
    }
}

/// On-disk form of a ruleset.
///
/// # Example RON
///
/// ```ron
/// RulesetFile(
///     map_data_sets: [(name: "urban", parts: [...])],
///     items: [...],
///     armors: [...],
///     units: [...],
///     scorched_earth: Some((set: 0, id: 3)),
/// )
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesetFile {
    /// Terrain data sets.
    #[serde(default)]
    pub map_data_sets: Vec<MapDataSet>,

    /// Item types.
    #[serde(default)]
    pub items: Vec<RuleItem>,

    /// Armor types.
    #[serde(default)]
    pub armors: Vec<RuleArmor>,

    /// Unit templates.
    #[serde(default)]
    pub units: Vec<UnitTemplate>,

    /// Extra LOFT templates appended after the built-in ones.
    #[serde(default)]
    pub custom_lofts: Vec<LoftTemplate>,

    /// Floor part laid on ground level tiles whose floor is destroyed.
    #[serde(default)]
    pub scorched_earth: Option<PartRef>,
}

impl RulesetFile {
    /// Check references between rules.
    ///
    /// Returns a list of problems; empty means consistent.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for set in &self.map_data_sets {
            for (index, part) in set.parts.iter().enumerate() {
                for (label, target) in [("die part", part.die_part), ("alt part", part.alt_part)] {
                    if let Some(target) = target {
                        if target >= set.parts.len() {
                            errors.push(format!(
                                "Part {index} '{}' in set '{}' has {label} {target} out of range",
                                part.name, set.name
                            ));
                        }
                    }
                }
            }
        }

        for unit in &self.units {
            if !self.armors.iter().any(|a| a.id == unit.armor) {
                errors.push(format!(
                    "Unit '{}' uses unknown armor '{}'",
                    unit.id, unit.armor
                ));
            }
        }

        for item in &self.items {
            for ammo in &item.compatible_ammo {
                if !self.items.iter().any(|i| &i.id == ammo) {
                    errors.push(format!(
                        "Item '{}' accepts unknown ammo '{ammo}'",
                        item.id
                    ));
                }
            }
        }

        for armor in &self.armors {
            if let Some(corpse) = &armor.corpse_item {
                if !self.items.iter().any(|i| &i.id == corpse) {
                    errors.push(format!(
                        "Armor '{}' leaves unknown corpse '{corpse}'",
                        armor.id
                    ));
                }
            }
        }

        if let Some(scorched) = self.scorched_earth {
            let valid = self
                .map_data_sets
                .get(scorched.set)
                .and_then(|set| set.parts.get(scorched.id))
                .is_some_and(|part| part.part == TilePart::Floor);
            if !valid {
                errors.push(format!(
                    "Scorched earth {}/{} is not a floor part",
                    scorched.set, scorched.id
                ));
            }
        }

        errors
    }
}

#[derive(Debug)]
struct LoadedSet {
    name: String,
    parts: Vec<Arc<MapData>>,
}

/// Rule database handed out to tiles, items and units as shared references.
#[derive(Debug)]
pub struct Ruleset {
    sets: Vec<LoadedSet>,
    items: BTreeMap<String, Arc<RuleItem>>,
    armors: BTreeMap<String, Arc<RuleArmor>>,
    units: BTreeMap<String, Arc<UnitTemplate>>,
    lofts: LoftTable,
    scorched_earth: Option<PartRef>,
}

impl Ruleset {
    /// Build a ruleset from its file form, rejecting inconsistent data.
    pub fn from_file(file: RulesetFile) -> Result<Self> {
        let errors = file.validate();
        if let Some(first) = errors.into_iter().next() {
            return Err(BattleError::DataParseError {
                path: String::from("<ruleset>"),
                message: first,
            });
        }

        let sets = file
            .map_data_sets
            .into_iter()
            .map(|set| LoadedSet {
                name: set.name,
                parts: set.parts.into_iter().map(Arc::new).collect(),
            })
            .collect::<Vec<_>>();

        let ruleset = Self {
            sets,
            items: file
                .items
                .into_iter()
                .map(|item| (item.id.clone(), Arc::new(item)))
                .collect(),
            armors: file
                .armors
                .into_iter()
                .map(|armor| (armor.id.clone(), Arc::new(armor)))
                .collect(),
            units: file
                .units
                .into_iter()
                .map(|unit| (unit.id.clone(), Arc::new(unit)))
                .collect(),
            lofts: LoftTable::with_custom(&file.custom_lofts),
            scorched_earth: file.scorched_earth,
        };

        debug!(
            sets = ruleset.sets.len(),
            items = ruleset.items.len(),
            armors = ruleset.armors.len(),
            units = ruleset.units.len(),
            "Ruleset loaded"
        );
        Ok(ruleset)
    }

    /// Parse a ruleset from a RON string.
    pub fn from_ron_str(ron: &str) -> Result<Self> {
        let file: RulesetFile = ron::from_str(ron)?;
        Self::from_file(file)
    }

    /// Load a ruleset from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let file: RulesetFile = ron::from_str(&contents).map_err(|e| BattleError::DataParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_file(file)
    }

    /// Terrain part by reference.
    pub fn map_data(&self, part: PartRef) -> Result<Arc<MapData>> {
        self.sets
            .get(part.set)
            .and_then(|set| set.parts.get(part.id))
            .cloned()
            .ok_or(BattleError::UnknownMapData {
                set: part.set as i32,
                id: part.id as i32,
            })
    }

    /// Index of a data set by name.
    pub fn map_data_set_index(&self, name: &str) -> Result<usize> {
        self.sets
            .iter()
            .position(|set| set.name == name)
            .ok_or_else(|| BattleError::UnknownMapDataSet(name.to_string()))
    }

    /// Look up a part by set and part name.
    pub fn find_part(&self, set_name: &str, part_name: &str) -> Result<PartRef> {
        let set = self.map_data_set_index(set_name)?;
        self.sets[set]
            .parts
            .iter()
            .position(|part| part.name == part_name)
            .map(|id| PartRef::new(set, id))
            .ok_or_else(|| BattleError::UnknownMapDataSet(format!("{set_name}/{part_name}")))
    }

    /// Number of terrain data sets.
    #[must_use]
    pub fn map_data_set_count(&self) -> usize {
        self.sets.len()
    }

    /// Item rule by id.
    pub fn item(&self, id: &str) -> Result<Arc<RuleItem>> {
        self.items
            .get(id)
            .cloned()
            .ok_or_else(|| BattleError::UnknownItem(id.to_string()))
    }

    /// Armor rule by id.
    pub fn armor(&self, id: &str) -> Result<Arc<RuleArmor>> {
        self.armors
            .get(id)
            .cloned()
            .ok_or_else(|| BattleError::UnknownArmor(id.to_string()))
    }

    /// Unit template by id.
    pub fn unit(&self, id: &str) -> Result<Arc<UnitTemplate>> {
        self.units
            .get(id)
            .cloned()
            .ok_or_else(|| BattleError::UnknownUnit(id.to_string()))
    }

    /// All item rules in id order.
    pub fn items(&self) -> impl Iterator<Item = &Arc<RuleItem>> {
        self.items.values()
    }

    /// LOFT templates.
    #[must_use]
    pub const fn lofts(&self) -> &LoftTable {
        &self.lofts
    }

    /// Part used to replace destroyed ground floors.
    #[must_use]
    pub const fn scorched_earth(&self) -> Option<PartRef> {
        self.scorched_earth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{BattleType, MovementType};

    fn minimal() -> RulesetFile {
        RulesetFile {
            map_data_sets: vec![MapDataSet {
                name: "plain".into(),
                parts: vec![
                    ron::from_str(r#"(name: "grass", part: Floor, tu_cost: (4, 4, 4))"#).unwrap(),
                    ron::from_str(r#"(name: "wall", part: WestWall, die_part: Some(0))"#).unwrap(),
                ],
            }],
            items: vec![ron::from_str(r#"(id: "corpse", battle_type: Corpse)"#).unwrap()],
            armors: vec![ron::from_str(
                r#"(id: "skin", armor: (1, 1, 1, 1, 1), corpse_item: Some("corpse"))"#,
            )
            .unwrap()],
            units: vec![],
            custom_lofts: vec![],
            scorched_earth: Some(PartRef::new(0, 0)),
        }
    }

    #[test]
    fn test_valid_ruleset_loads() {
        let ruleset = Ruleset::from_file(minimal()).unwrap();
        assert_eq!(ruleset.map_data_set_index("plain").unwrap(), 0);
        assert_eq!(ruleset.find_part("plain", "wall").unwrap(), PartRef::new(0, 1));
        assert_eq!(ruleset.item("corpse").unwrap().battle_type, BattleType::Corpse);
        assert_eq!(ruleset.armor("skin").unwrap().movement, MovementType::Walk);
        assert!(ruleset.map_data(PartRef::new(0, 5)).is_err());
    }

    #[test]
    fn test_validate_reports_bad_references() {
        let mut file = minimal();
        file.map_data_sets[0].parts[1].die_part = Some(9);
        file.armors[0].corpse_item = Some("ghost".into());
        let errors = file.validate();
        assert_eq!(errors.len(), 2);
        assert!(Ruleset::from_file(file).is_err());
    }

    #[test]
    fn test_unknown_lookups_are_errors() {
        let ruleset = Ruleset::from_file(minimal()).unwrap();
        assert!(matches!(ruleset.item("laser"), Err(BattleError::UnknownItem(_))));
        assert!(matches!(ruleset.unit("sectoid"), Err(BattleError::UnknownUnit(_))));
    }
}
