//! The battle aggregate: map, units, items and turn state.
//!
//! [`SavedBattleGame`] owns every tile, unit and item of one mission. Tiles
//! and units refer to each other through [`UnitId`]s, and items record their
//! location; this type keeps both sides of every reference in step and is
//! the only place that moves units between tiles or items between places.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::BattleActionType;
use crate::config::SimulationConfig;
use crate::error::{BattleError, Result};
use crate::item::{BattleItem, InventorySlot, ItemId, ItemLocation, ItemRecord};
use crate::node::Node;
use crate::position::Position;
use crate::rng::RandomSource;
use crate::rules::{BattleType, PartRef, RuleItem, Ruleset, TilePart};
use crate::tile::{Discovery, Tile, TileRecord};
use crate::tile_engine::TileEngine;
use crate::unit::{BattleUnit, Faction, UnitId, UnitRecord, UnitStatus};

/// Items a hand can hold.
pub const HAND_CAPACITY: i32 = 1;

/// Inventory cells on the belt.
pub const BELT_CELLS: i32 = 4;

/// Inventory cells in the backpack.
pub const BACKPACK_CELLS: i32 = 12;

/// One mission's state.
#[derive(Debug, Clone)]
pub struct SavedBattleGame {
    rules: Arc<Ruleset>,
    width: i32,
    length: i32,
    height: i32,
    tiles: Vec<Tile>,
    units: Vec<BattleUnit>,
    items: BTreeMap<ItemId, BattleItem>,
    next_item_id: u32,
    nodes: Vec<Node>,
    mission_type: String,
    turn: i32,
    side: Faction,
    selected_unit: Option<UnitId>,
    global_shade: i32,
    tu_reserved: BattleActionType,
    objective_destroyed: bool,
    debug_mode: bool,
}

impl SavedBattleGame {
    /// Create an empty map of `width` x `length` x `height` tiles.
    #[must_use]
    pub fn new(rules: Arc<Ruleset>, width: i32, length: i32, height: i32) -> Self {
        let (width, length, height) = (width.max(1), length.max(1), height.max(1));
        let mut tiles = Vec::with_capacity((width * length * height) as usize);
        for z in 0..height {
            for y in 0..length {
                for x in 0..width {
                    tiles.push(Tile::new(Position::new(x, y, z)));
                }
            }
        }
        Self {
            rules,
            width,
            length,
            height,
            tiles,
            units: Vec::new(),
            items: BTreeMap::new(),
            next_item_id: 0,
            nodes: Vec::new(),
            mission_type: String::from("STR_UFO_CRASH_RECOVERY"),
            turn: 1,
            side: Faction::Player,
            selected_unit: None,
            global_shade: 0,
            tu_reserved: BattleActionType::SnapShot,
            objective_destroyed: false,
            debug_mode: false,
        }
    }

    /// Shared rules.
    #[must_use]
    pub fn rules(&self) -> &Ruleset {
        &self.rules
    }

    /// Shared handle to the rules.
    #[must_use]
    pub fn rules_arc(&self) -> Arc<Ruleset> {
        Arc::clone(&self.rules)
    }

    /// Map size in tiles: width (x), length (y), height (z).
    #[must_use]
    pub const fn dimensions(&self) -> (i32, i32, i32) {
        (self.width, self.length, self.height)
    }

    // ========================================================================
    // Tiles
    // ========================================================================

    /// True if the position lies on the map.
    #[must_use]
    pub const fn is_on_map(&self, pos: Position) -> bool {
        pos.x >= 0
            && pos.y >= 0
            && pos.z >= 0
            && pos.x < self.width
            && pos.y < self.length
            && pos.z < self.height
    }

    /// Index of a tile in the flat tile array.
    #[must_use]
    pub const fn tile_index(&self, pos: Position) -> Option<usize> {
        if self.is_on_map(pos) {
            Some((pos.z * self.length * self.width + pos.y * self.width + pos.x) as usize)
        } else {
            None
        }
    }

    /// Position of a tile index.
    #[must_use]
    pub const fn index_position(&self, index: usize) -> Position {
        let index = index as i32;
        let layer = self.width * self.length;
        Position::new(index % self.width, (index / self.width) % self.length, index / layer)
    }

    /// Tile at a position.
    #[must_use]
    pub fn tile(&self, pos: Position) -> Option<&Tile> {
        self.tile_index(pos).map(|i| &self.tiles[i])
    }

    /// Mutable tile at a position.
    pub fn tile_mut(&mut self, pos: Position) -> Option<&mut Tile> {
        self.tile_index(pos).map(move |i| &mut self.tiles[i])
    }

    /// All tiles, bottom layer first, rows north to south.
    #[must_use]
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub(crate) fn tiles_mut(&mut self) -> &mut [Tile] {
        &mut self.tiles
    }

    /// Place a terrain part on a tile.
    pub fn set_part(&mut self, pos: Position, part: PartRef) -> Result<()> {
        let rules = Arc::clone(&self.rules);
        let tile = self.tile_mut(pos).ok_or(BattleError::OutOfMap(pos))?;
        tile.place(part, &rules)
    }

    /// True if a unit standing on `pos` would fall.
    #[must_use]
    pub fn has_no_floor(&self, pos: Position) -> bool {
        let Some(tile) = self.tile(pos) else {
            return true;
        };
        if pos.z == 0 && tile.part(TilePart::Floor).is_none() {
            // the ground level is always solid
            return false;
        }
        tile.has_no_floor(self.tile(pos + Position::DOWN))
    }

    /// Lowest supported position at or below `pos`.
    #[must_use]
    pub fn ground_below(&self, pos: Position) -> Position {
        let mut pos = pos;
        while pos.z > 0 && self.has_no_floor(pos) {
            pos = pos + Position::DOWN;
        }
        pos
    }

    /// Darkness of the sky, 0 (day) to 15 (night).
    #[must_use]
    pub const fn global_shade(&self) -> i32 {
        self.global_shade
    }

    /// Set the darkness of the sky.
    pub fn set_global_shade(&mut self, shade: i32) {
        self.global_shade = shade.clamp(0, 15);
    }

    /// Mark every tile as discovered.
    pub fn reveal_map(&mut self) {
        for tile in &mut self.tiles {
            tile.set_discovered(Discovery::Content, true);
        }
    }

    // ========================================================================
    // Units
    // ========================================================================

    /// All units, indexed by [`UnitId`].
    #[must_use]
    pub fn units(&self) -> &[BattleUnit] {
        &self.units
    }

    /// Unit by id.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&BattleUnit> {
        self.units.get(id.index())
    }

    /// Mutable unit by id.
    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut BattleUnit> {
        self.units.get_mut(id.index())
    }

    /// Unit standing on a tile.
    #[must_use]
    pub fn unit_at(&self, pos: Position) -> Option<UnitId> {
        self.tile(pos).and_then(Tile::unit)
    }

    /// Spawn a unit from a template on a free tile.
    pub fn add_unit(
        &mut self,
        template_id: &str,
        faction: Faction,
        position: Position,
    ) -> Result<UnitId> {
        let id = UnitId(self.units.len() as u32);
        let unit = BattleUnit::from_rules(id, template_id, &self.rules, faction, position)?;
        self.insert_unit(unit)
    }

    /// Put an already built unit on the map. Its id must be the next free
    /// index.
    pub fn insert_unit(&mut self, unit: BattleUnit) -> Result<UnitId> {
        let position = unit.position();
        let index = self.tile_index(position).ok_or(BattleError::OutOfMap(position))?;
        if self.tiles[index].unit().is_some() {
            return Err(BattleError::TileOccupied(position));
        }
        let id = UnitId(self.units.len() as u32);
        if unit.id() != id {
            return Err(BattleError::InvalidSave(format!(
                "{} inserted where {id} was expected",
                unit.id()
            )));
        }
        self.tiles[index].set_unit(Some(id));
        debug!(unit = %id, template = %unit.template().id, faction = ?unit.faction(), %position, "Unit spawned");
        self.units.push(unit);
        Ok(id)
    }

    /// Move a unit to another tile. Fails (returns false) if the target is
    /// off the map or taken by another unit.
    pub fn move_unit(&mut self, id: UnitId, to: Position) -> bool {
        let Some(from) = self.unit(id).map(BattleUnit::position) else {
            return false;
        };
        let Some(target) = self.tile_index(to) else {
            return false;
        };
        if self.tiles[target].unit().is_some_and(|other| other != id) {
            return false;
        }
        if let Some(source) = self.tile_index(from) {
            if self.tiles[source].unit() == Some(id) {
                self.tiles[source].set_unit(None);
            }
        }
        self.tiles[target].set_unit(Some(id));
        if let Some(unit) = self.unit_mut(id) {
            unit.set_position(to);
        }
        true
    }

    /// Take a fallen unit off its tile so others can walk there.
    pub fn remove_unit_from_tile(&mut self, id: UnitId) {
        let Some(pos) = self.unit(id).map(BattleUnit::position) else {
            return;
        };
        if let Some(tile) = self.tile_mut(pos) {
            if tile.unit() == Some(id) {
                tile.set_unit(None);
            }
        }
    }

    /// Put a unit that got up again back on its tile, if the tile is free.
    pub fn restore_unit_to_tile(&mut self, id: UnitId) -> bool {
        let Some(pos) = self.unit(id).map(BattleUnit::position) else {
            return false;
        };
        match self.tile_mut(pos) {
            Some(tile) if tile.unit().is_none() || tile.unit() == Some(id) => {
                tile.set_unit(Some(id));
                true
            }
            _ => false,
        }
    }

    /// Units of a faction that are still in the fight.
    pub fn active_units(&self, faction: Faction) -> impl Iterator<Item = &BattleUnit> + '_ {
        self.units
            .iter()
            .filter(move |u| u.faction() == faction && !u.is_down())
    }

    /// Currently selected unit.
    #[must_use]
    pub const fn selected_unit(&self) -> Option<UnitId> {
        self.selected_unit
    }

    /// Select a unit.
    pub fn set_selected_unit(&mut self, unit: Option<UnitId>) {
        self.selected_unit = unit;
    }

    /// Select the next unit of one of `factions` that can still act,
    /// cycling from after the current selection.
    ///
    /// With `check_reselect`, units marked as done are skipped.
    pub fn select_next_unit(&mut self, factions: &[Faction], check_reselect: bool) -> Option<UnitId> {
        let count = self.units.len();
        if count == 0 {
            self.selected_unit = None;
            return None;
        }
        let start = self.selected_unit.map_or(0, |id| id.index() + 1);
        let next = (0..count)
            .map(|offset| (start + offset) % count)
            .map(|index| &self.units[index])
            .find(|unit| {
                factions.contains(&unit.faction())
                    && !unit.is_down()
                    && (!check_reselect || !unit.dont_reselect())
                    && Some(unit.id()) != self.selected_unit
            })
            .map(BattleUnit::id);
        self.selected_unit = next;
        next
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// All items, by id.
    pub fn items(&self) -> impl Iterator<Item = &BattleItem> + '_ {
        self.items.values()
    }

    /// Item by id.
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&BattleItem> {
        self.items.get(&id)
    }

    /// Mutable item by id. Location changes go through [`move_item`](Self::move_item).
    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut BattleItem> {
        self.items.get_mut(&id)
    }

    /// Create an item of a rule id, not yet placed anywhere.
    pub fn create_item(&mut self, rule_id: &str) -> Result<ItemId> {
        let rule = self.rules.item(rule_id)?;
        let id = ItemId(self.next_item_id);
        self.next_item_id += 1;
        self.items.insert(id, BattleItem::new(id, rule));
        Ok(id)
    }

    /// Move an item to a new location, keeping ground lists and weapon clip
    /// slots in step. Returns false if the target does not exist.
    pub fn move_item(&mut self, id: ItemId, to: ItemLocation) -> bool {
        let Some(from) = self.items.get(&id).map(BattleItem::location) else {
            return false;
        };
        let target_ok = match to {
            ItemLocation::Nowhere => true,
            ItemLocation::Ground(pos) => self.is_on_map(pos),
            ItemLocation::Carried { owner, .. } => self.unit(owner).is_some(),
            ItemLocation::Loaded(weapon) => weapon != id && self.items.contains_key(&weapon),
        };
        if !target_ok {
            return false;
        }

        match from {
            ItemLocation::Ground(pos) => {
                if let Some(tile) = self.tile_mut(pos) {
                    tile.remove_item(id);
                }
            }
            ItemLocation::Loaded(weapon) => {
                if let Some(weapon) = self.items.get_mut(&weapon) {
                    if weapon.loaded_clip() == Some(id) {
                        weapon.set_loaded_clip(None);
                    }
                }
            }
            ItemLocation::Carried { .. } | ItemLocation::Nowhere => {}
        }

        match to {
            ItemLocation::Ground(pos) => {
                if let Some(tile) = self.tile_mut(pos) {
                    tile.add_item(id);
                }
            }
            ItemLocation::Loaded(weapon) => {
                if let Some(weapon) = self.items.get_mut(&weapon) {
                    weapon.set_loaded_clip(Some(id));
                }
            }
            ItemLocation::Carried { .. } | ItemLocation::Nowhere => {}
        }

        if let Some(item) = self.items.get_mut(&id) {
            item.set_location(to);
        }
        true
    }

    /// Remove an item from the battle altogether, along with its clip.
    pub fn destroy_item(&mut self, id: ItemId) {
        let clip = self.item(id).and_then(BattleItem::loaded_clip);
        self.move_item(id, ItemLocation::Nowhere);
        self.items.remove(&id);
        if let Some(clip) = clip {
            self.items.remove(&clip);
        }
    }

    /// Drop an item at `pos`, falling to the first floor below.
    pub fn drop_item(&mut self, id: ItemId, pos: Position) -> bool {
        let ground = self.ground_below(pos);
        self.move_item(id, ItemLocation::Ground(ground))
    }

    /// Items carried by a unit.
    #[must_use]
    pub fn unit_items(&self, unit: UnitId) -> Vec<ItemId> {
        self.items
            .values()
            .filter(|item| item.owner() == Some(unit))
            .map(BattleItem::id)
            .collect()
    }

    /// First item in an inventory section.
    #[must_use]
    pub fn item_in_slot(&self, unit: UnitId, slot: InventorySlot) -> Option<ItemId> {
        self.items
            .values()
            .find(|item| item.owner() == Some(unit) && item.slot() == Some(slot))
            .map(BattleItem::id)
    }

    /// Weapon in the right hand, or else the left hand.
    #[must_use]
    pub fn main_hand_weapon(&self, unit: UnitId) -> Option<ItemId> {
        [InventorySlot::RightHand, InventorySlot::LeftHand]
            .into_iter()
            .filter_map(|slot| self.item_in_slot(unit, slot))
            .find(|id| {
                self.item(*id).is_some_and(|item| {
                    matches!(
                        item.rules().battle_type,
                        BattleType::Firearm | BattleType::Melee
                    )
                })
            })
    }

    /// A grenade on the unit's belt.
    #[must_use]
    pub fn grenade_from_belt(&self, unit: UnitId) -> Option<ItemId> {
        self.items
            .values()
            .find(|item| {
                item.owner() == Some(unit)
                    && item.slot() == Some(InventorySlot::Belt)
                    && item.rules().is_grenade()
            })
            .map(BattleItem::id)
    }

    /// True if both hands hold something.
    #[must_use]
    pub fn both_hands_full(&self, unit: UnitId) -> bool {
        self.item_in_slot(unit, InventorySlot::RightHand).is_some()
            && self.item_in_slot(unit, InventorySlot::LeftHand).is_some()
    }

    /// Weight carried, including loaded clips.
    #[must_use]
    pub fn carried_weight(&self, unit: UnitId) -> i32 {
        self.items
            .values()
            .filter(|item| item.owner() == Some(unit))
            .map(|item| {
                let clip = item
                    .loaded_clip()
                    .and_then(|clip| self.item(clip))
                    .map_or(0, |clip| clip.rules().weight);
                item.rules().weight + clip
            })
            .sum()
    }

    /// Inventory cells taken by a unit's items.
    #[must_use]
    pub fn used_inventory_cells(&self, unit: UnitId) -> i32 {
        self.items
            .values()
            .filter(|item| item.owner() == Some(unit))
            .map(|item| item.rules().inventory_cells())
            .sum()
    }

    /// True if `rule` fits into a section of a unit's inventory.
    #[must_use]
    pub fn fits_in_slot(&self, unit: UnitId, slot: InventorySlot, rule: &RuleItem) -> bool {
        let in_slot = self
            .items
            .values()
            .filter(|item| item.owner() == Some(unit) && item.slot() == Some(slot));
        match slot {
            InventorySlot::RightHand | InventorySlot::LeftHand => {
                (in_slot.count() as i32) < HAND_CAPACITY
            }
            InventorySlot::Belt => {
                in_slot.map(|i| i.rules().inventory_cells()).sum::<i32>() + rule.inventory_cells()
                    <= BELT_CELLS
            }
            InventorySlot::Backpack => {
                in_slot.map(|i| i.rules().inventory_cells()).sum::<i32>() + rule.inventory_cells()
                    <= BACKPACK_CELLS
            }
        }
    }

    /// Put an item into a unit's inventory section if it fits.
    pub fn give_item(&mut self, id: ItemId, unit: UnitId, slot: InventorySlot) -> bool {
        let Some(rule) = self.item(id).map(BattleItem::rules_arc) else {
            return false;
        };
        if self.item(id).and_then(BattleItem::owner) == Some(unit) {
            return self.item(id).and_then(BattleItem::slot) == Some(slot);
        }
        if !self.fits_in_slot(unit, slot, &rule) {
            return false;
        }
        let x = self
            .items
            .values()
            .filter(|item| item.owner() == Some(unit) && item.slot() == Some(slot))
            .count() as i32;
        self.move_item(
            id,
            ItemLocation::Carried {
                owner: unit,
                slot,
                x,
                y: 0,
            },
        )
    }

    /// Load a clip into a weapon. The old clip, if any, goes to the ground
    /// under the weapon's carrier (or where the weapon lies).
    pub fn load_ammo(&mut self, weapon: ItemId, clip: ItemId) -> bool {
        let (Some(weapon_item), Some(clip_item)) = (self.item(weapon), self.item(clip)) else {
            return false;
        };
        if !weapon_item.rules().accepts_ammo(&clip_item.rules().id) {
            return false;
        }
        if let Some(old) = weapon_item.loaded_clip() {
            let drop_at = match weapon_item.location() {
                ItemLocation::Carried { owner, .. } => self.unit(owner).map(BattleUnit::position),
                ItemLocation::Ground(pos) => Some(pos),
                _ => None,
            };
            match drop_at {
                Some(pos) => self.drop_item(old, pos),
                None => self.move_item(old, ItemLocation::Nowhere),
            };
        }
        self.move_item(clip, ItemLocation::Loaded(weapon))
    }

    // ========================================================================
    // Nodes, turn and mission state
    // ========================================================================

    /// Patrol nodes.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Mutable patrol nodes.
    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    /// Add a patrol node; its id becomes its index.
    pub fn add_node(&mut self, mut node: Node) -> usize {
        node.id = self.nodes.len();
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Mission type string, e.g. "STR_UFO_CRASH_RECOVERY".
    #[must_use]
    pub fn mission_type(&self) -> &str {
        &self.mission_type
    }

    /// Set the mission type.
    pub fn set_mission_type(&mut self, mission_type: impl Into<String>) {
        self.mission_type = mission_type.into();
    }

    /// Turn number, starting at 1.
    #[must_use]
    pub const fn turn(&self) -> i32 {
        self.turn
    }

    pub(crate) fn increment_turn(&mut self) {
        self.turn += 1;
    }

    /// Side whose turn it is.
    #[must_use]
    pub const fn side(&self) -> Faction {
        self.side
    }

    pub(crate) fn set_side(&mut self, side: Faction) {
        self.side = side;
    }

    /// Hand the turn to the next side.
    ///
    /// The player is followed by the aliens, the aliens by the civilians
    /// (skipped when none is left standing) and the civilians by a new
    /// round: fire and smoke advance, primed fuses count down and the turn
    /// number goes up. Units of the side to move get their TU back and roll
    /// for panic; unconscious units that have slept off their stun stand up
    /// again. Returns the units whose morale broke.
    pub(crate) fn end_turn(&mut self, config: &SimulationConfig, rng: &mut dyn RandomSource) -> Vec<UnitId> {
        let neutrals_left = self.active_units(Faction::Neutral).next().is_some();
        let next = match self.side {
            Faction::Player => Faction::Hostile,
            Faction::Hostile if neutrals_left => Faction::Neutral,
            Faction::Hostile | Faction::Neutral => Faction::Player,
        };
        if next == Faction::Player {
            TileEngine::new(self, config).prepare_new_turn(rng);
            for item in self.items.values_mut() {
                item.countdown();
            }
            self.turn += 1;
        }
        self.side = next;
        self.selected_unit = None;

        let waking: Vec<UnitId> = self
            .units
            .iter()
            .filter(|u| u.status() == UnitStatus::Unconscious && u.faction() == next)
            .filter(|u| u.health() > 0 && u.stun_level() < u.health())
            .map(BattleUnit::id)
            .collect();
        for id in waking {
            self.wake_up(id);
        }

        let mut broke = Vec::new();
        let movers: Vec<UnitId> = self
            .units
            .iter()
            .filter(|u| u.original_faction() == next && u.status() != UnitStatus::Dead)
            .map(BattleUnit::id)
            .collect();
        for id in movers {
            let weight = self.carried_weight(id);
            if let Some(unit) = self.unit_mut(id) {
                if unit.prepare_new_turn(weight, rng) {
                    broke.push(id);
                }
            }
        }

        for unit in &mut self.units {
            if unit.faction() != Faction::Player {
                unit.set_visible(false);
            }
        }
        TileEngine::new(self, config).calculate_all_fov();
        if next == Faction::Player {
            self.select_next_unit(&[Faction::Player], false);
        }
        debug!(turn = self.turn, side = ?next, panicking = broke.len(), "Turn handed over");
        broke
    }

    /// Stand an unconscious unit up where its body lies, if the tile is
    /// free, and remove the body.
    fn wake_up(&mut self, id: UnitId) {
        let body = self
            .items
            .values()
            .find(|item| item.unit() == Some(id) && item.rules().battle_type == BattleType::Corpse)
            .map(|item| (item.id(), item.ground_position()));
        let at = match body {
            Some((_, Some(pos))) => pos,
            Some((_, None)) => return,
            None => match self.unit(id) {
                Some(unit) => unit.position(),
                None => return,
            },
        };
        if self.unit_at(at).is_some_and(|other| other != id) {
            return;
        }
        if let Some((item, _)) = body {
            self.destroy_item(item);
        }
        if let Some(unit) = self.unit_mut(id) {
            unit.set_position(at);
            unit.set_status(UnitStatus::Standing);
        }
        self.restore_unit_to_tile(id);
        debug!(unit = %id, position = %at, "Unit regained consciousness");
    }

    /// Action type whose TU the player keeps in reserve.
    #[must_use]
    pub const fn tu_reserved(&self) -> BattleActionType {
        self.tu_reserved
    }

    /// Set the reserved action type.
    pub fn set_tu_reserved(&mut self, kind: BattleActionType) {
        self.tu_reserved = kind;
    }

    /// True once a must-destroy terrain part was destroyed.
    #[must_use]
    pub const fn objective_destroyed(&self) -> bool {
        self.objective_destroyed
    }

    pub(crate) fn set_objective_destroyed(&mut self) {
        self.objective_destroyed = true;
    }

    /// Debug mode: infinite TU, revealed map.
    #[must_use]
    pub const fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Enable debug mode and reveal the map.
    pub fn set_debug_mode(&mut self) {
        self.debug_mode = true;
        self.reveal_map();
    }

    // ========================================================================
    // Consistency and hashing
    // ========================================================================

    /// Check cross-entity invariants; returns a list of violations.
    ///
    /// Every standing unit occupies exactly its own tile, no tile names a
    /// unit that is not there, and every item is in exactly one place.
    #[must_use]
    pub fn check_invariants(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (index, tile) in self.tiles.iter().enumerate() {
            if let Some(id) = tile.unit() {
                match self.unit(id) {
                    Some(unit) if unit.position() == self.index_position(index) => {}
                    _ => errors.push(format!("Tile {} names {id} which is not there", tile.position())),
                }
            }
            for item in tile.inventory() {
                let location = self.item(*item).map(BattleItem::location);
                if location != Some(ItemLocation::Ground(tile.position())) {
                    errors.push(format!(
                        "Tile {} lists {item} which is at {location:?}",
                        tile.position()
                    ));
                }
            }
        }

        for unit in &self.units {
            if !unit.is_down() && self.unit_at(unit.position()) != Some(unit.id()) {
                errors.push(format!("{} is not on its tile {}", unit.id(), unit.position()));
            }
        }

        for item in self.items.values() {
            match item.location() {
                ItemLocation::Ground(pos) => {
                    let listed = self
                        .tile(pos)
                        .is_some_and(|tile| tile.inventory().contains(&item.id()));
                    if !listed {
                        errors.push(format!("{} is not listed on tile {pos}", item.id()));
                    }
                }
                ItemLocation::Carried { owner, .. } => {
                    if self.unit(owner).is_none() {
                        errors.push(format!("{} is carried by missing {owner}", item.id()));
                    }
                }
                ItemLocation::Loaded(weapon) => {
                    if self.item(weapon).and_then(BattleItem::loaded_clip) != Some(item.id()) {
                        errors.push(format!("{} claims to be loaded in {weapon}", item.id()));
                    }
                }
                ItemLocation::Nowhere => {}
            }
        }

        errors
    }

    /// Hash of the simulation state, for determinism checks.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.turn.hash(&mut hasher);
        self.side.hash(&mut hasher);
        self.objective_destroyed.hash(&mut hasher);

        self.units.len().hash(&mut hasher);
        for unit in &self.units {
            unit.id().hash(&mut hasher);
            unit.position().hash(&mut hasher);
            unit.direction().hash(&mut hasher);
            unit.status().hash(&mut hasher);
            unit.faction().hash(&mut hasher);
            unit.time_units().hash(&mut hasher);
            unit.energy().hash(&mut hasher);
            unit.health().hash(&mut hasher);
            unit.stun_level().hash(&mut hasher);
            unit.morale().hash(&mut hasher);
            unit.fire().hash(&mut hasher);
        }

        self.items.len().hash(&mut hasher);
        for item in self.items.values() {
            item.id().hash(&mut hasher);
            item.location().hash(&mut hasher);
            item.ammo_quantity().hash(&mut hasher);
            item.fuse_timer().hash(&mut hasher);
        }

        for tile in &self.tiles {
            tile.fire().hash(&mut hasher);
            tile.smoke().hash(&mut hasher);
            for slot in TilePart::ALL {
                tile.part_ref(slot).hash(&mut hasher);
            }
        }

        hasher.finish()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Structured record of the whole battle.
    #[must_use]
    pub fn to_record(&self) -> SavedBattleRecord {
        let empty = |record: &TileRecord| {
            record.map_data_id == [-1; 4]
                && record.fire == 0
                && record.smoke == 0
                && record.discovered == [false; 3]
        };
        SavedBattleRecord {
            width: self.width,
            length: self.length,
            height: self.height,
            mission_type: self.mission_type.clone(),
            turn: self.turn,
            side: self.side,
            selected_unit: self.selected_unit,
            global_shade: self.global_shade,
            tu_reserved: self.tu_reserved,
            objective_destroyed: self.objective_destroyed,
            debug_mode: self.debug_mode,
            next_item_id: self.next_item_id,
            tiles: self
                .tiles
                .iter()
                .map(Tile::to_record)
                .filter(|record| !empty(record))
                .collect(),
            units: self.units.iter().map(BattleUnit::to_record).collect(),
            items: self.items.values().map(BattleItem::to_record).collect(),
            nodes: self.nodes.clone(),
        }
    }

    /// Rebuild a battle from its record, checking it for consistency.
    pub fn from_record(record: &SavedBattleRecord, rules: Arc<Ruleset>) -> Result<Self> {
        if record.width <= 0 || record.length <= 0 || record.height <= 0 {
            return Err(BattleError::InvalidSave(format!(
                "map size {}x{}x{}",
                record.width, record.length, record.height
            )));
        }
        let mut save = Self::new(Arc::clone(&rules), record.width, record.length, record.height);
        save.mission_type = record.mission_type.clone();
        save.turn = record.turn;
        save.side = record.side;
        save.global_shade = record.global_shade;
        save.tu_reserved = record.tu_reserved;
        save.objective_destroyed = record.objective_destroyed;
        save.debug_mode = record.debug_mode;
        save.nodes = record.nodes.clone();

        for tile_record in &record.tiles {
            let tile = save
                .tile_mut(tile_record.position)
                .ok_or(BattleError::OutOfMap(tile_record.position))?;
            tile.load_record(tile_record, &rules)?;
        }

        for (index, unit_record) in record.units.iter().enumerate() {
            if unit_record.id as usize != index {
                return Err(BattleError::InvalidSave(format!(
                    "unit id {} stored at position {index}",
                    unit_record.id
                )));
            }
            let unit = BattleUnit::from_record(unit_record, &rules)?;
            let pos = unit.position();
            let tile_index = save.tile_index(pos).ok_or(BattleError::OutOfMap(pos))?;
            if !unit.is_down() {
                if save.tiles[tile_index].unit().is_some() {
                    return Err(BattleError::TileOccupied(pos));
                }
                save.tiles[tile_index].set_unit(Some(unit.id()));
            }
            save.units.push(unit);
        }

        for item_record in &record.items {
            let item = BattleItem::from_record(item_record, &rules)?;
            save.items.insert(item.id(), item);
        }
        for item in save.items.values() {
            let valid = match item.location() {
                ItemLocation::Carried { owner, .. } => save.unit(owner).is_some(),
                ItemLocation::Ground(pos) => save.is_on_map(pos),
                ItemLocation::Loaded(weapon) => save
                    .item(weapon)
                    .is_some_and(|w| w.loaded_clip() == Some(item.id())),
                ItemLocation::Nowhere => true,
            };
            if !valid {
                return Err(BattleError::InvalidSave(format!(
                    "{} has an invalid location {:?}",
                    item.id(),
                    item.location()
                )));
            }
        }
        let grounded: Vec<(ItemId, Position)> = save
            .items
            .values()
            .filter_map(|item| item.ground_position().map(|pos| (item.id(), pos)))
            .collect();
        for (id, pos) in grounded {
            if let Some(tile) = save.tile_mut(pos) {
                tile.add_item(id);
            }
        }

        save.next_item_id = record
            .next_item_id
            .max(save.items.keys().last().map_or(0, |id| id.0 + 1));
        save.selected_unit = record.selected_unit.filter(|id| save.unit(*id).is_some());
        Ok(save)
    }

    /// Write the battle as a RON document.
    pub fn to_ron(&self) -> Result<String> {
        ron::ser::to_string_pretty(&self.to_record(), ron::ser::PrettyConfig::default())
            .map_err(|e| BattleError::Serialization(e.to_string()))
    }

    /// Read a battle from a RON document.
    pub fn from_ron(ron: &str, rules: Arc<Ruleset>) -> Result<Self> {
        let record: SavedBattleRecord = ron::from_str(ron)?;
        Self::from_record(&record, rules)
    }
}

/// Saved form of a [`SavedBattleGame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedBattleRecord {
    /// Map width.
    pub width: i32,
    /// Map length.
    pub length: i32,
    /// Map height.
    pub height: i32,
    /// Mission type.
    pub mission_type: String,
    /// Turn number.
    pub turn: i32,
    /// Side to move.
    pub side: Faction,
    /// Selected unit.
    #[serde(default)]
    pub selected_unit: Option<UnitId>,
    /// Sky darkness.
    #[serde(default)]
    pub global_shade: i32,
    /// Reserved action type.
    #[serde(default)]
    pub tu_reserved: BattleActionType,
    /// Objective destroyed.
    #[serde(default)]
    pub objective_destroyed: bool,
    /// Debug mode.
    #[serde(default)]
    pub debug_mode: bool,
    /// Next item id to hand out.
    #[serde(default)]
    pub next_item_id: u32,
    /// Tiles that are not empty.
    pub tiles: Vec<TileRecord>,
    /// Units in id order.
    pub units: Vec<UnitRecord>,
    /// Items.
    pub items: Vec<ItemRecord>,
    /// Patrol nodes.
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{flat_battle, parts, place, ScriptedRng};

    #[test]
    fn test_tile_index_roundtrip() {
        let save = flat_battle(5, 4, 3);
        for pos in [Position::new(0, 0, 0), Position::new(4, 3, 2), Position::new(2, 1, 1)] {
            let index = save.tile_index(pos).unwrap();
            assert_eq!(save.index_position(index), pos);
            assert_eq!(save.tiles()[index].position(), pos);
        }
        assert_eq!(save.tile_index(Position::new(5, 0, 0)), None);
        assert_eq!(save.tile_index(Position::new(0, -1, 0)), None);
    }

    #[test]
    fn test_one_unit_per_tile() {
        let mut save = flat_battle(5, 5, 1);
        let a = save
            .add_unit("soldier", Faction::Player, Position::new(1, 1, 0))
            .unwrap();
        assert!(matches!(
            save.add_unit("sectoid", Faction::Hostile, Position::new(1, 1, 0)),
            Err(BattleError::TileOccupied(_))
        ));
        let b = save
            .add_unit("sectoid", Faction::Hostile, Position::new(2, 1, 0))
            .unwrap();
        assert!(!save.move_unit(a, Position::new(2, 1, 0)));
        assert!(save.move_unit(a, Position::new(1, 2, 0)));
        assert_eq!(save.unit_at(Position::new(1, 1, 0)), None);
        assert_eq!(save.unit_at(Position::new(1, 2, 0)), Some(a));
        assert_eq!(save.unit_at(Position::new(2, 1, 0)), Some(b));
        assert!(save.check_invariants().is_empty());
    }

    #[test]
    fn test_item_is_in_exactly_one_place() {
        let mut save = flat_battle(5, 5, 1);
        let unit = save
            .add_unit("soldier", Faction::Player, Position::new(1, 1, 0))
            .unwrap();
        let rifle = save.create_item("rifle").unwrap();
        let clip = save.create_item("rifle_clip").unwrap();

        assert!(save.give_item(rifle, unit, InventorySlot::RightHand));
        assert!(save.load_ammo(rifle, clip));
        assert_eq!(save.item(rifle).unwrap().loaded_clip(), Some(clip));
        assert_eq!(save.main_hand_weapon(unit), Some(rifle));
        assert_eq!(save.carried_weight(unit), 11);

        assert!(save.drop_item(rifle, Position::new(3, 3, 0)));
        assert_eq!(save.tile(Position::new(3, 3, 0)).unwrap().inventory(), &[rifle]);
        assert_eq!(save.item(rifle).unwrap().previous_owner(), Some(unit));
        assert!(save.unit_items(unit).is_empty());

        assert!(save.give_item(rifle, unit, InventorySlot::RightHand));
        assert!(save.tile(Position::new(3, 3, 0)).unwrap().inventory().is_empty());
        assert!(save.check_invariants().is_empty());
    }

    #[test]
    fn test_reloading_drops_the_old_clip() {
        let mut save = flat_battle(5, 5, 1);
        let unit = save
            .add_unit("soldier", Faction::Player, Position::new(2, 2, 0))
            .unwrap();
        let rifle = save.create_item("rifle").unwrap();
        let first = save.create_item("rifle_clip").unwrap();
        let second = save.create_item("rifle_clip").unwrap();
        save.give_item(rifle, unit, InventorySlot::RightHand);
        save.load_ammo(rifle, first);
        assert!(save.load_ammo(rifle, second));
        assert_eq!(
            save.item(first).unwrap().location(),
            ItemLocation::Ground(Position::new(2, 2, 0))
        );
        assert!(!save.load_ammo(rifle, rifle));
        assert!(save.check_invariants().is_empty());
    }

    #[test]
    fn test_inventory_capacity() {
        let mut save = flat_battle(3, 3, 1);
        let unit = save
            .add_unit("soldier", Faction::Player, Position::new(0, 0, 0))
            .unwrap();
        let mut on_belt = 0;
        for _ in 0..6 {
            let grenade = save.create_item("grenade").unwrap();
            if save.give_item(grenade, unit, InventorySlot::Belt) {
                on_belt += 1;
            }
        }
        assert_eq!(on_belt, BELT_CELLS);
        assert!(save.grenade_from_belt(unit).is_some());

        let a = save.create_item("rifle").unwrap();
        let b = save.create_item("rifle").unwrap();
        assert!(save.give_item(a, unit, InventorySlot::LeftHand));
        assert!(!save.give_item(b, unit, InventorySlot::LeftHand));
    }

    #[test]
    fn test_dropped_item_falls_to_the_floor() {
        let mut save = flat_battle(3, 3, 3);
        let item = save.create_item("grenade").unwrap();
        assert!(save.drop_item(item, Position::new(1, 1, 2)));
        assert_eq!(save.item(item).unwrap().ground_position(), Some(Position::new(1, 1, 0)));

        place(&mut save, Position::new(1, 1, 1), parts::ROOF);
        let other = save.create_item("grenade").unwrap();
        save.drop_item(other, Position::new(1, 1, 2));
        assert_eq!(save.item(other).unwrap().ground_position(), Some(Position::new(1, 1, 1)));
    }

    #[test]
    fn test_select_next_unit_cycles() {
        let mut save = flat_battle(6, 1, 1);
        let a = save.add_unit("soldier", Faction::Player, Position::new(0, 0, 0)).unwrap();
        save.add_unit("sectoid", Faction::Hostile, Position::new(1, 0, 0)).unwrap();
        let c = save.add_unit("soldier", Faction::Player, Position::new(2, 0, 0)).unwrap();

        assert_eq!(save.select_next_unit(&[Faction::Player], false), Some(a));
        assert_eq!(save.select_next_unit(&[Faction::Player], false), Some(c));
        assert_eq!(save.select_next_unit(&[Faction::Player], false), Some(a));

        save.unit_mut(c).unwrap().set_dont_reselect(true);
        assert_eq!(save.select_next_unit(&[Faction::Player], true), None);
    }

    #[test]
    fn test_record_roundtrip_keeps_hash() {
        let mut save = flat_battle(4, 4, 2);
        place(&mut save, Position::new(2, 2, 0), parts::BARREL);
        let unit = save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        save.add_unit("sectoid", Faction::Hostile, Position::new(3, 3, 0)).unwrap();
        let rifle = save.create_item("rifle").unwrap();
        let clip = save.create_item("rifle_clip").unwrap();
        save.give_item(rifle, unit, InventorySlot::RightHand);
        save.load_ammo(rifle, clip);
        let loose = save.create_item("grenade").unwrap();
        save.drop_item(loose, Position::new(0, 3, 0));
        save.tile_mut(Position::new(0, 0, 0)).unwrap().set_smoke(6);

        let ron = save.to_ron().unwrap();
        let loaded = SavedBattleGame::from_ron(&ron, save.rules_arc()).unwrap();
        assert_eq!(loaded.state_hash(), save.state_hash());
        assert_eq!(loaded.tile(Position::new(0, 3, 0)).unwrap().inventory(), &[loose]);
        assert!(loaded.check_invariants().is_empty());

        let next = SavedBattleGame::from_ron(&ron, save.rules_arc())
            .unwrap()
            .create_item("grenade")
            .unwrap();
        assert_eq!(next, ItemId(3));
    }

    #[test]
    fn test_record_rejects_overlapping_units() {
        let mut save = flat_battle(3, 3, 1);
        save.add_unit("soldier", Faction::Player, Position::new(0, 0, 0)).unwrap();
        save.add_unit("soldier", Faction::Player, Position::new(1, 0, 0)).unwrap();
        let mut record = save.to_record();
        record.units[1].position = Position::new(0, 0, 0);
        assert!(SavedBattleGame::from_record(&record, save.rules_arc()).is_err());
    }

    #[test]
    fn test_hash_changes_with_state() {
        let mut save = flat_battle(3, 3, 1);
        let before = save.state_hash();
        save.tile_mut(Position::new(1, 1, 0)).unwrap().set_fire(2);
        assert_ne!(before, save.state_hash());
    }

    #[test]
    fn test_end_turn_alternates_sides() {
        let mut save = flat_battle(6, 6, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        save.add_unit("sectoid", Faction::Hostile, Position::new(4, 4, 0)).unwrap();
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[99]);

        save.end_turn(&config, &mut rng);
        assert_eq!(save.side(), Faction::Hostile);
        assert_eq!(save.turn(), 1);
        assert_eq!(save.selected_unit(), None);

        save.unit_mut(soldier).unwrap().set_time_units(0);
        save.end_turn(&config, &mut rng);
        assert_eq!(save.side(), Faction::Player);
        assert_eq!(save.turn(), 2);
        assert_eq!(save.unit(soldier).unwrap().time_units(), 60);
        assert_eq!(save.selected_unit(), Some(soldier));
    }

    #[test]
    fn test_civilians_move_after_aliens() {
        let mut save = flat_battle(6, 6, 1);
        save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        save.add_unit("sectoid", Faction::Hostile, Position::new(4, 4, 0)).unwrap();
        let civ = save.add_unit("civilian", Faction::Neutral, Position::new(2, 4, 0)).unwrap();
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[99]);

        save.end_turn(&config, &mut rng);
        save.end_turn(&config, &mut rng);
        assert_eq!(save.side(), Faction::Neutral);
        assert_eq!(save.turn(), 1);
        save.end_turn(&config, &mut rng);
        assert_eq!(save.side(), Faction::Player);
        assert_eq!(save.turn(), 2);

        save.unit_mut(civ).unwrap().set_status(UnitStatus::Dead);
        save.remove_unit_from_tile(civ);
        save.end_turn(&config, &mut rng);
        save.end_turn(&config, &mut rng);
        assert_eq!(save.side(), Faction::Player);
        assert_eq!(save.turn(), 3);
    }

    #[test]
    fn test_fuses_count_down_each_round() {
        let mut save = flat_battle(4, 4, 1);
        let grenade = save.create_item("grenade").unwrap();
        save.drop_item(grenade, Position::new(2, 2, 0));
        save.item_mut(grenade).unwrap().prime(2);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[99]);

        save.end_turn(&config, &mut rng);
        assert_eq!(save.item(grenade).unwrap().fuse_timer(), 2);
        save.end_turn(&config, &mut rng);
        assert_eq!(save.item(grenade).unwrap().fuse_timer(), 1);
        save.end_turn(&config, &mut rng);
        save.end_turn(&config, &mut rng);
        assert_eq!(save.item(grenade).unwrap().fuse_timer(), 0);
    }

    #[test]
    fn test_unconscious_unit_wakes_where_its_body_lies() {
        let mut save = flat_battle(5, 5, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        let body = save.create_item("soldier_corpse").unwrap();
        save.item_mut(body).unwrap().set_unit(Some(soldier));
        save.drop_item(body, Position::new(1, 1, 0));
        save.remove_unit_from_tile(soldier);
        save.unit_mut(soldier).unwrap().set_status(UnitStatus::Unconscious);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[99]);

        save.end_turn(&config, &mut rng);
        assert_eq!(save.unit(soldier).unwrap().status(), UnitStatus::Unconscious);
        save.end_turn(&config, &mut rng);
        assert_eq!(save.unit(soldier).unwrap().status(), UnitStatus::Standing);
        assert_eq!(save.unit_at(Position::new(1, 1, 0)), Some(soldier));
        assert!(save.item(body).is_none());
        assert!(save.check_invariants().is_empty());
    }
}
