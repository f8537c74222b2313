//! Runtime item instances.
//!
//! An item is always in exactly one place: carried by a unit, lying on a
//! tile, loaded into a weapon, or nowhere (consumed or destroyed). The
//! location is a single enum field, so the "owner or ground, never both"
//! rule holds by construction. Location changes go through
//! [`SavedBattleGame`](crate::saved_battle::SavedBattleGame), which keeps the
//! tile ground lists in step.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::position::Position;
use crate::rules::{BattleType, RuleItem, Ruleset};
use crate::unit::UnitId;

/// Stable handle of an item within one battle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ItemId(pub u32);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// Inventory section of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InventorySlot {
    /// Right hand; the primary weapon hand.
    RightHand,
    /// Left hand.
    LeftHand,
    /// Belt pouches (grenades, spare clips).
    Belt,
    /// Backpack.
    Backpack,
}

impl InventorySlot {
    /// True for the two hand slots.
    #[must_use]
    pub const fn is_hand(self) -> bool {
        matches!(self, Self::RightHand | Self::LeftHand)
    }
}

/// Where an item currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ItemLocation {
    /// Consumed, destroyed, or not yet placed.
    #[default]
    Nowhere,
    /// In a unit's inventory.
    Carried {
        /// Carrying unit.
        owner: UnitId,
        /// Inventory section.
        slot: InventorySlot,
        /// Grid column inside the section.
        x: i32,
        /// Grid row inside the section.
        y: i32,
    },
    /// On the ground of a tile.
    Ground(Position),
    /// Loaded as ammo into another item.
    Loaded(ItemId),
}

/// One item instance.
#[derive(Debug, Clone)]
pub struct BattleItem {
    id: ItemId,
    rules: Arc<RuleItem>,
    location: ItemLocation,
    previous_owner: Option<UnitId>,
    ammo: Option<ItemId>,
    fuse_timer: i32,
    ammo_quantity: i32,
    heal_quantity: i32,
    stimulant_quantity: i32,
    painkiller_quantity: i32,
    dropped_on_alien_turn: bool,
    unit: Option<UnitId>,
}

impl BattleItem {
    /// Create an item that is not placed anywhere yet.
    #[must_use]
    pub fn new(id: ItemId, rules: Arc<RuleItem>) -> Self {
        let ammo_quantity = if rules.battle_type == BattleType::Ammo {
            rules.clip_size.max(0)
        } else {
            rules.clip_size
        };
        Self {
            id,
            location: ItemLocation::Nowhere,
            previous_owner: None,
            ammo: None,
            fuse_timer: -1,
            ammo_quantity,
            heal_quantity: rules.heal_quantity,
            stimulant_quantity: rules.stimulant_quantity,
            painkiller_quantity: rules.painkiller_quantity,
            dropped_on_alien_turn: false,
            unit: None,
            rules,
        }
    }

    /// Item handle.
    #[must_use]
    pub const fn id(&self) -> ItemId {
        self.id
    }

    /// Static item data.
    #[must_use]
    pub fn rules(&self) -> &RuleItem {
        &self.rules
    }

    /// Shared handle to the static item data.
    #[must_use]
    pub fn rules_arc(&self) -> Arc<RuleItem> {
        Arc::clone(&self.rules)
    }

    /// Current location.
    #[must_use]
    pub const fn location(&self) -> ItemLocation {
        self.location
    }

    pub(crate) fn set_location(&mut self, location: ItemLocation) {
        if let ItemLocation::Carried { owner, .. } = self.location {
            self.previous_owner = Some(owner);
        }
        self.location = location;
    }

    /// Carrying unit, if any.
    #[must_use]
    pub const fn owner(&self) -> Option<UnitId> {
        match self.location {
            ItemLocation::Carried { owner, .. } => Some(owner),
            _ => None,
        }
    }

    /// Unit that carried the item before its current location.
    #[must_use]
    pub const fn previous_owner(&self) -> Option<UnitId> {
        self.previous_owner
    }

    /// Inventory section, if carried.
    #[must_use]
    pub const fn slot(&self) -> Option<InventorySlot> {
        match self.location {
            ItemLocation::Carried { slot, .. } => Some(slot),
            _ => None,
        }
    }

    /// Tile the item lies on, if on the ground.
    #[must_use]
    pub const fn ground_position(&self) -> Option<Position> {
        match self.location {
            ItemLocation::Ground(pos) => Some(pos),
            _ => None,
        }
    }

    // ========================================================================
    // Ammo
    // ========================================================================

    /// Clip loaded into this weapon.
    ///
    /// Weapons that need no clip count as their own ammo.
    #[must_use]
    pub fn ammo_item(&self) -> Option<ItemId> {
        if self.rules.needs_ammo() {
            self.ammo
        } else {
            Some(self.id)
        }
    }

    /// Clip slot as stored, without the self-ammo rule.
    #[must_use]
    pub const fn loaded_clip(&self) -> Option<ItemId> {
        self.ammo
    }

    pub(crate) fn set_loaded_clip(&mut self, clip: Option<ItemId>) {
        self.ammo = clip;
    }

    /// Rounds left; -1 means unlimited.
    #[must_use]
    pub const fn ammo_quantity(&self) -> i32 {
        self.ammo_quantity
    }

    /// Set the rounds left.
    pub fn set_ammo_quantity(&mut self, quantity: i32) {
        self.ammo_quantity = quantity;
    }

    /// Use one round. Returns true while rounds remain afterwards.
    pub fn spend_bullet(&mut self) -> bool {
        if self.ammo_quantity < 0 {
            return true;
        }
        self.ammo_quantity = (self.ammo_quantity - 1).max(0);
        self.ammo_quantity > 0
    }

    // ========================================================================
    // Fuse
    // ========================================================================

    /// Turns until detonation; -1 means not primed.
    #[must_use]
    pub const fn fuse_timer(&self) -> i32 {
        self.fuse_timer
    }

    /// Prime the fuse. Zero detonates at the end of the current turn.
    pub fn prime(&mut self, turns: i32) {
        self.fuse_timer = turns.max(0);
    }

    /// True if the fuse is running.
    #[must_use]
    pub const fn is_primed(&self) -> bool {
        self.fuse_timer >= 0
    }

    /// Restore or clear the fuse directly.
    pub fn set_fuse_timer(&mut self, fuse: i32) {
        self.fuse_timer = fuse.max(-1);
    }

    /// Count the fuse down by one turn, stopping at zero.
    pub fn countdown(&mut self) {
        if self.fuse_timer > 0 {
            self.fuse_timer -= 1;
        }
    }

    // ========================================================================
    // Medikit charges
    // ========================================================================

    /// Heal charges left.
    #[must_use]
    pub const fn heal_quantity(&self) -> i32 {
        self.heal_quantity
    }

    /// Stimulant charges left.
    #[must_use]
    pub const fn stimulant_quantity(&self) -> i32 {
        self.stimulant_quantity
    }

    /// Painkiller charges left.
    #[must_use]
    pub const fn painkiller_quantity(&self) -> i32 {
        self.painkiller_quantity
    }

    /// Set all three medikit charge counters.
    pub fn set_charges(&mut self, heal: i32, stimulant: i32, painkiller: i32) {
        self.heal_quantity = heal.max(0);
        self.stimulant_quantity = stimulant.max(0);
        self.painkiller_quantity = painkiller.max(0);
    }

    /// Use one heal charge. Returns false if none were left.
    pub fn use_heal(&mut self) -> bool {
        take_charge(&mut self.heal_quantity)
    }

    /// Use one stimulant charge. Returns false if none were left.
    pub fn use_stimulant(&mut self) -> bool {
        take_charge(&mut self.stimulant_quantity)
    }

    /// Use one painkiller charge. Returns false if none were left.
    pub fn use_painkiller(&mut self) -> bool {
        take_charge(&mut self.painkiller_quantity)
    }

    // ========================================================================
    // Misc flags
    // ========================================================================

    /// True if a hostile unit dropped this during its own turn.
    ///
    /// Only such items are considered by the weapon search AI, so aliens do
    /// not loot the player's equipment.
    #[must_use]
    pub const fn dropped_on_alien_turn(&self) -> bool {
        self.dropped_on_alien_turn
    }

    /// Set the dropped-on-alien-turn flag.
    pub fn set_dropped_on_alien_turn(&mut self, flag: bool) {
        self.dropped_on_alien_turn = flag;
    }

    /// Unit this corpse or unconscious body represents.
    #[must_use]
    pub const fn unit(&self) -> Option<UnitId> {
        self.unit
    }

    /// Link this body item to a unit.
    pub fn set_unit(&mut self, unit: Option<UnitId>) {
        self.unit = unit;
    }
}

impl BattleItem {
    /// Structured record of this item.
    #[must_use]
    pub fn to_record(&self) -> ItemRecord {
        ItemRecord {
            id: self.id.0,
            rule: self.rules.id.clone(),
            location: self.location,
            previous_owner: self.previous_owner,
            ammo: self.ammo,
            fuse_timer: self.fuse_timer,
            ammo_quantity: self.ammo_quantity,
            charges: [
                self.heal_quantity,
                self.stimulant_quantity,
                self.painkiller_quantity,
            ],
            dropped_on_alien_turn: self.dropped_on_alien_turn,
            unit: self.unit,
        }
    }

    /// Rebuild an item from its record.
    pub fn from_record(record: &ItemRecord, rules: &Ruleset) -> Result<Self> {
        let mut item = Self::new(ItemId(record.id), rules.item(&record.rule)?);
        item.location = record.location;
        item.previous_owner = record.previous_owner;
        item.ammo = record.ammo;
        item.fuse_timer = record.fuse_timer.max(-1);
        item.ammo_quantity = record.ammo_quantity;
        let [heal, stimulant, painkiller] = record.charges;
        item.set_charges(heal, stimulant, painkiller);
        item.dropped_on_alien_turn = record.dropped_on_alien_turn;
        item.unit = record.unit;
        Ok(item)
    }
}

/// Saved form of a [`BattleItem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Item id.
    pub id: u32,
    /// Item rule id.
    pub rule: String,
    /// Location.
    pub location: ItemLocation,
    /// Previous carrier.
    #[serde(default)]
    pub previous_owner: Option<UnitId>,
    /// Loaded clip.
    #[serde(default)]
    pub ammo: Option<ItemId>,
    /// Fuse timer, -1 when not primed.
    #[serde(default = "default_fuse")]
    pub fuse_timer: i32,
    /// Rounds left.
    #[serde(default)]
    pub ammo_quantity: i32,
    /// Heal, stimulant and painkiller charges.
    #[serde(default)]
    pub charges: [i32; 3],
    /// Dropped by a hostile during its turn.
    #[serde(default)]
    pub dropped_on_alien_turn: bool,
    /// Body of this unit.
    #[serde(default)]
    pub unit: Option<UnitId>,
}

const fn default_fuse() -> i32 {
    -1
}

fn take_charge(counter: &mut i32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::DamageType;

    fn rule(battle_type: BattleType, clip_size: i32) -> Arc<RuleItem> {
        let mut rule: RuleItem = ron::from_str(r#"(id: "thing", battle_type: None)"#).unwrap();
        rule.battle_type = battle_type;
        rule.clip_size = clip_size;
        rule.damage_type = DamageType::ArmorPiercing;
        Arc::new(rule)
    }

    #[test]
    fn test_location_is_exclusive() {
        let mut item = BattleItem::new(ItemId(1), rule(BattleType::Firearm, -1));
        assert_eq!(item.location(), ItemLocation::Nowhere);
        item.set_location(ItemLocation::Carried {
            owner: UnitId(3),
            slot: InventorySlot::RightHand,
            x: 0,
            y: 0,
        });
        assert_eq!(item.owner(), Some(UnitId(3)));
        assert_eq!(item.ground_position(), None);
        item.set_location(ItemLocation::Ground(Position::new(1, 2, 0)));
        assert_eq!(item.owner(), None);
        assert_eq!(item.previous_owner(), Some(UnitId(3)));
        assert_eq!(item.ground_position(), Some(Position::new(1, 2, 0)));
    }

    #[test]
    fn test_fuse_counts_down_to_zero() {
        let mut item = BattleItem::new(ItemId(1), rule(BattleType::Grenade, -1));
        assert!(!item.is_primed());
        item.countdown();
        assert_eq!(item.fuse_timer(), -1);
        item.prime(2);
        item.countdown();
        item.countdown();
        item.countdown();
        assert_eq!(item.fuse_timer(), 0);
        assert!(item.is_primed());
    }

    #[test]
    fn test_clip_spends_rounds() {
        let mut clip = BattleItem::new(ItemId(2), rule(BattleType::Ammo, 2));
        assert!(clip.spend_bullet());
        assert!(!clip.spend_bullet());
        assert_eq!(clip.ammo_quantity(), 0);

        let mut laser = BattleItem::new(ItemId(3), rule(BattleType::Firearm, -1));
        assert!(laser.spend_bullet());
        assert_eq!(laser.ammo_item(), Some(ItemId(3)));
    }

    #[test]
    fn test_medikit_charges() {
        let mut kit = BattleItem::new(ItemId(4), rule(BattleType::Medikit, -1));
        kit.set_charges(1, 0, 2);
        assert!(kit.use_heal());
        assert!(!kit.use_heal());
        assert!(!kit.use_stimulant());
        assert!(kit.use_painkiller());
        assert_eq!(kit.painkiller_quantity(), 1);
    }
}
