//! Scavenging: an alien without a usable weapon looks for one on the
//! ground.
//!
//! Only items dropped during an alien turn are considered, so aliens pick
//! up what their fallen comrades dropped but never loot the player's
//! equipment.

use tracing::debug;

use crate::action::{BattleAction, BattleActionType};
use crate::config::SimulationConfig;
use crate::item::{BattleItem, InventorySlot, ItemId, ItemLocation};
use crate::rules::BattleType;
use crate::saved_battle::SavedBattleGame;
use crate::unit::UnitId;

/// Decision state of the weapon search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchForWeaponState {
    target_item: Option<ItemId>,
}

/// Outcome of trying to pick an item up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickupOutcome {
    /// The item is now carried.
    Taken,
    /// Not enough TU left.
    NotEnoughTimeUnits,
    /// The inventory is too full.
    NoRoom,
    /// No inventory section takes this kind of item.
    WontFit,
}

impl SearchForWeaponState {
    /// Item the unit is heading for.
    #[must_use]
    pub const fn target_item(&self) -> Option<ItemId> {
        self.target_item
    }

    pub(crate) fn restore(target_item: Option<ItemId>) -> Self {
        Self { target_item }
    }

    /// Decide the next move. Returns false once there is nothing worth
    /// fetching, so the caller can go back to its normal policy.
    pub(crate) fn think(
        &mut self,
        action: &mut BattleAction,
        unit: UnitId,
        save: &SavedBattleGame,
        config: &SimulationConfig,
    ) -> bool {
        action.kind = BattleActionType::None;
        self.target_item = survey_items(save, unit).filter(|item| worth_taking(save, config, unit, *item));
        let Some(item) = self.target_item else {
            return false;
        };
        let (Some(target), Some(position)) = (
            save.item(item).and_then(BattleItem::ground_position),
            save.unit(unit).map(crate::unit::BattleUnit::position),
        ) else {
            return false;
        };

        action.target = target;
        action.weapon = Some(item);
        if target == position {
            action.kind = BattleActionType::PickUp;
            action.tu = config.balance.pickup_tu_cost;
        } else {
            action.kind = BattleActionType::Walk;
        }
        if config.trace_ai {
            debug!(%unit, %item, %target, kind = ?action.kind, "Searching for a weapon");
        }
        true
    }
}

/// The most attractive item lying on the ground, weighed against its
/// distance.
#[must_use]
pub fn survey_items(save: &SavedBattleGame, unit: UnitId) -> Option<ItemId> {
    let position = save.unit(unit)?.position();
    let mut best = None;
    let mut max_worth = 0;
    for item in save.items() {
        let Some(ground) = item.ground_position() else {
            continue;
        };
        if !item.dropped_on_alien_turn() || item.rules().attraction <= 0 {
            continue;
        }
        let worth = item.rules().attraction / (position.distance(ground) + 1);
        if worth > max_worth {
            max_worth = worth;
            best = Some(item.id());
        }
    }
    best
}

/// True if the item is worth the walk.
///
/// Nothing is worth it while enemies are in sight. A weapon must come
/// loaded or match ammo the unit carries, and loose ammo must fit a
/// weapon it carries. The item has to fit in the inventory, and its
/// attraction minus the distance has to beat the balance threshold.
#[must_use]
pub fn worth_taking(save: &SavedBattleGame, config: &SimulationConfig, unit: UnitId, item: ItemId) -> bool {
    let (Some(me), Some(candidate)) = (save.unit(unit), save.item(item)) else {
        return false;
    };
    let Some(ground) = candidate.ground_position() else {
        return false;
    };
    if !me.visible_units().is_empty() {
        return false;
    }
    let rule = candidate.rules();
    let carried: Vec<&BattleItem> = save
        .unit_items(unit)
        .into_iter()
        .filter_map(|id| save.item(id))
        .collect();

    match rule.battle_type {
        BattleType::Ammo => {
            let fits_weapon = carried.iter().any(|held| {
                held.rules().battle_type == BattleType::Firearm && held.rules().accepts_ammo(&rule.id)
            });
            if !fits_weapon {
                return false;
            }
        }
        _ if rule.needs_ammo() && candidate.loaded_clip().is_none() => {
            let has_ammo = carried.iter().any(|held| {
                held.rules().battle_type == BattleType::Ammo && rule.accepts_ammo(&held.rules().id)
            });
            if !has_ammo {
                return false;
            }
        }
        _ => {}
    }

    let free_cells = config.balance.ai_inventory_cells - save.used_inventory_cells(unit);
    if free_cells < rule.inventory_cells() {
        return false;
    }
    rule.attraction - me.position().distance(ground) > config.balance.weapon_worth_threshold
}

/// Pick an item up from under the unit, paying the pickup TU.
///
/// Clips go into an empty weapon in the right hand or onto the belt,
/// grenades onto the belt, weapons into an empty right hand and
/// medikits or scanners into the backpack. A weapon taken without a clip
/// is loaded from the unit's own ammo.
pub fn take_item_from_ground(
    save: &mut SavedBattleGame,
    config: &SimulationConfig,
    unit: UnitId,
    item: ItemId,
) -> PickupOutcome {
    let debug_mode = save.debug_mode();
    let cost = config.balance.pickup_tu_cost;
    let Some(me) = save.unit(unit) else {
        return PickupOutcome::WontFit;
    };
    if me.time_units() < cost && !debug_mode {
        return PickupOutcome::NotEnoughTimeUnits;
    }
    let Some(candidate) = save.item(item) else {
        return PickupOutcome::WontFit;
    };
    if candidate.ground_position() != Some(me.position()) {
        return PickupOutcome::WontFit;
    }
    let rule = candidate.rules_arc();
    let free_cells = config.balance.ai_inventory_cells - save.used_inventory_cells(unit);
    if free_cells < rule.inventory_cells() {
        return PickupOutcome::NoRoom;
    }

    let right_hand = save.item_in_slot(unit, InventorySlot::RightHand);
    let placed = match rule.battle_type {
        BattleType::Ammo => {
            let empty_weapon = right_hand.filter(|id| {
                save.item(*id)
                    .is_some_and(|w| w.loaded_clip().is_none() && w.rules().accepts_ammo(&rule.id))
            });
            match empty_weapon {
                Some(weapon) => save.load_ammo(weapon, item),
                None => save.give_item(item, unit, InventorySlot::Belt),
            }
        }
        BattleType::Grenade | BattleType::ProximityGrenade => save.give_item(item, unit, InventorySlot::Belt),
        BattleType::Firearm | BattleType::Melee if right_hand.is_none() => {
            save.give_item(item, unit, InventorySlot::RightHand)
        }
        BattleType::Medikit | BattleType::Scanner => save.give_item(item, unit, InventorySlot::Backpack),
        BattleType::MindProbe => save.give_item(item, unit, InventorySlot::LeftHand),
        _ => false,
    };
    if !placed {
        return PickupOutcome::WontFit;
    }

    if let Some(me) = save.unit_mut(unit) {
        me.spend_time_units(cost, debug_mode);
    }
    if rule.needs_ammo() && save.item(item).is_some_and(|i| i.loaded_clip().is_none()) {
        load_from_inventory(save, unit, item);
    }
    debug!(%unit, %item, "Picked up item");
    PickupOutcome::Taken
}

/// Load a carried clip that fits into `weapon`. Returns true if one was
/// loaded.
pub fn load_from_inventory(save: &mut SavedBattleGame, unit: UnitId, weapon: ItemId) -> bool {
    let Some(rule) = save.item(weapon).map(BattleItem::rules_arc) else {
        return false;
    };
    let clip = save.unit_items(unit).into_iter().find(|id| {
        *id != weapon
            && save.item(*id).is_some_and(|clip| {
                clip.rules().battle_type == BattleType::Ammo
                    && rule.accepts_ammo(&clip.rules().id)
                    && matches!(clip.location(), ItemLocation::Carried { .. })
            })
    });
    clip.is_some_and(|clip| save.load_ammo(weapon, clip))
}
