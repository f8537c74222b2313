//! Action requests passed from the player or the AI to the scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::item::ItemId;
use crate::position::{Direction, Position};
use crate::unit::UnitId;

/// Kind of action a unit performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BattleActionType {
    /// Do nothing.
    #[default]
    None,
    /// Turn to face a position.
    Turn,
    /// Walk along a path.
    Walk,
    /// Prime a grenade.
    Prime,
    /// Throw the held item.
    Throw,
    /// Fire a burst.
    AutoShot,
    /// Fire a quick shot.
    SnapShot,
    /// Fire an aimed shot.
    AimedShot,
    /// Stun rod attack.
    Stun,
    /// Melee attack.
    Hit,
    /// Use a medikit or scanner.
    Use,
    /// Psionic mind control.
    MindControl,
    /// Psionic panic.
    Panic,
    /// Ask the AI to decide again without spending the action.
    Rethink,
    /// Pick an item up from the ground.
    PickUp,
}

impl BattleActionType {
    /// True for the three firing modes.
    #[must_use]
    pub const fn is_shot(self) -> bool {
        matches!(self, Self::AutoShot | Self::SnapShot | Self::AimedShot)
    }

    /// True for close combat.
    #[must_use]
    pub const fn is_melee(self) -> bool {
        matches!(self, Self::Hit | Self::Stun)
    }

    /// True for psionic attacks.
    #[must_use]
    pub const fn is_psionic(self) -> bool {
        matches!(self, Self::MindControl | Self::Panic)
    }

    /// Rounds fired per action.
    #[must_use]
    pub const fn shots(self) -> i32 {
        match self {
            Self::AutoShot => 3,
            _ => 1,
        }
    }
}

/// Outcome of validating an action, shown to the player as a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionMessage {
    /// The actor lacks the time units.
    NotEnoughTimeUnits,
    /// The actor lacks the energy to walk.
    NotEnoughEnergy,
    /// The weapon has no clip loaded.
    NoAmmunitionLoaded,
    /// Nothing can be traced from the weapon to the target.
    NoLineOfFire,
    /// The target is beyond the weapon's range.
    OutOfRange,
    /// The target is beyond throwing range.
    ThrowTooFar,
    /// Melee or medikit target is not adjacent.
    NotInRange,
    /// There is no unit at the target.
    NoTarget,
    /// The carrier cannot hold more.
    NoRoomInInventory,
    /// The grenade was already primed.
    AlreadyPrimed,
    /// The action needs both hands free.
    BothHandsMustBeEmpty,
    /// The unit is kneeling and must stand first.
    UnitIsKneeling,
    /// The move would eat into TU held back for a shot.
    TimeUnitsReserved,
}

impl ActionMessage {
    /// Localisation key shown by the UI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotEnoughTimeUnits => "STR_NOT_ENOUGH_TIME_UNITS",
            Self::NotEnoughEnergy => "STR_NOT_ENOUGH_ENERGY",
            Self::NoAmmunitionLoaded => "STR_NO_AMMUNITION_LOADED",
            Self::NoLineOfFire => "STR_NO_LINE_OF_FIRE",
            Self::OutOfRange => "STR_OUT_OF_RANGE",
            Self::ThrowTooFar => "STR_UNABLE_TO_THROW_HERE",
            Self::NotInRange => "STR_THERE_IS_NO_ONE_THERE",
            Self::NoTarget => "STR_NO_TARGET",
            Self::NoRoomInInventory => "STR_NOT_ENOUGH_SPACE",
            Self::AlreadyPrimed => "STR_GRENADE_IS_ACTIVATED",
            Self::BothHandsMustBeEmpty => "STR_BOTH_HANDS_MUST_BE_EMPTY",
            Self::UnitIsKneeling => "STR_UNIT_IS_KNEELING",
            Self::TimeUnitsReserved => "STR_TIME_UNITS_RESERVED",
        }
    }
}

impl fmt::Display for ActionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for a unit to do something.
///
/// Built by the player input layer or by an AI policy and handed to the
/// scheduler. The scheduler writes `result` when it rejects the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleAction {
    /// Kind of action.
    pub kind: BattleActionType,
    /// Acting unit.
    pub actor: Option<UnitId>,
    /// Item used (weapon, grenade, medikit).
    pub weapon: Option<ItemId>,
    /// Target tile.
    pub target: Position,
    /// Waypoints for walking; the last entry is the destination.
    pub waypoints: Vec<Position>,
    /// Time unit cost.
    pub tu: i32,
    /// Turns to set on a primed fuse.
    pub fuse: i32,
    /// Which medikit effect to apply.
    pub medikit: Option<MedikitAction>,
    /// Set when the request was rejected.
    pub result: Option<ActionMessage>,
    /// Direction to face once the walk is over.
    pub final_facing: Option<Direction>,
    /// Number of AI decisions already spent on this actor.
    pub number: u32,
    /// Fleeing with no safe tile found; the walk ignores reserved TU.
    pub desperate: bool,
}

impl Default for BattleAction {
    fn default() -> Self {
        Self {
            kind: BattleActionType::None,
            actor: None,
            weapon: None,
            target: Position::new(-1, -1, -1),
            waypoints: Vec::new(),
            tu: 0,
            fuse: 0,
            medikit: None,
            result: None,
            final_facing: None,
            number: 0,
            desperate: false,
        }
    }
}

impl BattleAction {
    /// Action of a kind for an actor.
    #[must_use]
    pub fn new(kind: BattleActionType, actor: UnitId) -> Self {
        Self {
            kind,
            actor: Some(actor),
            ..Self::default()
        }
    }

    /// Builder: set the target.
    #[must_use]
    pub fn with_target(mut self, target: Position) -> Self {
        self.target = target;
        self
    }

    /// Builder: set the item used.
    #[must_use]
    pub fn with_weapon(mut self, weapon: Option<ItemId>) -> Self {
        self.weapon = weapon;
        self
    }

    /// Reject the action with a message.
    pub fn reject(&mut self, message: ActionMessage) {
        self.result = Some(message);
    }

    /// True if the scheduler rejected the action.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        self.result.is_some()
    }

    /// Clear targeting so a fresh click starts over.
    pub fn clear_targeting(&mut self) {
        self.target = Position::new(-1, -1, -1);
        self.waypoints.clear();
        self.result = None;
    }
}

/// Effect chosen on a medikit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MedikitAction {
    /// Restore health.
    Heal,
    /// Restore energy and reduce stun.
    Stimulant,
    /// Restore morale lost to wounds.
    Painkiller,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_keys() {
        assert_eq!(
            ActionMessage::NotEnoughTimeUnits.as_str(),
            "STR_NOT_ENOUGH_TIME_UNITS"
        );
        assert_eq!(
            ActionMessage::NoLineOfFire.to_string(),
            "STR_NO_LINE_OF_FIRE"
        );
    }

    #[test]
    fn test_reject_and_clear() {
        let mut action = BattleAction::new(BattleActionType::Walk, UnitId(0))
            .with_target(Position::new(3, 3, 0));
        assert!(!action.is_rejected());
        action.reject(ActionMessage::NotEnoughTimeUnits);
        assert!(action.is_rejected());
        action.clear_targeting();
        assert!(!action.is_rejected());
        assert_eq!(action.target, Position::new(-1, -1, -1));
    }

    #[test]
    fn test_action_kinds() {
        assert!(BattleActionType::SnapShot.is_shot());
        assert!(!BattleActionType::Throw.is_shot());
        assert!(BattleActionType::Stun.is_melee());
        assert_eq!(BattleActionType::AutoShot.shots(), 3);
    }
}
