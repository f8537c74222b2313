//! Decision making for computer-controlled units.
//!
//! Every hostile or neutral unit owns an [`AiState`]. Once per AI action
//! the scheduler calls [`AiState::think`], which fills in a
//! [`BattleAction`]; the action then goes through the same pipeline as a
//! player's click. The policies never move units or spend TU themselves,
//! apart from claiming patrol nodes.
//!
//! ## Policies
//!
//! - [`alien`]: patrol, ambush, combat and escape modes chosen from
//!   weighted odds.
//! - [`civilian`]: patrol between nodes, run from hostiles.
//! - [`search_for_weapon`]: an unarmed alien walks to the most attractive
//!   item its side dropped and picks it up, then returns to the alien
//!   policy.

pub mod alien;
pub mod civilian;
pub mod search_for_weapon;
pub mod tactics;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::{BattleAction, BattleActionType};
use crate::config::SimulationConfig;
use crate::item::ItemId;
use crate::position::Position;
use crate::rng::RandomSource;
use crate::saved_battle::SavedBattleGame;
use crate::unit::{Faction, UnitId};

pub use alien::{AlienMode, AlienState};
pub use civilian::{CivilianMode, CivilianState};
pub use search_for_weapon::{PickupOutcome, SearchForWeaponState};
pub use tactics::PatrolRoute;

/// The decision policy a unit currently follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiState {
    /// Alien policy.
    Alien(AlienState),
    /// Civilian policy.
    Civilian(CivilianState),
    /// Weapon search; the alien state is kept for when the search ends.
    SearchForWeapon {
        /// Search progress.
        search: SearchForWeaponState,
        /// Alien memory to resume with.
        alien: AlienState,
    },
}

impl AiState {
    /// Default policy for a unit of `faction`; players get none.
    #[must_use]
    pub fn for_faction(faction: Faction) -> Option<Self> {
        match faction {
            Faction::Hostile => Some(Self::Alien(AlienState::default())),
            Faction::Neutral => Some(Self::Civilian(CivilianState::default())),
            Faction::Player => None,
        }
    }

    /// Short policy name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Alien(_) => "alien",
            Self::Civilian(_) => "civilian",
            Self::SearchForWeapon { .. } => "search_for_weapon",
        }
    }

    /// The alien memory, also while searching for a weapon.
    #[must_use]
    pub const fn alien(&self) -> Option<&AlienState> {
        match self {
            Self::Alien(state) | Self::SearchForWeapon { alien: state, .. } => Some(state),
            Self::Civilian(_) => None,
        }
    }

    /// Civilian state, if this is one.
    #[must_use]
    pub const fn civilian(&self) -> Option<&CivilianState> {
        match self {
            Self::Civilian(state) => Some(state),
            _ => None,
        }
    }

    /// Called when a unit starts following this policy: pick the patrol
    /// node it stands nearest to.
    pub fn enter(&mut self, save: &mut SavedBattleGame, unit: UnitId) {
        let Some(position) = save.unit(unit).map(crate::unit::BattleUnit::position) else {
            return;
        };
        match self {
            Self::Alien(state) => state.route.update(save, position),
            Self::Civilian(state) => state.route.update(save, position),
            Self::SearchForWeapon { .. } => {}
        }
        debug!(%unit, policy = self.name(), "AI enter");
    }

    /// Called when a unit stops following this policy (death, mind
    /// control, mission end): release claimed nodes.
    pub fn exit(&mut self, save: &mut SavedBattleGame) {
        match self {
            Self::Alien(state) | Self::SearchForWeapon { alien: state, .. } => state.release(save),
            Self::Civilian(state) => state.release(save),
        }
    }

    /// Tell the policy who just shot this unit.
    pub fn set_was_hit_by(&mut self, attacker: UnitId) {
        match self {
            Self::Alien(state) | Self::SearchForWeapon { alien: state, .. } => state.set_was_hit_by(attacker),
            Self::Civilian(_) => {}
        }
    }

    /// Action kind whose TU this unit keeps back.
    #[must_use]
    pub const fn reserve(&self) -> BattleActionType {
        match self {
            Self::Alien(state) => state.reserve(),
            _ => BattleActionType::None,
        }
    }

    /// Decide the unit's next action.
    ///
    /// An alien with nothing to fight with switches to the weapon search
    /// while there is something worth picking up, and switches back once
    /// there is not.
    pub fn think(
        &mut self,
        action: &mut BattleAction,
        unit: UnitId,
        save: &mut SavedBattleGame,
        config: &SimulationConfig,
        rng: &mut dyn RandomSource,
    ) {
        action.actor = Some(unit);
        match self {
            Self::Alien(state) => {
                if AlienState::is_unarmed(save, unit) {
                    let mut search = SearchForWeaponState::default();
                    if search.think(action, unit, save, config) {
                        state.release(save);
                        let alien = std::mem::take(state);
                        debug!(%unit, "Unarmed, searching for a weapon");
                        *self = Self::SearchForWeapon { search, alien };
                        return;
                    }
                }
                state.think(action, unit, save, config, rng);
            }
            Self::Civilian(state) => state.think(action, unit, save, config, rng),
            Self::SearchForWeapon { search, alien } => {
                if search.think(action, unit, save, config) {
                    return;
                }
                let alien = std::mem::take(alien);
                debug!(%unit, "Weapon search over");
                *self = Self::Alien(alien);
                if let Self::Alien(state) = self {
                    state.think(action, unit, save, config, rng);
                }
            }
        }
    }
}

// ============================================================================
// Saved form
// ============================================================================

/// Saved alien memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlienRecord {
    /// Current mode.
    pub mode: AlienMode,
    /// Node last stood on.
    #[serde(default)]
    pub from_node: Option<usize>,
    /// Node being walked to.
    #[serde(default)]
    pub to_node: Option<usize>,
    /// Focused enemy.
    #[serde(default)]
    pub aggro_target: Option<UnitId>,
    /// Where the focused enemy was last seen.
    #[serde(default)]
    pub last_known_position: Option<Position>,
    /// Attackers not yet taken into account.
    #[serde(default)]
    pub was_hit_by: Vec<UnitId>,
}

/// Saved form of an [`AiState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiRecord {
    /// Alien policy.
    Alien(AlienRecord),
    /// Civilian policy.
    Civilian {
        /// Current mode.
        mode: CivilianMode,
        /// Node last stood on.
        #[serde(default)]
        from_node: Option<usize>,
        /// Node being walked to.
        #[serde(default)]
        to_node: Option<usize>,
    },
    /// Weapon search.
    SearchForWeapon {
        /// Item being fetched.
        target_item: Option<ItemId>,
        /// Alien memory to resume with.
        alien: AlienRecord,
    },
}

fn alien_record(state: &AlienState) -> AlienRecord {
    AlienRecord {
        mode: state.mode,
        from_node: state.route.from_node,
        to_node: state.route.to_node,
        aggro_target: state.aggro_target,
        last_known_position: state.last_known_position,
        was_hit_by: state.was_hit_by.clone(),
    }
}

fn alien_from_record(record: &AlienRecord) -> AlienState {
    AlienState::restore(
        record.mode,
        PatrolRoute {
            from_node: record.from_node,
            to_node: record.to_node,
        },
        record.aggro_target,
        record.last_known_position,
        record.was_hit_by.clone(),
    )
}

impl AiState {
    /// Saved form.
    #[must_use]
    pub fn to_record(&self) -> AiRecord {
        match self {
            Self::Alien(state) => AiRecord::Alien(alien_record(state)),
            Self::Civilian(state) => AiRecord::Civilian {
                mode: state.mode,
                from_node: state.route.from_node,
                to_node: state.route.to_node,
            },
            Self::SearchForWeapon { search, alien } => AiRecord::SearchForWeapon {
                target_item: search.target_item(),
                alien: alien_record(alien),
            },
        }
    }

    /// Rebuild from a saved form. Transient plans are recomputed on the
    /// next think.
    #[must_use]
    pub fn from_record(record: &AiRecord) -> Self {
        match record {
            AiRecord::Alien(alien) => Self::Alien(alien_from_record(alien)),
            AiRecord::Civilian {
                mode,
                from_node,
                to_node,
            } => Self::Civilian(CivilianState::restore(
                *mode,
                PatrolRoute {
                    from_node: *from_node,
                    to_node: *to_node,
                },
            )),
            AiRecord::SearchForWeapon { target_item, alien } => Self::SearchForWeapon {
                search: SearchForWeaponState::restore(*target_item),
                alien: alien_from_record(alien),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::InventorySlot;
    use crate::node::Node;
    use crate::test_fixtures::{flat_battle, ScriptedRng};

    #[test]
    fn test_policy_per_faction() {
        assert_eq!(AiState::for_faction(Faction::Hostile).unwrap().name(), "alien");
        assert_eq!(AiState::for_faction(Faction::Neutral).unwrap().name(), "civilian");
        assert!(AiState::for_faction(Faction::Player).is_none());
    }

    #[test]
    fn test_unarmed_alien_fetches_dropped_weapon_then_resumes() {
        let mut save = flat_battle(10, 10, 1);
        let alien = save.add_unit("sectoid", Faction::Hostile, Position::new(2, 2, 0)).unwrap();
        let pistol = save.create_item("plasma_pistol").unwrap();
        let clip = save.create_item("plasma_clip").unwrap();
        assert!(save.load_ammo(pistol, clip));
        assert!(save.drop_item(pistol, Position::new(5, 2, 0)));
        save.item_mut(pistol).unwrap().set_dropped_on_alien_turn(true);

        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[50]);
        let mut ai = AiState::for_faction(Faction::Hostile).unwrap();
        let mut action = BattleAction::new(BattleActionType::None, alien);
        ai.think(&mut action, alien, &mut save, &config, &mut rng);
        assert_eq!(ai.name(), "search_for_weapon");
        assert_eq!(action.kind, BattleActionType::Walk);
        assert_eq!(action.target, Position::new(5, 2, 0));

        // picked up elsewhere: nothing left to fetch
        assert!(save.give_item(pistol, alien, InventorySlot::RightHand));
        ai.think(&mut action, alien, &mut save, &config, &mut rng);
        assert_eq!(ai.name(), "alien");
        assert_ne!(action.kind, BattleActionType::PickUp);
    }

    #[test]
    fn test_exit_releases_claimed_node() {
        let mut save = flat_battle(10, 10, 1);
        save.add_node(Node::new(0, Position::new(1, 1, 0), 0));
        save.add_node(Node::new(1, Position::new(8, 8, 0), 0));
        let civ = save.add_unit("civilian", Faction::Neutral, Position::new(1, 1, 0)).unwrap();
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[50]);
        let mut ai = AiState::for_faction(Faction::Neutral).unwrap();
        ai.enter(&mut save, civ);
        let mut action = BattleAction::new(BattleActionType::None, civ);
        ai.think(&mut action, civ, &mut save, &config, &mut rng);
        assert!(save.nodes()[1].allocated);

        ai.exit(&mut save);
        assert!(!save.nodes()[1].allocated);
    }

    #[test]
    fn test_record_keeps_memory_and_route() {
        let mut state = AlienState::restore(
            AlienMode::Ambush,
            PatrolRoute {
                from_node: Some(2),
                to_node: Some(4),
            },
            Some(UnitId(7)),
            Some(Position::new(3, 4, 0)),
            Vec::new(),
        );
        state.set_was_hit_by(UnitId(9));
        let ai = AiState::SearchForWeapon {
            search: SearchForWeaponState::restore(Some(ItemId(3))),
            alien: state,
        };
        let ron = ron::to_string(&ai.to_record()).unwrap();
        let record: AiRecord = ron::from_str(&ron).unwrap();
        let restored = AiState::from_record(&record);
        assert_eq!(restored.name(), "search_for_weapon");
        let alien = restored.alien().unwrap();
        assert_eq!(alien.mode(), AlienMode::Ambush);
        assert_eq!(alien.aggro_target(), Some(UnitId(7)));
        assert_eq!(alien.route.to_node, Some(4));
        assert_eq!(alien.was_hit_by, vec![UnitId(9)]);
    }
}
