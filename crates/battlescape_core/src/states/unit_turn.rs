//! Turning on the spot.

use tracing::trace;

use crate::action::{ActionMessage, BattleAction, BattleActionType};
use crate::unit::UnitStatus;

use super::{StateContext, Step};

/// TU spent per eighth of a turn when turning is the action itself.
const TU_PER_TURN_STEP: i32 = 1;

/// A unit rotating to face `action.target`.
///
/// Only an explicit turn order costs TU; turns made on the way to a shot
/// or by a panicking unit are free. An explicit turn stops early when the
/// unit catches sight of a new enemy.
#[derive(Debug)]
pub struct UnitTurn {
    action: BattleAction,
    cancelled: bool,
}

impl UnitTurn {
    /// Turn for an action.
    #[must_use]
    pub const fn new(action: BattleAction) -> Self {
        Self { action, cancelled: false }
    }

    /// The action being carried out.
    #[must_use]
    pub const fn action(&self) -> &BattleAction {
        &self.action
    }

    /// Stop where the unit faces now; takes effect on the next tick.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub(super) fn init(&mut self, ctx: &mut StateContext<'_>) -> Step {
        let Some(unit) = self.action.actor.and_then(|id| ctx.save.unit_mut(id)) else {
            return Step::Done;
        };
        if unit.is_out() {
            return Step::Done;
        }
        unit.look_at(self.action.target);
        if unit.status() == UnitStatus::Turning {
            Step::Continue
        } else {
            Step::Done
        }
    }

    pub(super) fn think(&mut self, ctx: &mut StateContext<'_>) -> Step {
        let Some(id) = self.action.actor else {
            return Step::Done;
        };
        let debug_mode = ctx.save.debug_mode();
        let charged = self.action.kind == BattleActionType::Turn;
        let Some(unit) = ctx.save.unit_mut(id) else {
            return Step::Done;
        };
        if unit.status() != UnitStatus::Turning {
            return Step::Done;
        }
        if self.cancelled {
            unit.abort_turn();
            trace!(unit = %id, facing = ?unit.direction(), "Turn cancelled");
            return Step::Done;
        }
        if charged && !unit.spend_time_units(TU_PER_TURN_STEP, debug_mode) {
            unit.abort_turn();
            self.action.reject(ActionMessage::NotEnoughTimeUnits);
            return Step::Done;
        }
        let reached = unit.turn();
        let facing = unit.direction();
        let spotted = ctx.engine().calculate_fov(id);
        trace!(unit = %id, ?facing, spotted, "Turned");

        if spotted && charged {
            if let Some(unit) = ctx.save.unit_mut(id) {
                unit.abort_turn();
            }
            return Step::Done;
        }
        if reached {
            Step::Done
        } else {
            Step::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::position::{Direction, Position};
    use crate::states::{BattleEvents, StateContext};
    use crate::test_fixtures::{flat_battle, ScriptedRng};
    use crate::unit::Faction;

    #[test]
    fn test_turn_costs_one_tu_per_step() {
        let mut save = flat_battle(6, 6, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(2, 2, 0)).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::North);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Turn, soldier).with_target(Position::new(2, 5, 0));
        let mut state = UnitTurn::new(action);
        assert_eq!(state.init(&mut ctx), Step::Continue);
        let mut ticks = 0;
        while state.think(&mut ctx) == Step::Continue {
            ticks += 1;
            assert!(ticks < 10);
        }
        let unit = save.unit(soldier).unwrap();
        assert_eq!(unit.direction(), Direction::South);
        assert_eq!(unit.time_units(), 60 - 4);
        assert_eq!(unit.status(), UnitStatus::Standing);
    }

    #[test]
    fn test_free_turn_when_part_of_another_action() {
        let mut save = flat_battle(6, 6, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(2, 2, 0)).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::North);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::SnapShot, soldier).with_target(Position::new(4, 2, 0));
        let mut state = UnitTurn::new(action);
        assert_eq!(state.init(&mut ctx), Step::Continue);
        while state.think(&mut ctx) == Step::Continue {}
        let unit = save.unit(soldier).unwrap();
        assert_eq!(unit.direction(), Direction::East);
        assert_eq!(unit.time_units(), 60);
    }

    #[test]
    fn test_cancelled_turn_stops_where_it_faces() {
        let mut save = flat_battle(6, 6, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(2, 2, 0)).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::North);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Turn, soldier).with_target(Position::new(2, 5, 0));
        let mut state = UnitTurn::new(action);
        assert_eq!(state.init(&mut ctx), Step::Continue);
        assert_eq!(state.think(&mut ctx), Step::Continue);
        state.cancel();
        assert_eq!(state.think(&mut ctx), Step::Done);

        let unit = save.unit(soldier).unwrap();
        assert_eq!(unit.direction(), Direction::NorthEast);
        assert_eq!(unit.time_units(), 60 - 1);
        assert_eq!(unit.status(), UnitStatus::Standing);
    }

    #[test]
    fn test_already_facing_needs_no_turn() {
        let mut save = flat_battle(6, 6, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(2, 2, 0)).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::East);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Turn, soldier).with_target(Position::new(5, 2, 0));
        assert_eq!(UnitTurn::new(action).init(&mut ctx), Step::Done);
    }
}
