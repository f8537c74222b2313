//! Walking a path one tile at a time.
//!
//! Each step goes through the same checks: enough TU for the step, the
//! reserve respected, facing the right way, any door in the way opened,
//! enough energy. Crossing the halfway point moves the unit onto the next
//! tile. At the end of every step the unit looks around; a newly spotted
//! enemy stops the walk, and watchers get their chance at reaction fire.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::action::{ActionMessage, BattleAction};
use crate::pathfinding::{Path, Pathfinding};
use crate::position::Position;
use crate::tile::DoorResult;
use crate::tile_engine::TileEngine;
use crate::unit::{BattleUnit, UnitId, UnitStatus};

use super::{check_reserved_tu, BattleState, ProjectileFly, StateContext, Step};

/// A unit walking to `action.target`, or through `action.waypoints`.
#[derive(Debug)]
pub struct UnitWalk {
    action: BattleAction,
    path: Path,
    waypoints: VecDeque<Position>,
    spent: i32,
    facing_done: bool,
    exhaust: bool,
}

impl UnitWalk {
    /// Walk for an action.
    #[must_use]
    pub fn new(action: BattleAction) -> Self {
        let waypoints = action.waypoints.iter().copied().collect();
        Self {
            action,
            path: Path::default(),
            waypoints,
            spent: 0,
            facing_done: false,
            exhaust: false,
        }
    }

    /// Walk for a panicking unit; its TU are gone once it stops.
    #[must_use]
    pub fn fleeing(action: BattleAction) -> Self {
        Self {
            exhaust: true,
            ..Self::new(action)
        }
    }

    /// The action being carried out.
    #[must_use]
    pub const fn action(&self) -> &BattleAction {
        &self.action
    }

    /// Stop at the end of the current step.
    pub fn cancel(&mut self) {
        self.path.clear();
        self.waypoints.clear();
    }

    fn plan(&mut self, ctx: &StateContext<'_>, unit: UnitId) -> bool {
        let target = self.waypoints.pop_front().unwrap_or(self.action.target);
        let Some(walker) = ctx.save.unit(unit) else {
            return false;
        };
        self.path = Pathfinding::new(ctx.save).calculate(walker, target, None);
        self.spent = 0;
        trace!(%unit, %target, steps = self.path.len(), "Path planned");
        !self.path.is_empty()
    }

    pub(super) fn init(&mut self, ctx: &mut StateContext<'_>) -> Step {
        let Some(unit) = self.action.actor else {
            return Step::Done;
        };
        if ctx.save.unit(unit).map_or(true, BattleUnit::is_out) {
            return Step::Done;
        }
        if self.plan(ctx, unit) {
            Step::Continue
        } else {
            Step::Done
        }
    }

    pub(super) fn think(&mut self, ctx: &mut StateContext<'_>) -> Step {
        let Some(id) = self.action.actor else {
            return Step::Done;
        };
        let Some(unit) = ctx.save.unit(id) else {
            return Step::Done;
        };
        match unit.status() {
            UnitStatus::Walking => self.keep_walking(ctx, id),
            UnitStatus::Turning => self.keep_turning(ctx, id),
            UnitStatus::Standing | UnitStatus::Aiming => self.next_step(ctx, id),
            _ => Step::Done,
        }
    }

    fn keep_walking(&mut self, ctx: &mut StateContext<'_>, id: UnitId) -> Step {
        let ticks = ctx.config.walk_ticks_per_step;
        let Some(unit) = ctx.save.unit_mut(id) else {
            return Step::Done;
        };
        let (crossed, arrived) = unit.keep_walking(ticks);
        let destination = unit.destination();
        if crossed && !ctx.save.move_unit(id, destination) {
            debug!(unit = %id, to = %destination, "Step blocked");
            self.path.clear();
        }
        if arrived {
            return self.step_finished(ctx, id);
        }
        Step::Continue
    }

    fn keep_turning(&mut self, ctx: &mut StateContext<'_>, id: UnitId) -> Step {
        let Some(unit) = ctx.save.unit_mut(id) else {
            return Step::Done;
        };
        unit.turn();
        let spotted = ctx.engine().calculate_fov(id);
        if spotted && !self.action.desperate && !self.path.is_empty() {
            debug!(unit = %id, "Enemy spotted while turning, walk aborted");
            self.cancel();
            if let Some(unit) = ctx.save.unit_mut(id) {
                unit.abort_turn();
            }
        }
        Step::Continue
    }

    fn next_step(&mut self, ctx: &mut StateContext<'_>, id: UnitId) -> Step {
        if self.path.is_empty() && !self.waypoints.is_empty() && !self.plan(ctx, id) {
            self.waypoints.clear();
        }
        let Some(waypoint) = self.path.peek().copied() else {
            return self.finish(ctx, id);
        };
        let debug_mode = ctx.save.debug_mode();
        let step_tu = waypoint.total_tu - self.spent;
        let Some(unit) = ctx.save.unit(id) else {
            return Step::Done;
        };

        if step_tu > unit.time_units() && !debug_mode {
            self.action.reject(ActionMessage::NotEnoughTimeUnits);
            self.cancel();
            return self.finish(ctx, id);
        }
        if !self.action.desperate && !debug_mode && !check_reserved_tu(ctx.save, id, step_tu) {
            self.action.reject(ActionMessage::TimeUnitsReserved);
            self.cancel();
            return self.finish(ctx, id);
        }

        let direction = waypoint.step.direction();
        if let Some(direction) = direction {
            if unit.direction() != direction {
                if let Some(unit) = ctx.save.unit_mut(id) {
                    unit.look_at_direction(direction);
                }
                return Step::Continue;
            }
            let door = ctx.engine().unit_opens_door(id, false);
            if matches!(door, DoorResult::UfoDoorStarted | DoorResult::UfoDoorOpening) {
                return Step::Continue;
            }
        }

        let Some(unit) = ctx.save.unit_mut(id) else {
            return Step::Done;
        };
        if !unit.spend_energy(step_tu, debug_mode) {
            self.action.reject(ActionMessage::NotEnoughEnergy);
            self.cancel();
            return self.finish(ctx, id);
        }
        unit.spend_time_units(step_tu, debug_mode);
        unit.start_walking(direction, waypoint.position);
        self.path.dequeue();
        self.spent = waypoint.total_tu;
        Step::Continue
    }

    fn step_finished(&mut self, ctx: &mut StateContext<'_>, id: UnitId) -> Step {
        let mut engine = ctx.engine();
        engine.calculate_unit_lighting();
        let spotted = engine.calculate_fov(id);
        if spotted && !self.action.desperate && !self.path.is_empty() {
            debug!(unit = %id, "Enemy spotted, walk aborted");
            self.cancel();
        }

        let reaction = TileEngine::new(ctx.save, ctx.config).check_reaction_fire(id, None, true, ctx.rng);
        if let Some(shot) = reaction {
            debug!(unit = %id, shooter = ?shot.actor, "Reaction fire interrupts the walk");
            self.cancel();
            ctx.push_next(BattleState::ProjectileFly(ProjectileFly::reaction(shot)));
            return self.finish(ctx, id);
        }
        Step::Continue
    }

    fn finish(&mut self, ctx: &mut StateContext<'_>, id: UnitId) -> Step {
        if !self.facing_done {
            self.facing_done = true;
            if let Some(facing) = self.action.final_facing {
                if let Some(unit) = ctx.save.unit_mut(id) {
                    if !unit.is_out() && unit.direction() != facing {
                        unit.look_at_direction(facing);
                        return Step::Continue;
                    }
                }
            }
        }
        if self.exhaust {
            if let Some(unit) = ctx.save.unit_mut(id) {
                unit.set_time_units(0);
            }
        }
        let mut engine = ctx.engine();
        engine.calculate_unit_lighting();
        engine.calculate_fov(id);
        Step::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::action::BattleActionType;
    use crate::position::Direction;
    use crate::unit::Faction;
    use crate::states::BattleEvents;
    use crate::test_fixtures::{flat_battle, parts, place, ScriptedRng};

    fn run(state: &mut UnitWalk, ctx: &mut StateContext<'_>) -> usize {
        if state.init(ctx) == Step::Done {
            return 0;
        }
        let mut ticks = 1;
        while state.think(ctx) == Step::Continue {
            ticks += 1;
            assert!(ticks < 500, "walk never finished");
        }
        ticks
    }

    #[test]
    fn test_walk_reaches_target_and_spends_tu() {
        let mut save = flat_battle(8, 8, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::East);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Walk, soldier).with_target(Position::new(4, 1, 0));
        let mut walk = UnitWalk::new(action);
        run(&mut walk, &mut ctx);
        assert!(walk.action().result.is_none());

        let unit = save.unit(soldier).unwrap();
        assert_eq!(unit.position(), Position::new(4, 1, 0));
        assert_eq!(unit.status(), UnitStatus::Standing);
        assert_eq!(unit.time_units(), 60 - 3 * 4);
        assert_eq!(save.unit_at(Position::new(4, 1, 0)), Some(soldier));
        assert_eq!(save.unit_at(Position::new(1, 1, 0)), None);
    }

    #[test]
    fn test_walk_stops_when_tu_run_out() {
        let mut save = flat_battle(8, 8, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::East);
        save.unit_mut(soldier).unwrap().set_time_units(9);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Walk, soldier).with_target(Position::new(5, 1, 0));
        let mut walk = UnitWalk::new(action);
        run(&mut walk, &mut ctx);
        assert_eq!(walk.action().result, Some(ActionMessage::NotEnoughTimeUnits));
        let unit = save.unit(soldier).unwrap();
        assert_eq!(unit.position(), Position::new(3, 1, 0));
        assert_eq!(unit.time_units(), 1);
    }

    #[test]
    fn test_walk_turns_before_stepping() {
        let mut save = flat_battle(8, 8, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::North);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Walk, soldier).with_target(Position::new(1, 3, 0));
        let mut walk = UnitWalk::new(action);
        run(&mut walk, &mut ctx);
        let unit = save.unit(soldier).unwrap();
        assert_eq!(unit.position(), Position::new(1, 3, 0));
        assert_eq!(unit.direction(), Direction::South);
        // turning while walking is free
        assert_eq!(unit.time_units(), 60 - 2 * 4);
    }

    #[test]
    fn test_final_facing_applied_on_arrival() {
        let mut save = flat_battle(8, 8, 1);
        let soldier = save.add_unit("soldier", Faction::Hostile, Position::new(1, 1, 0)).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::East);
        save.set_side(Faction::Hostile);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let mut action = BattleAction::new(BattleActionType::Walk, soldier).with_target(Position::new(3, 1, 0));
        action.final_facing = Some(Direction::West);
        let mut walk = UnitWalk::new(action);
        run(&mut walk, &mut ctx);
        let unit = save.unit(soldier).unwrap();
        assert_eq!(unit.position(), Position::new(3, 1, 0));
        assert_eq!(unit.direction(), Direction::West);
    }

    #[test]
    fn test_walk_opens_door_on_the_way() {
        let mut save = flat_battle(8, 3, 1);
        place(&mut save, Position::new(3, 1, 0), parts::DOOR);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::East);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Walk, soldier).with_target(Position::new(4, 1, 0));
        let mut walk = UnitWalk::new(action);
        run(&mut walk, &mut ctx);
        assert_eq!(save.unit(soldier).unwrap().position(), Position::new(4, 1, 0));
    }

    #[test]
    fn test_unreachable_target_finishes_at_once() {
        let mut save = flat_battle(8, 8, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Walk, soldier).with_target(Position::new(20, 1, 0));
        assert_eq!(UnitWalk::new(action).init(&mut ctx), Step::Done);
    }
}
