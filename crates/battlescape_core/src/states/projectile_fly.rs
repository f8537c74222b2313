//! A bullet or thrown item in flight.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::action::{ActionMessage, BattleAction, BattleActionType};
use crate::item::{ItemId, ItemLocation};
use crate::position::Position;
use crate::projectile::{landing_voxel, shot_trajectory, throw_trajectory, validate_throw};
use crate::rules::{DamageType, RuleItem};
use crate::tile_engine::{LineTrace, TileEngine, VoxelType};
use crate::unit::{Faction, UnitId};

use super::{BattleState, Explosion, ShotEvent, StateContext, Step};

/// A shot or throw from `action.actor` at `action.target`.
///
/// Validation happens when the state starts: ammunition, range, a line of
/// fire or a throwing arc, and the TU. A rejected action ends the state
/// with `action.result` set and nothing spent. Once launched, the flight
/// cannot be called back.
///
/// On impact a bullet hands over to an [`Explosion`]; a burst queues the
/// next round behind it, and the last round gives the target a chance to
/// fire back. A thrown item lands on the ground.
#[derive(Debug)]
pub struct ProjectileFly {
    action: BattleAction,
    shots_left: i32,
    reaction: bool,
    trace: LineTrace,
    progress: usize,
    payload: Option<Arc<RuleItem>>,
    thrown: Option<ItemId>,
}

impl ProjectileFly {
    /// Flight for an action.
    #[must_use]
    pub fn new(action: BattleAction) -> Self {
        let shots_left = action.kind.shots();
        Self {
            action,
            shots_left,
            reaction: false,
            trace: LineTrace::default(),
            progress: 0,
            payload: None,
            thrown: None,
        }
    }

    /// Reaction shot whose TU were paid when the reaction was decided.
    #[must_use]
    pub fn reaction(mut action: BattleAction) -> Self {
        action.tu = 0;
        Self {
            reaction: true,
            ..Self::new(action)
        }
    }

    /// The action being carried out.
    #[must_use]
    pub const fn action(&self) -> &BattleAction {
        &self.action
    }

    fn next_round(&self) -> Self {
        let mut action = self.action.clone();
        action.tu = 0;
        Self {
            shots_left: self.shots_left - 1,
            reaction: self.reaction,
            ..Self::new(action)
        }
    }

    pub(super) fn init(&mut self, ctx: &mut StateContext<'_>) -> Step {
        let Some(id) = self.action.actor else {
            return Step::Done;
        };
        let Some(unit) = ctx.save.unit(id) else {
            return Step::Done;
        };
        if unit.is_out() {
            return Step::Done;
        }
        let Some(weapon) = self.action.weapon.and_then(|w| ctx.save.item(w)) else {
            self.action.reject(ActionMessage::NoTarget);
            return Step::Done;
        };
        if unit.time_units() < self.action.tu && !ctx.save.debug_mode() {
            self.action.reject(ActionMessage::NotEnoughTimeUnits);
            return Step::Done;
        }
        let rule = weapon.rules_arc();
        let launched = match self.action.kind {
            BattleActionType::Throw => self.launch_throw(ctx, id),
            kind if kind.is_shot() => self.launch_shot(ctx, id, &rule),
            _ => Err(ActionMessage::NoTarget),
        };
        match launched {
            Ok(()) => Step::Continue,
            Err(message) => {
                debug!(unit = %id, kind = ?self.action.kind, %message, "Shot rejected");
                self.action.reject(message);
                Step::Done
            }
        }
    }

    fn launch_shot(&mut self, ctx: &mut StateContext<'_>, id: UnitId, rule: &Arc<RuleItem>) -> Result<(), ActionMessage> {
        let weapon_id = self.action.weapon.ok_or(ActionMessage::NoTarget)?;
        let target = self.action.target;
        let (ammo_id, ammo_rule) = ctx
            .save
            .item(weapon_id)
            .and_then(crate::item::BattleItem::ammo_item)
            .and_then(|ammo| ctx.save.item(ammo).map(|clip| (ammo, clip)))
            .filter(|(_, clip)| clip.ammo_quantity() != 0)
            .map(|(ammo, clip)| (ammo, clip.rules_arc()))
            .ok_or(ActionMessage::NoAmmunitionLoaded)?;
        let shooter = ctx.save.unit(id).ok_or(ActionMessage::NoTarget)?;
        if rule.max_range > 0 && shooter.position().distance(target) > rule.max_range {
            return Err(ActionMessage::OutOfRange);
        }
        let accuracy = shooter.firing_accuracy(self.action.kind, rule, ctx.save.both_hands_full(id));

        if let Some(shooter) = ctx.save.unit_mut(id) {
            shooter.look_at(target);
            while !shooter.turn() {}
        }
        let trace = shot_trajectory(ctx.save, id, target, accuracy, ctx.rng).ok_or(ActionMessage::NoLineOfFire)?;
        if trace.trajectory.is_empty() {
            return Err(ActionMessage::NoLineOfFire);
        }

        let debug_mode = ctx.save.debug_mode();
        if let Some(shooter) = ctx.save.unit_mut(id) {
            shooter.spend_time_units(self.action.tu, debug_mode);
            shooter.aim(true);
        }
        let rounds_left = ctx.save.item_mut(ammo_id).is_some_and(crate::item::BattleItem::spend_bullet);
        if !rounds_left && ammo_id != weapon_id {
            debug!(weapon = %weapon_id, clip = %ammo_id, "Clip empty");
            ctx.save.destroy_item(ammo_id);
        }
        trace!(shooter = %id, %target, hit = ?trace.hit, voxels = trace.trajectory.len(), "Shot fired");
        self.payload = Some(ammo_rule);
        self.trace = trace;
        Ok(())
    }

    fn launch_throw(&mut self, ctx: &mut StateContext<'_>, id: UnitId) -> Result<(), ActionMessage> {
        let item = self.action.weapon.ok_or(ActionMessage::NoTarget)?;
        let target = self.action.target;
        let weight = ctx.save.item(item).map_or(0, |i| i.rules().weight);
        let thrower = ctx.save.unit(id).ok_or(ActionMessage::NoTarget)?;
        if thrower.position().distance(target) > thrower.throw_range(weight) {
            return Err(ActionMessage::ThrowTooFar);
        }
        let accuracy = thrower.throwing_accuracy();

        if let Some(thrower) = ctx.save.unit_mut(id) {
            thrower.look_at(target);
            while !thrower.turn() {}
        }
        let curvature = validate_throw(ctx.save, id, target).ok_or(ActionMessage::ThrowTooFar)?;
        let trace =
            throw_trajectory(ctx.save, id, target, curvature, accuracy, ctx.rng).ok_or(ActionMessage::ThrowTooFar)?;

        let debug_mode = ctx.save.debug_mode();
        if let Some(thrower) = ctx.save.unit_mut(id) {
            thrower.spend_time_units(self.action.tu, debug_mode);
            thrower.experience_mut().throwing += 1;
        }
        ctx.save.move_item(item, ItemLocation::Nowhere);
        trace!(thrower = %id, %target, voxels = trace.trajectory.len(), "Item thrown");
        self.thrown = Some(item);
        self.trace = trace;
        Ok(())
    }

    pub(super) fn think(&mut self, ctx: &mut StateContext<'_>) -> Step {
        let speed = if self.thrown.is_some() {
            ctx.config.throw_voxels_per_tick
        } else {
            ctx.config.bullet_voxels_per_tick
        };
        self.progress += speed.max(1);
        if self.progress < self.trace.trajectory.len() {
            return Step::Continue;
        }
        let Some(id) = self.action.actor else {
            return Step::Done;
        };
        if let Some(unit) = ctx.save.unit_mut(id) {
            unit.aim(false);
        }
        match self.thrown {
            Some(item) => self.land(ctx, id, item),
            None => self.impact(ctx, id),
        }
        Step::Done
    }

    fn land(&mut self, ctx: &mut StateContext<'_>, id: UnitId, item: ItemId) {
        let origin = ctx.save.unit(id).map(crate::unit::BattleUnit::position);
        let tile = landing_voxel(&self.trace)
            .map(Position::voxel_to_tile)
            .filter(|tile| ctx.save.is_on_map(*tile))
            .or(origin);
        if let Some(tile) = tile {
            ctx.save.drop_item(item, tile);
        }
        if ctx.save.side() == Faction::Hostile {
            if let Some(thrown) = ctx.save.item_mut(item) {
                thrown.set_dropped_on_alien_turn(true);
            }
        }
        ctx.engine().calculate_terrain_lighting();
        ctx.events.shots.push(ShotEvent {
            shooter: id,
            target: self.action.target,
            impact: landing_voxel(&self.trace),
        });
        debug!(thrower = %id, %item, landed = ?tile, "Item landed");
    }

    fn impact(&mut self, ctx: &mut StateContext<'_>, id: UnitId) {
        let impact = self.trace.impact();
        ctx.events.shots.push(ShotEvent {
            shooter: id,
            target: self.action.target,
            impact,
        });
        let (Some(voxel), Some(payload)) = (impact, self.payload.clone()) else {
            debug!(shooter = %id, "Shot left the map");
            return;
        };
        if self.trace.hit == VoxelType::OutOfMap {
            return;
        }

        let more_rounds = self.shots_left > 1
            && ctx.save.unit(id).is_some_and(|u| !u.is_out())
            && self
                .action
                .weapon
                .and_then(|w| ctx.save.item(w))
                .and_then(crate::item::BattleItem::ammo_item)
                .and_then(|ammo| ctx.save.item(ammo))
                .is_some_and(|clip| clip.ammo_quantity() != 0);
        if more_rounds {
            ctx.push_next(BattleState::ProjectileFly(self.next_round()));
        } else if !self.reaction {
            let victim = ctx.save.unit_at(self.action.target).filter(|v| *v != id);
            let shot = TileEngine::new(ctx.save, ctx.config).check_reaction_fire(id, victim, true, ctx.rng);
            if let Some(shot) = shot {
                debug!(shooter = ?shot.actor, target = %id, "Return fire");
                ctx.push_next(BattleState::ProjectileFly(Self::reaction(shot)));
            }
        }

        let center = match payload.damage_type {
            DamageType::HighExplosive | DamageType::Incendiary | DamageType::Smoke => {
                let voxels = &self.trace.trajectory;
                if voxels.len() >= 2 {
                    voxels[voxels.len() - 2]
                } else {
                    voxel
                }
            }
            _ => voxel,
        };
        ctx.push_next(BattleState::Explosion(Explosion::projectile(center, &payload, Some(id))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::item::InventorySlot;
    use crate::position::Direction;
    use crate::saved_battle::SavedBattleGame;
    use crate::states::{BattleEvents, Request};
    use crate::test_fixtures::{flat_battle, ScriptedRng};

    fn armed_soldier(save: &mut SavedBattleGame, pos: Position) -> (UnitId, ItemId) {
        let soldier = save.add_unit("soldier", Faction::Player, pos).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::East);
        let rifle = save.create_item("rifle").unwrap();
        let clip = save.create_item("rifle_clip").unwrap();
        assert!(save.give_item(rifle, soldier, InventorySlot::RightHand));
        assert!(save.load_ammo(rifle, clip));
        (soldier, rifle)
    }

    fn fly(state: &mut ProjectileFly, ctx: &mut StateContext<'_>) {
        let mut ticks = 0;
        while state.think(ctx) == Step::Continue {
            ticks += 1;
            assert!(ticks < 1000);
        }
    }

    #[test]
    fn test_snap_shot_spends_tu_and_a_round() {
        let mut save = flat_battle(12, 5, 1);
        let (soldier, rifle) = armed_soldier(&mut save, Position::new(1, 2, 0));
        save.add_unit("sectoid", Faction::Hostile, Position::new(8, 2, 0)).unwrap();
        let config = SimulationConfig {
            reaction_fire: false,
            ..SimulationConfig::default()
        };
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let mut action = BattleAction::new(BattleActionType::SnapShot, soldier)
            .with_target(Position::new(8, 2, 0))
            .with_weapon(Some(rifle));
        action.tu = 15;
        let mut state = ProjectileFly::new(action);
        assert_eq!(state.init(&mut ctx), Step::Continue);
        fly(&mut state, &mut ctx);
        let requests = ctx.into_requests();
        assert!(matches!(requests.as_slice(), [Request::PushNext(BattleState::Explosion(_))]));
        assert_eq!(events.shots.len(), 1);

        assert_eq!(save.unit(soldier).unwrap().time_units(), 45);
        let clip = save.item(rifle).unwrap().loaded_clip().unwrap();
        assert_eq!(save.item(clip).unwrap().ammo_quantity(), 19);
    }

    #[test]
    fn test_empty_weapon_is_rejected() {
        let mut save = flat_battle(12, 5, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 2, 0)).unwrap();
        let rifle = save.create_item("rifle").unwrap();
        assert!(save.give_item(rifle, soldier, InventorySlot::RightHand));
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let mut action = BattleAction::new(BattleActionType::SnapShot, soldier)
            .with_target(Position::new(8, 2, 0))
            .with_weapon(Some(rifle));
        action.tu = 15;
        let mut state = ProjectileFly::new(action);
        assert_eq!(state.init(&mut ctx), Step::Done);
        assert_eq!(state.action().result, Some(ActionMessage::NoAmmunitionLoaded));
        assert_eq!(save.unit(soldier).unwrap().time_units(), 60);
    }

    #[test]
    fn test_auto_shot_queues_the_next_round() {
        let mut save = flat_battle(12, 5, 1);
        let (soldier, rifle) = armed_soldier(&mut save, Position::new(1, 2, 0));
        save.add_unit("sectoid", Faction::Hostile, Position::new(8, 2, 0)).unwrap();
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let mut action = BattleAction::new(BattleActionType::AutoShot, soldier)
            .with_target(Position::new(8, 2, 0))
            .with_weapon(Some(rifle));
        action.tu = 21;
        let mut state = ProjectileFly::new(action);
        assert_eq!(state.init(&mut ctx), Step::Continue);
        fly(&mut state, &mut ctx);
        let requests = ctx.into_requests();
        match requests.as_slice() {
            [Request::PushNext(BattleState::ProjectileFly(next)), Request::PushNext(BattleState::Explosion(_))] => {
                assert_eq!(next.shots_left, 2);
                assert_eq!(next.action().tu, 0);
            }
            other => panic!("unexpected requests {other:?}"),
        }
    }

    #[test]
    fn test_throw_lands_item_on_the_ground() {
        let mut save = flat_battle(10, 5, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 2, 0)).unwrap();
        let grenade = save.create_item("grenade").unwrap();
        assert!(save.give_item(grenade, soldier, InventorySlot::RightHand));
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let mut action = BattleAction::new(BattleActionType::Throw, soldier)
            .with_target(Position::new(5, 2, 0))
            .with_weapon(Some(grenade));
        action.tu = 15;
        let mut state = ProjectileFly::new(action);
        assert_eq!(state.init(&mut ctx), Step::Continue);
        fly(&mut state, &mut ctx);
        assert!(ctx.into_requests().is_empty());

        let item = save.item(grenade).unwrap();
        assert_eq!(item.owner(), None);
        assert_eq!(item.ground_position(), Some(Position::new(5, 2, 0)));
        assert_eq!(save.unit(soldier).unwrap().time_units(), 45);
    }

    #[test]
    fn test_throw_beyond_range_is_rejected() {
        let mut save = flat_battle(40, 5, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 2, 0)).unwrap();
        let grenade = save.create_item("grenade").unwrap();
        assert!(save.give_item(grenade, soldier, InventorySlot::RightHand));
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Throw, soldier)
            .with_target(Position::new(35, 2, 0))
            .with_weapon(Some(grenade));
        let mut state = ProjectileFly::new(action);
        assert_eq!(state.init(&mut ctx), Step::Done);
        assert_eq!(state.action().result, Some(ActionMessage::ThrowTooFar));
        assert_eq!(save.item(grenade).unwrap().owner(), Some(soldier));
    }
}
