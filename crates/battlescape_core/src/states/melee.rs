//! Close combat.

use tracing::debug;

use crate::action::{ActionMessage, BattleAction, BattleActionType};
use crate::position::{Direction, Position};
use crate::rules::DamageType;
use crate::tile_engine::TileEngine;
use crate::unit::UnitId;

use super::{BattleState, StateContext, Step};

/// Horizontal voxels from the body axis a blow lands.
const STRIKE_OFFSET: i32 = 4;

/// A melee strike from `action.actor` at the unit standing on
/// `action.target`.
///
/// The target must be adjacent with no wall in between. TU are spent when
/// the blow lands, hit or miss. An AI attacker that can afford another
/// blow against a target still standing keeps swinging.
#[derive(Debug)]
pub struct MeleeAttack {
    action: BattleAction,
    victim: Option<UnitId>,
    ticks: u32,
}

impl MeleeAttack {
    /// Strike for an action.
    #[must_use]
    pub const fn new(action: BattleAction) -> Self {
        Self {
            action,
            victim: None,
            ticks: 0,
        }
    }

    /// The action being carried out.
    #[must_use]
    pub const fn action(&self) -> &BattleAction {
        &self.action
    }

    pub(super) fn init(&mut self, ctx: &mut StateContext<'_>) -> Step {
        match self.validate(ctx) {
            Ok(victim) => {
                self.victim = Some(victim);
                self.ticks = 0;
                Step::Continue
            }
            Err(message) => {
                debug!(unit = ?self.action.actor, %message, "Melee rejected");
                self.action.reject(message);
                Step::Done
            }
        }
    }

    fn validate(&self, ctx: &mut StateContext<'_>) -> Result<UnitId, ActionMessage> {
        let id = self.action.actor.ok_or(ActionMessage::NoTarget)?;
        let unit = ctx.save.unit(id).filter(|u| !u.is_out()).ok_or(ActionMessage::NoTarget)?;
        let from = unit.position();
        let time_units = unit.time_units();
        if self.action.weapon.and_then(|w| ctx.save.item(w)).is_none() {
            return Err(ActionMessage::NoTarget);
        }
        let target = ctx.save.unit_at(self.action.target).ok_or(ActionMessage::NoTarget)?;
        let direction = Direction::towards(from, self.action.target);
        ctx.engine()
            .valid_melee_range(id, direction, Some(target))
            .ok_or(ActionMessage::NotInRange)?;
        if time_units < self.action.tu && !ctx.save.debug_mode() {
            return Err(ActionMessage::NotEnoughTimeUnits);
        }

        if let Some(unit) = ctx.save.unit_mut(id) {
            unit.look_at_direction(direction);
            while !unit.turn() {}
            unit.aim(true);
        }
        Ok(target)
    }

    pub(super) fn think(&mut self, ctx: &mut StateContext<'_>) -> Step {
        self.ticks += 1;
        if self.ticks < ctx.config.explosion_ticks {
            return Step::Continue;
        }
        let (Some(id), Some(victim)) = (self.action.actor, self.victim) else {
            return Step::Done;
        };
        let Some(rule) = self.action.weapon.and_then(|w| ctx.save.item(w)).map(crate::item::BattleItem::rules_arc) else {
            return Step::Done;
        };
        let debug_mode = ctx.save.debug_mode();
        let Some(unit) = ctx.save.unit_mut(id) else {
            return Step::Done;
        };
        let attacker_pos = unit.position();
        unit.spend_time_units(self.action.tu, debug_mode);
        let accuracy = unit.firing_accuracy(self.action.kind, &rule, false);

        if ctx.rng.percent(accuracy) {
            if let Some(voxel) = strike_voxel(ctx, victim, attacker_pos) {
                let damage_type = if self.action.kind == BattleActionType::Stun {
                    DamageType::Stun
                } else {
                    rule.damage_type
                };
                let report = TileEngine::new(ctx.save, ctx.config).hit(voxel, rule.power, damage_type, Some(id), ctx.rng);
                if let Some(unit) = ctx.save.unit_mut(id) {
                    unit.experience_mut().melee += 1;
                }
                if report.hit_unit(victim) {
                    if let Some(target) = ctx.save.unit_mut(victim) {
                        if let Some(mut ai) = target.take_ai() {
                            ai.set_was_hit_by(id);
                            target.set_ai(Some(ai));
                        }
                    }
                }
                debug!(attacker = %id, %victim, power = rule.power, damage = ?damage_type, "Melee hit");
                ctx.check_for_casualties(Some(id), Some(damage_type), false);
            }
        } else {
            debug!(attacker = %id, %victim, accuracy, "Melee missed");
        }

        let Some(unit) = ctx.save.unit_mut(id) else {
            return Step::Done;
        };
        unit.aim(false);
        let again = unit.ai().is_some() && !unit.is_out() && unit.time_units() >= self.action.tu;
        let target_standing = ctx.save.unit(victim).is_some_and(|v| !v.should_fall() && !v.is_out());
        if again && target_standing {
            ctx.push_next(BattleState::MeleeAttack(Self::new(self.action.clone())));
        }
        Step::Done
    }
}

/// Voxel on `victim`'s body facing the attacker, half way up.
fn strike_voxel(ctx: &StateContext<'_>, victim: UnitId, attacker_pos: Position) -> Option<Position> {
    let unit = ctx.save.unit(victim)?;
    let position = unit.position();
    let terrain = ctx.save.tile(position).map_or(0, crate::tile::Tile::terrain_level);
    let toward = Direction::towards(position, attacker_pos).vector();
    let offset = Position::new(
        (toward.x * STRIKE_OFFSET).clamp(-STRIKE_OFFSET, STRIKE_OFFSET),
        (toward.y * STRIKE_OFFSET).clamp(-STRIKE_OFFSET, STRIKE_OFFSET),
        unit.height() / 2 - terrain,
    );
    Some(position.to_voxel_center() + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::item::InventorySlot;
    use crate::states::{BattleEvents, Request};
    use crate::test_fixtures::{flat_battle, ScriptedRng};
    use crate::unit::Faction;

    fn armed(save: &mut crate::saved_battle::SavedBattleGame, unit: UnitId) -> crate::item::ItemId {
        let rod = save.create_item("stun_rod").unwrap();
        assert!(save.give_item(rod, unit, InventorySlot::RightHand));
        rod
    }

    fn run(state: &mut MeleeAttack, ctx: &mut StateContext<'_>) {
        if state.init(ctx) == Step::Done {
            return;
        }
        let mut ticks = 0;
        while state.think(ctx) == Step::Continue {
            ticks += 1;
            assert!(ticks < 20);
        }
    }

    #[test]
    fn test_stun_rod_stuns_adjacent_unit() {
        let mut save = flat_battle(6, 6, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(2, 2, 0)).unwrap();
        let alien = save.add_unit("sectoid", Faction::Hostile, Position::new(3, 2, 0)).unwrap();
        let rod = armed(&mut save, soldier);
        let config = SimulationConfig::default();
        // hit roll, then the damage roll
        let mut rng = ScriptedRng::new(&[0, 1000]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let mut action = BattleAction::new(BattleActionType::Stun, soldier)
            .with_target(Position::new(3, 2, 0))
            .with_weapon(Some(rod));
        action.tu = 18;
        let mut state = MeleeAttack::new(action);
        run(&mut state, &mut ctx);
        assert!(state.action().result.is_none());
        let requests = ctx.into_requests();
        assert!(matches!(
            requests.as_slice(),
            [Request::CheckCasualties { damage_type: Some(DamageType::Stun), .. }]
        ));

        assert_eq!(save.unit(soldier).unwrap().time_units(), 60 - 18);
        assert_eq!(save.unit(soldier).unwrap().direction(), Direction::East);
        assert!(save.unit(alien).unwrap().stun_level() > 0);
        assert_eq!(save.unit(alien).unwrap().health(), 30);
    }

    #[test]
    fn test_target_out_of_reach_is_rejected() {
        let mut save = flat_battle(6, 6, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        save.add_unit("sectoid", Faction::Hostile, Position::new(4, 1, 0)).unwrap();
        let rod = armed(&mut save, soldier);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Stun, soldier)
            .with_target(Position::new(4, 1, 0))
            .with_weapon(Some(rod));
        let mut state = MeleeAttack::new(action);
        assert_eq!(state.init(&mut ctx), Step::Done);
        assert_eq!(state.action().result, Some(ActionMessage::NotInRange));
        assert_eq!(save.unit(soldier).unwrap().time_units(), 60);
    }

    #[test]
    fn test_empty_tile_has_no_target() {
        let mut save = flat_battle(6, 6, 1);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap();
        let rod = armed(&mut save, soldier);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Hit, soldier)
            .with_target(Position::new(2, 1, 0))
            .with_weapon(Some(rod));
        let mut state = MeleeAttack::new(action);
        assert_eq!(state.init(&mut ctx), Step::Done);
        assert_eq!(state.action().result, Some(ActionMessage::NoTarget));
    }
}
