//! Psionic attacks.

use tracing::debug;

use crate::action::{ActionMessage, BattleAction, BattleActionType};
use crate::unit::UnitId;

use super::{PsiEvent, StateContext, Step};

/// Upper bound of the random part of the attack roll.
const ATTACK_ROLL: i32 = 55;
/// Extra defence against mind control.
const MIND_CONTROL_DEFENCE: i32 = 20;
/// Morale lost to a panic attack is this minus the victim's bravery.
const PANIC_MORALE: i32 = 110;

/// Panic or mind control from `action.actor` against the unit on
/// `action.target`.
///
/// TU are spent when the attack starts. The attacker's psi strength scaled
/// by psi skill, less the distance, plus a roll, must beat the victim's
/// psi strength plus a bonus for training.
#[derive(Debug)]
pub struct PsiAttack {
    action: BattleAction,
    victim: Option<UnitId>,
}

impl PsiAttack {
    /// Attack for an action.
    #[must_use]
    pub const fn new(action: BattleAction) -> Self {
        Self { action, victim: None }
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
                Step::Continue
            }
            Err(message) => {
                debug!(unit = ?self.action.actor, %message, "Psionic attack rejected");
                self.action.reject(message);
                Step::Done
            }
        }
    }

    fn validate(&self, ctx: &mut StateContext<'_>) -> Result<UnitId, ActionMessage> {
        let id = self.action.actor.ok_or(ActionMessage::NoTarget)?;
        let unit = ctx.save.unit(id).filter(|u| !u.is_out()).ok_or(ActionMessage::NoTarget)?;
        let time_units = unit.time_units();
        if self.action.weapon.and_then(|w| ctx.save.item(w)).is_none() {
            return Err(ActionMessage::NoTarget);
        }
        let victim = ctx
            .save
            .unit_at(self.action.target)
            .filter(|v| *v != id)
            .ok_or(ActionMessage::NoTarget)?;
        let debug_mode = ctx.save.debug_mode();
        if time_units < self.action.tu && !debug_mode {
            return Err(ActionMessage::NotEnoughTimeUnits);
        }
        if let Some(unit) = ctx.save.unit_mut(id) {
            unit.spend_time_units(self.action.tu, debug_mode);
        }
        Ok(victim)
    }

    pub(super) fn think(&mut self, ctx: &mut StateContext<'_>) -> Step {
        let (Some(id), Some(victim)) = (self.action.actor, self.victim) else {
            return Step::Done;
        };
        let (Some(attacker), Some(target)) = (ctx.save.unit(id), ctx.save.unit(victim)) else {
            return Step::Done;
        };
        if target.is_out() {
            return Step::Done;
        }
        let mind_control = self.action.kind == BattleActionType::MindControl;
        let stats = attacker.stats();
        let mut attack = stats.psi_strength * stats.psi_skill / 50;
        attack -= attacker.position().distance(target.position());
        attack += ctx.rng.generate(0, ATTACK_ROLL);

        let defence_stats = target.stats();
        let mut defence = defence_stats.psi_strength;
        defence += if defence_stats.psi_skill > 0 {
            10 + defence_stats.psi_skill / 5
        } else {
            10
        };
        if mind_control {
            defence += MIND_CONTROL_DEFENCE;
        }
        let faction = attacker.faction();
        let bravery = defence_stats.bravery;
        let full_tu = defence_stats.tu;
        let success = attack > defence;
        debug!(attacker = %id, %victim, attack, defence, mind_control, success, "Psionic attack");

        if success {
            if let Some(attacker) = ctx.save.unit_mut(id) {
                attacker.experience_mut().psi_skill += 1;
            }
            if let Some(target) = ctx.save.unit_mut(victim) {
                if mind_control {
                    target.set_faction(faction);
                    target.set_time_units(full_tu);
                    target.set_dont_reselect(false);
                    target.abort_turn();
                } else {
                    target.morale_change(-(PANIC_MORALE - bravery));
                }
            }
            if mind_control {
                let mut engine = ctx.engine();
                engine.calculate_fov(victim);
                engine.calculate_unit_lighting();
            }
        }
        ctx.events.psi_attacks.push(PsiEvent {
            attacker: id,
            victim,
            mind_control,
            success,
        });
        Step::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::item::InventorySlot;
    use crate::position::Position;
    use crate::saved_battle::SavedBattleGame;
    use crate::states::BattleEvents;
    use crate::test_fixtures::{flat_battle, ScriptedRng};
    use crate::unit::Faction;

    fn ethereal_and_soldier() -> (SavedBattleGame, UnitId, UnitId, BattleAction) {
        let mut save = flat_battle(10, 10, 1);
        let ethereal = save.add_unit("ethereal", Faction::Hostile, Position::new(1, 1, 0)).unwrap();
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(4, 1, 0)).unwrap();
        let amp = save.create_item("psi_amp").unwrap();
        assert!(save.give_item(amp, ethereal, InventorySlot::RightHand));
        let mut action = BattleAction::new(BattleActionType::MindControl, ethereal)
            .with_target(Position::new(4, 1, 0))
            .with_weapon(Some(amp));
        action.tu = 10;
        (save, ethereal, soldier, action)
    }

    #[test]
    fn test_mind_control_converts_victim() {
        let (mut save, ethereal, soldier, action) = ethereal_and_soldier();
        save.unit_mut(soldier).unwrap().set_time_units(5);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[55]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let mut state = PsiAttack::new(action);
        assert_eq!(state.init(&mut ctx), Step::Continue);
        assert_eq!(state.think(&mut ctx), Step::Done);

        assert!(events.psi_attacks[0].success);
        let victim = save.unit(soldier).unwrap();
        assert_eq!(victim.faction(), Faction::Hostile);
        assert_eq!(victim.original_faction(), Faction::Player);
        assert_eq!(victim.time_units(), 60);
        assert_eq!(save.unit(ethereal).unwrap().time_units(), save.unit(ethereal).unwrap().stats().tu - 10);
    }

    #[test]
    fn test_untrained_attacker_fails() {
        let (mut save, _, soldier, _) = ethereal_and_soldier();
        // no psi skill: the attack is the roll less the distance
        let sectoid = save.add_unit("sectoid", Faction::Hostile, Position::new(2, 1, 0)).unwrap();
        let amp = save.create_item("psi_amp").unwrap();
        assert!(save.give_item(amp, sectoid, InventorySlot::RightHand));
        let morale = save.unit(soldier).unwrap().morale();
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let action = BattleAction::new(BattleActionType::Panic, sectoid)
            .with_target(Position::new(4, 1, 0))
            .with_weapon(Some(amp));
        let mut state = PsiAttack::new(action);
        assert_eq!(state.init(&mut ctx), Step::Continue);
        assert_eq!(state.think(&mut ctx), Step::Done);
        assert!(!events.psi_attacks[0].success);
        assert_eq!(save.unit(soldier).unwrap().morale(), morale);
    }

    #[test]
    fn test_empty_target_is_rejected() {
        let (mut save, _, _, mut action) = ethereal_and_soldier();
        action.target = Position::new(8, 8, 0);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let mut state = PsiAttack::new(action);
        assert_eq!(state.init(&mut ctx), Step::Done);
        assert_eq!(state.action().result, Some(ActionMessage::NoTarget));
    }
}
