//! Reaction fire.

use tracing::debug;

use crate::action::{BattleAction, BattleActionType};
use crate::rng::RandomSource;
use crate::rules::BattleType;
use crate::unit::UnitId;

use super::TileEngine;

impl TileEngine<'_> {
    /// Give the enemies watching `unit` a chance to shoot it.
    ///
    /// Only a unit of the side whose turn it is can draw reaction fire, and
    /// one time in `reaction_skip_die` nobody reacts at all. Among the
    /// enemies close enough that see the unit, the one with the best
    /// reaction score fires a snap shot, provided that score beats the
    /// unit's own and it has a loaded firearm and the TU to use it. The TU
    /// are spent here; the returned action is ready for the scheduler.
    ///
    /// `potential_victim`, if given, first turns to face `unit` (it was just
    /// attacked by it). With `recalculate_fov` the watchers' views are
    /// refreshed before checking who sees the unit.
    pub fn check_reaction_fire(
        &mut self,
        unit: UnitId,
        potential_victim: Option<UnitId>,
        recalculate_fov: bool,
        rng: &mut dyn RandomSource,
    ) -> Option<BattleAction> {
        if !self.config.reaction_fire {
            return None;
        }
        let side = self.save.side();
        let mover = self.save.unit(unit)?;
        if mover.faction() != side || mover.is_out() {
            return None;
        }
        let target = mover.position();
        let mover_faction = mover.faction();
        let mover_score = mover.reaction_score();

        let balance = &self.config.balance;
        if rng.generate(0, balance.reaction_skip_die.max(1) - 1) == 1 {
            return None;
        }
        let max_distance = balance.reaction_max_distance;

        if let Some(victim) = potential_victim {
            if let Some(turned) = self.save.unit_mut(victim) {
                if !turned.is_out() && turned.faction() != side {
                    turned.look_at(target);
                    while !turned.turn() {}
                    self.calculate_fov(victim);
                }
            }
        }

        let watchers: Vec<UnitId> = self
            .save
            .units()
            .iter()
            .filter(|u| u.faction() != side && !u.is_out() && u.faction().is_enemy_of(mover_faction))
            .filter(|u| u.position().distance(target) < max_distance)
            .map(crate::unit::BattleUnit::id)
            .collect();
        if recalculate_fov {
            for watcher in &watchers {
                self.calculate_fov(*watcher);
            }
        }

        let reactor = watchers
            .iter()
            .filter_map(|id| self.save.unit(*id))
            .filter(|u| u.visible_units().contains(&unit))
            .fold(None, |best: Option<&crate::unit::BattleUnit>, u| match best {
                Some(b) if b.reaction_score() >= u.reaction_score() => Some(b),
                _ => Some(u),
            })
            .filter(|u| u.reaction_score() > mover_score)
            .map(crate::unit::BattleUnit::id)?;

        let weapon = self.save.main_hand_weapon(reactor)?;
        let weapon_item = self.save.item(weapon)?;
        if weapon_item.rules().battle_type != BattleType::Firearm {
            return None;
        }
        let loaded = weapon_item
            .ammo_item()
            .and_then(|ammo| self.save.item(ammo))
            .is_some_and(|ammo| ammo.ammo_quantity() != 0);
        if !loaded {
            return None;
        }
        let rule = weapon_item.rules_arc();

        let debug_mode = self.save.debug_mode();
        let shooter = self.save.unit_mut(reactor)?;
        let tu = shooter.action_tu(BattleActionType::SnapShot, Some(&rule));
        if !shooter.spend_time_units(tu, debug_mode) {
            return None;
        }
        shooter.experience_mut().reactions += 1;
        shooter.look_at(target);
        while !shooter.turn() {}

        debug!(%reactor, %unit, tu, "Reaction fire");
        let mut action = BattleAction::new(BattleActionType::SnapShot, reactor)
            .with_weapon(Some(weapon))
            .with_target(target);
        action.tu = tu;
        Some(action)
    }
}
