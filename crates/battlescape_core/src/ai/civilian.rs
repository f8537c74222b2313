//! Civilian policy: wander between patrol nodes and run when threatened.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::{BattleAction, BattleActionType};
use crate::config::SimulationConfig;
use crate::math::Fixed;
use crate::position::Position;
use crate::rng::RandomSource;
use crate::saved_battle::SavedBattleGame;
use crate::unit::UnitId;

use super::tactics::{self, scaled, PatrolRoute, Situation};

/// What a civilian is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CivilianMode {
    /// Walking between nodes.
    #[default]
    Patrol,
    /// Running from hostiles.
    Escape,
}

/// Decision state of a civilian.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CivilianState {
    pub(crate) mode: CivilianMode,
    pub(crate) route: PatrolRoute,
    pub(crate) escape_tu: i32,
    escape_target: Option<Position>,
}

impl CivilianState {
    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> CivilianMode {
        self.mode
    }

    /// Node the civilian is walking to.
    #[must_use]
    pub const fn to_node(&self) -> Option<usize> {
        self.route.to_node
    }

    pub(crate) fn restore(mode: CivilianMode, route: PatrolRoute) -> Self {
        Self {
            mode,
            route,
            ..Self::default()
        }
    }

    /// Release any node this civilian holds.
    pub(crate) fn release(&mut self, save: &mut SavedBattleGame) {
        self.route.release(save);
    }

    /// Fill `action` with the next move.
    pub(crate) fn think(
        &mut self,
        action: &mut BattleAction,
        unit: UnitId,
        save: &mut SavedBattleGame,
        config: &SimulationConfig,
        rng: &mut dyn RandomSource,
    ) {
        action.kind = BattleActionType::None;
        action.weapon = None;
        let Some((position, health, max_health, tu)) = save
            .unit(unit)
            .map(|me| (me.position(), me.health(), me.stats().health, me.time_units()))
        else {
            return;
        };

        let situation = Situation::assess(save, config, unit);
        if situation.spotting > 0 && self.escape_tu == 0 {
            self.setup_escape(save, config, unit, &situation, tu, rng);
        }
        self.route.update(save, position);
        self.route.plan(save, unit, true, rng);

        let evaluate = match self.mode {
            CivilianMode::Escape => situation.spotting == 0,
            CivilianMode::Patrol => situation.spotting > 0 || !situation.visible.is_empty() || rng.percent(10),
        };
        if evaluate || situation.spotting > 2 || health < 2 * max_health / 3 {
            self.evaluate_mode(save, config, unit, &situation, health, max_health, tu, rng);
        }

        match self.mode {
            CivilianMode::Escape => {
                if let Some(target) = self.escape_target {
                    action.kind = BattleActionType::Walk;
                    action.target = target;
                    action.number = 3;
                    action.desperate = true;
                    if let Some(me) = save.unit_mut(unit) {
                        me.set_dont_reselect(true);
                    }
                }
            }
            CivilianMode::Patrol => {
                if let Some(target) = self.route.destination(save) {
                    action.kind = BattleActionType::Walk;
                    action.target = target;
                }
            }
        }

        if action.kind == BattleActionType::Walk {
            if action.target == position {
                action.kind = BattleActionType::None;
            } else {
                self.escape_tu = 0;
            }
        }
        if config.trace_ai {
            debug!(%unit, mode = ?self.mode, kind = ?action.kind, target = %action.target, "Civilian decision");
        }
    }

    fn setup_escape(
        &mut self,
        save: &SavedBattleGame,
        config: &SimulationConfig,
        unit: UnitId,
        situation: &Situation,
        tu: i32,
        rng: &mut dyn RandomSource,
    ) {
        let Some(position) = save.unit(unit).map(crate::unit::BattleUnit::position) else {
            return;
        };
        let threat = situation
            .nearest_visible
            .map(|(id, _)| id)
            .or_else(|| situation.closest_known(save, position));
        let reachable = tactics::reachable(save, unit, tu);
        match tactics::find_escape(save, config, unit, threat, &reachable, rng) {
            Some(plan) => {
                self.escape_target = Some(plan.target);
                self.escape_tu = plan.tu;
            }
            None => {
                self.escape_target = None;
                self.escape_tu = 0;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_mode(
        &mut self,
        save: &SavedBattleGame,
        config: &SimulationConfig,
        unit: UnitId,
        situation: &Situation,
        health: i32,
        max_health: i32,
        tu: i32,
        rng: &mut dyn RandomSource,
    ) {
        let visible = !situation.visible.is_empty();
        let mut escape_odds = Fixed::from_num(if visible { 15 } else { 0 });
        let mut patrol_odds = Fixed::from_num(if visible { 15 } else { 30 });

        if situation.spotting > 0 {
            patrol_odds = Fixed::ZERO;
            if self.escape_tu == 0 {
                self.setup_escape(save, config, unit, situation, tu, rng);
            }
        }
        match self.mode {
            CivilianMode::Patrol => patrol_odds = scaled(patrol_odds, 110),
            CivilianMode::Escape => escape_odds = scaled(escape_odds, 110),
        }
        if health < max_health / 3 {
            escape_odds = scaled(escape_odds, 170);
        } else if health < 2 * max_health / 3 {
            escape_odds = scaled(escape_odds, 140);
        } else if health < max_health {
            escape_odds = scaled(escape_odds, 110);
        }
        let aggression = save.unit(unit).map_or(0, crate::unit::BattleUnit::aggression);
        match aggression {
            0 => escape_odds = scaled(escape_odds, 140),
            2 => escape_odds = scaled(escape_odds, 70),
            _ => {}
        }
        if situation.spotting > 0 {
            escape_odds = scaled(escape_odds * 10, situation.spotting + 10);
        } else {
            escape_odds /= 2;
        }

        let escape = escape_odds.to_num::<i32>();
        let patrol = patrol_odds.to_num::<i32>();
        let decision = 1 + rng.generate(0, patrol + escape);
        self.mode = if decision > escape {
            CivilianMode::Patrol
        } else {
            CivilianMode::Escape
        };
        if self.mode == CivilianMode::Patrol && self.route.to_node.is_none() {
            self.mode = CivilianMode::Escape;
        }
    }
}
