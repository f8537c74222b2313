//! Alien policy.
//!
//! Every think gathers what the alien knows, prepares four candidate
//! plans (escape, ambush, attack and patrol) and then either keeps its
//! current mode or rolls a new one from weighted odds. The odds lean on
//! health, aggression, how many enemies see the alien and whether a plan
//! for each mode exists at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::{BattleAction, BattleActionType};
use crate::config::SimulationConfig;
use crate::item::ItemId;
use crate::math::Fixed;
use crate::position::{Direction, Position};
use crate::rng::{shuffle, RandomSource};
use crate::rules::{BattleType, DamageType, RuleItem};
use crate::saved_battle::SavedBattleGame;
use crate::tile_engine::blockage::wall_between;
use crate::tile_engine::vision::in_view_cone;
use crate::tile_engine::TileEngine;
use crate::unit::{BattleUnit, Faction, UnitId};

use super::tactics::{
    self, can_target_tile, is_known_target, scaled, spotting_units, tile_search, PatrolRoute, Situation,
    BASE_DEFENSE, TILE_SEARCH_RADIUS,
};

/// TU spent moving a grenade from the belt to a hand.
pub const GRENADE_HANDLING_TU: i32 = 4;

/// Farthest an alien looks for an ambush node.
const AMBUSH_RANGE: i32 = 10;

/// Farthest an alien charges for a melee attack.
const CHARGE_RANGE: i32 = 20;

/// What an alien is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlienMode {
    /// Walking between nodes.
    #[default]
    Patrol,
    /// Waiting in cover for an enemy to walk past.
    Ambush,
    /// Attacking.
    Combat,
    /// Withdrawing out of sight.
    Escape,
}

/// Decision state of an alien.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlienState {
    pub(crate) mode: AlienMode,
    pub(crate) route: PatrolRoute,
    pub(crate) aggro_target: Option<UnitId>,
    pub(crate) last_known_position: Option<Position>,
    pub(crate) times_not_seen: i32,
    pub(crate) was_hit_by: Vec<UnitId>,
    charging: Option<UnitId>,
    escape_tu: i32,
    escape_target: Option<Position>,
    ambush_tu: i32,
    ambush_target: Option<Position>,
    ambush_facing: Option<Direction>,
    did_psi: bool,
    reserve: BattleActionType,
}

/// What the alien knows at the start of a think.
struct Survey {
    unit: UnitId,
    faction: Faction,
    position: Position,
    tu: i32,
    max_tu: i32,
    health: i32,
    max_health: i32,
    aggression: i32,
    intelligence: i32,
    psi_skill: i32,
    situation: Situation,
    firearm: Option<ItemId>,
    melee_weapon: Option<ItemId>,
    grenade: Option<ItemId>,
    rifle: bool,
    melee: bool,
    reachable: BTreeMap<Position, i32>,
    reachable_with_attack: BTreeMap<Position, i32>,
}

impl Survey {
    fn gather(save: &SavedBattleGame, config: &SimulationConfig, unit: UnitId) -> Option<Self> {
        let me = save.unit(unit)?;
        let hand_item = |kind: BattleType| {
            save.unit_items(unit).into_iter().find(|id| {
                save.item(*id)
                    .is_some_and(|item| item.slot().is_some_and(|s| s.is_hand()) && item.rules().battle_type == kind)
            })
        };
        let firearm = hand_item(BattleType::Firearm);
        let melee_weapon = hand_item(BattleType::Melee);
        let rifle = firearm.is_some_and(|id| is_loaded(save, id));

        let attack_cost = match (rifle, melee_weapon) {
            (true, _) => firearm
                .and_then(|id| save.item(id))
                .map_or(0, |w| me.action_tu(BattleActionType::SnapShot, Some(w.rules()))),
            (false, Some(id)) => save
                .item(id)
                .map_or(0, |w| me.action_tu(BattleActionType::Hit, Some(w.rules()))),
            (false, None) => 0,
        };
        let tu = me.time_units();
        Some(Self {
            unit,
            faction: me.faction(),
            position: me.position(),
            tu,
            max_tu: me.stats().tu,
            health: me.health(),
            max_health: me.stats().health,
            aggression: me.aggression(),
            intelligence: me.intelligence(),
            psi_skill: me.stats().psi_skill,
            situation: Situation::assess(save, config, unit),
            firearm,
            melee_weapon,
            grenade: save.grenade_from_belt(unit),
            rifle,
            melee: melee_weapon.is_some(),
            reachable: tactics::reachable(save, unit, tu),
            reachable_with_attack: tactics::reachable(save, unit, tu - attack_cost),
        })
    }

    fn me<'a>(&self, save: &'a SavedBattleGame) -> Option<&'a BattleUnit> {
        save.unit(self.unit)
    }
}

/// True if a firearm has rounds to fire.
fn is_loaded(save: &SavedBattleGame, weapon: ItemId) -> bool {
    save.item(weapon)
        .and_then(|w| w.ammo_item())
        .and_then(|ammo| save.item(ammo))
        .is_some_and(|ammo| ammo.ammo_quantity() != 0)
}

/// Pick the firing mode for a target at `distance`: bursts up close,
/// aimed shots far away, snap shots in between, falling back to whatever
/// the TU allow.
#[must_use]
pub fn select_fire_method(unit: &BattleUnit, weapon: &RuleItem, distance: i32) -> Option<BattleActionType> {
    let tu = unit.time_units();
    let usable = |kind: BattleActionType, percent: i32| percent > 0 && unit.action_tu(kind, Some(weapon)) <= tu;
    let snap = usable(BattleActionType::SnapShot, weapon.tu_snap);
    let auto = usable(BattleActionType::AutoShot, weapon.tu_auto);
    let aimed = usable(BattleActionType::AimedShot, weapon.tu_aimed);

    if distance < 4 {
        if auto {
            return Some(BattleActionType::AutoShot);
        }
    } else if distance > 12 {
        if aimed {
            return Some(BattleActionType::AimedShot);
        }
        if distance < 20 && snap {
            return Some(BattleActionType::SnapShot);
        }
    }
    [
        (snap, BattleActionType::SnapShot),
        (aimed, BattleActionType::AimedShot),
        (auto, BattleActionType::AutoShot),
    ]
    .into_iter()
    .find(|(ok, _)| *ok)
    .map(|(_, kind)| kind)
}

impl AlienState {
    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> AlienMode {
        self.mode
    }

    /// Enemy the alien is focused on.
    #[must_use]
    pub const fn aggro_target(&self) -> Option<UnitId> {
        self.aggro_target
    }

    /// Action kind whose TU the alien keeps back while patrolling.
    #[must_use]
    pub const fn reserve(&self) -> BattleActionType {
        self.reserve
    }

    pub(crate) fn restore(
        mode: AlienMode,
        route: PatrolRoute,
        aggro_target: Option<UnitId>,
        last_known_position: Option<Position>,
        was_hit_by: Vec<UnitId>,
    ) -> Self {
        Self {
            mode,
            route,
            aggro_target,
            last_known_position,
            was_hit_by,
            ..Self::default()
        }
    }

    /// Remember who shot at the alien; it learns where they are.
    pub(crate) fn set_was_hit_by(&mut self, attacker: UnitId) {
        if !self.was_hit_by.contains(&attacker) {
            self.was_hit_by.push(attacker);
        }
    }

    /// Release any node this alien holds.
    pub(crate) fn release(&mut self, save: &mut SavedBattleGame) {
        self.route.release(save);
    }

    /// True if the alien has nothing to fight with.
    pub(crate) fn is_unarmed(save: &SavedBattleGame, unit: UnitId) -> bool {
        let armed = save.unit_items(unit).into_iter().any(|id| {
            save.item(id).is_some_and(|item| match item.rules().battle_type {
                BattleType::Firearm => is_loaded(save, id),
                BattleType::Melee | BattleType::Grenade | BattleType::ProximityGrenade => true,
                BattleType::PsiAmp => save.unit(unit).is_some_and(|u| u.stats().psi_skill > 0),
                _ => false,
            })
        });
        !armed
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
        action.final_facing = None;
        action.desperate = false;
        let Some(mut survey) = Survey::gather(save, config, unit) else {
            return;
        };
        for attacker in std::mem::take(&mut self.was_hit_by) {
            let alive = save.unit(attacker).is_some_and(|u| !u.is_out());
            if alive && !survey.situation.known.contains(&attacker) {
                survey.situation.known.push(attacker);
            }
        }
        self.track_target(save, &survey);
        if self.charging.is_some_and(|id| save.unit(id).map_or(true, BattleUnit::is_out)) {
            self.charging = None;
        }

        if survey.situation.spotting > 0 && self.escape_tu == 0 {
            self.setup_escape(save, config, &survey, rng);
        }
        if !survey.situation.known.is_empty() && !survey.melee && self.ambush_tu == 0 {
            self.setup_ambush(save, config, &survey);
        }
        let attack = self.setup_attack(save, config, &mut survey, rng);
        self.setup_patrol(save, &survey, rng);

        if attack.kind.is_psionic() && !self.did_psi {
            self.did_psi = true;
            copy_plan(action, &attack);
            self.trace(config, unit, action, "Alien psionic attack");
            return;
        }
        self.did_psi = false;

        let target_lost = self.times_not_seen > survey.intelligence;
        let evaluate = match self.mode {
            AlienMode::Patrol => {
                survey.situation.spotting > 0
                    || !survey.situation.visible.is_empty()
                    || !survey.situation.known.is_empty()
                    || rng.percent(10)
            }
            AlienMode::Ambush => !survey.rifle || self.ambush_tu == 0 || !survey.situation.visible.is_empty(),
            AlienMode::Combat => attack.kind == BattleActionType::Rethink,
            AlienMode::Escape => survey.situation.spotting == 0 || survey.situation.known.is_empty(),
        };
        if evaluate
            || survey.situation.spotting > 2
            || survey.health < 2 * survey.max_health / 3
            || target_lost
        {
            self.evaluate_mode(save, config, &survey, &attack, rng);
        }

        self.reserve = BattleActionType::None;
        match self.mode {
            AlienMode::Escape => {
                if let Some(target) = self.escape_target {
                    action.kind = BattleActionType::Walk;
                    action.target = target;
                    action.desperate = true;
                    if let Some(me) = save.unit_mut(unit) {
                        me.set_dont_reselect(true);
                    }
                }
            }
            AlienMode::Patrol => {
                if let Some(target) = self.route.destination(save) {
                    action.kind = BattleActionType::Walk;
                    action.target = target;
                }
                if survey.rifle {
                    self.reserve = match survey.aggression {
                        0 => BattleActionType::AimedShot,
                        1 => BattleActionType::AutoShot,
                        _ => BattleActionType::SnapShot,
                    };
                }
            }
            AlienMode::Combat => copy_plan(action, &attack),
            AlienMode::Ambush => {
                if let Some(target) = self.ambush_target {
                    action.kind = BattleActionType::Walk;
                    action.target = target;
                    action.final_facing = self.ambush_facing;
                }
            }
        }

        if action.kind == BattleActionType::Walk {
            if action.target == survey.position {
                action.kind = BattleActionType::None;
            } else {
                self.escape_tu = 0;
                self.ambush_tu = 0;
            }
        }
        self.trace(config, unit, action, "Alien decision");
    }

    fn trace(&self, config: &SimulationConfig, unit: UnitId, action: &BattleAction, message: &str) {
        if config.trace_ai {
            debug!(
                %unit,
                mode = ?self.mode,
                kind = ?action.kind,
                target = %action.target,
                aggro = ?self.aggro_target,
                "{message}"
            );
        }
    }

    // ========================================================================
    // Target memory
    // ========================================================================

    fn track_target(&mut self, save: &SavedBattleGame, survey: &Survey) {
        let Some(target) = self.aggro_target else {
            self.times_not_seen = 0;
            return;
        };
        match save.unit(target) {
            Some(enemy) if !enemy.is_out() => {
                if survey.situation.visible.contains(&target) {
                    self.times_not_seen = 0;
                    self.last_known_position = Some(enemy.position());
                } else {
                    self.times_not_seen += 1;
                }
            }
            _ => {
                self.aggro_target = None;
                self.last_known_position = None;
                self.times_not_seen = 0;
            }
        }
    }

    fn closest_known_enemy(&mut self, save: &SavedBattleGame, survey: &Survey) -> Option<UnitId> {
        let target = survey.situation.closest_known(save, survey.position)?;
        self.aggro_target = Some(target);
        Some(target)
    }

    // ========================================================================
    // Escape and ambush
    // ========================================================================

    fn setup_escape(
        &mut self,
        save: &SavedBattleGame,
        config: &SimulationConfig,
        survey: &Survey,
        rng: &mut dyn RandomSource,
    ) {
        let threat = survey
            .situation
            .nearest_visible
            .map(|(id, _)| id)
            .or(self.aggro_target);
        match tactics::find_escape(save, config, survey.unit, threat, &survey.reachable, rng) {
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

    /// Look for a patrol node near the alien where the target cannot see
    /// it but will likely walk past.
    fn setup_ambush(&mut self, save: &SavedBattleGame, config: &SimulationConfig, survey: &Survey) {
        const BASE_SUCCESS: i32 = 100;
        const COVER_BONUS: i32 = 25;
        const FAST_PASS: i32 = 80;

        self.ambush_tu = 0;
        self.ambush_target = None;
        let Some(target) = self.closest_known_enemy(save, survey) else {
            return;
        };
        let (Some(me), Some(enemy)) = (survey.me(save), save.unit(target)) else {
            return;
        };
        let height = me.height();

        let mut best_score = 0;
        for node in save.nodes() {
            let pos = node.position;
            let Some(tile) = save.tile(pos) else {
                continue;
            };
            if pos.z != survey.position.z || pos.distance(survey.position) > AMBUSH_RANGE || tile.is_dangerous() {
                continue;
            }
            let Some(tu) = survey.reachable_with_attack.get(&pos).copied() else {
                continue;
            };
            if save.unit_at(pos).is_some_and(|id| id != survey.unit) {
                continue;
            }
            if can_target_tile(save, target, pos, height, Some(survey.unit))
                || spotting_units(save, config, survey.unit, pos) > 0
            {
                continue;
            }
            if !tactics::can_reach(save, enemy, pos) {
                continue;
            }
            let mut score = BASE_SUCCESS - tu;
            if Direction::ALL.iter().step_by(2).any(|d| wall_between(save, pos, *d)) {
                score += COVER_BONUS;
            }
            if score > best_score {
                best_score = score;
                self.ambush_target = Some(pos);
                self.ambush_tu = if pos == survey.position { 1 } else { tu.max(1) };
                self.ambush_facing = Some(Direction::towards(pos, enemy.position()));
                if best_score > FAST_PASS {
                    break;
                }
            }
        }
    }

    // ========================================================================
    // Patrol
    // ========================================================================

    fn setup_patrol(&mut self, save: &mut SavedBattleGame, survey: &Survey, rng: &mut dyn RandomSource) {
        self.route.update(save, survey.position);
        let on_fire = save.tile(survey.position).is_some_and(|t| t.fire() > 0);
        let from_scout = self
            .route
            .from_node
            .and_then(|id| save.nodes().get(id))
            .map_or(true, crate::node::Node::is_scout_node);
        let scout = save.mission_type() != BASE_DEFENSE && (from_scout || on_fire);
        self.route.plan(save, survey.unit, scout, rng);
    }

    // ========================================================================
    // Attack
    // ========================================================================

    fn setup_attack(
        &mut self,
        save: &mut SavedBattleGame,
        config: &SimulationConfig,
        survey: &mut Survey,
        rng: &mut dyn RandomSource,
    ) -> BattleAction {
        let mut attack = BattleAction::new(BattleActionType::Rethink, survey.unit);
        if !survey.situation.known.is_empty() {
            if let Some(psi) = self.psi_action(save, survey, rng) {
                return psi;
            }
        }

        if let Some((target, _)) = survey.situation.nearest_visible {
            self.aggro_target = Some(target);
            if survey.melee && survey.rifle {
                self.select_melee_or_ranged(save, survey, target, rng);
            }
            if let Some(throw) = self.grenade_action(save, config, survey, target) {
                attack = throw;
                survey.rifle = false;
                survey.melee = false;
            }
            if survey.melee {
                if let Some(strike) = self.melee_action(save, config, survey) {
                    attack = strike;
                }
            }
            if survey.rifle {
                if let Some(shot) = projectile_action(save, survey, target) {
                    attack = shot;
                }
            }
        }

        if attack.kind != BattleActionType::Rethink {
            return attack;
        }
        if survey.situation.spotting > 0 || survey.aggression < rng.generate(0, 3) {
            if let Some(walk) = self.find_fire_point(save, config, survey, rng) {
                return walk;
            }
        }
        attack
    }

    /// With both a gun and a melee weapon in hand, decide which to use.
    fn select_melee_or_ranged(
        &mut self,
        save: &SavedBattleGame,
        survey: &mut Survey,
        target: UnitId,
        rng: &mut dyn RandomSource,
    ) {
        let (Some(weapon), Some(enemy)) = (
            survey.melee_weapon.and_then(|id| save.item(id)),
            save.unit(target),
        ) else {
            survey.melee = false;
            return;
        };
        let rule = weapon.rules();
        let damage = (Fixed::from_num(rule.power) * enemy.armor_rules().damage_modifier(rule.damage_type)).to_num::<i32>();

        let mut odds = 10;
        if damage > 50 {
            odds += (damage - 50) / 2;
        }
        let visible = survey.situation.visible.len() as i32;
        if visible > 1 {
            odds -= 20 * (visible - 1);
        }
        if odds > 0 && survey.health >= 2 * survey.max_health / 3 {
            match survey.aggression {
                0 => odds -= 20,
                a if a > 1 => odds += 10 * a,
                _ => {}
            }
            if rng.percent(odds) {
                survey.rifle = false;
                let cost = survey
                    .me(save)
                    .map_or(0, |me| me.action_tu(BattleActionType::Hit, Some(rule)));
                survey.reachable_with_attack = tactics::reachable(save, survey.unit, survey.tu - cost);
                return;
            }
        }
        survey.melee = false;
    }

    fn grenade_action(
        &self,
        save: &SavedBattleGame,
        config: &SimulationConfig,
        survey: &Survey,
        target: UnitId,
    ) -> Option<BattleAction> {
        let grenade = survey.grenade?;
        let rule = save.item(grenade)?.rules();
        let me = survey.me(save)?;
        let tu = GRENADE_HANDLING_TU
            + me.action_tu(BattleActionType::Prime, Some(rule))
            + me.action_tu(BattleActionType::Throw, Some(rule));
        if tu > survey.tu {
            return None;
        }
        let target_pos = save.unit(target)?.position();
        let radius = rule
            .explosion_radius(config.balance.explosion_decay_per_tile)
            .min(config.balance.max_explosion_radius);
        if !self.explosive_efficacy(save, survey, target_pos, radius) {
            return None;
        }
        if survey.position.distance(target_pos) > me.throw_range(rule.weight) {
            return None;
        }
        let mut action = BattleAction::new(BattleActionType::Throw, survey.unit)
            .with_weapon(Some(grenade))
            .with_target(target_pos);
        action.tu = tu;
        Some(action)
    }

    /// True if a blast at `target` would hurt enough enemies and few
    /// enough friends to be worth a grenade.
    ///
    /// Desperate aliens (low morale, badly hurt) throw at single targets;
    /// calmer ones want at least two enemies in the blast.
    fn explosive_efficacy(&self, save: &SavedBattleGame, survey: &Survey, target: Position, radius: i32) -> bool {
        let Some(me) = survey.me(save) else {
            return false;
        };
        if target.z > 0 && save.has_no_floor(target) {
            return false;
        }
        let injury = survey.max_health - survey.health;
        let mut desperation = (100 - me.morale()) / 10;
        if injury > survey.max_health / 3 * 2 {
            desperation += 3;
        }
        let mut efficacy = desperation;
        if survey.position.z == target.z && survey.position.distance(target) <= radius {
            efficacy -= 4;
        }

        let mut enemies = 0;
        let target_unit = save.tile(target).and_then(crate::tile::Tile::unit);
        if target_unit.is_some() && !save.tile(target).is_some_and(crate::tile::Tile::is_dangerous) {
            enemies += 1;
            efficacy += 1;
        }
        for other in save.units() {
            if other.is_out() || other.id() == survey.unit || Some(other.id()) == target_unit {
                continue;
            }
            if other.position().z != target.z || other.position().distance(target) > radius {
                continue;
            }
            if save.tile(other.position()).is_some_and(crate::tile::Tile::is_dangerous) {
                continue;
            }
            if me.faction().is_enemy_of(other.faction()) {
                if other.turns_since_spotted() > survey.intelligence {
                    continue;
                }
                enemies += 1;
                efficacy += 1;
            } else if other.faction() == me.faction() {
                efficacy -= 2;
            }
        }
        if desperation < 6 && enemies < 2 {
            return false;
        }
        efficacy > 0
    }

    fn melee_action(
        &mut self,
        save: &mut SavedBattleGame,
        config: &SimulationConfig,
        survey: &Survey,
    ) -> Option<BattleAction> {
        let weapon = survey.melee_weapon?;
        let rule = save.item(weapon)?.rules_arc();
        let kind = if rule.damage_type == DamageType::Stun {
            BattleActionType::Stun
        } else {
            BattleActionType::Hit
        };
        let cost = survey.me(save)?.action_tu(kind, Some(&rule));
        if survey.tu < cost {
            return None;
        }
        let strike = |target: Position| {
            let mut action = BattleAction::new(kind, survey.unit)
                .with_weapon(Some(weapon))
                .with_target(target);
            action.tu = cost;
            action
        };

        if let Some(target) = self.aggro_target {
            if let Some(pos) = adjacent_target(save, config, survey, target) {
                return Some(strike(pos));
            }
        }

        let reserve = survey.tu - cost;
        let mut best_distance = reserve / 4 + 1;
        let mut charge: Option<(UnitId, Position)> = None;
        let sneaky = config.sneaky_ai;
        let me = survey.me(save)?;
        for other in save.units() {
            let distance = survey.position.distance(other.position());
            if distance > CHARGE_RANGE || !is_known_target(me, other, sneaky) {
                continue;
            }
            if distance < best_distance || distance == 1 {
                let point = if distance == 1 {
                    Some(survey.position)
                } else {
                    select_point_near_target(save, survey, other, reserve)
                };
                if let Some(point) = point {
                    charge = Some((other.id(), point));
                    best_distance = distance;
                }
            }
        }

        let (target, point) = charge?;
        self.aggro_target = Some(target);
        if let Some(pos) = adjacent_target(save, config, survey, target) {
            return Some(strike(pos));
        }
        self.charging = Some(target);
        let target_pos = save.unit(target)?.position();
        let mut walk = BattleAction::new(BattleActionType::Walk, survey.unit).with_target(point);
        walk.final_facing = Some(Direction::towards(point, target_pos));
        Some(walk)
    }

    fn psi_action(
        &mut self,
        save: &SavedBattleGame,
        survey: &Survey,
        rng: &mut dyn RandomSource,
    ) -> Option<BattleAction> {
        let amp = save.unit_items(survey.unit).into_iter().find(|id| {
            save.item(*id)
                .is_some_and(|item| item.rules().battle_type == BattleType::PsiAmp)
        })?;
        let rule = save.item(amp)?.rules();
        let me = survey.me(save)?;
        let cost = me.action_tu(BattleActionType::Panic, Some(rule));
        if me.faction() != me.original_faction() || survey.tu <= self.escape_tu + cost || self.did_psi {
            return None;
        }
        let target_faction = if me.original_faction() == Faction::Neutral {
            Faction::Hostile
        } else {
            Faction::Player
        };

        let strength = me.stats().psi_skill * me.stats().psi_strength / 50;
        let mut best: Option<(UnitId, i32)> = None;
        for other in save.units() {
            if other.original_faction() != target_faction || !survey.situation.known.contains(&other.id()) {
                continue;
            }
            let defence = other.stats().psi_skill * 2 / 5;
            let chance = strength - defence - survey.position.distance(other.position()) - other.stats().psi_strength
                + rng.generate(55, 105);
            if chance > best.map_or(0, |(_, c)| c) {
                best = Some((other.id(), chance));
            }
        }
        let (target, chance) = best?;

        let loaded_power = survey
            .firearm
            .filter(|_| survey.rifle)
            .and_then(|id| save.item(id))
            .and_then(crate::item::BattleItem::ammo_item)
            .and_then(|ammo| save.item(ammo))
            .map(|ammo| ammo.rules().power);
        match (survey.situation.visible.is_empty(), loaded_power) {
            (false, Some(power)) => {
                if power >= chance {
                    return None;
                }
            }
            _ => {
                if rng.generate(35, 155) >= chance {
                    return None;
                }
            }
        }

        let victim = save.unit(target)?;
        let mut kind = BattleActionType::Panic;
        if chance >= 30 {
            let mut control_odds = 40;
            let morale = victim.morale();
            let bravery = (110 - victim.stats().bravery) / 10;
            if bravery > 6 {
                control_odds -= 15;
            }
            if bravery < 4 {
                control_odds += 15;
            }
            if morale >= 40 {
                if morale - 10 * bravery < 50 {
                    control_odds -= 15;
                }
            } else {
                control_odds += 15;
            }
            if morale == 0 {
                control_odds = 100;
            }
            if rng.percent(control_odds) {
                kind = BattleActionType::MindControl;
            }
        }

        self.aggro_target = Some(target);
        let mut action = BattleAction::new(kind, survey.unit)
            .with_weapon(Some(amp))
            .with_target(victim.position());
        action.tu = cost;
        Some(action)
    }

    /// Look for a tile within reach that has a line of fire on the target,
    /// preferring tiles few enemies can see and the target is not facing.
    fn find_fire_point(
        &mut self,
        save: &SavedBattleGame,
        config: &SimulationConfig,
        survey: &Survey,
        rng: &mut dyn RandomSource,
    ) -> Option<BattleAction> {
        const BASE_SUCCESS: i32 = 100;
        const FAST_PASS: i32 = 125;
        const ACCEPT: i32 = 70;

        let target = self.closest_known_enemy(save, survey)?;
        let enemy = save.unit(target)?;
        let height = survey.me(save)?.height();
        let mut search = tile_search(TILE_SEARCH_RADIUS);
        shuffle(rng, &mut search);

        let mut best: Option<(Position, i32)> = None;
        for offset in search {
            let pos = survey.position + offset;
            let Some(cost) = survey.reachable_with_attack.get(&pos).copied() else {
                continue;
            };
            if save.unit_at(pos).is_some_and(|id| id != survey.unit) {
                continue;
            }
            if !can_target_tile(save, target, pos, height, Some(survey.unit)) {
                continue;
            }
            let mut score = BASE_SUCCESS - spotting_units(save, config, survey.unit, pos) * 10 + survey.tu - cost;
            if !in_view_cone(enemy.direction(), enemy.position(), pos) {
                score += 10;
            }
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((pos, score));
                if score > FAST_PASS {
                    break;
                }
            }
        }

        let (pos, score) = best?;
        if score <= ACCEPT {
            return None;
        }
        let mut walk = BattleAction::new(BattleActionType::Walk, survey.unit).with_target(pos);
        walk.final_facing = Some(Direction::towards(pos, enemy.position()));
        Some(walk)
    }

    // ========================================================================
    // Mode selection
    // ========================================================================

    fn evaluate_mode(
        &mut self,
        save: &SavedBattleGame,
        config: &SimulationConfig,
        survey: &Survey,
        attack: &BattleAction,
        rng: &mut dyn RandomSource,
    ) {
        if self.charging.is_some() && attack.kind != BattleActionType::Rethink {
            self.mode = AlienMode::Combat;
            return;
        }
        let situation = &survey.situation;
        let hostile = survey.faction == Faction::Hostile;

        let mut escape = Fixed::from_num(if survey.melee { 12 } else { 15 });
        if hostile && survey.tu > survey.max_tu / 2 {
            escape = Fixed::from_num(5);
        }
        let mut ambush = Fixed::from_num(12);
        let mut combat = Fixed::from_num(20);
        let mut patrol = Fixed::from_num(if situation.visible.is_empty() { 30 } else { 15 });

        if situation.spotting > 0 {
            patrol = Fixed::ZERO;
            if self.escape_tu == 0 {
                self.setup_escape(save, config, survey, rng);
            }
        }
        if !survey.rifle || self.ambush_tu == 0 {
            ambush = Fixed::ZERO;
            if survey.melee {
                combat = scaled(combat, 130);
            }
        }
        if !situation.known.is_empty() {
            if situation.known.len() == 1 {
                combat = scaled(combat, 120);
            }
            if self.escape_tu == 0 {
                if self.closest_known_enemy(save, survey).is_some() {
                    self.setup_escape(save, config, survey, rng);
                } else {
                    escape = Fixed::ZERO;
                }
            }
        } else if hostile {
            combat = Fixed::ZERO;
            escape = Fixed::ZERO;
        }

        match self.mode {
            AlienMode::Patrol => patrol = scaled(patrol, 110),
            AlienMode::Ambush => ambush = scaled(ambush, 110),
            AlienMode::Combat => combat = scaled(combat, 110),
            AlienMode::Escape => escape = scaled(escape, 110),
        }
        if survey.health < survey.max_health / 3 {
            escape = scaled(escape, 170);
            combat = scaled(combat, 60);
            ambush = scaled(ambush, 75);
        } else if survey.health < 2 * (survey.max_health / 3) {
            escape = scaled(escape, 140);
            combat = scaled(combat, 80);
            ambush = scaled(ambush, 80);
        } else if survey.health < survey.max_health {
            escape = scaled(escape, 110);
        }
        match survey.aggression {
            0 => {
                escape = scaled(escape, 140);
                combat = scaled(combat, 70);
            }
            1 => ambush = scaled(ambush, 110),
            2 => {
                combat = scaled(combat, 140);
                escape = scaled(escape, 70);
            }
            a => {
                combat = scaled(combat, (120 + a * 10).clamp(10, 200));
                escape = scaled(escape, (90 - a * 10).clamp(10, 200));
            }
        }
        if self.mode == AlienMode::Combat {
            ambush = scaled(ambush, 150);
        }
        if situation.spotting > 0 {
            escape = scaled(escape * 10, situation.spotting + 10);
            combat = scaled(combat * 5, situation.spotting + 20);
        } else {
            escape /= 2;
        }
        if let Some((_, closest)) = situation.nearest_visible {
            combat = scaled(combat * 10, situation.visible.len() as i32 + 10);
            if closest < 5 {
                ambush = Fixed::ZERO;
            }
        }
        if self.ambush_tu != 0 {
            ambush = scaled(ambush, 170);
        } else {
            ambush = Fixed::ZERO;
        }
        if save.mission_type() == BASE_DEFENSE {
            escape = scaled(escape, 75);
            ambush = scaled(ambush, 60);
        }
        if !survey.melee && !survey.rifle && survey.grenade.is_none() && survey.psi_skill == 0 {
            combat = Fixed::ZERO;
            ambush = Fixed::ZERO;
        }

        let escape = escape.to_num::<i32>();
        let ambush = ambush.to_num::<i32>();
        let combat = combat.to_num::<i32>();
        let patrol = patrol.to_num::<i32>();
        let decision = rng.generate(1, (escape + ambush + combat + patrol).max(1));
        self.mode = if decision <= escape {
            AlienMode::Escape
        } else if decision <= escape + ambush {
            AlienMode::Ambush
        } else if decision <= escape + ambush + combat {
            AlienMode::Combat
        } else {
            AlienMode::Patrol
        };
        if self.charging.is_some() {
            self.mode = AlienMode::Combat;
        }

        if self.mode == AlienMode::Combat {
            if attack.kind != BattleActionType::Rethink {
                return;
            }
            self.mode = AlienMode::Patrol;
        }
        if self.mode == AlienMode::Patrol {
            if self.route.to_node.is_some() {
                return;
            }
            self.mode = AlienMode::Ambush;
        }
        if self.mode == AlienMode::Ambush && self.ambush_tu == 0 {
            self.mode = AlienMode::Escape;
        }
    }
}

/// Copy an attack plan into the action handed to the scheduler.
fn copy_plan(action: &mut BattleAction, plan: &BattleAction) {
    action.kind = plan.kind;
    action.target = plan.target;
    action.weapon = plan.weapon;
    action.tu = plan.tu;
    action.final_facing = plan.final_facing;
}

/// Position of `target` if the unit can strike it from where it stands.
fn adjacent_target(
    save: &mut SavedBattleGame,
    config: &SimulationConfig,
    survey: &Survey,
    target: UnitId,
) -> Option<Position> {
    let pos = save.unit(target).filter(|u| !u.is_out())?.position();
    if pos.z != survey.position.z || pos.chebyshev(survey.position) != 1 {
        return None;
    }
    let direction = Direction::towards(survey.position, pos);
    TileEngine::new(save, config)
        .valid_melee_range(survey.unit, direction, Some(target))
        .map(|_| pos)
}

/// Closest reachable tile next to `target` from which it can be struck.
fn select_point_near_target(
    save: &SavedBattleGame,
    survey: &Survey,
    target: &BattleUnit,
    max_tu: i32,
) -> Option<Position> {
    let target_pos = target.position();
    let mut best: Option<(Position, i32)> = None;
    for direction in Direction::ALL {
        let point = target_pos.step(direction.opposite());
        let Some(cost) = survey.reachable.get(&point).copied() else {
            continue;
        };
        if cost > max_tu || save.tile(point).is_some_and(crate::tile::Tile::is_dangerous) {
            continue;
        }
        if save.unit_at(point).is_some_and(|id| id != survey.unit) {
            continue;
        }
        if wall_between(save, point, direction) {
            continue;
        }
        if best.map_or(true, |(_, c)| cost < c) {
            best = Some((point, cost));
        }
    }
    best.map(|(point, _)| point)
}

/// Fire at `target` with the loaded gun, if the mode and range allow.
fn projectile_action(save: &SavedBattleGame, survey: &Survey, target: UnitId) -> Option<BattleAction> {
    let weapon = survey.firearm?;
    let rule = save.item(weapon)?.rules();
    let me = survey.me(save)?;
    let target_pos = save.unit(target)?.position();
    let distance = survey.position.distance(target_pos);
    if distance > rule.max_range {
        return None;
    }
    let kind = select_fire_method(me, rule, distance)?;
    let mut action = BattleAction::new(kind, survey.unit)
        .with_weapon(Some(weapon))
        .with_target(target_pos);
    action.tu = me.action_tu(kind, Some(rule));
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::InventorySlot;
    use crate::node::Node;
    use crate::test_fixtures::{flat_battle, ScriptedRng};

    fn lit(save: &mut SavedBattleGame) {
        save.set_global_shade(0);
        let config = SimulationConfig::default();
        TileEngine::new(save, &config).recalculate_all();
    }

    fn armed_sectoid(save: &mut SavedBattleGame, pos: Position) -> UnitId {
        let alien = save.add_unit("sectoid", Faction::Hostile, pos).unwrap();
        let pistol = save.create_item("plasma_pistol").unwrap();
        let clip = save.create_item("plasma_clip").unwrap();
        assert!(save.give_item(pistol, alien, InventorySlot::RightHand));
        assert!(save.load_ammo(pistol, clip));
        alien
    }

    #[test]
    fn test_fire_method_by_distance() {
        let mut save = flat_battle(5, 5, 1);
        let alien = armed_sectoid(&mut save, Position::new(1, 1, 0));
        let rules = save.rules_arc();
        let pistol = rules.item("plasma_pistol").unwrap();
        let me = save.unit(alien).unwrap();
        // 54 TU: auto 16, snap 16, aimed 32
        assert_eq!(select_fire_method(me, &pistol, 2), Some(BattleActionType::AutoShot));
        assert_eq!(select_fire_method(me, &pistol, 8), Some(BattleActionType::SnapShot));
        assert_eq!(select_fire_method(me, &pistol, 15), Some(BattleActionType::AimedShot));

        save.unit_mut(alien).unwrap().set_time_units(20);
        let me = save.unit(alien).unwrap();
        assert_eq!(select_fire_method(me, &pistol, 15), Some(BattleActionType::SnapShot));
        save.unit_mut(alien).unwrap().set_time_units(10);
        let me = save.unit(alien).unwrap();
        assert_eq!(select_fire_method(me, &pistol, 15), None);
    }

    #[test]
    fn test_alien_shoots_visible_soldier() {
        let mut save = flat_battle(12, 5, 1);
        lit(&mut save);
        let alien = armed_sectoid(&mut save, Position::new(9, 2, 0));
        save.unit_mut(alien).unwrap().set_direction(Direction::West);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(2, 2, 0)).unwrap();
        save.unit_mut(soldier).unwrap().set_direction(Direction::East);
        let config = SimulationConfig::default();
        TileEngine::new(&mut save, &config).calculate_all_fov();
        assert!(save.unit(alien).unwrap().visible_units().contains(&soldier));

        let mut state = AlienState {
            mode: AlienMode::Combat,
            ..AlienState::default()
        };
        let mut action = BattleAction::new(BattleActionType::None, alien);
        let mut rng = ScriptedRng::new(&[40, 80, 99, 60, 30]);
        state.think(&mut action, alien, &mut save, &config, &mut rng);
        // a healthy alien with a plan stays in combat
        assert_eq!(state.mode(), AlienMode::Combat);
        assert_eq!(action.kind, BattleActionType::SnapShot);
        assert_eq!(action.target, Position::new(2, 2, 0));
        assert_eq!(action.tu, 16);
        assert_eq!(state.aggro_target(), Some(soldier));
    }

    #[test]
    fn test_projectile_plan_uses_the_loaded_gun() {
        let mut save = flat_battle(12, 5, 1);
        lit(&mut save);
        let alien = armed_sectoid(&mut save, Position::new(9, 2, 0));
        save.unit_mut(alien).unwrap().set_direction(Direction::West);
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(2, 2, 0)).unwrap();
        let config = SimulationConfig::default();
        TileEngine::new(&mut save, &config).calculate_all_fov();

        let mut state = AlienState::default();
        let mut survey = Survey::gather(&save, &config, alien).unwrap();
        assert!(survey.rifle);
        let mut rng = ScriptedRng::new(&[0]);
        let attack = state.setup_attack(&mut save, &config, &mut survey, &mut rng);
        assert_eq!(attack.kind, BattleActionType::SnapShot);
        assert_eq!(attack.target, Position::new(2, 2, 0));
        assert_eq!(state.aggro_target(), Some(soldier));
    }

    #[test]
    fn test_unloaded_gun_is_no_attack() {
        let mut save = flat_battle(12, 5, 1);
        let alien = save.add_unit("sectoid", Faction::Hostile, Position::new(9, 2, 0)).unwrap();
        let pistol = save.create_item("plasma_pistol").unwrap();
        assert!(save.give_item(pistol, alien, InventorySlot::RightHand));
        assert!(AlienState::is_unarmed(&save, alien));

        let grenade = save.create_item("grenade").unwrap();
        assert!(save.give_item(grenade, alien, InventorySlot::Belt));
        assert!(!AlienState::is_unarmed(&save, alien));
    }

    #[test]
    fn test_melee_alien_strikes_adjacent_enemy() {
        let mut save = flat_battle(8, 8, 1);
        lit(&mut save);
        let alien = save.add_unit("sectoid", Faction::Hostile, Position::new(3, 3, 0)).unwrap();
        let rod = save.create_item("stun_rod").unwrap();
        assert!(save.give_item(rod, alien, InventorySlot::RightHand));
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(4, 3, 0)).unwrap();
        save.unit_mut(alien).unwrap().set_direction(Direction::East);
        let config = SimulationConfig::default();
        TileEngine::new(&mut save, &config).calculate_all_fov();

        let mut state = AlienState::default();
        let mut survey = Survey::gather(&save, &config, alien).unwrap();
        let mut rng = ScriptedRng::new(&[0]);
        let attack = state.setup_attack(&mut save, &config, &mut survey, &mut rng);
        assert_eq!(attack.kind, BattleActionType::Stun);
        assert_eq!(attack.target, Position::new(4, 3, 0));
        // 30% of 54
        assert_eq!(attack.tu, 16);
        assert_eq!(state.aggro_target(), Some(soldier));
    }

    #[test]
    fn test_melee_alien_charges_distant_enemy() {
        let mut save = flat_battle(10, 5, 1);
        lit(&mut save);
        let alien = save.add_unit("sectoid", Faction::Hostile, Position::new(1, 2, 0)).unwrap();
        let rod = save.create_item("stun_rod").unwrap();
        assert!(save.give_item(rod, alien, InventorySlot::RightHand));
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(5, 2, 0)).unwrap();
        save.unit_mut(alien).unwrap().set_direction(Direction::East);
        let config = SimulationConfig::default();
        TileEngine::new(&mut save, &config).calculate_all_fov();
        save.unit_mut(soldier).unwrap().mark_spotted();

        let mut state = AlienState::default();
        let mut survey = Survey::gather(&save, &config, alien).unwrap();
        let mut rng = ScriptedRng::new(&[0]);
        let attack = state.setup_attack(&mut save, &config, &mut survey, &mut rng);
        assert_eq!(attack.kind, BattleActionType::Walk);
        assert_eq!(attack.target, Position::new(4, 2, 0));
        assert_eq!(attack.final_facing, Some(Direction::East));
        assert_eq!(state.charging, Some(soldier));
    }

    #[test]
    fn test_grenade_needs_a_crowd_or_desperation() {
        let mut save = flat_battle(14, 6, 1);
        let alien = save.add_unit("sectoid", Faction::Hostile, Position::new(1, 2, 0)).unwrap();
        let a = save.add_unit("soldier", Faction::Player, Position::new(8, 2, 0)).unwrap();
        save.unit_mut(a).unwrap().mark_spotted();
        let config = SimulationConfig::default();
        let survey = Survey::gather(&save, &config, alien).unwrap();
        let state = AlienState::default();
        assert!(!state.explosive_efficacy(&save, &survey, Position::new(8, 2, 0), 5));

        let b = save.add_unit("soldier", Faction::Player, Position::new(9, 3, 0)).unwrap();
        save.unit_mut(b).unwrap().mark_spotted();
        let survey = Survey::gather(&save, &config, alien).unwrap();
        assert!(state.explosive_efficacy(&save, &survey, Position::new(8, 2, 0), 5));

        // a friend in the blast outweighs the second soldier
        save.add_unit("sectoid", Faction::Hostile, Position::new(7, 2, 0)).unwrap();
        let survey = Survey::gather(&save, &config, alien).unwrap();
        assert!(!state.explosive_efficacy(&save, &survey, Position::new(8, 2, 0), 5));
    }

    #[test]
    fn test_psi_needs_an_amp() {
        let mut save = flat_battle(10, 5, 1);
        let alien = save.add_unit("ethereal", Faction::Hostile, Position::new(1, 2, 0)).unwrap();
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(6, 2, 0)).unwrap();
        save.unit_mut(soldier).unwrap().mark_spotted();
        let config = SimulationConfig::default();

        let mut state = AlienState::default();
        let survey = Survey::gather(&save, &config, alien).unwrap();
        let mut rng = ScriptedRng::new(&[50]);
        assert!(state.psi_action(&save, &survey, &mut rng).is_none());

        let amp = save.create_item("psi_amp").unwrap();
        assert!(save.give_item(amp, alien, InventorySlot::LeftHand));
        let survey = Survey::gather(&save, &config, alien).unwrap();
        let psi = state.psi_action(&save, &survey, &mut rng).unwrap();
        assert!(psi.kind.is_psionic());
        assert_eq!(psi.target, Position::new(6, 2, 0));
        assert_eq!(psi.weapon, Some(amp));
        assert_eq!(state.aggro_target(), Some(soldier));
    }

    #[test]
    fn test_idle_alien_patrols_and_reserves() {
        let mut save = flat_battle(10, 10, 1);
        save.add_node(Node::new(0, Position::new(1, 1, 0), 0));
        save.add_node(Node::new(1, Position::new(7, 7, 0), 0));
        let alien = armed_sectoid(&mut save, Position::new(1, 1, 0));
        let config = SimulationConfig::default();
        let mut state = AlienState::default();
        let mut action = BattleAction::new(BattleActionType::None, alien);
        let mut rng = ScriptedRng::new(&[50]);
        state.think(&mut action, alien, &mut save, &config, &mut rng);

        assert_eq!(state.mode(), AlienMode::Patrol);
        assert_eq!(action.kind, BattleActionType::Walk);
        assert_eq!(action.target, Position::new(7, 7, 0));
        assert_eq!(state.reserve(), BattleActionType::AutoShot);
        assert!(save.nodes()[1].allocated);
    }

    #[test]
    fn test_was_hit_by_reveals_the_attacker() {
        let mut save = flat_battle(10, 5, 1);
        let alien = armed_sectoid(&mut save, Position::new(1, 2, 0));
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(8, 2, 0)).unwrap();
        let mut state = AlienState::default();
        state.set_was_hit_by(soldier);
        state.set_was_hit_by(soldier);
        assert_eq!(state.was_hit_by, vec![soldier]);

        let config = SimulationConfig::default();
        let mut action = BattleAction::new(BattleActionType::None, alien);
        let mut rng = ScriptedRng::new(&[50]);
        state.think(&mut action, alien, &mut save, &config, &mut rng);
        assert!(state.was_hit_by.is_empty());
        assert_eq!(state.aggro_target(), Some(soldier));
    }
}
