//! The turn and action scheduler.
//!
//! [`BattlescapeGame`] owns the battle, the configuration, the random source
//! and a queue of [`BattleState`]s. The enclosing application calls
//! [`think`](BattlescapeGame::think) at a fixed rate; each call advances the
//! front state by one step. Player input arrives through the action methods
//! ([`primary_action`](BattlescapeGame::primary_action) and friends), AI
//! decisions are asked for whenever the queue drains on an AI side. Both end
//! up as states in the same queue.
//!
//! # Determinism
//!
//! Given the same battle, configuration, seed and sequence of player calls,
//! the scheduler produces the same events tick for tick. Every roll goes
//! through the injected [`RandomSource`] and units are always visited in id
//! order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::action::{ActionMessage, BattleAction, BattleActionType, MedikitAction};
use crate::ai::search_for_weapon::take_item_from_ground;
use crate::ai::{AiState, AlienState};
use crate::config::SimulationConfig;
use crate::error::Result;
use crate::item::{InventorySlot, ItemId};
use crate::pathfinding::{preview_path, remove_preview, PathStep, Pathfinding};
use crate::position::{Direction, Position};
use crate::rng::{BattleRng, RandomSource};
use crate::rules::{BattleType, DamageType, RuleItem, Ruleset};
use crate::saved_battle::SavedBattleGame;
use crate::serialization::BattleSnapshot;
use crate::states::{
    check_reserved_tu, BattleEvents, BattleState, Explosion, MeleeAttack, ProjectileFly, PsiAttack, Request,
    StateContext, Step, UnitDie, UnitTurn, UnitWalk,
};
use crate::tile_engine::TileEngine;
use crate::unit::{Faction, UnitId, UnitStatus};

/// Selection rounds an AI unit gets per turn.
const MAX_AI_PASSES: u32 = 2;
/// Morale a killer gains for an enemy, or loses for a friend.
const MURDER_MORALE: i32 = 20;
/// Morale the winning side gains per enemy casualty.
const VICTORY_MORALE: i32 = 10;
/// Base morale the losing side loses per casualty, before bravery.
const LOSS_MORALE: i32 = 22;
/// Voxels above the floor at which a grenade lying on the ground bursts.
const GROUND_BURST_HEIGHT: i32 = 2;

/// A state waiting in the queue.
#[derive(Debug)]
struct Queued {
    state: BattleState,
    started: bool,
}

impl Queued {
    const fn new(state: BattleState) -> Self {
        Self { state, started: false }
    }
}

/// Tally handed to the debriefing when the battle ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionOutcome {
    /// True if the player pulled out before the end.
    pub aborted: bool,
    /// Turn the battle ended on.
    pub turns: i32,
    /// Player units still on their feet.
    pub player_survivors: usize,
    /// Player units killed.
    pub player_killed: usize,
    /// Player units left unconscious; lost on an abort.
    pub player_unconscious: usize,
    /// Aliens killed.
    pub aliens_killed: usize,
    /// Aliens taken alive.
    pub aliens_captured: usize,
    /// Aliens still standing.
    pub aliens_remaining: usize,
    /// Civilians alive at the end.
    pub civilians_saved: usize,
    /// Civilians killed.
    pub civilians_killed: usize,
    /// True if a must-destroy terrain part went down.
    pub objective_destroyed: bool,
}

/// The battle scheduler.
///
/// Only the front state of the queue runs. Turn changes happen only when
/// the queue is empty, through the [`BattleState::EndTurn`] placeholder.
pub struct BattlescapeGame<R: RandomSource = BattleRng> {
    save: SavedBattleGame,
    config: SimulationConfig,
    rng: R,
    states: VecDeque<Queued>,
    current_action: BattleAction,
    preview_target: Option<Position>,
    ai_actions: u32,
    ai_passes: HashMap<UnitId, u32>,
    player_panic_handled: bool,
    autoplay: bool,
    battle_over: bool,
    tick: u64,
}

impl<R: RandomSource> BattlescapeGame<R> {
    /// Scheduler over a prepared battle.
    pub fn new(save: SavedBattleGame, config: SimulationConfig, rng: R) -> Self {
        let mut game = Self {
            save,
            config,
            rng,
            states: VecDeque::new(),
            current_action: BattleAction::default(),
            preview_target: None,
            ai_actions: 0,
            ai_passes: HashMap::new(),
            player_panic_handled: false,
            autoplay: false,
            battle_over: false,
            tick: 0,
        };
        if game.config.debug_mode && !game.save.debug_mode() {
            game.save.set_debug_mode();
        }
        let mut engine = TileEngine::new(&mut game.save, &game.config);
        engine.calculate_sun_shading();
        engine.calculate_terrain_lighting();
        engine.calculate_unit_lighting();
        engine.calculate_all_fov();
        game
    }

    /// Let the AI play the player's side as well.
    pub fn set_autoplay(&mut self, autoplay: bool) {
        self.autoplay = autoplay;
    }

    /// The battle.
    #[must_use]
    pub const fn save(&self) -> &SavedBattleGame {
        &self.save
    }

    /// Mutable access to the battle, for setup between ticks.
    pub fn save_mut(&mut self) -> &mut SavedBattleGame {
        &mut self.save
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The random source.
    #[must_use]
    pub const fn rng(&self) -> &R {
        &self.rng
    }

    /// Ticks run so far.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Number of queued states.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.states.len()
    }

    /// Names of the queued states, front first.
    pub fn queued_states(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.states.iter().map(|queued| queued.state.name())
    }

    /// True while an action is playing out.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.states.is_empty()
    }

    /// The player's pending action (targeting mode, weapon).
    #[must_use]
    pub const fn current_action(&self) -> &BattleAction {
        &self.current_action
    }

    /// True once one side has nobody left standing.
    #[must_use]
    pub const fn is_battle_over(&self) -> bool {
        self.battle_over
    }

    /// Advance the battle by one tick.
    ///
    /// # System Execution Order
    ///
    /// 1. UFO door animation
    /// 2. With an empty queue: panicking units, then the AI of the side to
    ///    move (or nothing, waiting for the player)
    /// 3. Otherwise: the front state is started or stepped; requests it made
    ///    are applied and a finished state is popped
    /// 4. With the queue drained: the battle-over check
    pub fn think(&mut self) -> BattleEvents {
        let mut events = BattleEvents::default();
        if self.battle_over {
            return events;
        }

        // 1. Doors
        TileEngine::new(&mut self.save, &self.config).animate_doors();

        // 2-3. Decisions or state steps
        if self.states.is_empty() {
            self.idle();
        } else {
            self.advance_front(&mut events);
        }

        // 4. Battle over
        if self.states.is_empty() && self.check_battle_over() {
            debug!(turn = self.save.turn(), "Battle over");
            self.battle_over = true;
            events.battle_over = true;
        }

        self.tick += 1;

        #[cfg(debug_assertions)]
        {
            let hash = self.save.state_hash();
            tracing::debug!(tick = self.tick, state_hash = hash, "Battle state hash");
        }

        #[cfg(feature = "debug-validation")]
        for violation in self.save.check_invariants() {
            tracing::error!(tick = self.tick, %violation, "Battle invariant violated");
        }

        events
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Queue a state to run before everything else.
    pub fn state_push_front(&mut self, state: BattleState) {
        debug!(state = state.name(), "State pushed to front");
        self.states.push_front(Queued::new(state));
    }

    /// Queue a state to run after the front one.
    pub fn state_push_next(&mut self, state: BattleState) {
        debug!(state = state.name(), "State pushed next");
        let at = usize::from(!self.states.is_empty());
        self.states.insert(at, Queued::new(state));
    }

    /// Queue a state to run after everything queued.
    pub fn state_push_back(&mut self, state: BattleState) {
        debug!(state = state.name(), "State pushed to back");
        self.states.push_back(Queued::new(state));
    }

    fn advance_front(&mut self, events: &mut BattleEvents) {
        let Some(mut queued) = self.states.pop_front() else {
            return;
        };
        if queued.state.is_end_turn() {
            if self.states.is_empty() {
                self.end_turn(events);
            } else {
                self.states.push_back(queued);
            }
            return;
        }

        let mut ctx = StateContext::new(&mut self.save, &self.config, &mut self.rng, events);
        let step = if queued.started {
            queued.state.think(&mut ctx)
        } else {
            queued.started = true;
            debug!(state = queued.state.name(), actor = ?queued.state.actor(), "State started");
            queued.state.init(&mut ctx)
        };
        let requests = ctx.into_requests();

        let running = step == Step::Continue;
        if running {
            self.states.push_front(queued);
            self.apply_requests(requests, 0, true, events);
        } else {
            self.apply_requests(requests, 0, false, events);
            debug!(state = queued.state.name(), "State finished");
            self.state_done(&queued.state, events);
        }
    }

    /// Apply what a state asked for. `cursor` is the slot of the state that
    /// made the requests; `running` says whether it is still in the queue.
    fn apply_requests(&mut self, requests: Vec<Request>, mut cursor: usize, running: bool, events: &mut BattleEvents) {
        let next_slot = |cursor: usize| if running { cursor + 1 } else { cursor };
        for request in requests {
            match request {
                Request::PushFront(state) => {
                    self.states.insert(0, Queued::new(state));
                    cursor += 1;
                }
                Request::PushNext(state) => {
                    let at = next_slot(cursor).min(self.states.len());
                    self.states.insert(at, Queued::new(state));
                }
                Request::PushBack(state) => self.states.push_back(Queued::new(state)),
                Request::CheckCasualties {
                    murderer,
                    damage_type,
                    terrain,
                } => {
                    for die in self.check_for_casualties(murderer, damage_type, terrain) {
                        let at = next_slot(cursor).min(self.states.len());
                        self.states.insert(at, Queued::new(BattleState::UnitDie(die)));
                    }
                }
            }
        }
    }

    /// Bookkeeping once a state leaves the queue.
    fn state_done(&mut self, state: &BattleState, events: &mut BattleEvents) {
        if let Some(action) = state.action() {
            if let (Some(message), Some(actor)) = (action.result, action.actor) {
                let player_controlled = !self.autoplay
                    && self.save.unit(actor).is_some_and(|u| u.faction() == Faction::Player);
                if player_controlled {
                    warn!(unit = %actor, kind = ?action.kind, %message, "Action rejected");
                    events.warnings.push(message);
                } else {
                    debug!(unit = %actor, kind = ?action.kind, %message, "AI action rejected");
                }
            }
            if action.actor.is_some() && action.actor == self.current_action.actor && action.kind != BattleActionType::Walk {
                self.current_action.kind = BattleActionType::None;
                self.current_action.clear_targeting();
            }
        }

        if let Some(selected) = self.save.selected_unit() {
            if self.save.unit(selected).map_or(true, |u| u.is_out()) {
                self.save.set_selected_unit(None);
                if self.save.side() == Faction::Player && !self.autoplay {
                    self.save.select_next_unit(&[Faction::Player], false);
                }
            }
        }
    }

    // ========================================================================
    // Decisions
    // ========================================================================

    fn idle(&mut self) {
        let side = self.save.side();
        let ai_side = side != Faction::Player || self.autoplay;
        if side == Faction::Player && !self.player_panic_handled {
            if let Some(id) = self.panicking_unit(side) {
                self.handle_panicking_unit(id);
                return;
            }
            self.player_panic_handled = true;
        }
        if ai_side {
            self.think_ai(side);
        }
    }

    fn panicking_unit(&self, side: Faction) -> Option<UnitId> {
        self.save
            .units()
            .iter()
            .find(|u| u.faction() == side && matches!(u.status(), UnitStatus::Panicking | UnitStatus::Berserk))
            .map(crate::unit::BattleUnit::id)
    }

    fn think_ai(&mut self, side: Faction) {
        if let Some(id) = self.panicking_unit(side) {
            self.handle_panicking_unit(id);
            return;
        }
        let current = self.save.selected_unit().filter(|id| {
            self.save
                .unit(*id)
                .is_some_and(|u| u.faction() == side && !u.is_down() && !u.dont_reselect())
        });
        if let Some(id) = current {
            if self.ai_actions < self.config.ai_actions_per_unit {
                self.handle_ai(id);
                return;
            }
        }

        self.ai_actions = 0;
        loop {
            let Some(id) = self.save.select_next_unit(&[side], true) else {
                debug!(side = ?side, "No AI unit left to act");
                self.request_end_turn();
                return;
            };
            let passes = self.ai_passes.entry(id).or_default();
            *passes += 1;
            if *passes <= MAX_AI_PASSES {
                debug!(unit = %id, pass = *passes, "AI unit selected");
                return;
            }
            if let Some(unit) = self.save.unit_mut(id) {
                unit.set_dont_reselect(true);
            }
        }
    }

    /// Ask a unit's AI for its next action and queue it.
    fn handle_ai(&mut self, id: UnitId) {
        let Some(unit) = self.save.unit_mut(id) else {
            return;
        };
        let faction = unit.faction();
        let mut ai = match unit.take_ai() {
            Some(ai) => ai,
            None => {
                let fresh = AiState::for_faction(faction)
                    .or_else(|| self.autoplay.then(|| AiState::Alien(AlienState::default())));
                let Some(mut fresh) = fresh else {
                    unit.set_dont_reselect(true);
                    return;
                };
                fresh.enter(&mut self.save, id);
                fresh
            }
        };

        let mut action = BattleAction::new(BattleActionType::None, id);
        action.number = self.ai_actions;
        ai.think(&mut action, id, &mut self.save, &self.config, &mut self.rng);
        if let Some(unit) = self.save.unit_mut(id) {
            unit.set_ai(Some(ai));
        }
        self.ai_actions += 1;
        if self.config.trace_ai {
            debug!(unit = %id, kind = ?action.kind, target = %action.target, number = action.number, "AI action");
        }
        self.queue_ai_action(id, action);
    }

    fn queue_ai_action(&mut self, id: UnitId, mut action: BattleAction) {
        let weapon_rule = action.weapon.and_then(|w| self.save.item(w)).map(crate::item::BattleItem::rules_arc);
        let tu_for = |game: &Self, kind: BattleActionType| {
            game.save
                .unit(id)
                .map_or(0, |u| u.action_tu(kind, weapon_rule.as_deref()))
        };
        match action.kind {
            BattleActionType::Walk => self.state_push_back(BattleState::Walk(UnitWalk::new(action))),
            BattleActionType::Turn => self.state_push_back(BattleState::Turn(UnitTurn::new(action))),
            kind if kind.is_shot() => {
                action.tu = tu_for(self, kind);
                self.state_push_back(BattleState::ProjectileFly(ProjectileFly::new(action)));
            }
            BattleActionType::Throw => {
                let throw_tu = tu_for(self, BattleActionType::Throw);
                let handling = (action.tu - throw_tu).max(0);
                let debug_mode = self.save.debug_mode();
                if let Some(grenade) = action.weapon.and_then(|w| self.save.item_mut(w)) {
                    if !grenade.is_primed() {
                        grenade.prime(0);
                    }
                }
                if let Some(unit) = self.save.unit_mut(id) {
                    unit.spend_time_units(handling, debug_mode);
                }
                action.tu = throw_tu;
                self.state_push_back(BattleState::ProjectileFly(ProjectileFly::new(action)));
            }
            BattleActionType::Hit | BattleActionType::Stun => {
                action.tu = tu_for(self, action.kind);
                self.state_push_back(BattleState::MeleeAttack(MeleeAttack::new(action)));
            }
            BattleActionType::MindControl | BattleActionType::Panic => {
                action.tu = tu_for(self, action.kind);
                self.state_push_back(BattleState::PsiAttack(PsiAttack::new(action)));
            }
            BattleActionType::PickUp => {
                if let Some(item) = action.weapon {
                    let outcome = take_item_from_ground(&mut self.save, &self.config, id, item);
                    debug!(unit = %id, %item, ?outcome, "AI pickup");
                }
            }
            BattleActionType::Rethink => {}
            BattleActionType::None | BattleActionType::Use | BattleActionType::Prime => {
                if let Some(unit) = self.save.unit_mut(id) {
                    unit.set_dont_reselect(true);
                }
                self.ai_actions = self.config.ai_actions_per_unit;
            }
            _ => {}
        }
    }

    /// Run a unit whose morale broke.
    ///
    /// A panicking unit drops what it holds and runs as far from the enemy
    /// as its TU allow. A berserk unit turns on the nearest enemy it can
    /// see, or a random spot, and empties its weapon.
    pub fn handle_panicking_unit(&mut self, id: UnitId) {
        let Some(unit) = self.save.unit(id) else {
            return;
        };
        let status = unit.status();
        let position = unit.position();
        let faction = unit.faction();
        debug!(unit = %id, ?status, "Morale broke");
        match status {
            UnitStatus::Panicking => {
                let alien_turn = self.save.side() == Faction::Hostile;
                for slot in [InventorySlot::RightHand, InventorySlot::LeftHand] {
                    if let Some(item) = self.save.item_in_slot(id, slot) {
                        let ground = self.save.ground_below(position);
                        if self.save.drop_item(item, ground) && alien_turn {
                            if let Some(dropped) = self.save.item_mut(item) {
                                dropped.set_dropped_on_alien_turn(true);
                            }
                        }
                    }
                }
                let target = self.flee_target(id, faction);
                if let Some(unit) = self.save.unit_mut(id) {
                    unit.set_status(UnitStatus::Standing);
                    unit.set_dont_reselect(true);
                    if target.is_none() {
                        unit.set_time_units(0);
                    }
                }
                if let Some(target) = target {
                    let mut action = BattleAction::new(BattleActionType::Walk, id).with_target(target);
                    action.desperate = true;
                    self.state_push_back(BattleState::Walk(UnitWalk::fleeing(action)));
                }
            }
            UnitStatus::Berserk => {
                let enemy = unit.visible_units().iter().copied().find(|other| {
                    self.save
                        .unit(*other)
                        .is_some_and(|o| !o.is_out() && faction.is_enemy_of(o.faction()))
                });
                let target = match enemy.and_then(|e| self.save.unit(e)) {
                    Some(enemy) => enemy.position(),
                    None => {
                        let (width, length, _) = self.save.dimensions();
                        Position::new(
                            self.rng.generate(0, width - 1),
                            self.rng.generate(0, length - 1),
                            position.z,
                        )
                    }
                };
                let weapon = self.save.main_hand_weapon(id);
                let rounds = weapon
                    .and_then(|w| self.save.item(w))
                    .and_then(crate::item::BattleItem::ammo_item)
                    .and_then(|ammo| self.save.item(ammo))
                    .map_or(0, |clip| match clip.ammo_quantity() {
                        q if q < 0 => self.config.balance.berserk_shots,
                        q => q.min(self.config.balance.berserk_shots),
                    });
                if let Some(unit) = self.save.unit_mut(id) {
                    unit.set_status(UnitStatus::Standing);
                    unit.set_dont_reselect(true);
                    unit.set_time_units(0);
                }
                let turn = BattleAction::new(BattleActionType::None, id).with_target(target);
                self.state_push_back(BattleState::Turn(UnitTurn::new(turn)));
                let shot = BattleAction::new(BattleActionType::SnapShot, id)
                    .with_target(target)
                    .with_weapon(weapon);
                for _ in 0..rounds {
                    self.state_push_back(BattleState::ProjectileFly(ProjectileFly::new(shot.clone())));
                }
            }
            _ => {}
        }
    }

    /// Reachable tile farthest from every enemy still standing.
    fn flee_target(&self, id: UnitId, faction: Faction) -> Option<Position> {
        let unit = self.save.unit(id)?;
        let enemies: Vec<Position> = self
            .save
            .units()
            .iter()
            .filter(|o| !o.is_out() && faction.is_enemy_of(o.faction()))
            .map(crate::unit::BattleUnit::position)
            .collect();
        let safety = |pos: Position| enemies.iter().map(|e| e.distance(pos)).min().unwrap_or(0);
        let current = safety(unit.position());
        Pathfinding::new(&self.save)
            .find_reachable(unit, unit.time_units())
            .into_iter()
            .map(|(pos, _)| (safety(pos), pos))
            .filter(|(score, _)| *score > current)
            .max_by_key(|(score, pos)| (*score, -pos.x, -pos.y))
            .map(|(_, pos)| pos)
    }

    // ========================================================================
    // Casualties
    // ========================================================================

    /// Find units that went down, apply the morale fallout and return their
    /// death states.
    ///
    /// The killer gains morale for an enemy and loses it for a friend. The
    /// victim's side loses morale, less for the brave; the other side gains
    /// some. Surviving aliens remember who did it.
    fn check_for_casualties(
        &mut self,
        murderer: Option<UnitId>,
        damage_type: Option<DamageType>,
        terrain: bool,
    ) -> Vec<UnitDie> {
        let queued: Vec<UnitId> = self
            .states
            .iter()
            .filter_map(|queued| match &queued.state {
                BattleState::UnitDie(die) => Some(die.victim()),
                _ => None,
            })
            .collect();
        let victims: Vec<(UnitId, Faction)> = self
            .save
            .units()
            .iter()
            .filter(|u| u.should_fall() && !queued.contains(&u.id()))
            .filter(|u| match u.status() {
                UnitStatus::Dead | UnitStatus::Collapsing => false,
                UnitStatus::Unconscious => u.health() == 0,
                _ => true,
            })
            .map(|u| (u.id(), u.original_faction()))
            .collect();

        let mut dying = Vec::new();
        for (victim, victim_faction) in victims {
            let already_down = self.save.unit(victim).is_some_and(|u| u.is_out());
            if !already_down {
                self.morale_fallout(victim, victim_faction, murderer);
            }
            let kind = damage_type.unwrap_or(if terrain {
                DamageType::HighExplosive
            } else {
                DamageType::None
            });
            debug!(unit = %victim, murderer = ?murderer, damage = ?kind, terrain, "Casualty");
            dying.push(UnitDie::new(victim, kind, murderer));
        }
        dying
    }

    fn morale_fallout(&mut self, victim: UnitId, victim_faction: Faction, murderer: Option<UnitId>) {
        if let Some(killer) = murderer.filter(|m| *m != victim) {
            if let Some(unit) = self.save.unit_mut(killer) {
                if unit.faction().is_enemy_of(victim_faction) {
                    unit.morale_change(MURDER_MORALE);
                } else if unit.faction() == victim_faction {
                    unit.morale_change(-MURDER_MORALE);
                }
            }
        }
        let others: Vec<UnitId> = self
            .save
            .units()
            .iter()
            .filter(|u| u.id() != victim && !u.is_out())
            .map(crate::unit::BattleUnit::id)
            .collect();
        for id in others {
            let Some(unit) = self.save.unit_mut(id) else {
                continue;
            };
            if unit.original_faction() == victim_faction {
                let bravery = unit.stats().bravery;
                unit.morale_change(-(LOSS_MORALE - bravery / 10 * 2));
                if let Some(killer) = murderer.filter(|m| *m != id) {
                    if let Some(mut ai) = unit.take_ai() {
                        ai.set_was_hit_by(killer);
                        unit.set_ai(Some(ai));
                    }
                }
            } else if unit.faction().is_enemy_of(victim_faction) {
                unit.morale_change(VICTORY_MORALE);
            }
        }
    }

    fn check_battle_over(&self) -> bool {
        let players = self.save.active_units(Faction::Player).next().is_some();
        let aliens = self.save.active_units(Faction::Hostile).next().is_some();
        !players || !aliens
    }

    // ========================================================================
    // Turn flow
    // ========================================================================

    /// Ask for the turn to end once everything queued has played out.
    pub fn request_end_turn(&mut self) {
        if self.states.iter().any(|queued| queued.state.is_end_turn()) {
            return;
        }
        debug!(side = ?self.save.side(), queued = self.states.len(), "End of turn requested");
        self.states.push_back(Queued::new(BattleState::EndTurn));
    }

    /// Hand the turn over. Grenades whose fuse ran out go off first; the
    /// turn only changes once their blasts have been resolved.
    fn end_turn(&mut self, events: &mut BattleEvents) {
        let hot: Vec<(ItemId, Position, Arc<RuleItem>, Option<UnitId>)> = self
            .save
            .items()
            .filter(|item| item.fuse_timer() == 0 && item.rules().is_grenade())
            .filter_map(|item| {
                item.ground_position()
                    .map(|pos| (item.id(), pos, item.rules_arc(), item.previous_owner()))
            })
            .collect();
        if !hot.is_empty() {
            for (item, pos, rule, thrower) in hot {
                debug!(%item, position = %pos, "Grenade fuse ran out");
                self.save.destroy_item(item);
                let center = pos.to_voxel_center() + Position::new(0, 0, GROUND_BURST_HEIGHT);
                self.state_push_back(BattleState::Explosion(Explosion::grenade(center, &rule, thrower)));
            }
            self.request_end_turn();
            return;
        }

        let mut engine = TileEngine::new(&mut self.save, &self.config);
        let closed = engine.close_ufo_doors();
        if closed > 0 {
            debug!(closed, "UFO doors closed");
        }
        let broke = self.save.end_turn(&self.config, &mut self.rng);
        let side = self.save.side();
        events.turn_changes.push((self.save.turn(), side));
        debug!(turn = self.save.turn(), side = ?side, panicking = broke.len(), "New turn");

        self.ai_actions = 0;
        self.ai_passes.clear();
        self.player_panic_handled = false;
        self.preview_target = None;
        self.current_action = BattleAction::default();
        if side == Faction::Player && !self.autoplay {
            self.current_action.actor = self.save.selected_unit();
        } else {
            self.save.set_selected_unit(None);
        }

        // burning and smoke may have finished someone off
        let dying = self.check_for_casualties(None, Some(DamageType::Incendiary), true);
        for die in dying {
            self.state_push_back(BattleState::UnitDie(die));
        }
        let chained = TileEngine::new(&mut self.save, &self.config).check_for_terrain_explosions();
        if let Some((voxel, power)) = chained {
            self.state_push_back(BattleState::Explosion(Explosion::terrain(voxel, power)));
        }
    }

    /// Close the battle and tally the result.
    pub fn finish_battle(&mut self, abort: bool) -> MissionOutcome {
        self.states.clear();
        self.battle_over = true;
        let mut outcome = MissionOutcome {
            aborted: abort,
            turns: self.save.turn(),
            objective_destroyed: self.save.objective_destroyed(),
            ..MissionOutcome::default()
        };
        for unit in self.save.units() {
            let dead = unit.status() == UnitStatus::Dead;
            let unconscious = unit.status() == UnitStatus::Unconscious;
            match unit.original_faction() {
                Faction::Player if dead => outcome.player_killed += 1,
                Faction::Player if unconscious => outcome.player_unconscious += 1,
                Faction::Player => outcome.player_survivors += 1,
                Faction::Hostile if dead => outcome.aliens_killed += 1,
                Faction::Hostile if unconscious => outcome.aliens_captured += 1,
                Faction::Hostile => outcome.aliens_remaining += 1,
                Faction::Neutral if dead => outcome.civilians_killed += 1,
                Faction::Neutral => outcome.civilians_saved += 1,
            }
        }
        if abort {
            // nobody stays behind to collect the captives
            outcome.aliens_captured = 0;
        }
        debug!(?outcome, "Battle finished");
        outcome
    }

    // ========================================================================
    // Player actions
    // ========================================================================

    /// Pick the action the next click performs.
    pub fn select_action(&mut self, kind: BattleActionType, weapon: Option<ItemId>) {
        let actor = self.save.selected_unit();
        self.current_action = BattleAction {
            kind,
            actor,
            weapon,
            ..BattleAction::default()
        };
        self.cancel_preview();
    }

    /// Select a player unit.
    pub fn select_unit(&mut self, unit: UnitId) -> bool {
        let selectable = self
            .save
            .unit(unit)
            .is_some_and(|u| u.faction() == Faction::Player && !u.is_down());
        if selectable {
            self.save.set_selected_unit(Some(unit));
            self.current_action = BattleAction::new(BattleActionType::None, unit);
            self.cancel_preview();
        }
        selectable
    }

    /// Left click on a tile.
    ///
    /// In a targeting mode the selected unit fires, throws, strikes or
    /// attacks with psi at the tile. Otherwise a click on another player
    /// unit selects it and a click elsewhere walks there (with the path
    /// preview enabled, the first click previews and a second click on the
    /// same tile confirms). Rejected actions queue nothing.
    pub fn primary_action(&mut self, target: Position) -> std::result::Result<(), ActionMessage> {
        if self.save.side() != Faction::Player || self.is_busy() {
            return Ok(());
        }
        let Some(actor) = self.save.selected_unit() else {
            return Ok(());
        };
        self.current_action.actor = Some(actor);
        self.current_action.target = target;
        let result = match self.current_action.kind {
            kind if kind.is_shot() || kind == BattleActionType::Throw => self.queue_shot(actor, kind),
            kind if kind.is_melee() => self.queue_melee(actor, kind),
            kind if kind.is_psionic() => self.queue_psi(actor, kind),
            _ => self.click_to_walk(actor, target),
        };
        if let Err(message) = result {
            debug!(unit = %actor, kind = ?self.current_action.kind, %message, "Action rejected");
            self.current_action.reject(message);
        }
        result
    }

    fn click_to_walk(&mut self, actor: UnitId, target: Position) -> std::result::Result<(), ActionMessage> {
        if let Some(other) = self.save.unit_at(target).filter(|id| *id != actor) {
            if self.select_unit(other) {
                return Ok(());
            }
        }
        let unit = self.save.unit(actor).ok_or(ActionMessage::NoTarget)?;
        let path = Pathfinding::new(&self.save).calculate(unit, target, None);
        let Some(first) = path.peek() else {
            return Ok(());
        };
        if first.total_tu > unit.time_units() && !self.save.debug_mode() {
            return Err(ActionMessage::NotEnoughTimeUnits);
        }
        if !self.check_reserved_tu(actor, first.total_tu) {
            return Err(ActionMessage::TimeUnitsReserved);
        }

        if self.config.preview_mode.is_enabled() && self.preview_target != Some(target) {
            let reserved = self.reserved_tu(actor);
            let time_units = unit.time_units();
            remove_preview(&mut self.save);
            preview_path(&mut self.save, &path, time_units, reserved, self.config.preview_colors);
            self.preview_target = Some(target);
            return Ok(());
        }
        self.cancel_preview();
        let mut action = BattleAction::new(BattleActionType::Walk, actor).with_target(target);
        action.tu = path.total_tu();
        self.state_push_back(BattleState::Walk(UnitWalk::new(action)));
        Ok(())
    }

    fn queue_shot(&mut self, actor: UnitId, kind: BattleActionType) -> std::result::Result<(), ActionMessage> {
        let weapon = self.current_action.weapon.ok_or(ActionMessage::NoTarget)?;
        let tu = self.action_cost(actor, kind, weapon)?;
        let mut action = self.current_action.clone();
        action.tu = tu;
        self.state_push_back(BattleState::ProjectileFly(ProjectileFly::new(action)));
        Ok(())
    }

    fn queue_melee(&mut self, actor: UnitId, kind: BattleActionType) -> std::result::Result<(), ActionMessage> {
        let weapon = self.current_action.weapon.ok_or(ActionMessage::NoTarget)?;
        let tu = self.action_cost(actor, kind, weapon)?;
        let mut action = self.current_action.clone();
        action.tu = tu;
        self.state_push_back(BattleState::MeleeAttack(MeleeAttack::new(action)));
        Ok(())
    }

    fn queue_psi(&mut self, actor: UnitId, kind: BattleActionType) -> std::result::Result<(), ActionMessage> {
        let weapon = self.current_action.weapon.ok_or(ActionMessage::NoTarget)?;
        if self.save.unit_at(self.current_action.target).is_none() {
            return Err(ActionMessage::NoTarget);
        }
        let tu = self.action_cost(actor, kind, weapon)?;
        let mut action = self.current_action.clone();
        action.tu = tu;
        self.state_push_back(BattleState::PsiAttack(PsiAttack::new(action)));
        Ok(())
    }

    /// TU an action costs, checked against what the unit has.
    fn action_cost(&self, actor: UnitId, kind: BattleActionType, weapon: ItemId) -> std::result::Result<i32, ActionMessage> {
        let unit = self.save.unit(actor).ok_or(ActionMessage::NoTarget)?;
        let item = self.save.item(weapon).ok_or(ActionMessage::NoTarget)?;
        let tu = unit.action_tu(kind, Some(item.rules()));
        if tu > unit.time_units() && !self.save.debug_mode() {
            return Err(ActionMessage::NotEnoughTimeUnits);
        }
        Ok(tu)
    }

    /// Right click on a tile: drop the targeting mode, or turn to face it.
    pub fn secondary_action(&mut self, target: Position) {
        if self.save.side() != Faction::Player || self.is_busy() {
            return;
        }
        if self.current_action.kind != BattleActionType::None {
            self.current_action.kind = BattleActionType::None;
            self.current_action.clear_targeting();
            return;
        }
        let Some(actor) = self.save.selected_unit() else {
            return;
        };
        self.cancel_preview();
        let action = BattleAction::new(BattleActionType::Turn, actor).with_target(target);
        self.state_push_back(BattleState::Turn(UnitTurn::new(action)));
    }

    /// Stop what is in progress: the front state if it can be interrupted,
    /// otherwise the targeting mode or path preview. Nothing already spent
    /// is given back.
    pub fn cancel_current_action(&mut self) -> bool {
        if let Some(front) = self.states.front_mut() {
            let cancelled = front.state.cancel();
            if cancelled {
                debug!(state = front.state.name(), "State cancelled");
            }
            if self.current_action.kind != BattleActionType::None {
                self.current_action.kind = BattleActionType::None;
                self.current_action.clear_targeting();
            }
            return cancelled;
        }
        if self.cancel_preview() {
            return true;
        }
        if self.current_action.kind != BattleActionType::None {
            self.current_action.kind = BattleActionType::None;
            self.current_action.clear_targeting();
            return true;
        }
        false
    }

    fn cancel_preview(&mut self) -> bool {
        self.preview_target = None;
        remove_preview(&mut self.save)
    }

    /// TU the player's reserve setting keeps back for `unit`.
    fn reserved_tu(&self, unit: UnitId) -> i32 {
        let kind = self.save.tu_reserved();
        let (Some(actor), Some(weapon)) = (
            self.save.unit(unit),
            self.save.main_hand_weapon(unit).and_then(|w| self.save.item(w)),
        ) else {
            return 0;
        };
        if kind == BattleActionType::None {
            return 0;
        }
        actor.action_tu(kind, Some(weapon.rules()))
    }

    /// True if `unit` can spend `tu` without eating into the TU its side
    /// keeps back. Always true in debug mode.
    #[must_use]
    pub fn check_reserved_tu(&self, unit: UnitId, tu: i32) -> bool {
        self.save.debug_mode() || check_reserved_tu(&self.save, unit, tu)
    }

    /// Set which shot the player keeps TU back for.
    pub fn set_tu_reserved(&mut self, kind: BattleActionType) {
        self.save.set_tu_reserved(kind);
    }

    /// Kneel or stand up the selected unit.
    pub fn kneel(&mut self, unit: UnitId) -> std::result::Result<(), ActionMessage> {
        let debug_mode = self.save.debug_mode();
        let kneeled = self.save.unit(unit).ok_or(ActionMessage::NoTarget)?.is_kneeled();
        let cost = if kneeled {
            self.config.balance.stand_tu
        } else {
            self.config.balance.kneel_tu
        };
        if !self.check_reserved_tu(unit, cost) {
            return Err(ActionMessage::TimeUnitsReserved);
        }
        let actor = self.save.unit_mut(unit).ok_or(ActionMessage::NoTarget)?;
        if actor.is_down() {
            return Err(ActionMessage::NoTarget);
        }
        if !actor.spend_time_units(cost, debug_mode) {
            return Err(ActionMessage::NotEnoughTimeUnits);
        }
        actor.kneel(!kneeled);
        TileEngine::new(&mut self.save, &self.config).calculate_fov(unit);
        debug!(%unit, kneeled = !kneeled, "Stance changed");
        Ok(())
    }

    /// Move the unit one level up or down (flying or on a grav lift).
    /// Returns false if the move is not possible from here.
    pub fn move_up_down(&mut self, unit: UnitId, up: bool) -> bool {
        let Some(actor) = self.save.unit(unit) else {
            return false;
        };
        let step = if up { PathStep::Up } else { PathStep::Down };
        let pos = actor.position();
        if !Pathfinding::new(&self.save).validate_up_down(actor.movement_type(), pos, step) {
            return false;
        }
        let target = pos + step.offset();
        self.cancel_preview();
        let action = BattleAction::new(BattleActionType::Walk, unit).with_target(target);
        self.state_push_back(BattleState::Walk(UnitWalk::new(action)));
        true
    }

    /// Put an item down at the unit's feet; it falls to the first floor.
    pub fn drop_item(&mut self, unit: UnitId, item: ItemId) -> bool {
        let Some(actor) = self.save.unit(unit) else {
            return false;
        };
        if self.save.item(item).and_then(crate::item::BattleItem::owner) != Some(unit) {
            return false;
        }
        let ground = self.save.ground_below(actor.position());
        let dropped = self.save.drop_item(item, ground);
        if dropped {
            if self.save.side() == Faction::Hostile {
                if let Some(item) = self.save.item_mut(item) {
                    item.set_dropped_on_alien_turn(true);
                }
            }
            TileEngine::new(&mut self.save, &self.config).calculate_terrain_lighting();
        }
        dropped
    }

    /// Prime a held grenade to go off after `fuse` turns.
    pub fn prime_grenade(&mut self, unit: UnitId, item: ItemId, fuse: i32) -> std::result::Result<(), ActionMessage> {
        let grenade = self.save.item(item).ok_or(ActionMessage::NoTarget)?;
        if grenade.owner() != Some(unit) || !grenade.rules().is_grenade() {
            return Err(ActionMessage::NoTarget);
        }
        if grenade.is_primed() {
            return Err(ActionMessage::AlreadyPrimed);
        }
        let cost = self.action_cost(unit, BattleActionType::Prime, item)?;
        if !self.check_reserved_tu(unit, cost) {
            return Err(ActionMessage::TimeUnitsReserved);
        }
        let debug_mode = self.save.debug_mode();
        if let Some(actor) = self.save.unit_mut(unit) {
            actor.spend_time_units(cost, debug_mode);
        }
        if let Some(grenade) = self.save.item_mut(item) {
            grenade.prime(fuse);
        }
        debug!(%unit, %item, fuse, "Grenade primed");
        Ok(())
    }

    /// Use a medikit on `patient`, the unit itself or one next to it.
    ///
    /// Returns false when the kit has no charge of that kind left.
    pub fn use_medikit(
        &mut self,
        unit: UnitId,
        item: ItemId,
        patient: UnitId,
        effect: MedikitAction,
    ) -> std::result::Result<bool, ActionMessage> {
        let kit = self.save.item(item).ok_or(ActionMessage::NoTarget)?;
        if kit.owner() != Some(unit) || kit.rules().battle_type != BattleType::Medikit {
            return Err(ActionMessage::NoTarget);
        }
        let rule = kit.rules_arc();
        if patient != unit {
            let (from, to) = (
                self.save.unit(unit).ok_or(ActionMessage::NoTarget)?.position(),
                self.save.unit(patient).ok_or(ActionMessage::NoTarget)?.position(),
            );
            TileEngine::new(&mut self.save, &self.config)
                .valid_melee_range(unit, Direction::towards(from, to), Some(patient))
                .ok_or(ActionMessage::NotInRange)?;
        }
        let cost = self.action_cost(unit, BattleActionType::Use, item)?;
        let charged = match self.save.item_mut(item) {
            Some(kit) => match effect {
                MedikitAction::Heal => kit.use_heal(),
                MedikitAction::Stimulant => kit.use_stimulant(),
                MedikitAction::Painkiller => kit.use_painkiller(),
            },
            None => false,
        };
        if !charged {
            return Ok(false);
        }
        let debug_mode = self.save.debug_mode();
        if let Some(actor) = self.save.unit_mut(unit) {
            actor.spend_time_units(cost, debug_mode);
        }
        if let Some(target) = self.save.unit_mut(patient) {
            match effect {
                MedikitAction::Heal => target.heal(rule.heal_amount),
                MedikitAction::Stimulant => target.stimulant(rule.stimulant_amount, rule.stimulant_amount),
                MedikitAction::Painkiller => target.painkillers(),
            }
        }
        debug!(%unit, %patient, ?effect, "Medikit used");
        Ok(true)
    }
}

impl BattlescapeGame<BattleRng> {
    /// Capture the battle and the random stream.
    pub fn snapshot(&self) -> Result<BattleSnapshot> {
        BattleSnapshot::capture(&self.save, &self.rng)
    }

    /// Resume a battle from a snapshot.
    pub fn restore(snapshot: &BattleSnapshot, rules: Arc<Ruleset>, config: SimulationConfig) -> Result<Self> {
        let (save, rng) = snapshot.restore(rules)?;
        Ok(Self::new(save, config, rng))
    }
}
