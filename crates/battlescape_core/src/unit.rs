//! Runtime combatants.
//!
//! A [`BattleUnit`] is owned by the
//! [`SavedBattleGame`](crate::saved_battle::SavedBattleGame) unit list and
//! referred to everywhere else by [`UnitId`]. Its inventory is not stored
//! here: items record their carrier, and the battle answers "what does this
//! unit hold" by looking them up.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::action::BattleActionType;
use crate::ai::{AiRecord, AiState};
use crate::error::{BattleError, Result};
use crate::math::{apply_modifier, Fixed};
use crate::position::{Direction, Position};
use crate::rng::RandomSource;
use crate::rules::{
    ArmorSide, DamageType, MovementType, RuleArmor, RuleItem, Ruleset, UnitStats, UnitTemplate,
};

/// Hard cap on throwing distance in tiles.
pub const MAX_THROW_RANGE: i32 = 20;

/// Stable handle of a unit; the index into the battle's unit list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct UnitId(pub u32);

impl UnitId {
    /// Index into the unit list.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Side a unit fights for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Faction {
    /// Player controlled soldiers.
    #[default]
    Player,
    /// Aliens.
    Hostile,
    /// Civilians.
    Neutral,
}

impl Faction {
    /// True if units of these factions shoot each other.
    #[must_use]
    pub const fn is_enemy_of(self, other: Self) -> bool {
        match (self, other) {
            (Self::Hostile, Self::Player | Self::Neutral) => true,
            (Self::Player | Self::Neutral, Self::Hostile) => true,
            _ => false,
        }
    }
}

/// What a unit is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UnitStatus {
    /// Idle and able to act.
    #[default]
    Standing,
    /// Moving between tiles.
    Walking,
    /// Rotating towards a facing.
    Turning,
    /// Weapon raised.
    Aiming,
    /// Falling down after death or knock-out.
    Collapsing,
    /// Dead.
    Dead,
    /// Knocked out.
    Unconscious,
    /// Morale broke; flees or freezes.
    Panicking,
    /// Morale broke; shoots at anything.
    Berserk,
}

/// Experience gained this mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Experience {
    /// Shots that hit.
    pub firing: i32,
    /// Throws.
    pub throwing: i32,
    /// Melee hits.
    pub melee: i32,
    /// Reaction shots taken.
    pub reactions: i32,
    /// Psionic attacks that succeeded.
    pub psi_skill: i32,
    /// Panic rolls resisted.
    pub bravery: i32,
}

/// One combatant.
#[derive(Debug, Clone)]
pub struct BattleUnit {
    id: UnitId,
    template: Arc<UnitTemplate>,
    armor_rules: Arc<RuleArmor>,
    faction: Faction,
    original_faction: Faction,
    status: UnitStatus,

    position: Position,
    last_position: Position,
    destination: Position,
    direction: Direction,
    to_direction: Direction,
    walk_phase: u32,
    walk_diagonal: bool,
    fall_phase: u32,

    tu: i32,
    energy: i32,
    health: i32,
    morale: i32,
    stun: i32,
    fire: i32,
    armor: [i32; 5],
    morale_restored: i32,

    kneeled: bool,
    visible: bool,
    visible_units: Vec<UnitId>,
    turns_since_spotted: i32,
    dont_reselect: bool,
    experience: Experience,
    ai: Option<AiState>,
}

impl BattleUnit {
    /// Create a fresh unit from its template and armor.
    #[must_use]
    pub fn new(
        id: UnitId,
        template: Arc<UnitTemplate>,
        armor_rules: Arc<RuleArmor>,
        faction: Faction,
        position: Position,
    ) -> Self {
        let stats = template.stats;
        Self {
            id,
            faction,
            original_faction: faction,
            status: UnitStatus::Standing,
            position,
            last_position: position,
            destination: position,
            direction: Direction::North,
            to_direction: Direction::North,
            walk_phase: 0,
            walk_diagonal: false,
            fall_phase: 0,
            tu: stats.tu,
            energy: stats.stamina,
            health: stats.health,
            morale: 100,
            stun: 0,
            fire: 0,
            armor: armor_rules.armor,
            morale_restored: 0,
            kneeled: false,
            visible: false,
            visible_units: Vec::new(),
            turns_since_spotted: 255,
            dont_reselect: false,
            experience: Experience::default(),
            ai: None,
            template,
            armor_rules,
        }
    }

    /// Create a unit by template id, using the template's armor.
    pub fn from_rules(
        id: UnitId,
        template_id: &str,
        rules: &Ruleset,
        faction: Faction,
        position: Position,
    ) -> Result<Self> {
        let template = rules.unit(template_id)?;
        let armor = rules.armor(&template.armor)?;
        Ok(Self::new(id, template, armor, faction, position))
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Unit handle.
    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.id
    }

    /// Template (race, rank, soldier type).
    #[must_use]
    pub fn template(&self) -> &UnitTemplate {
        &self.template
    }

    /// Base statistics.
    #[must_use]
    pub fn stats(&self) -> &UnitStats {
        &self.template.stats
    }

    /// Armor rules worn.
    #[must_use]
    pub fn armor_rules(&self) -> &RuleArmor {
        &self.armor_rules
    }

    /// How the unit moves.
    #[must_use]
    pub fn movement_type(&self) -> MovementType {
        self.armor_rules.movement
    }

    /// Current faction.
    #[must_use]
    pub const fn faction(&self) -> Faction {
        self.faction
    }

    /// Change faction (mind control).
    pub fn set_faction(&mut self, faction: Faction) {
        self.faction = faction;
    }

    /// Faction at the start of the mission.
    #[must_use]
    pub const fn original_faction(&self) -> Faction {
        self.original_faction
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> UnitStatus {
        self.status
    }

    /// Force a status.
    pub fn set_status(&mut self, status: UnitStatus) {
        self.status = status;
    }

    /// True if dead or unconscious.
    #[must_use]
    pub const fn is_out(&self) -> bool {
        matches!(self.status, UnitStatus::Dead | UnitStatus::Unconscious)
    }

    /// True if dead, unconscious, or on the way down.
    #[must_use]
    pub const fn is_down(&self) -> bool {
        matches!(
            self.status,
            UnitStatus::Dead | UnitStatus::Unconscious | UnitStatus::Collapsing
        )
    }

    /// AI memory: turns the AI remembers an unseen target.
    #[must_use]
    pub fn intelligence(&self) -> i32 {
        self.template.intelligence
    }

    /// AI aggression, 0 to 2.
    #[must_use]
    pub fn aggression(&self) -> i32 {
        self.template.aggression
    }

    // ========================================================================
    // Position and facing
    // ========================================================================

    /// Tile the unit stands on.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: Position) {
        self.last_position = self.position;
        self.position = position;
        self.destination = position;
    }

    /// Tile the unit stood on before its last move.
    #[must_use]
    pub const fn last_position(&self) -> Position {
        self.last_position
    }

    /// Tile the current step ends on.
    #[must_use]
    pub const fn destination(&self) -> Position {
        self.destination
    }

    /// Facing.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Set the facing immediately.
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
        self.to_direction = direction;
    }

    /// Facing the unit is turning towards.
    #[must_use]
    pub const fn to_direction(&self) -> Direction {
        self.to_direction
    }

    /// Start turning to face a tile.
    pub fn look_at(&mut self, point: Position) {
        if point.x == self.position.x && point.y == self.position.y {
            return;
        }
        self.look_at_direction(Direction::towards(self.position, point));
    }

    /// Start turning to a facing.
    pub fn look_at_direction(&mut self, direction: Direction) {
        self.to_direction = direction;
        if self.to_direction != self.direction {
            self.status = UnitStatus::Turning;
        }
    }

    /// Rotate one eighth towards the target facing.
    ///
    /// Returns true once the target facing is reached; the unit is then
    /// standing again.
    pub fn turn(&mut self) -> bool {
        let step = self.direction.turn_step(self.to_direction);
        if step != 0 {
            self.direction = self.direction.rotate(step);
        }
        if self.direction == self.to_direction {
            if self.status == UnitStatus::Turning {
                self.status = UnitStatus::Standing;
            }
            return true;
        }
        false
    }

    /// Stop turning where the unit currently faces.
    pub fn abort_turn(&mut self) {
        self.to_direction = self.direction;
        self.status = UnitStatus::Standing;
    }

    /// Begin a step towards `destination`.
    ///
    /// `direction` is `None` for a purely vertical move.
    pub fn start_walking(&mut self, direction: Option<Direction>, destination: Position) {
        if let Some(direction) = direction {
            self.direction = direction;
            self.to_direction = direction;
        }
        self.walk_diagonal = direction.is_some_and(Direction::is_diagonal);
        self.status = UnitStatus::Walking;
        self.walk_phase = 0;
        self.destination = destination;
        self.kneeled = false;
        trace!(unit = %self.id, from = %self.position, to = %destination, "Step started");
    }

    /// Advance the walking animation.
    ///
    /// Returns `(crossed, arrived)`: `crossed` is true on the tick where the
    /// unit moves onto the destination tile (halfway), `arrived` on the last
    /// tick of the step. Diagonal steps take twice as many ticks.
    pub fn keep_walking(&mut self, ticks_per_step: u32) -> (bool, bool) {
        let ticks = ticks_per_step.max(2) * if self.walk_diagonal { 2 } else { 1 };
        self.walk_phase += 1;
        let crossed = self.walk_phase == ticks / 2;
        let arrived = self.walk_phase >= ticks;
        if arrived {
            self.status = UnitStatus::Standing;
            self.walk_phase = 0;
        }
        (crossed, arrived)
    }

    /// Walking phase within the current step.
    #[must_use]
    pub const fn walk_phase(&self) -> u32 {
        self.walk_phase
    }

    /// Begin collapsing.
    pub fn start_falling(&mut self) {
        self.status = UnitStatus::Collapsing;
        self.fall_phase = 0;
        self.kneeled = false;
    }

    /// Advance the collapse. Returns true when the unit lies still, either
    /// dead (no health) or unconscious.
    pub fn keep_falling(&mut self, ticks: u32) -> bool {
        self.fall_phase += 1;
        if self.fall_phase >= ticks.max(1) {
            self.status = if self.health == 0 {
                UnitStatus::Dead
            } else {
                UnitStatus::Unconscious
            };
            return true;
        }
        false
    }

    /// Raise or lower the weapon.
    pub fn aim(&mut self, aiming: bool) {
        if self.is_down() {
            return;
        }
        self.status = if aiming {
            UnitStatus::Aiming
        } else {
            UnitStatus::Standing
        };
    }

    /// True if kneeling.
    #[must_use]
    pub const fn is_kneeled(&self) -> bool {
        self.kneeled
    }

    /// Kneel or stand.
    pub fn kneel(&mut self, kneeled: bool) {
        self.kneeled = kneeled;
    }

    /// Height of the unit in voxels.
    #[must_use]
    pub fn height(&self) -> i32 {
        if self.kneeled {
            self.armor_rules.kneel_height
        } else {
            self.armor_rules.stand_height
        }
    }

    // ========================================================================
    // Vitals
    // ========================================================================

    /// Time units left this turn.
    #[must_use]
    pub const fn time_units(&self) -> i32 {
        self.tu
    }

    /// Set the time units.
    pub fn set_time_units(&mut self, tu: i32) {
        self.tu = tu.max(0);
    }

    /// Spend time units if there are enough. Debug mode never runs out.
    pub fn spend_time_units(&mut self, tu: i32, debug_mode: bool) -> bool {
        if debug_mode {
            return true;
        }
        if tu <= self.tu {
            self.tu -= tu;
            true
        } else {
            false
        }
    }

    /// Energy left.
    #[must_use]
    pub const fn energy(&self) -> i32 {
        self.energy
    }

    /// Spend energy for a move costing `tu`; energy cost is a third of it.
    pub fn spend_energy(&mut self, tu: i32, debug_mode: bool) -> bool {
        if debug_mode {
            return true;
        }
        let cost = tu / 3;
        if cost <= self.energy {
            self.energy -= cost;
            true
        } else {
            false
        }
    }

    /// Health left.
    #[must_use]
    pub const fn health(&self) -> i32 {
        self.health
    }

    /// Set health, clamped to `0..=max`.
    pub fn set_health(&mut self, health: i32) {
        self.health = health.clamp(0, self.template.stats.health);
    }

    /// Morale, 0 to 100.
    #[must_use]
    pub const fn morale(&self) -> i32 {
        self.morale
    }

    /// Change morale, staying within 0 to 100.
    pub fn morale_change(&mut self, change: i32) {
        self.morale = (self.morale + change).clamp(0, 100);
    }

    /// Accumulated stun damage.
    #[must_use]
    pub const fn stun_level(&self) -> i32 {
        self.stun
    }

    /// Add (or, if negative, recover) stun. An unconscious unit whose stun
    /// drops below its health wakes up.
    pub fn stun(&mut self, power: i32) {
        self.stun = (self.stun + power).max(0);
        if self.status == UnitStatus::Unconscious && self.stun < self.health && self.health > 0 {
            self.status = UnitStatus::Standing;
        }
    }

    /// Turns left burning.
    #[must_use]
    pub const fn fire(&self) -> i32 {
        self.fire
    }

    /// Set the turns left burning.
    pub fn set_fire(&mut self, turns: i32) {
        self.fire = turns.max(0);
    }

    /// Current armor on a side.
    #[must_use]
    pub const fn armor(&self, side: ArmorSide) -> i32 {
        self.armor[side.index()]
    }

    /// Set armor on a side; never below zero.
    pub fn set_armor(&mut self, side: ArmorSide, value: i32) {
        self.armor[side.index()] = value.max(0);
    }

    /// True if health ran out or stun reached health.
    #[must_use]
    pub const fn should_fall(&self) -> bool {
        self.health == 0 || self.stun >= self.health
    }

    /// Apply damage arriving from `relative`, the impact voxel minus the
    /// unit's voxel position; `(0, 0, 0)` is a hit from below.
    ///
    /// Power is scaled by the armor's multiplier for the damage type, then
    /// reduced by the armor on the side that was hit. Smoke counts as stun.
    /// Returns the damage that got through.
    pub fn damage(
        &mut self,
        relative: Position,
        power: i32,
        damage_type: DamageType,
        ignore_armor: bool,
        rng: &mut dyn RandomSource,
    ) -> i32 {
        if power <= 0 {
            return 0;
        }
        let mut power = apply_modifier(power, self.armor_rules.damage_modifier(damage_type));
        let damage_type = if damage_type == DamageType::Smoke {
            DamageType::Stun
        } else {
            damage_type
        };

        let mut side = ArmorSide::Front;
        if !ignore_armor {
            side = if relative == Position::ZERO {
                ArmorSide::Under
            } else {
                self.side_hit(relative, rng)
            };
            power -= self.armor(side);
        }

        if power > 0 {
            if damage_type == DamageType::Stun {
                self.stun += power;
            } else {
                self.health = (self.health - power).max(0);
                if !ignore_armor {
                    let worn = self.armor(side) - power / 10 - 1;
                    self.set_armor(side, worn);
                }
            }
        }
        power.max(0)
    }

    fn side_hit(&self, relative: Position, rng: &mut dyn RandomSource) -> ArmorSide {
        let (ax, ay) = (relative.x.abs(), relative.y.abs());
        let relative_direction = if ay > ax * 2 {
            8 + 4 * i32::from(relative.y > 0)
        } else if ax > ay * 2 {
            10 + 4 * i32::from(relative.x < 0)
        } else if relative.x < 0 {
            if relative.y > 0 {
                13
            } else {
                15
            }
        } else if relative.y > 0 {
            11
        } else {
            9
        };
        // glancing hits land on either neighbouring side, two to one
        match (relative_direction - i32::from(self.direction.index())).rem_euclid(8) {
            0 => ArmorSide::Front,
            1 => pick_side(rng, ArmorSide::Front, ArmorSide::Right),
            2 => ArmorSide::Right,
            3 => pick_side(rng, ArmorSide::Rear, ArmorSide::Right),
            4 => ArmorSide::Rear,
            5 => pick_side(rng, ArmorSide::Rear, ArmorSide::Left),
            6 => ArmorSide::Left,
            _ => pick_side(rng, ArmorSide::Front, ArmorSide::Left),
        }
    }

    /// Restore health.
    pub fn heal(&mut self, amount: i32) {
        self.set_health(self.health + amount);
    }

    /// Restore energy and reduce stun.
    pub fn stimulant(&mut self, energy: i32, stun: i32) {
        self.energy = (self.energy + energy).min(self.template.stats.stamina);
        self.stun(-stun);
    }

    /// Restore the morale lost to wounds not yet treated.
    pub fn painkillers(&mut self) {
        let lost_health = self.template.stats.health - self.health;
        if lost_health > self.morale_restored {
            self.morale = (self.morale + lost_health - self.morale_restored).min(100);
            self.morale_restored = lost_health;
        }
    }

    // ========================================================================
    // Turn cycle
    // ========================================================================

    /// Start of the unit's side turn.
    ///
    /// Restores TU (reduced when overloaded) and energy, burns, recovers one
    /// point of stun and rolls for panic against low morale. Returns true if
    /// the unit's morale broke.
    pub fn prepare_new_turn(&mut self, carried_weight: i32, rng: &mut dyn RandomSource) -> bool {
        self.faction = self.original_faction;
        let stats = self.template.stats;

        let mut tu = stats.tu;
        if carried_weight > stats.strength && carried_weight > 0 {
            tu = tu * stats.strength.max(0) / carried_weight;
        }
        self.tu = tu;

        if !self.is_out() {
            self.energy = (self.energy + stats.tu / 3).min(stats.stamina);
        }

        if self.fire > 0 {
            let burn = rng.generate(5, 10);
            let burn = apply_modifier(burn, self.armor_rules.damage_modifier(DamageType::Incendiary));
            self.health = (self.health - burn).max(0);
            self.fire -= 1;
        }

        if self.stun > 0 {
            self.stun(-1);
        }

        if self.turns_since_spotted < 255 {
            self.turns_since_spotted += 1;
        }
        self.dont_reselect = false;

        let mut broke = false;
        if !self.is_out() {
            let chance = 100 - 2 * self.morale;
            if rng.generate(1, 100) <= chance {
                let kind = rng.generate(0, 100);
                self.status = if kind <= 33 {
                    UnitStatus::Berserk
                } else {
                    UnitStatus::Panicking
                };
                broke = true;
            } else if chance > 1 {
                self.experience.bravery += 1;
            }
        }
        broke
    }

    /// True if the unit may not be auto-selected again this turn.
    #[must_use]
    pub const fn dont_reselect(&self) -> bool {
        self.dont_reselect
    }

    /// Skip this unit when cycling selection.
    pub fn set_dont_reselect(&mut self, skip: bool) {
        self.dont_reselect = skip;
    }

    // ========================================================================
    // Combat numbers
    // ========================================================================

    /// TU cost of an action with an item.
    #[must_use]
    pub fn action_tu(&self, kind: BattleActionType, item: Option<&RuleItem>) -> i32 {
        let max_tu = self.template.stats.tu;
        let percent = match (kind, item) {
            (BattleActionType::Prime, _) => 50,
            (BattleActionType::Throw, _) => 25,
            (BattleActionType::AutoShot, Some(rule)) => rule.tu_auto,
            (BattleActionType::SnapShot, Some(rule)) => rule.tu_snap,
            (BattleActionType::AimedShot, Some(rule)) => rule.tu_aimed,
            (BattleActionType::Hit | BattleActionType::Stun, Some(rule)) => rule.tu_melee,
            (
                BattleActionType::Use | BattleActionType::MindControl | BattleActionType::Panic,
                Some(rule),
            ) => rule.tu_use,
            _ => 0,
        };
        max_tu * percent / 100
    }

    /// Percentage modifier from injuries: 100 when healthy, never below 10.
    #[must_use]
    pub fn accuracy_modifier(&self) -> i32 {
        let max = self.template.stats.health.max(1);
        (25 * self.health / max + 75).max(10)
    }

    /// Chance to hit, in percent, for a shot or strike with `weapon`.
    ///
    /// `both_hands_full` applies the penalty for firing a two-handed weapon
    /// with something in the other hand.
    #[must_use]
    pub fn firing_accuracy(
        &self,
        kind: BattleActionType,
        weapon: &RuleItem,
        both_hands_full: bool,
    ) -> i32 {
        let stats = &self.template.stats;
        let mut result = match kind {
            BattleActionType::AutoShot => stats.firing * weapon.accuracy_auto / 100,
            BattleActionType::AimedShot => stats.firing * weapon.accuracy_aimed / 100,
            BattleActionType::Hit | BattleActionType::Stun => {
                return stats.melee * weapon.accuracy_melee / 100 * self.accuracy_modifier() / 100;
            }
            _ => stats.firing * weapon.accuracy_snap / 100,
        };
        if self.kneeled {
            result = result * 115 / 100;
        }
        if weapon.two_handed && both_hands_full {
            result = result * 80 / 100;
        }
        result * self.accuracy_modifier() / 100
    }

    /// Chance to land a throw where aimed, in percent.
    #[must_use]
    pub fn throwing_accuracy(&self) -> i32 {
        self.template.stats.throwing * self.accuracy_modifier() / 100
    }

    /// Farthest tile distance the unit can throw an item of `weight`.
    #[must_use]
    pub fn throw_range(&self, weight: i32) -> i32 {
        (1 + 2 * self.template.stats.strength / (weight.max(0) + 1)).min(MAX_THROW_RANGE)
    }

    /// Reaction score: reactions scaled by the share of TU left.
    #[must_use]
    pub fn reaction_score(&self) -> Fixed {
        let max_tu = self.template.stats.tu.max(1);
        Fixed::from_num(self.template.stats.reactions) * Fixed::from_num(self.tu)
            / Fixed::from_num(max_tu)
    }

    /// Experience gathered this mission.
    #[must_use]
    pub const fn experience(&self) -> &Experience {
        &self.experience
    }

    /// Mutable experience counters.
    pub fn experience_mut(&mut self) -> &mut Experience {
        &mut self.experience
    }

    // ========================================================================
    // Vision
    // ========================================================================

    /// Units this unit currently sees.
    #[must_use]
    pub fn visible_units(&self) -> &[UnitId] {
        &self.visible_units
    }

    /// Add a unit to the visible list. Returns true if it is new.
    pub fn add_to_visible_units(&mut self, unit: UnitId) -> bool {
        if self.visible_units.contains(&unit) {
            return false;
        }
        self.visible_units.push(unit);
        true
    }

    /// Forget every visible unit.
    pub fn clear_visible_units(&mut self) {
        self.visible_units.clear();
    }

    /// True if the player can see this unit.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    /// Mark the unit as seen by the player.
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Turns since a hostile last saw this unit; 255 means never.
    #[must_use]
    pub const fn turns_since_spotted(&self) -> i32 {
        self.turns_since_spotted
    }

    /// Record that a hostile sees this unit now.
    pub fn mark_spotted(&mut self) {
        self.turns_since_spotted = 0;
    }

    // ========================================================================
    // AI
    // ========================================================================

    /// Decision policy, for AI-controlled units.
    #[must_use]
    pub const fn ai(&self) -> Option<&AiState> {
        self.ai.as_ref()
    }

    /// Install a decision policy.
    pub fn set_ai(&mut self, ai: Option<AiState>) {
        self.ai = ai;
    }

    /// Remove the policy so it can run with mutable access to the battle.
    pub fn take_ai(&mut self) -> Option<AiState> {
        self.ai.take()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Structured record of this unit.
    #[must_use]
    pub fn to_record(&self) -> UnitRecord {
        UnitRecord {
            id: self.id.0,
            template: self.template.id.clone(),
            armor: self.armor_rules.id.clone(),
            faction: self.faction,
            original_faction: self.original_faction,
            status: self.status,
            position: self.position,
            direction: self.direction.index(),
            tu: self.tu,
            energy: self.energy,
            health: self.health,
            morale: self.morale,
            stun: self.stun,
            fire: self.fire,
            armor_values: self.armor,
            morale_restored: self.morale_restored,
            kneeled: self.kneeled,
            visible: self.visible,
            turns_since_spotted: self.turns_since_spotted,
            dont_reselect: self.dont_reselect,
            experience: self.experience,
            ai: self.ai.as_ref().map(AiState::to_record),
        }
    }

    /// Rebuild a unit from its record.
    pub fn from_record(record: &UnitRecord, rules: &Ruleset) -> Result<Self> {
        let template = rules.unit(&record.template)?;
        let armor = rules.armor(&record.armor)?;
        if record.health < 0 || record.health > template.stats.health {
            return Err(BattleError::InvalidSave(format!(
                "unit {} health {} outside 0..={}",
                record.id, record.health, template.stats.health
            )));
        }
        let mut unit = Self::new(
            UnitId(record.id),
            template,
            armor,
            record.original_faction,
            record.position,
        );
        unit.faction = record.faction;
        unit.status = match record.status {
            // mid-animation states resume as standing
            UnitStatus::Walking | UnitStatus::Turning | UnitStatus::Aiming => UnitStatus::Standing,
            UnitStatus::Collapsing if record.health == 0 => UnitStatus::Dead,
            UnitStatus::Collapsing => UnitStatus::Unconscious,
            other => other,
        };
        unit.set_direction(Direction::from_index(i32::from(record.direction)));
        unit.tu = record.tu;
        unit.energy = record.energy;
        unit.health = record.health;
        unit.morale = record.morale.clamp(0, 100);
        unit.stun = record.stun.max(0);
        unit.fire = record.fire.max(0);
        unit.armor = record.armor_values;
        unit.morale_restored = record.morale_restored;
        unit.kneeled = record.kneeled;
        unit.visible = record.visible;
        unit.turns_since_spotted = record.turns_since_spotted;
        unit.dont_reselect = record.dont_reselect;
        unit.experience = record.experience;
        unit.ai = record.ai.as_ref().map(AiState::from_record);
        Ok(unit)
    }
}

fn pick_side(rng: &mut dyn RandomSource, likely: ArmorSide, other: ArmorSide) -> ArmorSide {
    if rng.generate(0, 2) < 2 {
        likely
    } else {
        other
    }
}

/// Saved form of a [`BattleUnit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Unit id.
    pub id: u32,
    /// Template id.
    pub template: String,
    /// Armor id.
    pub armor: String,
    /// Current faction.
    pub faction: Faction,
    /// Faction at mission start.
    pub original_faction: Faction,
    /// Status.
    pub status: UnitStatus,
    /// Tile position.
    pub position: Position,
    /// Facing index.
    pub direction: u8,
    /// Time units.
    pub tu: i32,
    /// Energy.
    pub energy: i32,
    /// Health.
    pub health: i32,
    /// Morale.
    pub morale: i32,
    /// Stun level.
    pub stun: i32,
    /// Turns burning.
    pub fire: i32,
    /// Armor per side: front, left, right, rear, under.
    pub armor_values: [i32; 5],
    /// Morale already restored by painkillers.
    #[serde(default)]
    pub morale_restored: i32,
    /// Kneeling.
    #[serde(default)]
    pub kneeled: bool,
    /// Seen by the player.
    #[serde(default)]
    pub visible: bool,
    /// Turns since a hostile saw the unit.
    #[serde(default = "default_spotted")]
    pub turns_since_spotted: i32,
    /// Skip in selection cycling.
    #[serde(default)]
    pub dont_reselect: bool,
    /// Experience counters.
    #[serde(default)]
    pub experience: Experience,
    /// AI policy state.
    #[serde(default)]
    pub ai: Option<AiRecord>,
}

const fn default_spotted() -> i32 {
    255
}
