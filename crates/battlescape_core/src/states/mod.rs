//! Battle states: the steps that make up a unit's action on screen.
//!
//! The scheduler keeps a queue of [`BattleState`]s and drives only the
//! front one. A state is initialised once when it first reaches the front
//! and then asked to [`think`](BattleState::think) once per tick until it
//! reports [`Step::Done`]. While running, a state may ask the scheduler for
//! more work through its [`StateContext`]:
//!
//! 1. `push_front`: run before the current state (a turn before a shot)
//! 2. `push_next`: run right after the current state (the explosion after
//!    a projectile, the death after an explosion)
//! 3. `push_back`: run after everything queued
//! 4. `check_for_casualties`: look for units that went down
//!
//! Requests are applied by the scheduler once the state returns, in the
//! order they were made. Two `push_next` requests therefore end up in
//! reverse order.
//!
//! [`BattleState::EndTurn`] is a placeholder with no behaviour of its own:
//! when it reaches the front with nothing else queued, the scheduler ends
//! the turn.

mod explosion;
mod melee;
mod projectile_fly;
mod psi;
mod unit_die;
mod unit_turn;
mod unit_walk;

pub use explosion::Explosion;
pub use melee::MeleeAttack;
pub use projectile_fly::ProjectileFly;
pub use psi::PsiAttack;
pub use unit_die::UnitDie;
pub use unit_turn::UnitTurn;
pub use unit_walk::UnitWalk;

use crate::action::{ActionMessage, BattleAction, BattleActionType};
use crate::ai::AiState;
use crate::config::SimulationConfig;
use crate::position::Position;
use crate::rng::RandomSource;
use crate::rules::DamageType;
use crate::saved_battle::SavedBattleGame;
use crate::tile_engine::TileEngine;
use crate::unit::{Faction, UnitId};

/// Whether a state needs more ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep the state at the front.
    Continue,
    /// Remove the state from the queue.
    Done,
}

// ============================================================================
// Events
// ============================================================================

/// A shot or throw that left its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotEvent {
    /// Who fired.
    pub shooter: UnitId,
    /// Tile aimed at.
    pub target: Position,
    /// Voxel where the flight ended.
    pub impact: Option<Position>,
}

/// A blast or direct hit that was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplosionEvent {
    /// Centre voxel.
    pub center: Position,
    /// Power at the centre.
    pub power: i32,
    /// Kind of damage.
    pub damage_type: DamageType,
    /// Units that took damage.
    pub units_hit: Vec<UnitId>,
}

/// A unit that finished going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasualtyEvent {
    /// The fallen unit.
    pub victim: UnitId,
    /// Who caused it, if anyone.
    pub murderer: Option<UnitId>,
    /// True if dead rather than unconscious.
    pub killed: bool,
}

/// A psionic attack attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiEvent {
    /// Attacker.
    pub attacker: UnitId,
    /// Target.
    pub victim: UnitId,
    /// True for mind control, false for panic.
    pub mind_control: bool,
    /// True if the attack got through.
    pub success: bool,
}

/// Everything of note that happened during one scheduler tick.
#[derive(Debug, Clone, Default)]
pub struct BattleEvents {
    /// Rejected player actions, for the warning line.
    pub warnings: Vec<ActionMessage>,
    /// Shots and throws.
    pub shots: Vec<ShotEvent>,
    /// Blasts and hits.
    pub explosions: Vec<ExplosionEvent>,
    /// Units that went down.
    pub casualties: Vec<CasualtyEvent>,
    /// Psionic attacks.
    pub psi_attacks: Vec<PsiEvent>,
    /// New turn number and side, when the turn changed.
    pub turn_changes: Vec<(i32, Faction)>,
    /// Set once one side has nobody left standing.
    pub battle_over: bool,
}

impl BattleEvents {
    /// True if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
            && self.shots.is_empty()
            && self.explosions.is_empty()
            && self.casualties.is_empty()
            && self.psi_attacks.is_empty()
            && self.turn_changes.is_empty()
            && !self.battle_over
    }

    /// Move everything from `other` into `self`.
    pub fn append(&mut self, other: &mut Self) {
        self.warnings.append(&mut other.warnings);
        self.shots.append(&mut other.shots);
        self.explosions.append(&mut other.explosions);
        self.casualties.append(&mut other.casualties);
        self.psi_attacks.append(&mut other.psi_attacks);
        self.turn_changes.append(&mut other.turn_changes);
        self.battle_over |= other.battle_over;
    }
}

// ============================================================================
// Context
// ============================================================================

/// Work a state asks the scheduler to do once it returns.
#[derive(Debug)]
pub(crate) enum Request {
    PushFront(BattleState),
    PushNext(BattleState),
    PushBack(BattleState),
    CheckCasualties {
        murderer: Option<UnitId>,
        damage_type: Option<DamageType>,
        terrain: bool,
    },
}

/// What a state may touch while it runs.
pub struct StateContext<'a> {
    /// The battle.
    pub save: &'a mut SavedBattleGame,
    /// Tunables.
    pub config: &'a SimulationConfig,
    /// Random source for every roll the state makes.
    pub rng: &'a mut dyn RandomSource,
    /// Event sink for this tick.
    pub events: &'a mut BattleEvents,
    requests: Vec<Request>,
}

impl<'a> StateContext<'a> {
    /// Context over a battle.
    pub fn new(
        save: &'a mut SavedBattleGame,
        config: &'a SimulationConfig,
        rng: &'a mut dyn RandomSource,
        events: &'a mut BattleEvents,
    ) -> Self {
        Self {
            save,
            config,
            rng,
            events,
            requests: Vec::new(),
        }
    }

    /// Tile engine over the battle.
    pub fn engine(&mut self) -> TileEngine<'_> {
        TileEngine::new(self.save, self.config)
    }

    /// Run `state` before the current one.
    pub fn push_front(&mut self, state: BattleState) {
        self.requests.push(Request::PushFront(state));
    }

    /// Run `state` right after the current one.
    pub fn push_next(&mut self, state: BattleState) {
        self.requests.push(Request::PushNext(state));
    }

    /// Run `state` after everything queued.
    pub fn push_back(&mut self, state: BattleState) {
        self.requests.push(Request::PushBack(state));
    }

    /// Look for units that went down once this state returns.
    pub fn check_for_casualties(&mut self, murderer: Option<UnitId>, damage_type: Option<DamageType>, terrain: bool) {
        self.requests.push(Request::CheckCasualties {
            murderer,
            damage_type,
            terrain,
        });
    }

    pub(crate) fn into_requests(self) -> Vec<Request> {
        self.requests
    }
}

/// True if `unit` can spend `tu` and still afford the shot its side keeps
/// TU back for.
///
/// Players reserve through the battle-wide setting, aliens through their
/// AI. A weapon without the reserved fire mode falls back from auto to
/// snap and from snap to aimed. Units acting outside their side's turn
/// (reaction fire) only need the TU themselves.
#[must_use]
pub fn check_reserved_tu(save: &SavedBattleGame, unit: UnitId, tu: i32) -> bool {
    let Some(actor) = save.unit(unit) else {
        return false;
    };
    if actor.faction() != save.side() {
        return tu <= actor.time_units();
    }
    let reserved = match actor.faction() {
        Faction::Player => save.tu_reserved(),
        Faction::Hostile => actor.ai().map_or(BattleActionType::None, AiState::reserve),
        Faction::Neutral => BattleActionType::None,
    };
    if reserved == BattleActionType::None {
        return true;
    }
    let Some(weapon) = save.main_hand_weapon(unit).and_then(|id| save.item(id)) else {
        return true;
    };
    let rule = weapon.rules();
    let mut effective = reserved;
    if effective == BattleActionType::AutoShot && actor.action_tu(effective, Some(rule)) == 0 {
        effective = BattleActionType::SnapShot;
    }
    if effective == BattleActionType::SnapShot && actor.action_tu(effective, Some(rule)) == 0 {
        effective = BattleActionType::AimedShot;
    }
    tu + actor.action_tu(effective, Some(rule)) <= actor.time_units()
}

// ============================================================================
// States
// ============================================================================

/// One queued step of battle activity.
#[derive(Debug)]
pub enum BattleState {
    /// A unit walking a path.
    Walk(UnitWalk),
    /// A unit turning on the spot.
    Turn(UnitTurn),
    /// A bullet or thrown item in flight.
    ProjectileFly(ProjectileFly),
    /// A blast or hit being resolved.
    Explosion(Explosion),
    /// A unit going down.
    UnitDie(UnitDie),
    /// A close-combat strike.
    MeleeAttack(MeleeAttack),
    /// A psionic attack.
    PsiAttack(PsiAttack),
    /// Placeholder that ends the turn when it is all that is left.
    EndTurn,
}

impl BattleState {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Walk(_) => "UnitWalk",
            Self::Turn(_) => "UnitTurn",
            Self::ProjectileFly(_) => "ProjectileFly",
            Self::Explosion(_) => "Explosion",
            Self::UnitDie(_) => "UnitDie",
            Self::MeleeAttack(_) => "MeleeAttack",
            Self::PsiAttack(_) => "PsiAttack",
            Self::EndTurn => "EndTurn",
        }
    }

    /// The action this state carries out, if it carries one.
    #[must_use]
    pub const fn action(&self) -> Option<&BattleAction> {
        match self {
            Self::Walk(state) => Some(state.action()),
            Self::Turn(state) => Some(state.action()),
            Self::ProjectileFly(state) => Some(state.action()),
            Self::MeleeAttack(state) => Some(state.action()),
            Self::PsiAttack(state) => Some(state.action()),
            Self::Explosion(_) | Self::UnitDie(_) | Self::EndTurn => None,
        }
    }

    /// Unit acting in this state.
    #[must_use]
    pub fn actor(&self) -> Option<UnitId> {
        match self {
            Self::UnitDie(state) => Some(state.victim()),
            _ => self.action().and_then(|action| action.actor),
        }
    }

    /// True for the end-of-turn placeholder.
    #[must_use]
    pub const fn is_end_turn(&self) -> bool {
        matches!(self, Self::EndTurn)
    }

    /// Called once when the state reaches the front of the queue.
    pub fn init(&mut self, ctx: &mut StateContext<'_>) -> Step {
        match self {
            Self::Walk(state) => state.init(ctx),
            Self::Turn(state) => state.init(ctx),
            Self::ProjectileFly(state) => state.init(ctx),
            Self::Explosion(state) => state.init(ctx),
            Self::UnitDie(state) => state.init(ctx),
            Self::MeleeAttack(state) => state.init(ctx),
            Self::PsiAttack(state) => state.init(ctx),
            Self::EndTurn => Step::Continue,
        }
    }

    /// Called once per tick while the state is at the front.
    pub fn think(&mut self, ctx: &mut StateContext<'_>) -> Step {
        match self {
            Self::Walk(state) => state.think(ctx),
            Self::Turn(state) => state.think(ctx),
            Self::ProjectileFly(state) => state.think(ctx),
            Self::Explosion(state) => state.think(ctx),
            Self::UnitDie(state) => state.think(ctx),
            Self::MeleeAttack(state) => state.think(ctx),
            Self::PsiAttack(state) => state.think(ctx),
            Self::EndTurn => Step::Done,
        }
    }

    /// Ask the state to stop early. Returns true if it will; states that
    /// cannot be interrupted return false.
    pub fn cancel(&mut self) -> bool {
        match self {
            Self::Walk(state) => {
                state.cancel();
                true
            }
            Self::Turn(state) => {
                state.cancel();
                true
            }
            _ => false,
        }
    }
}
