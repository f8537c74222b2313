//! Playing one mission to the end.
//!
//! Both sides are driven by the AI. A mission ends when one side has
//! nobody left standing, when the turn limit is reached, or when the tick
//! budget runs out (a guard against a stuck state queue).

use std::sync::Arc;

use battlescape_core::battlescape_game::{BattlescapeGame, MissionOutcome};
use battlescape_core::rng::BattleRng;
use battlescape_core::rules::Ruleset;
use battlescape_core::unit::Faction;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ascii::{render, AsciiConfig};
use crate::scenario::{Scenario, ScenarioError};

/// Tick budget per turn before a mission is considered stuck.
pub const TICKS_PER_TURN_LIMIT: u64 = 20_000;

/// Why a mission stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissionEnd {
    /// One side was wiped out.
    Eliminated,
    /// The turn limit was reached.
    TurnLimit,
    /// The tick budget ran out.
    Stalled,
}

/// Summary of one mission, written as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionReport {
    /// Scenario name.
    pub scenario: String,
    /// Seed of the battle's random stream.
    pub seed: u64,
    /// Why it stopped.
    pub end: MissionEnd,
    /// Side left standing, if one was wiped out.
    pub winner: Option<Faction>,
    /// Scheduler ticks played.
    pub ticks: u64,
    /// Shots and throws.
    pub shots: usize,
    /// Blasts and impacts.
    pub explosions: usize,
    /// Units that went down.
    pub casualties: usize,
    /// Debriefing tally.
    pub outcome: MissionOutcome,
    /// Final battle state hash.
    pub state_hash: u64,
}

/// Runs one scenario with one seed.
pub struct MissionRunner {
    scenario_name: String,
    seed: u64,
    max_turns: i32,
    game: BattlescapeGame<BattleRng>,
}

impl MissionRunner {
    /// Set up the battle for `scenario` with the given seed.
    pub fn new(scenario: &Scenario, rules: Arc<Ruleset>, seed: u64) -> Result<Self, ScenarioError> {
        let save = scenario.build(rules)?;
        let mut game = BattlescapeGame::new(save, scenario.config.clone(), BattleRng::new(seed));
        game.set_autoplay(true);
        Ok(Self {
            scenario_name: scenario.name.clone(),
            seed,
            max_turns: scenario.max_turns,
            game,
        })
    }

    /// The battle in progress.
    #[must_use]
    pub const fn game(&self) -> &BattlescapeGame<BattleRng> {
        &self.game
    }

    /// Play to the end. `on_turn` is called with an ASCII frame at the
    /// start and after every turn change.
    pub fn run(mut self, mut on_turn: impl FnMut(&str)) -> MissionReport {
        let frames = AsciiConfig::default();
        on_turn(&render(self.game.save(), frames));

        let tick_budget = TICKS_PER_TURN_LIMIT * u64::try_from(self.max_turns.max(1)).unwrap_or(1) * 3;
        let (mut shots, mut explosions, mut casualties) = (0, 0, 0);
        let end = loop {
            if self.game.tick() >= tick_budget {
                warn!(scenario = %self.scenario_name, seed = self.seed, ticks = self.game.tick(), "Mission stalled");
                break MissionEnd::Stalled;
            }
            let events = self.game.think();
            shots += events.shots.len();
            explosions += events.explosions.len();
            casualties += events.casualties.len();
            if events.battle_over {
                break MissionEnd::Eliminated;
            }
            if !events.turn_changes.is_empty() {
                on_turn(&render(self.game.save(), frames));
                if self.game.save().turn() > self.max_turns {
                    break MissionEnd::TurnLimit;
                }
            }
        };

        let save = self.game.save();
        let players = save.active_units(Faction::Player).count();
        let aliens = save.active_units(Faction::Hostile).count();
        let winner = match (end, players, aliens) {
            (MissionEnd::Eliminated, 0, 0) => None,
            (MissionEnd::Eliminated, 0, _) => Some(Faction::Hostile),
            (MissionEnd::Eliminated, _, _) => Some(Faction::Player),
            _ => None,
        };
        let state_hash = save.state_hash();
        let ticks = self.game.tick();
        let outcome = self.game.finish_battle(end != MissionEnd::Eliminated);
        info!(
            scenario = %self.scenario_name,
            seed = self.seed,
            ?end,
            ?winner,
            turns = outcome.turns,
            ticks,
            "Mission finished"
        );
        debug!(?outcome, "Mission outcome");

        MissionReport {
            scenario: self.scenario_name,
            seed: self.seed,
            end,
            winner,
            ticks,
            shots,
            explosions,
            casualties,
            outcome,
            state_hash,
        }
    }
}

/// Load nothing, play one mission quietly.
pub fn run_mission(scenario: &Scenario, rules: Arc<Ruleset>, seed: u64) -> Result<MissionReport, ScenarioError> {
    Ok(MissionRunner::new(scenario, rules, seed)?.run(|_| {}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use battlescape_test_utils::fixtures::rules;

    const DUEL: &str = r#"
Scenario(
    name: "Duel",
    ruleset: "unused.ron",
    terrain_set: "plain",
    legend: [(symbol: '.', parts: ["grass"])],
    levels: [[
        "..........",
        "..........",
        "..........",
        "..........",
    ]],
    units: [
        (template: "soldier", faction: Player, position: (0, 1, 0), weapon: Some("rifle"), ammo: Some("rifle_clip")),
        (template: "sectoid", faction: Hostile, position: (9, 2, 0), weapon: Some("plasma_pistol"), ammo: Some("plasma_clip")),
    ],
    max_turns: 6,
)
"#;

    #[test]
    fn test_mission_runs_to_an_end() {
        let scenario = Scenario::from_ron_str(DUEL).unwrap();
        let mut frames = 0;
        let report = MissionRunner::new(&scenario, rules(), 11)
            .unwrap()
            .run(|_| frames += 1);
        assert!(frames >= 1);
        assert_ne!(report.end, MissionEnd::Stalled);
        assert!(report.outcome.turns <= 7);
        if report.end == MissionEnd::Eliminated {
            assert!(report.winner.is_some() || report.casualties >= 2);
        }
    }

    #[test]
    fn test_same_seed_same_report() {
        let scenario = Scenario::from_ron_str(DUEL).unwrap();
        let first = run_mission(&scenario, rules(), 4).unwrap();
        let second = run_mission(&scenario, rules(), 4).unwrap();
        assert_eq!(first, second);
    }
}
