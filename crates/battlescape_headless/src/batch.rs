//! Batch mission runner.
//!
//! Runs one scenario over a range of seeds in parallel using rayon and
//! aggregates the results.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use battlescape_core::rules::Ruleset;
use battlescape_core::unit::Faction;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::runner::{run_mission, MissionEnd, MissionReport};
use crate::scenario::Scenario;

/// Configuration for a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of missions to run
    pub count: u32,
    /// Seed of the first mission; the rest count up from it
    pub seed_start: u64,
    /// Worker threads (0 = rayon default)
    pub threads: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            count: 100,
            seed_start: 0,
            threads: 0,
        }
    }
}

/// Aggregate over a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Missions completed.
    pub missions: usize,
    /// Missions the player side won.
    pub player_wins: usize,
    /// Missions the aliens won.
    pub alien_wins: usize,
    /// Missions that hit the turn limit or stalled.
    pub unresolved: usize,
    /// Missions that stalled.
    pub stalled: usize,
    /// Mean turns per mission.
    pub average_turns: f64,
    /// Mean player losses per mission.
    pub average_player_losses: f64,
    /// Mean aliens killed or captured per mission.
    pub average_alien_losses: f64,
}

impl BatchSummary {
    /// Summarize a set of mission reports.
    #[must_use]
    pub fn from_reports(reports: &[MissionReport]) -> Self {
        let missions = reports.len();
        if missions == 0 {
            return Self::default();
        }
        let count = |f: &dyn Fn(&MissionReport) -> bool| reports.iter().filter(|&r| f(r)).count();
        let mean = |f: &dyn Fn(&MissionReport) -> usize| reports.iter().map(f).sum::<usize>() as f64 / missions as f64;
        Self {
            missions,
            player_wins: count(&|r| r.winner == Some(Faction::Player)),
            alien_wins: count(&|r| r.winner == Some(Faction::Hostile)),
            unresolved: count(&|r| r.winner.is_none()),
            stalled: count(&|r| r.end == MissionEnd::Stalled),
            average_turns: reports.iter().map(|r| f64::from(r.outcome.turns)).sum::<f64>() / missions as f64,
            average_player_losses: mean(&|r| r.outcome.player_killed + r.outcome.player_unconscious),
            average_alien_losses: mean(&|r| r.outcome.aliens_killed + r.outcome.aliens_captured),
        }
    }
}

/// Error during a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    /// Seed used
    pub seed: u64,
    /// Error message
    pub message: String,
}

/// Results from a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    /// Scenario name
    pub scenario: String,
    /// Configuration used
    pub config: BatchConfig,
    /// Individual mission reports, in seed order
    pub missions: Vec<MissionReport>,
    /// Aggregate summary
    pub summary: BatchSummary,
    /// Total runtime
    pub duration_seconds: f64,
    /// Errors encountered
    pub errors: Vec<BatchError>,
}

impl BatchResults {
    /// Save results to a JSON file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load results from a JSON file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

/// Run a batch of missions.
pub fn run_batch(scenario: &Scenario, rules: &Arc<Ruleset>, config: BatchConfig) -> BatchResults {
    let start = Instant::now();

    // Configure thread pool if specified
    if config.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build_global()
            .ok(); // Ignore if already set
    }

    let results: Vec<Result<MissionReport, BatchError>> = (0..config.count)
        .into_par_iter()
        .map(|i| {
            let seed = config.seed_start.wrapping_add(u64::from(i));
            run_mission(scenario, Arc::clone(rules), seed).map_err(|err| {
                warn!(seed, %err, "Mission failed");
                BatchError {
                    seed,
                    message: err.to_string(),
                }
            })
        })
        .collect();

    let (missions, errors): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    let missions: Vec<MissionReport> = missions.into_iter().filter_map(Result::ok).collect();
    let errors: Vec<BatchError> = errors.into_iter().filter_map(Result::err).collect();

    let summary = BatchSummary::from_reports(&missions);
    let duration_seconds = start.elapsed().as_secs_f64();
    info!(
        missions = missions.len(),
        player_wins = summary.player_wins,
        alien_wins = summary.alien_wins,
        "Batch complete in {duration_seconds:.1}s"
    );

    BatchResults {
        scenario: scenario.name.clone(),
        config,
        missions,
        summary,
        duration_seconds,
        errors,
    }
}

/// Play the same seed `runs` times in parallel; true if every report
/// matches.
pub fn verify_determinism(scenario: &Scenario, rules: &Arc<Ruleset>, seed: u64, runs: u32) -> bool {
    let reports: Vec<Option<MissionReport>> = (0..runs.max(2))
        .into_par_iter()
        .map(|_| run_mission(scenario, Arc::clone(rules), seed).ok())
        .collect();
    let Some(Some(first)) = reports.first() else {
        return false;
    };
    let identical = reports.iter().all(|report| report.as_ref() == Some(first));
    if !identical {
        let hashes: Vec<Option<u64>> = reports.iter().map(|r| r.as_ref().map(|r| r.state_hash)).collect();
        warn!(seed, ?hashes, "Runs diverged");
    }
    identical
}
