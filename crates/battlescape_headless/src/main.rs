//! Headless battle runner.
//!
//! # Usage
//!
//! ```bash
//! # Play one mission
//! cargo run -p battlescape_headless -- run --scenario scenarios/farm.ron --seed 7
//!
//! # Run a batch of seeds
//! cargo run -p battlescape_headless -- batch --scenario scenarios/farm.ron --count 1000 --output results/
//!
//! # Draw the starting map
//! cargo run -p battlescape_headless -- render --scenario scenarios/farm.ron
//! ```
//!
//! Reports go to stdout as JSON, logs to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use battlescape_core::rules::Ruleset;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use battlescape_headless::{
    ascii::{render, AsciiConfig},
    batch::{run_batch, verify_determinism, BatchConfig},
    runner::MissionRunner,
    scenario::Scenario,
};

#[derive(Parser)]
#[command(name = "battlescape_headless")]
#[command(about = "Headless tactical battle runner for AI testing and CI")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a single mission
    Run {
        /// Scenario file to load
        #[arg(short, long)]
        scenario: PathBuf,

        /// Battle seed
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Print an ASCII frame at every turn change
        #[arg(long)]
        frames: bool,

        /// Write the report to this file instead of stdout
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Play a scenario over a range of seeds
    Batch {
        /// Scenario file to load
        #[arg(short, long)]
        scenario: PathBuf,

        /// Number of missions to run
        #[arg(short, long, default_value = "100")]
        count: u32,

        /// Worker threads (0 = auto)
        #[arg(short, long, default_value = "0")]
        parallel: usize,

        /// Output directory for results
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// Starting seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Verify determinism by running same seed multiple times
    Verify {
        /// Scenario file to load
        #[arg(short, long)]
        scenario: PathBuf,

        /// Seed to verify
        #[arg(long, default_value = "12345")]
        seed: u64,

        /// Number of verification runs
        #[arg(short, long, default_value = "5")]
        runs: u32,
    },

    /// Draw a scenario's starting map
    Render {
        /// Scenario file to load
        #[arg(short, long)]
        scenario: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            seed,
            frames,
            json,
        } => cmd_run(&scenario, seed, frames, json.as_deref()),
        Commands::Batch {
            scenario,
            count,
            parallel,
            output,
            seed,
        } => cmd_batch(&scenario, count, parallel, &output, seed),
        Commands::Verify {
            scenario,
            seed,
            runs,
        } => cmd_verify(&scenario, seed, runs),
        Commands::Render { scenario } => cmd_render(&scenario),
    }
}

/// Load a scenario and its ruleset, exiting on failure.
fn load(path: &Path) -> (Scenario, Arc<Ruleset>) {
    let scenario = match Scenario::load(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load scenario: {e}");
            std::process::exit(1);
        }
    };
    let rules = match scenario.load_rules() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to load ruleset: {e}");
            std::process::exit(1);
        }
    };
    (scenario, rules)
}

/// Play one mission.
fn cmd_run(path: &Path, seed: u64, frames: bool, json: Option<&Path>) {
    let (scenario, rules) = load(path);
    tracing::info!("Running {} with seed {}", scenario.name, seed);

    let runner = match MissionRunner::new(&scenario, rules, seed) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to set up battle: {e}");
            std::process::exit(1);
        }
    };
    let report = runner.run(|frame| {
        if frames {
            eprintln!("{frame}");
        }
    });

    let text = match serde_json::to_string_pretty(&report) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to serialize report: {e}");
            std::process::exit(1);
        }
    };
    match json {
        Some(out) => {
            if let Err(e) = std::fs::write(out, text) {
                eprintln!("Failed to write report: {e}");
                std::process::exit(1);
            }
            eprintln!("Report written to {}", out.display());
        }
        None => println!("{text}"),
    }
}

/// Run a batch of seeds.
fn cmd_batch(path: &Path, count: u32, parallel: usize, output: &Path, seed: u64) {
    let (scenario, rules) = load(path);
    tracing::info!("Running batch: {} missions of {}", count, scenario.name);

    let config = BatchConfig {
        count,
        seed_start: seed,
        threads: parallel,
    };
    let results = run_batch(&scenario, &rules, config);

    let out = output.join("batch.json");
    if let Err(e) = results.save(&out) {
        eprintln!("Failed to save results: {e}");
        std::process::exit(1);
    }

    let summary = &results.summary;
    eprintln!("\n=== Batch Summary ===");
    eprintln!("Missions: {}", summary.missions);
    eprintln!("Player wins: {}", summary.player_wins);
    eprintln!("Alien wins: {}", summary.alien_wins);
    eprintln!("Unresolved: {} ({} stalled)", summary.unresolved, summary.stalled);
    eprintln!("Average turns: {:.1}", summary.average_turns);
    eprintln!("Average player losses: {:.2}", summary.average_player_losses);
    eprintln!("Average alien losses: {:.2}", summary.average_alien_losses);
    eprintln!("Errors: {}", results.errors.len());
    eprintln!("Duration: {:.1}s", results.duration_seconds);
    eprintln!("Results saved to {}", out.display());
}

/// Replay one seed several times and compare.
fn cmd_verify(path: &Path, seed: u64, runs: u32) {
    let (scenario, rules) = load(path);
    tracing::info!(
        "Verifying determinism: {} with seed {} ({} runs)",
        scenario.name,
        seed,
        runs
    );

    if verify_determinism(&scenario, &rules, seed, runs) {
        eprintln!("PASS: All {runs} runs produced identical results");
    } else {
        eprintln!("FAIL: Non-determinism detected!");
        std::process::exit(1);
    }
}

/// Print the starting map.
fn cmd_render(path: &Path) {
    let (scenario, rules) = load(path);
    match scenario.build(rules) {
        Ok(save) => println!("{}", render(&save, AsciiConfig::default())),
        Err(e) => {
            eprintln!("Failed to build map: {e}");
            std::process::exit(1);
        }
    }
}
