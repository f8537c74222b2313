//! Headless battle runner for AI testing and CI verification.
//!
//! Plays tactical missions with the AI controlling both sides and no
//! graphics. This enables:
//!
//! - **AI testing**: watch whole missions as ASCII frames
//! - **Balance runs**: play one scenario over many seeds in parallel
//! - **CI verification**: check that a seed always plays out the same way
//!
//! # Example
//!
//! ```bash
//! # Play one mission, printing a frame per turn
//! cargo run -p battlescape_headless -- run --scenario scenarios/farm.ron --seed 7 --frames
//!
//! # Play 200 seeds
//! cargo run -p battlescape_headless -- batch --scenario scenarios/farm.ron --count 200 --output results/
//!
//! # Verify determinism
//! cargo run -p battlescape_headless -- verify --scenario scenarios/farm.ron --seed 12345
//! ```

pub mod ascii;
pub mod batch;
pub mod runner;
pub mod scenario;

pub use ascii::{render, render_level, AsciiConfig};
pub use batch::{run_batch, verify_determinism, BatchConfig, BatchResults, BatchSummary};
pub use runner::{run_mission, MissionEnd, MissionReport, MissionRunner};
pub use scenario::{Scenario, ScenarioError};
