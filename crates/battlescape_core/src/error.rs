//! Error types for the battle simulation.
//!
//! Only the load, deserialization and ruleset boundaries return errors.
//! Ordinary gameplay conditions (not enough time units, no line of fire,
//! unreachable tiles) are reported as data on the action or state that
//! produced them.

use thiserror::Error;

use crate::position::Position;

/// Result type alias using [`BattleError`].
pub type Result<T> = std::result::Result<T, BattleError>;

/// Top-level error type for the battle core.
#[derive(Debug, Error)]
pub enum BattleError {
    /// A terrain data set name did not resolve.
    #[error("Unknown terrain data set: {0}")]
    UnknownMapDataSet(String),

    /// A terrain part index did not exist in its data set.
    #[error("Terrain part {id} not found in data set {set}")]
    UnknownMapData {
        /// Data set index.
        set: i32,
        /// Part index inside the set.
        id: i32,
    },

    /// An item rule id did not resolve.
    #[error("Unknown item rule: {0}")]
    UnknownItem(String),

    /// An armor rule id did not resolve.
    #[error("Unknown armor rule: {0}")]
    UnknownArmor(String),

    /// A unit template id did not resolve.
    #[error("Unknown unit template: {0}")]
    UnknownUnit(String),

    /// A position fell outside the map.
    #[error("Position {0} is outside the map")]
    OutOfMap(Position),

    /// The target tile already holds a unit.
    #[error("Tile {0} is already occupied")]
    TileOccupied(Position),

    /// Unit lookup failed.
    #[error("Unit not found: {0}")]
    UnitNotFound(u32),

    /// Item lookup failed.
    #[error("Item not found: {0}")]
    ItemNotFound(u32),

    /// A saved document was internally inconsistent.
    #[error("Invalid save data: {0}")]
    InvalidSave(String),

    /// Encoding or decoding failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Failed to parse a data file.
    #[error("Failed to parse data file {path}: {message}")]
    DataParseError {
        /// File path.
        path: String,
        /// Error description.
        message: String,
    },

    /// Failed to read a data file.
    #[error("Failed to read data file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ron::error::SpannedError> for BattleError {
    fn from(err: ron::error::SpannedError) -> Self {
        Self::DataParseError {
            path: String::from("<memory>"),
            message: err.to_string(),
        }
    }
}

impl From<bincode::Error> for BattleError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
