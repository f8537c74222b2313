//! Route nodes placed by map designers for AI patrols.

use serde::{Deserialize, Serialize};

use crate::position::Position;

/// Node rank reserved for scouts, who stay outside.
pub const SCOUT_RANK: i32 = 0;

/// A patrol waypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Index in the battle's node list.
    pub id: usize,
    /// Tile the node sits on.
    pub position: Position,
    /// Rank of unit the node is meant for; 0 is scout.
    #[serde(default)]
    pub rank: i32,
    /// Patrol priority, higher is picked more often.
    #[serde(default)]
    pub flags: i32,
    /// Ids of connected nodes.
    #[serde(default)]
    pub links: Vec<usize>,
    /// Only flying units may use this node.
    #[serde(default)]
    pub flying_only: bool,
    /// Claimed by a unit walking towards it.
    #[serde(skip)]
    pub allocated: bool,
}

impl Node {
    /// A node with no links.
    #[must_use]
    pub fn new(id: usize, position: Position, rank: i32) -> Self {
        Self {
            id,
            position,
            rank,
            flags: 1,
            links: Vec::new(),
            flying_only: false,
            allocated: false,
        }
    }

    /// True if the node is meant for scouts.
    #[must_use]
    pub const fn is_scout_node(&self) -> bool {
        self.rank == SCOUT_RANK
    }

    /// Claim the node.
    pub fn allocate(&mut self) {
        self.allocated = true;
    }

    /// Release the node.
    pub fn free(&mut self) {
        self.allocated = false;
    }
}
