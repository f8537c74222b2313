//! Tile-graph pathfinding weighted by time unit cost.
//!
//! A unit moves between tiles in one of eight compass directions or
//! straight up and down. Step cost comes from the destination's floor and
//! object TU costs plus any wall crossed on the way, with diagonals costing
//! half as much again. The search is Dijkstra over that graph with a
//! deterministic tie-breaker, so the same map and unit always give the same
//! path.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::config::PreviewColors;
use crate::position::{Direction, Position};
use crate::rules::{BigWall, MovementType, TilePart, IMPASSABLE};
use crate::saved_battle::SavedBattleGame;
use crate::tile::{PathMarker, Tile};
use crate::unit::{BattleUnit, UnitId};

/// Highest terrain level difference a walker can step up in one move.
pub const MAX_STEP_HEIGHT: i32 = 8;

/// Step height for climbing units.
pub const MAX_CLIMB_HEIGHT: i32 = 16;

/// Terrain level at which a tile counts as high ground leading up a level.
pub const HIGH_GROUND_LEVEL: i32 = -16;

/// TU cost of a vertical move.
pub const VERTICAL_COST: i32 = 8;

/// TU cost of flying through a tile without a floor.
pub const AIR_COST: i32 = 4;

/// Extra TU paid to trigger a closed UFO door on the way through.
pub const UFO_DOOR_OPEN_COST: i32 = 4;

/// One move of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathStep {
    /// Move to the neighbouring tile in a direction.
    Horizontal(Direction),
    /// Move up one level.
    Up,
    /// Move down one level.
    Down,
}

impl PathStep {
    /// Every step the search tries, in expansion order.
    pub const ALL: [Self; 10] = [
        Self::Horizontal(Direction::North),
        Self::Horizontal(Direction::NorthEast),
        Self::Horizontal(Direction::East),
        Self::Horizontal(Direction::SouthEast),
        Self::Horizontal(Direction::South),
        Self::Horizontal(Direction::SouthWest),
        Self::Horizontal(Direction::West),
        Self::Horizontal(Direction::NorthWest),
        Self::Up,
        Self::Down,
    ];

    /// Numeric code: 0-7 for compass directions, 8 up, 9 down.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Horizontal(direction) => direction.index(),
            Self::Up => 8,
            Self::Down => 9,
        }
    }

    /// Step for a numeric code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0..=7 => Some(Self::Horizontal(Direction::from_index(code as i32))),
            8 => Some(Self::Up),
            9 => Some(Self::Down),
            _ => None,
        }
    }

    /// Compass direction of a horizontal step.
    #[must_use]
    pub const fn direction(self) -> Option<Direction> {
        match self {
            Self::Horizontal(direction) => Some(direction),
            _ => None,
        }
    }

    /// Tile offset before any climbing or falling.
    #[must_use]
    pub const fn offset(self) -> Position {
        match self {
            Self::Horizontal(direction) => direction.vector(),
            Self::Up => Position::UP,
            Self::Down => Position::DOWN,
        }
    }
}

/// One planned move and where it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waypoint {
    /// The move.
    pub step: PathStep,
    /// Tile reached.
    pub position: Position,
    /// TU spent from the start up to and including this move.
    pub total_tu: i32,
}

/// A computed path.
///
/// Waypoints are stored in reverse: the next move is at the back, so
/// walking pops from the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    reversed: Vec<Waypoint>,
}

impl Path {
    /// True if there is nowhere to go.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reversed.is_empty()
    }

    /// Moves left.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reversed.len()
    }

    /// Next move without taking it.
    #[must_use]
    pub fn peek(&self) -> Option<&Waypoint> {
        self.reversed.last()
    }

    /// Take the next move.
    pub fn dequeue(&mut self) -> Option<Waypoint> {
        self.reversed.pop()
    }

    /// Forget the rest of the path.
    pub fn clear(&mut self) {
        self.reversed.clear();
    }

    /// Waypoints in travel order.
    pub fn waypoints(&self) -> impl Iterator<Item = &Waypoint> + '_ {
        self.reversed.iter().rev()
    }

    /// Total TU cost of the remaining path.
    #[must_use]
    pub fn total_tu(&self) -> i32 {
        self.reversed.first().map_or(0, |last| last.total_tu)
    }

    /// Final tile of the path.
    #[must_use]
    pub fn destination(&self) -> Option<Position> {
        self.reversed.first().map(|last| last.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    cost: i32,
    index: usize,
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on cost, lower tile index first on ties
        match other.cost.cmp(&self.cost) {
            Ordering::Equal => other.index.cmp(&self.index),
            ord => ord,
        }
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct SearchResult {
    cost: Vec<i32>,
    previous: Vec<Option<(usize, PathStep)>>,
}

/// Path queries over one battle map.
pub struct Pathfinding<'a> {
    save: &'a SavedBattleGame,
}

impl<'a> Pathfinding<'a> {
    /// Queries against a battle.
    #[must_use]
    pub const fn new(save: &'a SavedBattleGame) -> Self {
        Self { save }
    }

    /// Cheapest path for `unit` from its tile to `target`.
    ///
    /// Returns an empty path when the target is off the map, is the unit's
    /// own tile, is taken by another unit, cannot be reached, or costs more
    /// than `max_tu`.
    #[must_use]
    pub fn calculate(&self, unit: &BattleUnit, target: Position, max_tu: Option<i32>) -> Path {
        let start = unit.position();
        let movement = unit.movement_type();
        if !self.save.is_on_map(target) {
            return Path::default();
        }
        let target = if movement == MovementType::Fly {
            target
        } else {
            self.save.ground_below(target)
        };
        if target == start || self.is_blocked_tile(target, movement, unit.id()) {
            return Path::default();
        }
        let (Some(start_index), Some(target_index)) =
            (self.save.tile_index(start), self.save.tile_index(target))
        else {
            return Path::default();
        };

        let result = self.search(unit, max_tu, Some(target_index));
        if result.cost[target_index] == i32::MAX {
            return Path::default();
        }

        let mut reversed = Vec::new();
        let mut index = target_index;
        while index != start_index {
            let Some((previous, step)) = result.previous[index] else {
                return Path::default();
            };
            reversed.push(Waypoint {
                step,
                position: self.save.index_position(index),
                total_tu: result.cost[index],
            });
            index = previous;
        }
        Path { reversed }
    }

    /// Every tile the unit can reach within `max_tu`, with its cost,
    /// including the tile it stands on.
    #[must_use]
    pub fn find_reachable(&self, unit: &BattleUnit, max_tu: i32) -> Vec<(Position, i32)> {
        let result = self.search(unit, Some(max_tu), None);
        result
            .cost
            .iter()
            .enumerate()
            .filter(|(_, cost)| **cost <= max_tu)
            .map(|(index, cost)| (self.save.index_position(index), *cost))
            .collect()
    }

    fn search(&self, unit: &BattleUnit, max_tu: Option<i32>, goal: Option<usize>) -> SearchResult {
        let tile_count = self.save.tiles().len();
        let mut result = SearchResult {
            cost: vec![i32::MAX; tile_count],
            previous: vec![None; tile_count],
        };
        let Some(start) = self.save.tile_index(unit.position()) else {
            return result;
        };
        let limit = max_tu.unwrap_or(i32::MAX);
        let movement = unit.movement_type();

        let mut open = BinaryHeap::new();
        result.cost[start] = 0;
        open.push(OpenNode {
            cost: 0,
            index: start,
        });

        while let Some(OpenNode { cost, index }) = open.pop() {
            if cost > result.cost[index] {
                continue;
            }
            if Some(index) == goal {
                break;
            }
            let here = self.save.index_position(index);
            for step in PathStep::ALL {
                let Some((next, step_cost)) = self.step_cost(here, step, movement, unit.id())
                else {
                    continue;
                };
                let Some(next_index) = self.save.tile_index(next) else {
                    continue;
                };
                let total = cost.saturating_add(step_cost);
                if total > limit || total >= result.cost[next_index] {
                    continue;
                }
                result.cost[next_index] = total;
                result.previous[next_index] = Some((index, step));
                open.push(OpenNode {
                    cost: total,
                    index: next_index,
                });
            }
        }
        result
    }

    /// Where one move from `from` ends and what it costs, or `None` if the
    /// move is impossible.
    ///
    /// Walkers step up onto the next level from high ground and drop to the
    /// first floor below when stepping into the air.
    #[must_use]
    pub fn step_cost(
        &self,
        from: Position,
        step: PathStep,
        movement: MovementType,
        mover: UnitId,
    ) -> Option<(Position, i32)> {
        let direction = match step {
            PathStep::Up | PathStep::Down => {
                return self
                    .validate_up_down(movement, from, step)
                    .then(|| (from + step.offset(), VERTICAL_COST))
                    .filter(|(to, _)| !self.is_blocked_tile(*to, movement, mover));
            }
            PathStep::Horizontal(direction) => direction,
        };

        let start_tile = self.save.tile(from)?;
        let mut to = from + direction.vector();
        self.save.tile(to)?;

        let wall_cost = self.crossing_cost(from, direction, movement, mover)?;

        if start_tile.terrain_level() <= HIGH_GROUND_LEVEL
            && self.save.is_on_map(to + Position::UP)
            && !self.is_blocked_tile(to + Position::UP, movement, mover)
        {
            to = to + Position::UP;
        }
        if self.is_blocked_tile(to, movement, mover) {
            return None;
        }

        let mut in_air = false;
        if self.save.has_no_floor(to) {
            if movement == MovementType::Fly {
                in_air = true;
            } else {
                while to.z > 0 && self.save.has_no_floor(to) {
                    to = to + Position::DOWN;
                    if self.is_blocked_tile(to, movement, mover) {
                        return None;
                    }
                }
            }
        }

        let dest_tile = self.save.tile(to)?;
        if to.z == from.z {
            let max_step = if movement == MovementType::Climb {
                MAX_CLIMB_HEIGHT
            } else {
                MAX_STEP_HEIGHT
            };
            if start_tile.terrain_level() - dest_tile.terrain_level() > max_step {
                return None;
            }
        }

        let floor = if in_air {
            AIR_COST
        } else {
            dest_tile.tu_cost(TilePart::Floor, movement)
        };
        let mut cost = floor + dest_tile.tu_cost(TilePart::Object, movement) + wall_cost;
        if direction.is_diagonal() {
            cost = cost * 3 / 2;
        }
        (cost < IMPASSABLE).then_some((to, cost))
    }

    /// True if a unit with `movement` may go straight up or down from `pos`.
    ///
    /// Flyers need open air in the way: no floor on the tile above when
    /// going up, no floor under them when going down. Anyone may ride a
    /// grav lift that continues on the next level.
    #[must_use]
    pub fn validate_up_down(&self, movement: MovementType, pos: Position, step: PathStep) -> bool {
        let (upper, lower) = match step {
            PathStep::Up => (pos + Position::UP, pos),
            PathStep::Down => (pos, pos + Position::DOWN),
            PathStep::Horizontal(_) => return false,
        };
        let (Some(upper_tile), Some(lower_tile)) = (self.save.tile(upper), self.save.tile(lower))
        else {
            return false;
        };
        if upper_tile.is_grav_lift() && lower_tile.is_grav_lift() {
            return true;
        }
        movement == MovementType::Fly && upper_tile.has_no_floor(Some(lower_tile))
    }

    /// TU cost of the walls crossed going one tile in `direction`, or
    /// `None` if the way is shut.
    ///
    /// A diagonal move is open if either of the two orthogonal detours
    /// around the corner is open; it costs the cheaper one.
    fn crossing_cost(
        &self,
        from: Position,
        direction: Direction,
        movement: MovementType,
        mover: UnitId,
    ) -> Option<i32> {
        if !direction.is_diagonal() {
            return self.edge_cost(from, direction, movement);
        }
        let first = direction.rotate(-1);
        let second = direction.rotate(1);
        let detour = |a: Direction, b: Direction| -> Option<i32> {
            let corner = from + a.vector();
            if self.is_blocked_tile(corner, movement, mover) {
                return None;
            }
            Some(self.edge_cost(from, a, movement)? + self.edge_cost(corner, b, movement)?)
        };
        match (detour(first, second), detour(second, first)) {
            (Some(x), Some(y)) => Some(x.min(y)),
            (Some(x), None) | (None, Some(x)) => Some(x),
            (None, None) => None,
        }
    }

    /// Cost of crossing the edge between `from` and its orthogonal
    /// neighbour.
    fn edge_cost(&self, from: Position, direction: Direction, movement: MovementType) -> Option<i32> {
        let to = from + direction.vector();
        let (start, dest) = (self.save.tile(from)?, self.save.tile(to)?);
        let (wall_tile, slot) = match direction {
            Direction::North => (start, TilePart::NorthWall),
            Direction::West => (start, TilePart::WestWall),
            Direction::South => (dest, TilePart::NorthWall),
            Direction::East => (dest, TilePart::WestWall),
            _ => return None,
        };
        if big_wall_closes(start.big_wall(), direction)
            || big_wall_closes(dest.big_wall(), direction.opposite())
        {
            return None;
        }
        let Some(wall) = wall_tile.part(slot) else {
            return Some(0);
        };
        if wall.ufo_door && !wall_tile.is_ufo_door_open(slot) {
            return Some(UFO_DOOR_OPEN_COST);
        }
        let cost = wall_tile.tu_cost(slot, movement);
        (cost < IMPASSABLE).then_some(cost)
    }

    /// True if a unit cannot enter the tile at all.
    fn is_blocked_tile(&self, pos: Position, movement: MovementType, mover: UnitId) -> bool {
        let Some(tile) = self.save.tile(pos) else {
            return true;
        };
        blocked_by_terrain(tile, movement) || tile.unit().is_some_and(|other| other != mover)
    }
}

fn blocked_by_terrain(tile: &Tile, movement: MovementType) -> bool {
    tile.big_wall() == BigWall::Block
        || [TilePart::Floor, TilePart::Object]
            .into_iter()
            .any(|slot| tile.tu_cost(slot, movement) >= IMPASSABLE)
}

/// True if a big wall shape shuts the tile's edge facing `direction`.
const fn big_wall_closes(wall: BigWall, direction: Direction) -> bool {
    match direction {
        Direction::North => wall.closes_north(),
        Direction::East => wall.closes_east(),
        Direction::South => wall.closes_south(),
        Direction::West => wall.closes_west(),
        _ => false,
    }
}

/// Mark the tiles of a path with arrows, cumulative TU and a colour.
///
/// Green tiles leave `reserved_tu` in hand, yellow tiles are reachable but
/// eat into the reserve, red tiles cannot be reached this turn.
pub fn preview_path(
    save: &mut SavedBattleGame,
    path: &Path,
    time_units: i32,
    reserved_tu: i32,
    colors: PreviewColors,
) {
    let waypoints: Vec<Waypoint> = path.waypoints().copied().collect();
    for (i, waypoint) in waypoints.iter().enumerate() {
        let left = time_units - waypoint.total_tu;
        let color = if left >= reserved_tu {
            colors.green
        } else if left >= 0 {
            colors.yellow
        } else {
            colors.red
        };
        let direction = waypoints.get(i + 1).map(|next| next.step.code());
        if let Some(tile) = save.tile_mut(waypoint.position) {
            tile.set_preview(Some(PathMarker {
                direction,
                tu: waypoint.total_tu,
                color,
            }));
        }
    }
}

/// Clear every path preview marker. Returns true if any was set.
pub fn remove_preview(save: &mut SavedBattleGame) -> bool {
    let mut removed = false;
    for tile in save.tiles_mut() {
        if tile.preview().is_some() {
            tile.set_preview(None);
            removed = true;
        }
    }
    removed
}
