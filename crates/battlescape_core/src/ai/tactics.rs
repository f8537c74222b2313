//! Situation assessment shared by the AI policies.
//!
//! Who is a target, who can see a tile, where to run and which patrol node
//! to head for. Everything here only reads the battle; the policies decide
//! what to do with the answers.

use std::collections::BTreeMap;

use crate::config::{EscapeWeights, SimulationConfig};
use crate::math::{percent_to_fixed, Fixed};
use crate::pathfinding::Pathfinding;
use crate::position::Position;
use crate::rng::{shuffle, RandomSource};
use crate::rules::MovementType;
use crate::saved_battle::SavedBattleGame;
use crate::tile_engine::line::calculate_line;
use crate::tile_engine::vision::eye_voxel;
use crate::tile_engine::VoxelType;
use crate::unit::{BattleUnit, Faction, UnitId};

/// Half-width of the square of tiles searched for cover and fire points.
pub const TILE_SEARCH_RADIUS: i32 = 5;

/// Score that rules a candidate tile out completely.
const NO_SCORE: i32 = -100_000;

/// Patrol node picks tried before giving up for this think.
pub const PATROL_TRIES: i32 = 5;

/// Missions where the aliens defend rather than scout.
pub const BASE_DEFENSE: &str = "STR_BASE_DEFENSE";

/// What an AI unit knows about its enemies at the start of a think.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Situation {
    /// Enemies the unit knows the position of.
    pub known: Vec<UnitId>,
    /// Enemies the unit sees right now.
    pub visible: Vec<UnitId>,
    /// Closest visible enemy and its distance.
    pub nearest_visible: Option<(UnitId, i32)>,
    /// Enemies that could shoot the unit where it stands.
    pub spotting: i32,
}

impl Situation {
    /// Look around for `unit`.
    #[must_use]
    pub fn assess(save: &SavedBattleGame, config: &SimulationConfig, unit: UnitId) -> Self {
        let Some(me) = save.unit(unit) else {
            return Self::default();
        };
        let known: Vec<UnitId> = save
            .units()
            .iter()
            .filter(|other| is_known_target(me, other, config.sneaky_ai))
            .map(BattleUnit::id)
            .collect();
        let visible: Vec<UnitId> = me
            .visible_units()
            .iter()
            .copied()
            .filter(|id| save.unit(*id).is_some_and(|u| !u.is_out() && me.faction().is_enemy_of(u.faction())))
            .collect();
        let nearest_visible = visible
            .iter()
            .filter_map(|id| save.unit(*id).map(|u| (*id, me.position().distance(u.position()))))
            .min_by_key(|(id, distance)| (*distance, *id));
        let spotting = spotting_units(save, config, unit, me.position());
        Self {
            known,
            visible,
            nearest_visible,
            spotting,
        }
    }

    /// Closest known enemy, seen or not.
    #[must_use]
    pub fn closest_known(&self, save: &SavedBattleGame, from: Position) -> Option<UnitId> {
        self.known
            .iter()
            .filter_map(|id| save.unit(*id).map(|u| (*id, from.distance(u.position()))))
            .min_by_key(|(id, distance)| (*distance, *id))
            .map(|(id, _)| id)
    }
}

/// True if `me` knows where `other` is and wants it dead.
///
/// Aliens remember a unit for as many turns as their intelligence after
/// it was last spotted; sneaky aliens only know what was spotted this
/// turn. Civilians only know the hostiles they see.
#[must_use]
pub fn is_known_target(me: &BattleUnit, other: &BattleUnit, sneaky: bool) -> bool {
    if other.is_out() || !me.faction().is_enemy_of(other.faction()) {
        return false;
    }
    match me.faction() {
        Faction::Hostile => {
            let memory = if sneaky { 0 } else { me.intelligence() };
            other.turns_since_spotted() <= memory
        }
        _ => me.visible_units().contains(&other.id()),
    }
}

/// True if `viewer` has a line of fire onto a unit of `height` voxels
/// standing at `pos`. `occupant` is the unit supposed to stand there; it
/// does not block its own silhouette.
#[must_use]
pub fn can_target_tile(
    save: &SavedBattleGame,
    viewer: UnitId,
    pos: Position,
    height: i32,
    occupant: Option<UnitId>,
) -> bool {
    let Some(mut origin) = eye_voxel(save, viewer) else {
        return false;
    };
    origin.z -= 2;
    let Some(tile) = save.tile(pos) else {
        return false;
    };
    let target = pos.to_voxel_center() + Position::new(0, 0, height / 2 - tile.terrain_level());
    let trace = calculate_line(save, origin, target, Some(viewer));
    match trace.hit {
        VoxelType::Empty => true,
        VoxelType::Unit => trace.impact().is_some_and(|voxel| {
            let hit_tile = voxel.voxel_to_tile();
            hit_tile == pos || save.unit_at(hit_tile) == occupant
        }),
        _ => false,
    }
}

/// Number of enemies of `unit` within threat range that could shoot it if
/// it stood at `pos`.
#[must_use]
pub fn spotting_units(save: &SavedBattleGame, config: &SimulationConfig, unit: UnitId, pos: Position) -> i32 {
    let Some(me) = save.unit(unit) else {
        return 0;
    };
    let range = config.balance.escape.threat_range;
    let height = me.height();
    let count = save
        .units()
        .iter()
        .filter(|other| !other.is_out() && other.faction().is_enemy_of(me.faction()))
        .filter(|other| other.position().distance(pos) <= range)
        .filter(|other| can_target_tile(save, other.id(), pos, height, Some(unit)))
        .count();
    count as i32
}

/// Offsets of every tile in a square of half-width `radius`.
#[must_use]
pub fn tile_search(radius: i32) -> Vec<Position> {
    let mut offsets = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
    for x in -radius..=radius {
        for y in -radius..=radius {
            offsets.push(Position::new(x, y, 0));
        }
    }
    offsets
}

/// Tiles reachable by a unit with their TU cost.
#[must_use]
pub fn reachable(save: &SavedBattleGame, unit: UnitId, max_tu: i32) -> BTreeMap<Position, i32> {
    save.unit(unit)
        .map(|me| Pathfinding::new(save).find_reachable(me, max_tu.max(0)).into_iter().collect())
        .unwrap_or_default()
}

/// A place to run to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapePlan {
    /// Destination tile.
    pub target: Position,
    /// TU the run costs; staying put counts as 1.
    pub tu: i32,
    /// Final score of the tile.
    pub score: i32,
}

/// Look for a tile to withdraw to, away from `threat` and out of sight of
/// the enemies.
///
/// The square around the unit is searched in shuffled order first; once
/// that is exhausted, random tiles further out are tried. The search stops
/// early as soon as a tile scores above the fast-pass threshold. Returns
/// `None` when no reachable tile was found at all.
pub fn find_escape(
    save: &SavedBattleGame,
    config: &SimulationConfig,
    unit: UnitId,
    threat: Option<UnitId>,
    reachable: &BTreeMap<Position, i32>,
    rng: &mut dyn RandomSource,
) -> Option<EscapePlan> {
    let weights: &EscapeWeights = &config.balance.escape;
    let me = save.unit(unit)?;
    let origin = me.position();
    let (_, _, height) = save.dimensions();
    let threat_pos = threat.and_then(|id| save.unit(id)).map(BattleUnit::position);
    let current_distance = threat_pos.map_or(0, |t| origin.distance(t));
    let spotting_here = spotting_units(save, config, unit, origin);

    let mut search = tile_search(TILE_SEARCH_RADIUS);
    shuffle(rng, &mut search);

    let mut best: Option<EscapePlan> = None;
    let mut best_score = NO_SCORE;
    let mut tries = 0;
    while tries < weights.max_tries {
        let (mut target, mut score);
        if tries < weights.desperate_after && (tries as usize) < search.len() {
            target = origin + search[tries as usize];
            score = weights.base_systematic_success;
            if target == origin {
                if spotting_here > 0 {
                    target.x += rng.generate(-20, 20);
                    target.y += rng.generate(-20, 20);
                } else {
                    score += weights.current_tile_preference;
                }
            }
        } else {
            score = weights.base_desperate_success;
            target = origin + Position::new(rng.generate(-10, 10), rng.generate(-10, 10), 0);
            target.z = (origin.z + rng.generate(-1, 1)).clamp(0, height - 1);
        }
        tries += 1;

        let Some(tile) = save.tile(target) else {
            continue;
        };
        let Some(tu) = reachable.get(&target).copied() else {
            continue;
        };
        if let Some(threat_pos) = threat_pos {
            score += (target.distance(threat_pos) - current_distance) * 10;
        }
        let spotters = spotting_units(save, config, unit, target);
        if spotting_here > 0 || spotters > 0 {
            if spotting_here <= spotters {
                score -= (1 + spotters - spotting_here) * weights.exposure_penalty;
            } else {
                score += (spotting_here - spotters) * weights.exposure_penalty;
            }
        }
        if tile.fire() > 0 {
            score -= weights.fire_penalty;
        }
        if tile.is_dangerous() {
            score -= weights.base_systematic_success;
        }

        if score > best_score {
            best_score = score;
            best = Some(EscapePlan {
                target,
                tu: if target == origin { 1 } else { tu.max(1) },
                score,
            });
            if best_score > weights.fast_pass_threshold {
                break;
            }
        }
    }
    best
}

/// Closest patrol node on the unit's level.
#[must_use]
pub fn closest_node(save: &SavedBattleGame, pos: Position) -> Option<usize> {
    save.nodes()
        .iter()
        .filter(|node| node.position.z == pos.z)
        .min_by_key(|node| (node.position.distance_squared(pos), node.id))
        .map(|node| node.id)
}

/// Pick the next patrol node after `from`.
///
/// Scouts may head for any linked node; the others keep to nodes of their
/// own rank and never walk out to scout nodes. Allocated, occupied and
/// fly-only nodes (for walkers) are skipped, and nodes with a higher
/// priority flag are picked more often. Returns `None` if nothing fits.
pub fn pick_patrol_node(
    save: &SavedBattleGame,
    unit: &BattleUnit,
    from: Option<usize>,
    scout: bool,
    rng: &mut dyn RandomSource,
) -> Option<usize> {
    let nodes = save.nodes();
    let from_node = from.and_then(|id| nodes.get(id));
    let linked: Vec<usize> = match from_node {
        Some(node) if !node.links.is_empty() => node.links.clone(),
        _ => nodes.iter().map(|node| node.id).collect(),
    };
    let candidates: Vec<(usize, i32)> = linked
        .into_iter()
        .filter_map(|id| nodes.get(id))
        .filter(|node| Some(node.id) != from && !node.allocated)
        .filter(|node| !node.flying_only || unit.movement_type() == MovementType::Fly)
        .filter(|node| save.unit_at(node.position).map_or(true, |id| id == unit.id()))
        .filter(|node| {
            scout || (!node.is_scout_node() && from_node.map_or(true, |f| f.rank == node.rank))
        })
        .map(|node| (node.id, node.flags.max(1)))
        .collect();

    let total: i32 = candidates.iter().map(|(_, weight)| weight).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rng.generate(1, total);
    for (id, weight) in &candidates {
        roll -= weight;
        if roll <= 0 {
            return Some(*id);
        }
    }
    candidates.last().map(|(id, _)| *id)
}

/// Scale a mode weight by a percentage.
#[must_use]
pub fn scaled(odds: Fixed, percent: i32) -> Fixed {
    odds * percent_to_fixed(percent)
}

/// True if the unit has a path to `target`.
#[must_use]
pub fn can_reach(save: &SavedBattleGame, unit: &BattleUnit, target: Position) -> bool {
    target == unit.position() || !Pathfinding::new(save).calculate(unit, target, None).is_empty()
}

/// Release the allocation on a patrol node.
pub fn free_node(save: &mut SavedBattleGame, node: Option<usize>) {
    if let Some(node) = node.and_then(|id| save.nodes_mut().get_mut(id)) {
        node.free();
    }
}

/// Claim a patrol node.
pub fn allocate_node(save: &mut SavedBattleGame, node: usize) {
    if let Some(node) = save.nodes_mut().get_mut(node) {
        node.allocate();
    }
}

/// The pair of nodes a patrolling unit walks between.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatrolRoute {
    /// Node the unit last stood on.
    pub from_node: Option<usize>,
    /// Claimed node the unit is heading for.
    pub to_node: Option<usize>,
}

impl PatrolRoute {
    /// Note arrival at the destination node, and find a starting node for
    /// a unit that has none.
    pub fn update(&mut self, save: &mut SavedBattleGame, position: Position) {
        if let Some(node) = self.to_node {
            if save.nodes().get(node).is_some_and(|n| n.position == position) {
                free_node(save, Some(node));
                self.from_node = Some(node);
                self.to_node = None;
            }
        }
        if self.from_node.is_none() {
            self.from_node = closest_node(save, position);
        }
    }

    /// Pick, check and claim a destination if the route has none. Nodes of
    /// the preferred kind are tried first.
    pub fn plan(&mut self, save: &mut SavedBattleGame, unit: UnitId, scout: bool, rng: &mut dyn RandomSource) {
        let mut tries = 0;
        while self.to_node.is_none() && tries < PATROL_TRIES {
            tries += 1;
            let Some(me) = save.unit(unit) else {
                return;
            };
            let picked = pick_patrol_node(save, me, self.from_node, scout, rng)
                .or_else(|| pick_patrol_node(save, me, self.from_node, !scout, rng));
            let Some(node) = picked else {
                return;
            };
            let Some(target) = save.nodes().get(node).map(|n| n.position) else {
                return;
            };
            if can_reach(save, me, target) {
                allocate_node(save, node);
                self.to_node = Some(node);
            }
        }
    }

    /// Where the unit is walking, if anywhere.
    #[must_use]
    pub fn destination(&self, save: &SavedBattleGame) -> Option<Position> {
        self.to_node.and_then(|id| save.nodes().get(id)).map(|n| n.position)
    }

    /// Give up the claimed node.
    pub fn release(&mut self, save: &mut SavedBattleGame) {
        free_node(save, self.to_node.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::test_fixtures::{flat_battle, parts, place, ScriptedRng};
    use crate::tile_engine::TileEngine;

    fn lit(save: &mut SavedBattleGame) {
        save.set_global_shade(0);
        let config = SimulationConfig::default();
        TileEngine::new(save, &config).recalculate_all();
    }

    #[test]
    fn test_tile_search_covers_square() {
        let offsets = tile_search(TILE_SEARCH_RADIUS);
        assert_eq!(offsets.len(), 121);
        assert!(offsets.contains(&Position::new(-5, 5, 0)));
        assert!(offsets.contains(&Position::ZERO));
    }

    #[test]
    fn test_wall_hides_tile_from_spotter() {
        let mut save = flat_battle(10, 5, 1);
        let alien = save.add_unit("sectoid", Faction::Hostile, Position::new(1, 2, 0)).unwrap();
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(8, 2, 0)).unwrap();
        for y in 0..5 {
            place(&mut save, Position::new(5, y, 0), parts::WEST_WALL);
        }
        lit(&mut save);
        let config = SimulationConfig::default();

        assert!(!can_target_tile(&save, soldier, Position::new(2, 2, 0), 22, Some(alien)));
        assert!(can_target_tile(&save, soldier, Position::new(6, 2, 0), 22, Some(alien)));
        assert_eq!(spotting_units(&save, &config, alien, Position::new(1, 2, 0)), 0);
        assert_eq!(spotting_units(&save, &config, alien, Position::new(6, 0, 0)), 1);
    }

    #[test]
    fn test_hostile_memory_follows_intelligence() {
        let mut save = flat_battle(10, 5, 1);
        let alien = save.add_unit("sectoid", Faction::Hostile, Position::new(1, 2, 0)).unwrap();
        let soldier = save.add_unit("soldier", Faction::Player, Position::new(8, 2, 0)).unwrap();
        let me = save.unit(alien).unwrap().clone();
        assert!(!is_known_target(&me, save.unit(soldier).unwrap(), false));

        save.unit_mut(soldier).unwrap().mark_spotted();
        assert!(is_known_target(&me, save.unit(soldier).unwrap(), false));
        assert!(is_known_target(&me, save.unit(soldier).unwrap(), true));
    }

    #[test]
    fn test_escape_moves_away_from_threat() {
        let mut save = flat_battle(20, 5, 1);
        let civilian = save.add_unit("civilian", Faction::Neutral, Position::new(10, 2, 0)).unwrap();
        let alien = save.add_unit("sectoid", Faction::Hostile, Position::new(7, 2, 0)).unwrap();
        lit(&mut save);
        let config = SimulationConfig::default();
        let options = reachable(&save, civilian, 40);
        let mut rng = ScriptedRng::new(&[7, 3, 11, 5]);

        let plan = find_escape(&save, &config, civilian, Some(alien), &options, &mut rng).unwrap();
        assert!(plan.target.distance(Position::new(7, 2, 0)) > 3);
        assert!(options.contains_key(&plan.target));
    }

    #[test]
    fn test_patrol_node_respects_rank_and_allocation() {
        let mut save = flat_battle(10, 10, 1);
        let alien = save.add_unit("sectoid", Faction::Hostile, Position::new(1, 1, 0)).unwrap();
        let mut home = Node::new(0, Position::new(1, 1, 0), 2);
        home.links = vec![1, 2, 3];
        save.add_node(home);
        save.add_node(Node::new(0, Position::new(8, 1, 0), 0));
        save.add_node(Node::new(0, Position::new(1, 8, 0), 2));
        save.add_node(Node::new(0, Position::new(8, 8, 0), 2));
        save.nodes_mut()[3].allocate();

        let me = save.unit(alien).unwrap().clone();
        let mut rng = ScriptedRng::new(&[0]);
        assert_eq!(closest_node(&save, me.position()), Some(0));
        assert_eq!(pick_patrol_node(&save, &me, Some(0), false, &mut rng), Some(2));
        // scouts may take the rank 0 node as well
        assert_eq!(pick_patrol_node(&save, &me, Some(0), true, &mut rng), Some(1));
    }
}
