//! How much terrain stops light, sight, blasts, smoke and fire.
//!
//! These work on tiles, not voxels: each wall, floor and object carries a
//! block value per [`Affector`]. Floors are special and stop everything
//! except high explosive almost completely.

use crate::position::{Direction, Position};
use crate::rules::{Affector, DamageType, MovementType, TilePart, IMPASSABLE};
use crate::saved_battle::SavedBattleGame;
use crate::tile::Tile;

/// Blockage of a floor against high explosive.
pub const FLOOR_HE_BLOCK: i32 = 15;

/// Blockage of a floor against everything else.
pub const FLOOR_BLOCK: i32 = 255;

/// The affector column used for a kind of damage.
#[must_use]
pub const fn affector_for(damage: DamageType) -> Affector {
    match damage {
        DamageType::None => Affector::Vision,
        DamageType::Incendiary => Affector::Fire,
        DamageType::Smoke => Affector::Smoke,
        DamageType::Stun => Affector::Gas,
        _ => Affector::HighExplosive,
    }
}

/// Blockage of one part of a tile. Missing tiles and parts block nothing,
/// and an open UFO door blocks nothing.
#[must_use]
pub fn part_blockage(tile: Option<&Tile>, slot: TilePart, affector: Affector) -> i32 {
    let Some(tile) = tile else {
        return 0;
    };
    let Some(data) = tile.part(slot) else {
        return 0;
    };
    if slot == TilePart::Floor {
        return if affector == Affector::HighExplosive {
            FLOOR_HE_BLOCK
        } else {
            FLOOR_BLOCK
        };
    }
    if tile.is_ufo_door_open(slot) {
        return 0;
    }
    if data.stop_los && affector == Affector::Vision {
        return FLOOR_BLOCK;
    }
    data.block(affector)
}

/// Wall crossed when stepping one tile in a cardinal direction.
fn edge_blockage(save: &SavedBattleGame, from: Position, direction: Direction, affector: Affector) -> i32 {
    match direction {
        Direction::North => part_blockage(save.tile(from), TilePart::NorthWall, affector),
        Direction::East => part_blockage(save.tile(from.step(direction)), TilePart::WestWall, affector),
        Direction::South => part_blockage(save.tile(from.step(direction)), TilePart::NorthWall, affector),
        Direction::West => part_blockage(save.tile(from), TilePart::WestWall, affector),
        _ => 0,
    }
}

/// Blockage between two horizontally adjacent tiles on the same level.
///
/// Includes the object on the starting tile. A diagonal move averages the
/// two orthogonal detours and the objects standing on them.
#[must_use]
pub fn horizontal_blockage(save: &SavedBattleGame, from: Position, to: Position, affector: Affector) -> i32 {
    let (dx, dy) = (to.x - from.x, to.y - from.y);
    if dx.abs() > 1 || dy.abs() > 1 {
        return 0;
    }
    let Some(direction) = Direction::from_vector(dx, dy) else {
        return 0;
    };

    let mut block = if direction.is_diagonal() {
        let Some(along_x) = Direction::from_vector(dx, 0) else {
            return 0;
        };
        let Some(along_y) = Direction::from_vector(0, dy) else {
            return 0;
        };
        let side_x = from.step(along_x);
        let side_y = from.step(along_y);
        let via_x = edge_blockage(save, from, along_x, affector) + edge_blockage(save, side_x, along_y, affector);
        let via_y = edge_blockage(save, from, along_y, affector) + edge_blockage(save, side_y, along_x, affector);
        via_x / 2
            + via_y / 2
            + (part_blockage(save.tile(side_x), TilePart::Object, affector)
                + part_blockage(save.tile(side_y), TilePart::Object, affector))
                / 2
    } else {
        edge_blockage(save, from, direction, affector)
    };

    block += part_blockage(save.tile(from), TilePart::Object, affector);
    block
}

/// Blockage of the floors crossed moving between levels.
///
/// Going up counts the floors above the start; going down counts the floors
/// of the levels left behind. When the columns differ both are counted.
#[must_use]
pub fn vertical_blockage(save: &SavedBattleGame, from: Position, to: Position, affector: Affector) -> i32 {
    let floors = |x: i32, y: i32, levels: std::ops::RangeInclusive<i32>| -> i32 {
        levels
            .map(|z| part_blockage(save.tile(Position::new(x, y, z)), TilePart::Floor, affector))
            .sum()
    };
    let same_column = from.x == to.x && from.y == to.y;
    let mut block = 0;
    if to.z > from.z {
        block += floors(from.x, from.y, from.z + 1..=to.z);
        if !same_column {
            block += floors(to.x, to.y, from.z + 1..=to.z);
        }
    } else if to.z < from.z {
        block += floors(to.x, to.y, to.z + 1..=from.z);
        if !same_column {
            block += floors(from.x, from.y, to.z + 1..=from.z);
        }
    }
    block
}

/// Total blockage of one step of a ray between neighbouring tiles.
#[must_use]
pub fn step_blockage(save: &SavedBattleGame, from: Position, to: Position, affector: Affector) -> i32 {
    horizontal_blockage(save, from, Position::new(to.x, to.y, from.z), affector)
        + vertical_blockage(save, from, to, affector)
}

fn wall_stops_reach(tile: Option<&Tile>, slot: TilePart) -> bool {
    let Some(tile) = tile else {
        return false;
    };
    tile.part(slot).is_some_and(|data| {
        data.door
            || (data.ufo_door && !tile.is_ufo_door_open(slot))
            || data.tu_cost(MovementType::Walk) >= IMPASSABLE
    })
}

fn edge_closed(save: &SavedBattleGame, from: Position, direction: Direction) -> bool {
    match direction {
        Direction::North => wall_stops_reach(save.tile(from), TilePart::NorthWall),
        Direction::East => wall_stops_reach(save.tile(from.step(direction)), TilePart::WestWall),
        Direction::South => wall_stops_reach(save.tile(from.step(direction)), TilePart::NorthWall),
        Direction::West => wall_stops_reach(save.tile(from), TilePart::WestWall),
        _ => false,
    }
}

fn object_closed(save: &SavedBattleGame, pos: Position) -> bool {
    save.tile(pos)
        .and_then(|t| t.part(TilePart::Object))
        .is_some_and(|data| data.tu_cost(MovementType::Walk) >= IMPASSABLE)
}

/// True if a wall or closed door stands between a tile and its neighbour.
///
/// A diagonal is closed only when both orthogonal detours are closed.
#[must_use]
pub fn wall_between(save: &SavedBattleGame, from: Position, direction: Direction) -> bool {
    if !direction.is_diagonal() {
        return edge_closed(save, from, direction);
    }
    let vector = direction.vector();
    let (Some(along_x), Some(along_y)) = (
        Direction::from_vector(vector.x, 0),
        Direction::from_vector(0, vector.y),
    ) else {
        return false;
    };
    let side_x = from.step(along_x);
    let side_y = from.step(along_y);
    let via_x_closed =
        edge_closed(save, from, along_x) || object_closed(save, side_x) || edge_closed(save, side_x, along_y);
    let via_y_closed =
        edge_closed(save, from, along_y) || object_closed(save, side_y) || edge_closed(save, side_y, along_x);
    via_x_closed && via_y_closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{flat_battle, parts, place};

    #[test]
    fn test_cardinal_walls_block_by_slot() {
        let mut save = flat_battle(4, 4, 1);
        place(&mut save, Position::new(2, 1, 0), parts::WEST_WALL);
        place(&mut save, Position::new(1, 1, 0), parts::NORTH_WALL);

        let he = Affector::HighExplosive;
        // east from (1,1) crosses the west wall of (2,1)
        assert_eq!(horizontal_blockage(&save, Position::new(1, 1, 0), Position::new(2, 1, 0), he), 40);
        // north from (1,1) crosses its own north wall
        assert_eq!(horizontal_blockage(&save, Position::new(1, 1, 0), Position::new(1, 0, 0), he), 40);
        // south into (1,1) crosses the same wall from the other side
        assert_eq!(horizontal_blockage(&save, Position::new(1, 0, 0), Position::new(1, 1, 0), he), 40);
        assert_eq!(horizontal_blockage(&save, Position::new(0, 0, 0), Position::new(1, 0, 0), he), 0);
    }

    #[test]
    fn test_floors_block_vertical_movement() {
        let mut save = flat_battle(3, 3, 3);
        place(&mut save, Position::new(1, 1, 1), parts::ROOF);

        let from = Position::new(1, 1, 0);
        let up = Position::new(1, 1, 2);
        assert_eq!(vertical_blockage(&save, from, up, Affector::Smoke), FLOOR_BLOCK);
        assert_eq!(vertical_blockage(&save, from, up, Affector::HighExplosive), FLOOR_HE_BLOCK);
        assert_eq!(vertical_blockage(&save, up, from, Affector::Smoke), FLOOR_BLOCK);
        assert_eq!(vertical_blockage(&save, from, from, Affector::Smoke), 0);
    }

    #[test]
    fn test_wall_between_needs_both_detours_closed() {
        let mut save = flat_battle(4, 4, 1);
        let origin = Position::new(1, 1, 0);
        assert!(!wall_between(&save, origin, Direction::NorthEast));

        place(&mut save, origin, parts::NORTH_WALL);
        assert!(wall_between(&save, origin, Direction::North));
        assert!(!wall_between(&save, origin, Direction::NorthEast));

        place(&mut save, Position::new(2, 1, 0), parts::WEST_WALL);
        assert!(wall_between(&save, origin, Direction::NorthEast));
    }

    #[test]
    fn test_damage_type_affectors() {
        assert_eq!(affector_for(DamageType::Smoke), Affector::Smoke);
        assert_eq!(affector_for(DamageType::Incendiary), Affector::Fire);
        assert_eq!(affector_for(DamageType::Laser), Affector::HighExplosive);
        assert_eq!(affector_for(DamageType::None), Affector::Vision);
    }
}
