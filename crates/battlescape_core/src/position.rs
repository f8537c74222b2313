//! Tile and voxel coordinates.
//!
//! A [`Position`] is either a tile coordinate or a voxel coordinate; each
//! tile spans [`VOXELS_PER_TILE_XY`] voxels horizontally and
//! [`VOXELS_PER_TILE_Z`] vertically. The y axis points south.

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::math::rounded_distance;

/// Voxels along the x and y axes of one tile.
pub const VOXELS_PER_TILE_XY: i32 = 16;

/// Voxels along the z axis of one tile.
pub const VOXELS_PER_TILE_Z: i32 = 24;

/// Integer 3D coordinate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Position {
    /// West to east.
    pub x: i32,
    /// North to south.
    pub y: i32,
    /// Bottom to top.
    pub z: i32,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The origin.
    pub const ZERO: Self = Self::new(0, 0, 0);

    /// One level up.
    pub const UP: Self = Self::new(0, 0, 1);

    /// One level down.
    pub const DOWN: Self = Self::new(0, 0, -1);

    /// Voxel coordinate of this tile's lowest north-west corner.
    #[must_use]
    pub const fn to_voxel(self) -> Self {
        Self::new(
            self.x * VOXELS_PER_TILE_XY,
            self.y * VOXELS_PER_TILE_XY,
            self.z * VOXELS_PER_TILE_Z,
        )
    }

    /// Voxel coordinate of this tile's horizontal centre at floor height.
    #[must_use]
    pub const fn to_voxel_center(self) -> Self {
        Self::new(
            self.x * VOXELS_PER_TILE_XY + VOXELS_PER_TILE_XY / 2,
            self.y * VOXELS_PER_TILE_XY + VOXELS_PER_TILE_XY / 2,
            self.z * VOXELS_PER_TILE_Z,
        )
    }

    /// Tile containing this voxel coordinate.
    ///
    /// Negative voxels map to negative tiles, which are outside any map.
    #[must_use]
    pub const fn voxel_to_tile(self) -> Self {
        Self::new(
            self.x.div_euclid(VOXELS_PER_TILE_XY),
            self.y.div_euclid(VOXELS_PER_TILE_XY),
            self.z.div_euclid(VOXELS_PER_TILE_Z),
        )
    }

    /// Offset of this voxel inside its tile.
    #[must_use]
    pub const fn voxel_offset(self) -> Self {
        Self::new(
            self.x.rem_euclid(VOXELS_PER_TILE_XY),
            self.y.rem_euclid(VOXELS_PER_TILE_XY),
            self.z.rem_euclid(VOXELS_PER_TILE_Z),
        )
    }

    /// Planar distance to another tile, rounded to the nearest tile.
    #[must_use]
    pub fn distance(self, other: Self) -> i32 {
        rounded_distance(self.x - other.x, self.y - other.y)
    }

    /// Squared planar distance.
    #[must_use]
    pub const fn distance_squared(self, other: Self) -> i32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Squared 3D distance.
    #[must_use]
    pub const fn distance_squared_3d(self, other: Self) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dy * dy + dz * dz
    }

    /// Chebyshev (king move) distance on the horizontal plane.
    #[must_use]
    pub const fn chebyshev(self, other: Self) -> i32 {
        let dx = (self.x - other.x).abs();
        let dy = (self.y - other.y).abs();
        if dx > dy {
            dx
        } else {
            dy
        }
    }

    /// Neighbouring tile in the given direction on the same level.
    #[must_use]
    pub fn step(self, direction: Direction) -> Self {
        self + direction.vector()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl Add for Position {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Position {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for Position {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<i32> for Position {
    type Output = Self;

    fn mul(self, rhs: i32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// One of the eight compass facings, clockwise from north.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Direction {
    /// -y
    #[default]
    North,
    /// +x -y
    NorthEast,
    /// +x
    East,
    /// +x +y
    SouthEast,
    /// +y
    South,
    /// -x +y
    SouthWest,
    /// -x
    West,
    /// -x -y
    NorthWest,
}

impl Direction {
    /// All facings in clockwise order starting at north.
    pub const ALL: [Self; 8] = [
        Self::North,
        Self::NorthEast,
        Self::East,
        Self::SouthEast,
        Self::South,
        Self::SouthWest,
        Self::West,
        Self::NorthWest,
    ];

    /// Numeric index, 0 (north) to 7 (north-west).
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Facing for an index; wraps modulo 8.
    #[must_use]
    pub const fn from_index(index: i32) -> Self {
        Self::ALL[index.rem_euclid(8) as usize]
    }

    /// Unit tile offset for this facing.
    #[must_use]
    pub const fn vector(self) -> Position {
        match self {
            Self::North => Position::new(0, -1, 0),
            Self::NorthEast => Position::new(1, -1, 0),
            Self::East => Position::new(1, 0, 0),
            Self::SouthEast => Position::new(1, 1, 0),
            Self::South => Position::new(0, 1, 0),
            Self::SouthWest => Position::new(-1, 1, 0),
            Self::West => Position::new(-1, 0, 0),
            Self::NorthWest => Position::new(-1, -1, 0),
        }
    }

    /// Facing for a unit offset (signs only); `None` for a zero offset.
    #[must_use]
    pub fn from_vector(dx: i32, dy: i32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| {
                let v = d.vector();
                v.x == dx.signum() && v.y == dy.signum()
            })
            .filter(|_| dx != 0 || dy != 0)
    }

    /// Facing that best points from `from` towards `to`.
    ///
    /// Offsets within roughly 22.5 degrees of an axis snap to that axis.
    #[must_use]
    pub fn towards(from: Position, to: Position) -> Self {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        let (ax, ay) = (dx.abs(), dy.abs());
        // tan(22.5 deg) ~ 0.414 ~ 2/5
        if ay * 5 < ax * 2 {
            if dx >= 0 {
                Self::East
            } else {
                Self::West
            }
        } else if ax * 5 < ay * 2 {
            if dy >= 0 {
                Self::South
            } else {
                Self::North
            }
        } else {
            Self::from_vector(dx, dy).unwrap_or_default()
        }
    }

    /// True for the four diagonal facings.
    #[must_use]
    pub const fn is_diagonal(self) -> bool {
        self.index() % 2 == 1
    }

    /// The facing 180 degrees away.
    #[must_use]
    pub const fn opposite(self) -> Self {
        Self::from_index(self.index() as i32 + 4)
    }

    /// Rotate by a number of eighth turns (positive is clockwise).
    #[must_use]
    pub const fn rotate(self, eighths: i32) -> Self {
        Self::from_index(self.index() as i32 + eighths)
    }

    /// Single eighth-turn (-1, 0 or +1) that moves this facing towards `target`
    /// along the shorter arc.
    #[must_use]
    pub const fn turn_step(self, target: Self) -> i32 {
        let delta = (target.index() as i32 - self.index() as i32).rem_euclid(8);
        if delta == 0 {
            0
        } else if delta <= 4 {
            1
        } else {
            -1
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voxel_conversion() {
        let tile = Position::new(2, 3, 1);
        assert_eq!(tile.to_voxel(), Position::new(32, 48, 24));
        assert_eq!(tile.to_voxel_center(), Position::new(40, 56, 24));
        assert_eq!(Position::new(40, 56, 30).voxel_to_tile(), tile);
        assert_eq!(Position::new(40, 56, 30).voxel_offset(), Position::new(8, 8, 6));
    }

    #[test]
    fn test_negative_voxel_is_outside() {
        assert_eq!(Position::new(-1, 5, 0).voxel_to_tile().x, -1);
    }

    #[test]
    fn test_direction_vectors_clockwise() {
        assert_eq!(Direction::North.vector(), Position::new(0, -1, 0));
        assert_eq!(Direction::East.vector(), Position::new(1, 0, 0));
        assert_eq!(Direction::South.vector(), Position::new(0, 1, 0));
        assert_eq!(Direction::West.vector(), Position::new(-1, 0, 0));
        for d in Direction::ALL {
            let v = d.vector();
            assert_eq!(Direction::from_vector(v.x, v.y), Some(d));
        }
    }

    #[test]
    fn test_towards_snaps_to_axis() {
        let origin = Position::new(10, 10, 0);
        assert_eq!(Direction::towards(origin, Position::new(20, 11, 0)), Direction::East);
        assert_eq!(Direction::towards(origin, Position::new(10, 0, 0)), Direction::North);
        assert_eq!(Direction::towards(origin, Position::new(15, 15, 0)), Direction::SouthEast);
        assert_eq!(Direction::towards(origin, Position::new(4, 3, 0)), Direction::NorthWest);
    }

    #[test]
    fn test_turn_step_takes_short_arc() {
        assert_eq!(Direction::North.turn_step(Direction::East), 1);
        assert_eq!(Direction::North.turn_step(Direction::West), -1);
        assert_eq!(Direction::North.turn_step(Direction::North), 0);
        assert_eq!(Direction::NorthWest.turn_step(Direction::NorthEast), 1);
        assert_eq!(Direction::North.opposite(), Direction::South);
    }
}
