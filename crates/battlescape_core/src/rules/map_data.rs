//! Terrain part definitions.

use serde::{Deserialize, Serialize};

/// TU cost that marks a part as impassable.
pub const IMPASSABLE: i32 = 255;

/// The four part slots of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TilePart {
    /// Ground the unit stands on.
    Floor,
    /// Wall along the west edge.
    WestWall,
    /// Wall along the north edge.
    NorthWall,
    /// Free-standing object filling the tile.
    Object,
}

impl TilePart {
    /// All parts in slot order.
    pub const ALL: [Self; 4] = [Self::Floor, Self::WestWall, Self::NorthWall, Self::Object];

    /// Slot index, 0 to 3.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Part for a slot index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Floor),
            1 => Some(Self::WestWall),
            2 => Some(Self::NorthWall),
            3 => Some(Self::Object),
            _ => None,
        }
    }
}

/// How a unit moves; picks the TU cost column of each terrain part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovementType {
    /// Ground movement; falls off ledges.
    #[default]
    Walk,
    /// Flight; may move vertically anywhere there is no floor in the way.
    Fly,
    /// Ground movement that scales taller steps.
    Climb,
}

impl MovementType {
    /// Column index into [`MapData::tu_cost`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// What a terrain part can block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Affector {
    /// Light propagation.
    Light,
    /// Line of sight.
    Vision,
    /// High explosive blast.
    HighExplosive,
    /// Smoke spread.
    Smoke,
    /// Fire spread.
    Fire,
    /// Gas spread.
    Gas,
}

impl Affector {
    /// Column index into [`MapData::block`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Shape of an object that acts as a wall inside its tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BigWall {
    /// Ordinary object.
    #[default]
    None,
    /// Fills the whole tile.
    Block,
    /// Diagonal from north-east to south-west.
    NeSw,
    /// Diagonal from north-west to south-east.
    NwSe,
    /// Along the west edge.
    West,
    /// Along the north edge.
    North,
    /// Along the east edge.
    East,
    /// Along the south edge.
    South,
    /// East and south edges.
    EastAndSouth,
    /// West and north edges.
    WestAndNorth,
}

impl BigWall {
    /// True if the object closes the tile's west edge.
    #[must_use]
    pub const fn closes_west(self) -> bool {
        matches!(self, Self::West | Self::WestAndNorth)
    }

    /// True if the object closes the tile's north edge.
    #[must_use]
    pub const fn closes_north(self) -> bool {
        matches!(self, Self::North | Self::WestAndNorth)
    }

    /// True if the object closes the tile's east edge.
    #[must_use]
    pub const fn closes_east(self) -> bool {
        matches!(self, Self::East | Self::EastAndSouth)
    }

    /// True if the object closes the tile's south edge.
    #[must_use]
    pub const fn closes_south(self) -> bool {
        matches!(self, Self::South | Self::EastAndSouth)
    }
}

/// Static definition of one terrain part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapData {
    /// Name, for debugging and map editors.
    pub name: String,

    /// Slot this part occupies.
    pub part: TilePart,

    /// TU cost for walk, fly and climb.
    #[serde(default)]
    pub tu_cost: [i32; 3],

    /// Block value per [`Affector`].
    #[serde(default)]
    pub block: [i32; 6],

    /// Height of the standing surface; negative is higher.
    #[serde(default)]
    pub terrain_level: i32,

    /// Damage needed to destroy the part.
    #[serde(default = "default_armor")]
    pub armor: i32,

    /// Chance modifier for catching fire; 255 never burns.
    #[serde(default = "default_flammability")]
    pub flammability: i32,

    /// Turns the part burns once lit.
    #[serde(default)]
    pub fuel: i32,

    /// Explosive payload released when destroyed.
    #[serde(default)]
    pub explosive: i32,

    /// Light emitted.
    #[serde(default)]
    pub light_source: i32,

    /// Part index (same set) that replaces this one when destroyed.
    #[serde(default)]
    pub die_part: Option<usize>,

    /// Part index (same set) this turns into when opened as a door.
    #[serde(default)]
    pub alt_part: Option<usize>,

    /// Hinged door.
    #[serde(default)]
    pub door: bool,

    /// Sliding door that animates open over several frames.
    #[serde(default)]
    pub ufo_door: bool,

    /// Blocks line of sight completely.
    #[serde(default)]
    pub stop_los: bool,

    /// A floor part that does not support a unit.
    #[serde(default)]
    pub no_floor: bool,

    /// Vertical transport between levels.
    #[serde(default)]
    pub grav_lift: bool,

    /// Mission objective that must be destroyed.
    #[serde(default)]
    pub must_destroy: bool,

    /// Big wall shape of an object part.
    #[serde(default)]
    pub big_wall: BigWall,

    /// LOFT template index per 2-voxel layer, bottom to top.
    #[serde(default)]
    pub loft: [u8; 12],
}

const fn default_armor() -> i32 {
    20
}

const fn default_flammability() -> i32 {
    255
}

impl MapData {
    /// TU cost for a movement type.
    #[must_use]
    pub const fn tu_cost(&self, movement: MovementType) -> i32 {
        self.tu_cost[movement.index()]
    }

    /// Block value for an affector.
    #[must_use]
    pub const fn block(&self, affector: Affector) -> i32 {
        self.block[affector.index()]
    }

    /// LOFT template for a voxel height inside the tile.
    #[must_use]
    pub fn loft_at(&self, voxel_z: i32) -> u8 {
        let layer = (voxel_z.rem_euclid(24) / 2) as usize;
        self.loft.get(layer).copied().unwrap_or(0)
    }
}

/// A named collection of terrain parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDataSet {
    /// Set name, e.g. "farm".
    pub name: String,
    /// Parts by index.
    pub parts: Vec<MapData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_index_roundtrip() {
        for part in TilePart::ALL {
            assert_eq!(TilePart::from_index(part.index()), Some(part));
        }
        assert_eq!(TilePart::from_index(4), None);
    }

    #[test]
    fn test_map_data_defaults_from_ron() {
        let data: MapData = ron::from_str(r#"(name: "grass", part: Floor, tu_cost: (4, 4, 4))"#)
            .unwrap();
        assert_eq!(data.flammability, 255);
        assert_eq!(data.tu_cost(MovementType::Fly), 4);
        assert_eq!(data.block(Affector::Vision), 0);
        assert_eq!(data.big_wall, BigWall::None);
    }
}
