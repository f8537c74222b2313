//! Line-of-fire templates (LOFT).
//!
//! A template is a 16x16 bit mask describing which voxels of one 2-voxel
//! layer of a tile part are solid. Row `vy` holds bit `1 << (15 - vx)` for
//! each solid column `vx`.

use serde::{Deserialize, Serialize};

/// Nothing solid.
pub const LOFT_EMPTY: u8 = 0;
/// Every voxel solid.
pub const LOFT_FULL: u8 = 1;
/// Two voxel thick wall along the west edge.
pub const LOFT_WEST_WALL: u8 = 2;
/// Two voxel thick wall along the north edge.
pub const LOFT_NORTH_WALL: u8 = 3;
/// Cross-section of a standing humanoid.
pub const LOFT_UNIT: u8 = 4;
/// Centered block, used for furniture and crates.
pub const LOFT_BLOCK: u8 = 5;

/// One template: 16 rows of 16 bits.
pub type LoftTemplate = [u16; 16];

/// Table of templates indexed by LOFT id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoftTable {
    templates: Vec<LoftTemplate>,
}

impl LoftTable {
    /// Built-in templates covering the ids exported by this module.
    #[must_use]
    pub fn standard() -> Self {
        let mut west = [0u16; 16];
        west.iter_mut().for_each(|row| *row = 0xC000);

        let mut north = [0u16; 16];
        north[0] = 0xFFFF;
        north[1] = 0xFFFF;

        let mut unit = [0u16; 16];
        unit[3..=12].iter_mut().for_each(|row| *row = 0x1FF8);

        let mut block = [0u16; 16];
        block[4..=11].iter_mut().for_each(|row| *row = 0x0FF0);

        Self {
            templates: vec![[0; 16], [0xFFFF; 16], west, north, unit, block],
        }
    }

    /// Built-in templates followed by custom ones, which get ids from 6 up.
    #[must_use]
    pub fn with_custom(custom: &[LoftTemplate]) -> Self {
        let mut table = Self::standard();
        table.templates.extend_from_slice(custom);
        table
    }

    /// True if voxel column (`vx`, `vy`) of template `loft` is solid.
    ///
    /// Unknown template ids are treated as empty.
    #[must_use]
    pub fn is_solid(&self, loft: u8, vx: i32, vy: i32) -> bool {
        if !(0..16).contains(&vx) || !(0..16).contains(&vy) {
            return false;
        }
        self.templates
            .get(usize::from(loft))
            .is_some_and(|template| template[vy as usize] & (1 << (15 - vx)) != 0)
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True if the table has no templates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for LoftTable {
    fn default() -> Self {
        Self::standard()
    }
}
