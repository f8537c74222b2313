//! Compact binary forms of a battle.
//!
//! Two layers:
//! - the tile table, a packed little-endian array of fixed-width tile
//!   fields described by a [`SerializationKey`], and
//! - [`BattleSnapshot`], a `bincode` encoding of the whole battle (tiles as
//!   a tile table, everything else as records) plus the RNG state.
//!
//! The key travels with the data, so a table written with one set of widths
//! can be read back by code whose defaults have since changed.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BattleError, Result};
use crate::position::Position;
use crate::rng::BattleRng;
use crate::rules::Ruleset;
use crate::saved_battle::{SavedBattleGame, SavedBattleRecord};
use crate::tile::{TileRecord, UFO_DOOR_OPEN_FRAME};

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const DISCOVERED_BITS: [u8; 3] = [0x01, 0x02, 0x04];
const WEST_UFO_DOOR_OPEN: u8 = 0x08;
const NORTH_UFO_DOOR_OPEN: u8 = 0x10;

/// Byte widths of the fields in one tile table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerializationKey {
    /// Tile index in the map.
    pub index: u8,
    /// Data set id, once per part slot.
    pub map_data_set_id: u8,
    /// Part id, once per part slot.
    pub map_data_id: u8,
    /// Smoke density.
    pub smoke: u8,
    /// Fire turns.
    pub fire: u8,
    /// Packed flags: discovery and open UFO doors.
    pub bool_fields: u8,
}

impl Default for SerializationKey {
    fn default() -> Self {
        Self {
            index: 4,
            map_data_set_id: 2,
            map_data_id: 2,
            smoke: 1,
            fire: 1,
            bool_fields: 1,
        }
    }
}

impl SerializationKey {
    /// Bytes per tile entry.
    #[must_use]
    pub const fn total_bytes(&self) -> usize {
        self.index as usize
            + 4 * self.map_data_set_id as usize
            + 4 * self.map_data_id as usize
            + self.smoke as usize
            + self.fire as usize
            + self.bool_fields as usize
    }

    /// Check that every width is between 1 and 8 bytes.
    pub fn validate(&self) -> Result<()> {
        let widths = [
            ("index", self.index),
            ("map data set id", self.map_data_set_id),
            ("map data id", self.map_data_id),
            ("smoke", self.smoke),
            ("fire", self.fire),
            ("bool fields", self.bool_fields),
        ];
        for (name, width) in widths {
            if !(1..=8).contains(&width) {
                return Err(BattleError::InvalidSave(format!(
                    "serialization key width for {name} is {width}"
                )));
            }
        }
        Ok(())
    }
}

/// Append `value` as a little-endian signed integer of `width` bytes.
pub fn write_int(buffer: &mut Vec<u8>, width: u8, value: i64) -> Result<()> {
    let bits = u32::from(width) * 8;
    if bits < 64 {
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        // unsigned fields (index) may use the full width
        let unsigned_max = (1i64 << bits) - 1;
        if value < min || (value > max && value > unsigned_max) {
            return Err(BattleError::Serialization(format!(
                "value {value} does not fit in {width} bytes"
            )));
        }
    }
    buffer.extend_from_slice(&value.to_le_bytes()[..usize::from(width)]);
    Ok(())
}

/// Read a little-endian signed integer of `width` bytes, sign extending.
pub fn read_int(bytes: &[u8], width: u8) -> Result<i64> {
    let width = usize::from(width);
    let raw = bytes.get(..width).ok_or_else(|| {
        BattleError::InvalidSave(format!("tile table truncated: wanted {width} bytes"))
    })?;
    let mut full = [0u8; 8];
    full[..width].copy_from_slice(raw);
    if width < 8 && raw[width - 1] & 0x80 != 0 {
        full[width..].fill(0xFF);
    }
    Ok(i64::from_le_bytes(full))
}

/// Read an unsigned integer of `width` bytes.
fn read_uint(bytes: &[u8], width: u8) -> Result<i64> {
    let width = usize::from(width);
    let raw = bytes.get(..width).ok_or_else(|| {
        BattleError::InvalidSave(format!("tile table truncated: wanted {width} bytes"))
    })?;
    let mut full = [0u8; 8];
    full[..width].copy_from_slice(raw);
    Ok(i64::from_le_bytes(full))
}

/// Encode one tile record as a table entry.
pub fn encode_tile(
    buffer: &mut Vec<u8>,
    key: &SerializationKey,
    index: usize,
    record: &TileRecord,
) -> Result<()> {
    write_int(buffer, key.index, index as i64)?;
    for set in record.map_data_set_id {
        write_int(buffer, key.map_data_set_id, i64::from(set))?;
    }
    for id in record.map_data_id {
        write_int(buffer, key.map_data_id, i64::from(id))?;
    }
    write_int(buffer, key.smoke, i64::from(record.smoke))?;
    write_int(buffer, key.fire, i64::from(record.fire))?;

    let mut flags = 0u8;
    for (bit, discovered) in DISCOVERED_BITS.iter().zip(record.discovered) {
        if discovered {
            flags |= bit;
        }
    }
    if record.ufo_door_frames[1] == UFO_DOOR_OPEN_FRAME {
        flags |= WEST_UFO_DOOR_OPEN;
    }
    if record.ufo_door_frames[2] == UFO_DOOR_OPEN_FRAME {
        flags |= NORTH_UFO_DOOR_OPEN;
    }
    write_int(buffer, key.bool_fields, i64::from(flags))
}

/// Decode one table entry into its tile index and record. The record's
/// position is left at the origin for the caller to fill in.
pub fn decode_tile(bytes: &[u8], key: &SerializationKey) -> Result<(usize, TileRecord)> {
    if bytes.len() < key.total_bytes() {
        return Err(BattleError::InvalidSave(format!(
            "tile entry has {} bytes, key needs {}",
            bytes.len(),
            key.total_bytes()
        )));
    }
    let mut offset = 0;
    let mut next = |width: u8, signed: bool| -> Result<i64> {
        let value = if signed {
            read_int(&bytes[offset..], width)?
        } else {
            read_uint(&bytes[offset..], width)?
        };
        offset += usize::from(width);
        Ok(value)
    };

    let index = next(key.index, false)? as usize;
    let mut record = TileRecord {
        position: Position::ZERO,
        map_data_id: [-1; 4],
        map_data_set_id: [-1; 4],
        fire: 0,
        smoke: 0,
        discovered: [false; 3],
        ufo_door_frames: [0; 4],
    };
    for slot in 0..4 {
        record.map_data_set_id[slot] = next(key.map_data_set_id, true)? as i32;
    }
    for slot in 0..4 {
        record.map_data_id[slot] = next(key.map_data_id, true)? as i32;
    }
    record.smoke = next(key.smoke, true)? as i32;
    record.fire = next(key.fire, true)? as i32;
    let flags = next(key.bool_fields, false)? as u8;
    for (slot, bit) in DISCOVERED_BITS.iter().enumerate() {
        record.discovered[slot] = flags & bit != 0;
    }
    if flags & WEST_UFO_DOOR_OPEN != 0 {
        record.ufo_door_frames[1] = UFO_DOOR_OPEN_FRAME;
    }
    if flags & NORTH_UFO_DOOR_OPEN != 0 {
        record.ufo_door_frames[2] = UFO_DOOR_OPEN_FRAME;
    }
    Ok((index, record))
}

/// Packed tile data plus the key it was written with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileTable {
    /// Field widths.
    pub key: SerializationKey,
    /// Entries, `key.total_bytes()` each.
    pub bytes: Vec<u8>,
}

impl TileTable {
    /// Pack every non-void tile of a battle.
    pub fn encode(save: &SavedBattleGame, key: SerializationKey) -> Result<Self> {
        key.validate()?;
        let mut bytes = Vec::new();
        for (index, tile) in save.tiles().iter().enumerate() {
            if !tile.is_void() {
                encode_tile(&mut bytes, &key, index, &tile.to_record())?;
            }
        }
        Ok(Self { key, bytes })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.key.total_bytes().max(1)
    }

    /// True if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Load the packed tiles into a battle of matching size.
    pub fn apply(&self, save: &mut SavedBattleGame) -> Result<()> {
        self.key.validate()?;
        let entry = self.key.total_bytes();
        if self.bytes.len() % entry != 0 {
            return Err(BattleError::InvalidSave(format!(
                "tile table length {} is not a multiple of {entry}",
                self.bytes.len()
            )));
        }
        let rules = save.rules_arc();
        let tile_count = save.tiles().len();
        for chunk in self.bytes.chunks(entry) {
            let (index, mut record) = decode_tile(chunk, &self.key)?;
            if index >= tile_count {
                return Err(BattleError::InvalidSave(format!(
                    "tile index {index} outside map of {tile_count} tiles"
                )));
            }
            let tile = &mut save.tiles_mut()[index];
            record.position = tile.position();
            tile.load_record(&record, &rules)?;
        }
        Ok(())
    }
}

/// A whole battle plus its RNG, as one `bincode` blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleSnapshot {
    /// Format version.
    pub version: u32,
    /// Everything except tiles.
    pub battle: SavedBattleRecord,
    /// Tiles.
    pub tiles: TileTable,
    /// Random stream to continue from.
    pub rng: BattleRng,
}

impl BattleSnapshot {
    /// Capture a battle and its random stream.
    pub fn capture(save: &SavedBattleGame, rng: &BattleRng) -> Result<Self> {
        let mut battle = save.to_record();
        battle.tiles.clear();
        Ok(Self {
            version: SNAPSHOT_VERSION,
            battle,
            tiles: TileTable::encode(save, SerializationKey::default())?,
            rng: rng.clone(),
        })
    }

    /// Rebuild the battle and its random stream.
    pub fn restore(&self, rules: Arc<Ruleset>) -> Result<(SavedBattleGame, BattleRng)> {
        if self.version != SNAPSHOT_VERSION {
            return Err(BattleError::InvalidSave(format!(
                "snapshot version mismatch: expected {SNAPSHOT_VERSION}, got {}",
                self.version
            )));
        }
        let mut save = SavedBattleGame::from_record(&self.battle, rules)?;
        self.tiles.apply(&mut save)?;
        Ok((save, self.rng.clone()))
    }

    /// Encode with `bincode`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from `bincode`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Write the snapshot to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path.as_ref(), &bytes)?;
        debug!(path = %path.as_ref().display(), bytes = bytes.len(), "Snapshot written");
        Ok(())
    }

    /// Read a snapshot from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::InventorySlot;
    use crate::rng::RandomSource;
    use crate::rules::TilePart;
    use crate::test_fixtures::{flat_battle, parts, place};
    use crate::unit::Faction;

    #[test]
    fn test_default_key_is_23_bytes() {
        assert_eq!(SerializationKey::default().total_bytes(), 23);
    }

    #[test]
    fn test_int_sign_extension() {
        let mut buffer = Vec::new();
        write_int(&mut buffer, 2, -1).unwrap();
        write_int(&mut buffer, 2, 300).unwrap();
        write_int(&mut buffer, 1, -5).unwrap();
        assert_eq!(buffer, vec![0xFF, 0xFF, 0x2C, 0x01, 0xFB]);
        assert_eq!(read_int(&buffer[0..], 2).unwrap(), -1);
        assert_eq!(read_int(&buffer[2..], 2).unwrap(), 300);
        assert_eq!(read_int(&buffer[4..], 1).unwrap(), -5);
        assert!(write_int(&mut buffer, 1, 4000).is_err());
        assert!(read_int(&[0x01], 2).is_err());
    }

    #[test]
    fn test_tile_entry_roundtrip() {
        let record = TileRecord {
            position: Position::ZERO,
            map_data_id: [0, -1, 5, -1],
            map_data_set_id: [0, -1, 0, -1],
            fire: 3,
            smoke: 12,
            discovered: [true, false, true],
            ufo_door_frames: [0, 0, UFO_DOOR_OPEN_FRAME, 0],
        };
        let key = SerializationKey::default();
        let mut buffer = Vec::new();
        encode_tile(&mut buffer, &key, 77, &record).unwrap();
        assert_eq!(buffer.len(), key.total_bytes());
        let (index, decoded) = decode_tile(&buffer, &key).unwrap();
        assert_eq!(index, 77);
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_partly_open_ufo_door_saves_closed() {
        let record = TileRecord {
            position: Position::ZERO,
            map_data_id: [-1; 4],
            map_data_set_id: [-1; 4],
            fire: 0,
            smoke: 0,
            discovered: [false; 3],
            ufo_door_frames: [0, 3, 0, 0],
        };
        let key = SerializationKey::default();
        let mut buffer = Vec::new();
        encode_tile(&mut buffer, &key, 0, &record).unwrap();
        let (_, decoded) = decode_tile(&buffer, &key).unwrap();
        assert_eq!(decoded.ufo_door_frames, [0; 4]);
    }

    #[test]
    fn test_wider_key_reads_back() {
        let mut save = flat_battle(4, 4, 2);
        place(&mut save, Position::new(1, 1, 0), parts::NORTH_WALL);
        save.tile_mut(Position::new(2, 2, 0)).unwrap().set_smoke(9);
        let key = SerializationKey {
            index: 8,
            map_data_set_id: 4,
            map_data_id: 4,
            smoke: 2,
            fire: 2,
            bool_fields: 2,
        };
        let table = TileTable::encode(&save, key).unwrap();
        assert_eq!(table.len(), 16);

        let mut copy = SavedBattleGame::new(save.rules_arc(), 4, 4, 2);
        table.apply(&mut copy).unwrap();
        let tile = copy.tile(Position::new(1, 1, 0)).unwrap();
        assert_eq!(tile.part_ref(TilePart::NorthWall), Some(parts::NORTH_WALL));
        assert_eq!(copy.tile(Position::new(2, 2, 0)).unwrap().smoke(), 9);
    }

    #[test]
    fn test_table_rejects_bad_index() {
        let save = flat_battle(2, 2, 1);
        let table = TileTable::encode(&save, SerializationKey::default()).unwrap();
        let mut small = SavedBattleGame::new(save.rules_arc(), 1, 1, 1);
        assert!(table.apply(&mut small).is_err());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut save = flat_battle(5, 5, 2);
        place(&mut save, Position::new(3, 3, 0), parts::CRATE);
        let unit = save
            .add_unit("soldier", Faction::Player, Position::new(0, 0, 0))
            .unwrap();
        save.add_unit("sectoid", Faction::Hostile, Position::new(4, 4, 0))
            .unwrap();
        let rifle = save.create_item("rifle").unwrap();
        save.give_item(rifle, unit, InventorySlot::RightHand);
        save.tile_mut(Position::new(2, 2, 0)).unwrap().set_fire(2);

        let mut rng = BattleRng::new(99);
        rng.next_u32();
        let snapshot = BattleSnapshot::capture(&save, &rng).unwrap();
        let bytes = snapshot.to_bytes().unwrap();
        let (restored, mut restored_rng) = BattleSnapshot::from_bytes(&bytes)
            .unwrap()
            .restore(save.rules_arc())
            .unwrap();

        assert_eq!(restored.state_hash(), save.state_hash());
        assert_eq!(restored_rng.next_u32(), rng.next_u32());
    }

    #[test]
    fn test_snapshot_version_mismatch() {
        let save = flat_battle(2, 2, 1);
        let mut snapshot = BattleSnapshot::capture(&save, &BattleRng::new(1)).unwrap();
        snapshot.version = 99;
        assert!(snapshot.restore(save.rules_arc()).is_err());
    }
}
