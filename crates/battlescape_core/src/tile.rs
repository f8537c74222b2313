//! One map cell.
//!
//! A tile holds up to four terrain parts (floor, west wall, north wall,
//! object), its fire and smoke state, three light layers, discovery flags,
//! a handle to the unit standing on it and the handles of the items lying
//! on the ground. Units and items are owned by the
//! [`SavedBattleGame`](crate::saved_battle::SavedBattleGame); the tile only
//! stores their ids.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::item::ItemId;
use crate::position::Position;
use crate::rng::RandomSource;
use crate::rules::{BigWall, MapData, MovementType, PartRef, Ruleset, TilePart};
use crate::unit::UnitId;

/// Maximum smoke density.
pub const MAX_SMOKE: i32 = 15;

/// UFO door animation frame at which the door counts as fully open.
pub const UFO_DOOR_OPEN_FRAME: u8 = 7;

/// A terrain part placed on a tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedPart {
    /// Where the part comes from in the ruleset.
    pub part: PartRef,
    /// The part's static data.
    pub data: Arc<MapData>,
}

/// Outcome of trying to open a door.
///
/// Codes match the classic integer protocol: see [`DoorResult::to_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoorResult {
    /// A hinged door swung open; the unit may walk through.
    Opened,
    /// A UFO door started its opening animation.
    UfoDoorStarted,
    /// A UFO door is still animating.
    UfoDoorOpening,
    /// The unit lacks the time units to open the door.
    NotEnoughTimeUnits,
    /// There is no closed door here.
    NoDoor,
}

impl DoorResult {
    /// Classic integer code: 0, 1, 3, 4 or -1.
    #[must_use]
    pub const fn to_code(self) -> i32 {
        match self {
            Self::Opened => 0,
            Self::UfoDoorStarted => 1,
            Self::UfoDoorOpening => 3,
            Self::NotEnoughTimeUnits => 4,
            Self::NoDoor => -1,
        }
    }

    /// Inverse of [`to_code`](Self::to_code).
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Opened),
            1 => Some(Self::UfoDoorStarted),
            3 => Some(Self::UfoDoorOpening),
            4 => Some(Self::NotEnoughTimeUnits),
            -1 => Some(Self::NoDoor),
            _ => None,
        }
    }

    /// True if the door was opened or started opening.
    #[must_use]
    pub const fn changed_terrain(self) -> bool {
        matches!(self, Self::Opened | Self::UfoDoorStarted)
    }
}

/// Light layers combined into a tile's shade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightLayer {
    /// Sunlight.
    Ambient,
    /// Terrain light sources, fires and flares.
    Static,
    /// Personal lights of units.
    Dynamic,
}

impl LightLayer {
    /// Layer index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Discovery flags of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Discovery {
    /// The west wall has been seen.
    West,
    /// The north wall has been seen.
    North,
    /// The floor and contents have been seen.
    Content,
}

impl Discovery {
    /// Flag index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Path preview marker drawn by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathMarker {
    /// Direction code of the step leaving this tile, or `None` at the end.
    pub direction: Option<u8>,
    /// Cumulative TU cost shown on the tile.
    pub tu: i32,
    /// Palette index used for the marker.
    pub color: u8,
}

/// One map cell.
#[derive(Debug, Clone)]
pub struct Tile {
    position: Position,
    parts: [Option<PlacedPart>; 4],
    ufo_door_frames: [u8; 4],
    fire: i32,
    smoke: i32,
    overlaps: i32,
    explosive: i32,
    light: [i32; 3],
    discovered: [bool; 3],
    unit: Option<UnitId>,
    inventory: Vec<ItemId>,
    preview: Option<PathMarker>,
    danger: bool,
}

impl Tile {
    /// Create an empty tile.
    #[must_use]
    pub fn new(position: Position) -> Self {
        Self {
            position,
            parts: [None, None, None, None],
            ufo_door_frames: [0; 4],
            fire: 0,
            smoke: 0,
            overlaps: 0,
            explosive: 0,
            light: [0; 3],
            discovered: [false; 3],
            unit: None,
            inventory: Vec::new(),
            preview: None,
            danger: false,
        }
    }

    /// Tile coordinate.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    // ========================================================================
    // Terrain parts
    // ========================================================================

    /// Static data of a part, if present.
    #[must_use]
    pub fn part(&self, slot: TilePart) -> Option<&MapData> {
        self.parts[slot.index()].as_ref().map(|p| p.data.as_ref())
    }

    /// Ruleset reference of a part, if present.
    #[must_use]
    pub fn part_ref(&self, slot: TilePart) -> Option<PartRef> {
        self.parts[slot.index()].as_ref().map(|p| p.part)
    }

    /// Place or clear a part. Clearing also resets its door animation.
    pub fn set_part(&mut self, slot: TilePart, part: Option<PlacedPart>) {
        self.parts[slot.index()] = part;
        self.ufo_door_frames[slot.index()] = 0;
    }

    /// Place a part from the ruleset into the slot its data names.
    pub fn place(&mut self, part: PartRef, rules: &Ruleset) -> Result<()> {
        let data = rules.map_data(part)?;
        let slot = data.part;
        self.set_part(slot, Some(PlacedPart { part, data }));
        Ok(())
    }

    /// True if the tile has no parts, no smoke and nothing on the ground.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.parts.iter().all(Option::is_none) && self.smoke == 0 && self.inventory.is_empty()
    }

    /// Height of the standing surface in voxels; negative is higher.
    #[must_use]
    pub fn terrain_level(&self) -> i32 {
        let floor = self.part(TilePart::Floor).map_or(0, |p| p.terrain_level);
        self.part(TilePart::Object)
            .map_or(floor, |p| floor.min(p.terrain_level))
    }

    /// True if a unit here would not be supported.
    ///
    /// A tile directly above a full-height object (terrain level -24) always
    /// has a floor.
    #[must_use]
    pub fn has_no_floor(&self, below: Option<&Tile>) -> bool {
        if below.is_some_and(|t| t.terrain_level() == -24) {
            return false;
        }
        self.part(TilePart::Floor).map_or(true, |floor| floor.no_floor)
    }

    /// Big wall shape of the object part.
    #[must_use]
    pub fn big_wall(&self) -> BigWall {
        self.part(TilePart::Object)
            .map_or(BigWall::None, |p| p.big_wall)
    }

    /// True if the object part is a big wall of any shape.
    #[must_use]
    pub fn is_big_wall(&self) -> bool {
        self.big_wall() != BigWall::None
    }

    /// True if the tile holds a grav lift floor.
    #[must_use]
    pub fn is_grav_lift(&self) -> bool {
        self.part(TilePart::Floor).is_some_and(|p| p.grav_lift)
    }

    /// TU cost to traverse one part.
    ///
    /// Open UFO doors and directional big walls cost nothing; walls of
    /// those shapes block movement through the wall checks instead.
    #[must_use]
    pub fn tu_cost(&self, slot: TilePart, movement: MovementType) -> i32 {
        let Some(data) = self.part(slot) else {
            return 0;
        };
        if data.ufo_door && self.ufo_door_frames[slot.index()] > 1 {
            return 0;
        }
        if slot == TilePart::Object
            && !matches!(data.big_wall, BigWall::None | BigWall::Block | BigWall::NeSw | BigWall::NwSe)
        {
            return 0;
        }
        data.tu_cost(movement)
    }

    /// Lowest flammability over all parts; 255 means fireproof.
    #[must_use]
    pub fn flammability(&self) -> i32 {
        TilePart::ALL
            .iter()
            .filter_map(|slot| self.part(*slot))
            .map(|p| p.flammability)
            .fold(255, i32::min)
    }

    /// Highest fuel over all parts.
    #[must_use]
    pub fn fuel(&self) -> i32 {
        TilePart::ALL
            .iter()
            .filter_map(|slot| self.part(*slot))
            .map(|p| p.fuel)
            .fold(0, i32::max)
    }

    /// Remove a part, leaving its destroyed replacement.
    ///
    /// Grav lifts cannot be destroyed. A destroyed ground level floor is
    /// replaced with the ruleset's scorched earth. Returns true if the part
    /// was a mission objective.
    pub fn destroy(&mut self, slot: TilePart, rules: &Ruleset) -> bool {
        let mut objective = false;
        if let Some(original) = self.parts[slot.index()].clone() {
            if original.data.grav_lift {
                return false;
            }
            objective = original.data.must_destroy;
            self.set_part(slot, None);
            if let Some(die) = original.data.die_part {
                let replacement = PartRef::new(original.part.set, die);
                if let Ok(data) = rules.map_data(replacement) {
                    let target = data.part;
                    self.set_part(
                        target,
                        Some(PlacedPart {
                            part: replacement,
                            data,
                        }),
                    );
                }
            }
            if original.data.explosive > 0 {
                self.set_explosive(original.data.explosive);
            }
        }

        if slot == TilePart::Floor && self.position.z == 0 && self.parts[0].is_none() {
            if let Some(scorched) = rules.scorched_earth() {
                if let Ok(data) = rules.map_data(scorched) {
                    self.set_part(
                        TilePart::Floor,
                        Some(PlacedPart {
                            part: scorched,
                            data,
                        }),
                    );
                }
            }
        }

        objective
    }

    /// Apply damage to a part, destroying it if `power` reaches its armor.
    ///
    /// Returns true if a mission objective was destroyed.
    pub fn damage(&mut self, slot: TilePart, power: i32, rules: &Ruleset) -> bool {
        match self.part(slot) {
            Some(data) if power >= data.armor => self.destroy(slot, rules),
            _ => false,
        }
    }

    // ========================================================================
    // Doors
    // ========================================================================

    /// Try to open a door in `slot`.
    ///
    /// `available_tu` is the opener's usable time units, or `None` for a
    /// free open (explosions, scripted events).
    pub fn open_door(
        &mut self,
        slot: TilePart,
        available_tu: Option<i32>,
        movement: MovementType,
        rules: &Ruleset,
    ) -> DoorResult {
        let Some(placed) = self.parts[slot.index()].clone() else {
            return DoorResult::NoDoor;
        };
        let cost = placed.data.tu_cost(movement);
        let frame = self.ufo_door_frames[slot.index()];

        if placed.data.door {
            if available_tu.is_some_and(|tu| tu < cost) {
                return DoorResult::NotEnoughTimeUnits;
            }
            self.set_part(slot, None);
            if let Some(alt) = placed.data.alt_part {
                let open = PartRef::new(placed.part.set, alt);
                if let Ok(data) = rules.map_data(open) {
                    let target = data.part;
                    self.set_part(target, Some(PlacedPart { part: open, data }));
                }
            }
            return DoorResult::Opened;
        }

        if placed.data.ufo_door && frame == 0 {
            if available_tu.is_some_and(|tu| tu < cost) {
                return DoorResult::NotEnoughTimeUnits;
            }
            self.ufo_door_frames[slot.index()] = 1;
            return DoorResult::UfoDoorStarted;
        }

        if placed.data.ufo_door && frame != UFO_DOOR_OPEN_FRAME {
            return DoorResult::UfoDoorOpening;
        }

        DoorResult::NoDoor
    }

    /// True if the part is a UFO door that is open or opening.
    #[must_use]
    pub fn is_ufo_door_open(&self, slot: TilePart) -> bool {
        self.part(slot).is_some_and(|p| p.ufo_door) && self.ufo_door_frames[slot.index()] != 0
    }

    /// Animation frame of a UFO door part.
    #[must_use]
    pub const fn ufo_door_frame(&self, slot: TilePart) -> u8 {
        self.ufo_door_frames[slot.index()]
    }

    /// Advance opening UFO doors by one frame.
    pub fn animate(&mut self) {
        for slot in TilePart::ALL {
            let frame = self.ufo_door_frames[slot.index()];
            let is_ufo_door = self.part(slot).is_some_and(|p| p.ufo_door);
            if is_ufo_door && frame != 0 && frame != UFO_DOOR_OPEN_FRAME {
                self.ufo_door_frames[slot.index()] = frame + 1;
            }
        }
    }

    /// Close any open UFO door. Returns true if a door closed.
    pub fn close_ufo_door(&mut self) -> bool {
        let mut closed = false;
        for slot in TilePart::ALL {
            if self.is_ufo_door_open(slot) {
                self.ufo_door_frames[slot.index()] = 0;
                closed = true;
            }
        }
        closed
    }

    // ========================================================================
    // Fire and smoke
    // ========================================================================

    /// Turns of fire remaining.
    #[must_use]
    pub const fn fire(&self) -> i32 {
        self.fire
    }

    /// Set the fire counter.
    pub fn set_fire(&mut self, fire: i32) {
        self.fire = fire.max(0);
    }

    /// Smoke density, 0 to 15.
    #[must_use]
    pub const fn smoke(&self) -> i32 {
        self.smoke
    }

    /// Set the smoke density, clamped to 0..=15.
    pub fn set_smoke(&mut self, smoke: i32) {
        self.smoke = smoke.clamp(0, MAX_SMOKE);
    }

    /// Number of smoke contributions received this turn.
    #[must_use]
    pub const fn overlaps(&self) -> i32 {
        self.overlaps
    }

    /// Add smoke unless the tile is burning.
    pub fn add_smoke(&mut self, amount: i32) {
        if self.fire != 0 {
            return;
        }
        self.smoke = if self.overlaps == 0 {
            (self.smoke + amount).clamp(1, MAX_SMOKE)
        } else {
            (self.smoke + amount).clamp(0, MAX_SMOKE)
        };
        self.overlaps += 1;
    }

    /// Try to set the tile on fire.
    ///
    /// Fireproof tiles (flammability 255) never ignite and consume no
    /// randomness. Otherwise the chance is `power - flammability / 10 + 15`
    /// percent and the tile needs fuel. Returns true if it caught fire.
    pub fn ignite(&mut self, power: i32, rng: &mut dyn RandomSource) -> bool {
        let flammability = self.flammability();
        if flammability == 255 {
            return false;
        }
        let chance = (power - flammability / 10 + 15).max(0);
        rng.percent(chance) && self.start_fire()
    }

    /// Set the tile burning without a roll. Needs fuel and a flammable part.
    pub fn start_fire(&mut self) -> bool {
        let flammability = self.flammability();
        let fuel = self.fuel();
        if flammability == 255 || fuel <= 0 {
            return false;
        }
        if self.fire == 0 {
            self.smoke = MAX_SMOKE - (flammability / 10).clamp(1, 12);
            self.overlaps = 1;
        }
        self.fire = fuel + 1;
        true
    }

    /// Explosive payload released by destroyed parts, waiting to detonate.
    #[must_use]
    pub const fn explosive(&self) -> i32 {
        self.explosive
    }

    /// Raise the pending explosive payload to at least `power`.
    pub fn set_explosive(&mut self, power: i32) {
        if self.explosive < power {
            self.explosive = power;
        }
    }

    /// Clear the pending explosive payload.
    pub fn clear_explosive(&mut self) {
        self.explosive = 0;
    }

    /// End of turn bookkeeping for this tile alone.
    ///
    /// Smoke that is not fed by fire thins out (averaged by the number of
    /// contributions it received this turn); fire burns down by one turn.
    pub fn prepare_new_turn(&mut self) {
        if self.fire == 0 && self.smoke > 0 {
            self.smoke = if self.overlaps > 0 {
                self.smoke / self.overlaps - 1
            } else {
                self.smoke - 1
            };
        }
        if self.fire > 0 {
            self.fire -= 1;
        }
        self.smoke = self.smoke.clamp(0, MAX_SMOKE);
        self.overlaps = 0;
        self.danger = false;
    }

    // ========================================================================
    // Light and discovery
    // ========================================================================

    /// Raise a light layer to at least `power`.
    pub fn add_light(&mut self, layer: LightLayer, power: i32) {
        let slot = &mut self.light[layer.index()];
        if *slot < power {
            *slot = power;
        }
    }

    /// Reset a light layer to darkness.
    pub fn reset_light(&mut self, layer: LightLayer) {
        self.light[layer.index()] = 0;
    }

    /// Light level of one layer.
    #[must_use]
    pub const fn light(&self, layer: LightLayer) -> i32 {
        self.light[layer.index()]
    }

    /// Darkness, 0 (fully lit) to 15 (pitch black).
    #[must_use]
    pub fn shade(&self) -> i32 {
        let brightest = self.light.iter().copied().max().unwrap_or(0);
        (15 - brightest).max(0)
    }

    /// Discovery flag.
    #[must_use]
    pub const fn is_discovered(&self, flag: Discovery) -> bool {
        self.discovered[flag.index()]
    }

    /// Set a discovery flag. Discovering the content also reveals both walls.
    pub fn set_discovered(&mut self, flag: Discovery, discovered: bool) {
        self.discovered[flag.index()] = discovered;
        if flag == Discovery::Content && discovered {
            self.discovered[Discovery::West.index()] = true;
            self.discovered[Discovery::North.index()] = true;
        }
    }

    /// All three discovery flags (west, north, content).
    #[must_use]
    pub const fn discovered_flags(&self) -> [bool; 3] {
        self.discovered
    }

    pub(crate) fn set_discovered_flags(&mut self, flags: [bool; 3]) {
        self.discovered = flags;
    }

    pub(crate) fn set_ufo_door_frame(&mut self, slot: TilePart, frame: u8) {
        self.ufo_door_frames[slot.index()] = frame.min(UFO_DOOR_OPEN_FRAME);
    }

    // ========================================================================
    // Occupants
    // ========================================================================

    /// Unit standing here.
    #[must_use]
    pub const fn unit(&self) -> Option<UnitId> {
        self.unit
    }

    pub(crate) fn set_unit(&mut self, unit: Option<UnitId>) {
        self.unit = unit;
    }

    /// Items lying on the ground, in drop order.
    #[must_use]
    pub fn inventory(&self) -> &[ItemId] {
        &self.inventory
    }

    pub(crate) fn add_item(&mut self, item: ItemId) {
        if !self.inventory.contains(&item) {
            self.inventory.push(item);
        }
    }

    pub(crate) fn remove_item(&mut self, item: ItemId) -> bool {
        let before = self.inventory.len();
        self.inventory.retain(|i| *i != item);
        before != self.inventory.len()
    }

    // ========================================================================
    // UI markers
    // ========================================================================

    /// Path preview marker.
    #[must_use]
    pub const fn preview(&self) -> Option<PathMarker> {
        self.preview
    }

    /// Set or clear the path preview marker.
    pub fn set_preview(&mut self, marker: Option<PathMarker>) {
        self.preview = marker;
    }

    /// True if the AI flagged this tile as about to explode.
    #[must_use]
    pub const fn is_dangerous(&self) -> bool {
        self.danger
    }

    /// Flag the tile as dangerous until the next turn.
    pub fn set_danger(&mut self) {
        self.danger = true;
    }
}

/// Saved form of a [`Tile`].
///
/// Part references are kept as separate data set and part id arrays with
/// -1 for an empty slot, matching the binary tile table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRecord {
    /// Tile coordinate.
    pub position: Position,
    /// Part id per slot, -1 for none.
    pub map_data_id: [i32; 4],
    /// Data set id per slot, -1 for none.
    pub map_data_set_id: [i32; 4],
    /// Turns of fire left.
    #[serde(default)]
    pub fire: i32,
    /// Smoke density.
    #[serde(default)]
    pub smoke: i32,
    /// West, north and content discovery.
    #[serde(default)]
    pub discovered: [bool; 3],
    /// UFO door animation frame per slot.
    #[serde(default)]
    pub ufo_door_frames: [u8; 4],
}

impl Tile {
    /// Structured record of this tile.
    #[must_use]
    pub fn to_record(&self) -> TileRecord {
        let mut map_data_id = [-1; 4];
        let mut map_data_set_id = [-1; 4];
        for slot in TilePart::ALL {
            if let Some(part) = self.part_ref(slot) {
                map_data_id[slot.index()] = part.id as i32;
                map_data_set_id[slot.index()] = part.set as i32;
            }
        }
        TileRecord {
            position: self.position,
            map_data_id,
            map_data_set_id,
            fire: self.fire,
            smoke: self.smoke,
            discovered: self.discovered,
            ufo_door_frames: self.ufo_door_frames,
        }
    }

    /// Restore parts, fire, smoke, discovery and door frames from a record.
    ///
    /// Parts are placed in the slot the record names, not the slot their
    /// data claims, so opened doors come back where they were.
    pub fn load_record(&mut self, record: &TileRecord, rules: &Ruleset) -> Result<()> {
        for slot in TilePart::ALL {
            let (set, id) = (
                record.map_data_set_id[slot.index()],
                record.map_data_id[slot.index()],
            );
            let placed = if set < 0 || id < 0 {
                None
            } else {
                let part = PartRef::new(set as usize, id as usize);
                Some(PlacedPart {
                    part,
                    data: rules.map_data(part)?,
                })
            };
            self.parts[slot.index()] = placed;
            self.ufo_door_frames[slot.index()] =
                record.ufo_door_frames[slot.index()].min(UFO_DOOR_OPEN_FRAME);
        }
        self.fire = record.fire.max(0);
        self.smoke = record.smoke.clamp(0, MAX_SMOKE);
        self.discovered = record.discovered;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{MapDataSet, RulesetFile};

    struct AlwaysZero;

    impl RandomSource for AlwaysZero {
        fn next_u32(&mut self) -> u32 {
            0
        }
    }

    fn rules() -> Ruleset {
        let parts = [
            r#"(name: "grass", part: Floor, tu_cost: (4, 4, 4), flammability: 10, fuel: 3)"#,
            r#"(name: "stone", part: Floor, tu_cost: (4, 4, 4))"#,
            r#"(name: "door", part: WestWall, tu_cost: (2, 2, 2), door: true, alt_part: Some(3))"#,
            r#"(name: "door_open", part: Object, tu_cost: (0, 0, 0))"#,
            r#"(name: "ufo_door", part: NorthWall, tu_cost: (4, 4, 4), ufo_door: true)"#,
            r#"(name: "barrel", part: Object, tu_cost: (255, 255, 255), armor: 10, explosive: 40, die_part: Some(6), must_destroy: true)"#,
            r#"(name: "rubble", part: Object, tu_cost: (6, 6, 6))"#,
            r#"(name: "scorched", part: Floor, tu_cost: (4, 4, 4))"#,
        ];
        let file = RulesetFile {
            map_data_sets: vec![MapDataSet {
                name: "test".into(),
                parts: parts.iter().map(|p| ron::from_str(p).unwrap()).collect(),
            }],
            scorched_earth: Some(PartRef::new(0, 7)),
            ..RulesetFile::default()
        };
        Ruleset::from_file(file).unwrap()
    }

    #[test]
    fn test_door_result_codes() {
        for result in [
            DoorResult::Opened,
            DoorResult::UfoDoorStarted,
            DoorResult::UfoDoorOpening,
            DoorResult::NotEnoughTimeUnits,
            DoorResult::NoDoor,
        ] {
            assert_eq!(DoorResult::from_code(result.to_code()), Some(result));
        }
        assert_eq!(DoorResult::from_code(2), None);
    }

    #[test]
    fn test_fireproof_tile_never_ignites() {
        let rules = rules();
        let mut tile = Tile::new(Position::ZERO);
        tile.place(PartRef::new(0, 1), &rules).unwrap();
        let mut rng = AlwaysZero;
        for power in [0, 50, 1000] {
            assert!(!tile.ignite(power, &mut rng));
        }
        assert_eq!(tile.fire(), 0);
    }

    #[test]
    fn test_ignite_sets_fuel_and_smoke() {
        let rules = rules();
        let mut tile = Tile::new(Position::ZERO);
        tile.place(PartRef::new(0, 0), &rules).unwrap();
        assert!(tile.ignite(100, &mut AlwaysZero));
        assert_eq!(tile.fire(), 4);
        assert_eq!(tile.smoke(), 14);
    }

    #[test]
    fn test_fire_burns_down_one_per_turn() {
        let mut tile = Tile::new(Position::ZERO);
        tile.set_fire(3);
        tile.set_smoke(8);
        for expected in [2, 1, 0, 0] {
            tile.prepare_new_turn();
            assert_eq!(tile.fire(), expected);
        }
    }

    #[test]
    fn test_smoke_stays_in_range() {
        let mut tile = Tile::new(Position::ZERO);
        tile.add_smoke(40);
        tile.add_smoke(40);
        assert_eq!(tile.smoke(), MAX_SMOKE);
        tile.prepare_new_turn();
        assert_eq!(tile.smoke(), 6);
        for _ in 0..10 {
            tile.prepare_new_turn();
        }
        assert_eq!(tile.smoke(), 0);
    }

    #[test]
    fn test_open_hinged_door_swaps_to_alt_part() {
        let rules = rules();
        let mut tile = Tile::new(Position::ZERO);
        tile.place(PartRef::new(0, 2), &rules).unwrap();
        assert_eq!(
            tile.open_door(TilePart::WestWall, Some(1), MovementType::Walk, &rules),
            DoorResult::NotEnoughTimeUnits
        );
        assert_eq!(
            tile.open_door(TilePart::WestWall, Some(10), MovementType::Walk, &rules),
            DoorResult::Opened
        );
        assert!(tile.part(TilePart::WestWall).is_none());
        assert_eq!(tile.part_ref(TilePart::Object), Some(PartRef::new(0, 3)));
    }

    #[test]
    fn test_ufo_door_animation() {
        let rules = rules();
        let mut tile = Tile::new(Position::ZERO);
        tile.place(PartRef::new(0, 4), &rules).unwrap();
        assert_eq!(
            tile.open_door(TilePart::NorthWall, None, MovementType::Walk, &rules),
            DoorResult::UfoDoorStarted
        );
        assert_eq!(
            tile.open_door(TilePart::NorthWall, None, MovementType::Walk, &rules),
            DoorResult::UfoDoorOpening
        );
        assert_eq!(tile.tu_cost(TilePart::NorthWall, MovementType::Walk), 4);
        for _ in 0..10 {
            tile.animate();
        }
        assert_eq!(tile.ufo_door_frame(TilePart::NorthWall), UFO_DOOR_OPEN_FRAME);
        assert_eq!(tile.tu_cost(TilePart::NorthWall, MovementType::Walk), 0);
        assert_eq!(
            tile.open_door(TilePart::NorthWall, None, MovementType::Walk, &rules),
            DoorResult::NoDoor
        );
        assert!(tile.close_ufo_door());
        assert!(!tile.is_ufo_door_open(TilePart::NorthWall));
    }

    #[test]
    fn test_destroy_leaves_rubble_and_payload() {
        let rules = rules();
        let mut tile = Tile::new(Position::new(1, 1, 0));
        tile.place(PartRef::new(0, 5), &rules).unwrap();
        assert!(!tile.damage(TilePart::Object, 5, &rules));
        assert!(tile.damage(TilePart::Object, 10, &rules));
        assert_eq!(tile.part(TilePart::Object).unwrap().name, "rubble");
        assert_eq!(tile.explosive(), 40);
    }

    #[test]
    fn test_destroyed_ground_floor_becomes_scorched_earth() {
        let rules = rules();
        let mut tile = Tile::new(Position::new(0, 0, 0));
        tile.place(PartRef::new(0, 1), &rules).unwrap();
        tile.destroy(TilePart::Floor, &rules);
        assert_eq!(tile.part_ref(TilePart::Floor), Some(PartRef::new(0, 7)));

        let mut upper = Tile::new(Position::new(0, 0, 1));
        upper.place(PartRef::new(0, 1), &rules).unwrap();
        upper.destroy(TilePart::Floor, &rules);
        assert!(upper.part(TilePart::Floor).is_none());
    }

    #[test]
    fn test_shade_uses_brightest_layer() {
        let mut tile = Tile::new(Position::ZERO);
        assert_eq!(tile.shade(), 15);
        tile.add_light(LightLayer::Ambient, 4);
        tile.add_light(LightLayer::Dynamic, 12);
        assert_eq!(tile.shade(), 3);
        tile.reset_light(LightLayer::Dynamic);
        assert_eq!(tile.shade(), 11);
    }

    #[test]
    fn test_record_roundtrip_keeps_fields() {
        let rules = rules();
        let mut tile = Tile::new(Position::new(2, 3, 0));
        tile.place(PartRef::new(0, 0), &rules).unwrap();
        tile.place(PartRef::new(0, 4), &rules).unwrap();
        tile.set_fire(2);
        tile.set_smoke(9);
        tile.set_discovered(Discovery::North, true);

        let record = tile.to_record();
        assert_eq!(record.map_data_id, [0, -1, 4, -1]);
        assert_eq!(record.map_data_set_id, [0, -1, 0, -1]);

        let mut fresh = Tile::new(Position::new(2, 3, 0));
        fresh.load_record(&record, &rules).unwrap();
        assert_eq!(fresh.to_record(), record);
    }

    #[test]
    fn test_void_tile() {
        let mut tile = Tile::new(Position::ZERO);
        assert!(tile.is_void());
        assert!(tile.has_no_floor(None));
        tile.add_smoke(3);
        assert!(!tile.is_void());
    }
}
