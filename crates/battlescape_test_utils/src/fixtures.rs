//! Test fixtures and helpers.
//!
//! A small ruleset with one terrain set, a handful of weapons and four unit
//! types, plus builders for the maps and squads most tests start from.

use std::sync::Arc;

use battlescape_core::battlescape_game::BattlescapeGame;
use battlescape_core::config::SimulationConfig;
use battlescape_core::item::{InventorySlot, ItemId};
use battlescape_core::node::Node;
use battlescape_core::position::Position;
use battlescape_core::rng::{BattleRng, RandomSource};
use battlescape_core::rules::{PartRef, Ruleset};
use battlescape_core::saved_battle::SavedBattleGame;
use battlescape_core::unit::{Faction, UnitId};

/// Part indices in the "plain" terrain set.
pub mod parts {
    use battlescape_core::rules::PartRef;

    /// Walkable floor.
    pub const GRASS: PartRef = PartRef::new(0, 0);
    /// Solid wall on the west edge of a tile.
    pub const WEST_WALL: PartRef = PartRef::new(0, 1);
    /// Solid wall on the north edge of a tile.
    pub const NORTH_WALL: PartRef = PartRef::new(0, 2);
    /// Door on the west edge.
    pub const DOOR: PartRef = PartRef::new(0, 3);
    /// Sliding UFO door on the north edge.
    pub const UFO_DOOR: PartRef = PartRef::new(0, 5);
    /// Impassable, flammable crate.
    pub const CRATE: PartRef = PartRef::new(0, 6);
    /// Explosive barrel, a mission objective.
    pub const BARREL: PartRef = PartRef::new(0, 7);
    /// Floor used as a roof on upper levels.
    pub const ROOF: PartRef = PartRef::new(0, 10);
    /// Low cover that burns.
    pub const BUSH: PartRef = PartRef::new(0, 11);
}

/// The shared test ruleset, in RON.
pub const TEST_RULESET: &str = r#"
RulesetFile(
    map_data_sets: [(
        name: "plain",
        parts: [
            (name: "grass", part: Floor, tu_cost: (4, 4, 4), armor: 10, flammability: 50, fuel: 2, loft: (1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0)),
            (name: "west_wall", part: WestWall, tu_cost: (255, 255, 255), block: (10, 255, 40, 255, 255, 255), armor: 50, loft: (2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2)),
            (name: "north_wall", part: NorthWall, tu_cost: (255, 255, 255), block: (10, 255, 40, 255, 255, 255), armor: 50, loft: (3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3)),
            (name: "door", part: WestWall, tu_cost: (4, 4, 4), block: (10, 255, 30, 255, 255, 255), door: true, alt_part: Some(4), armor: 30, loft: (2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2)),
            (name: "door_open", part: WestWall, tu_cost: (0, 0, 0), armor: 30),
            (name: "ufo_door", part: NorthWall, tu_cost: (4, 4, 4), block: (10, 255, 60, 255, 255, 255), ufo_door: true, armor: 100, loft: (3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3)),
            (name: "crate", part: Object, tu_cost: (255, 255, 255), armor: 30, flammability: 60, fuel: 3, die_part: Some(8), loft: (5, 5, 5, 5, 5, 5, 0, 0, 0, 0, 0, 0)),
            (name: "barrel", part: Object, tu_cost: (255, 255, 255), armor: 10, explosive: 40, die_part: Some(8), must_destroy: true, loft: (5, 5, 5, 5, 5, 0, 0, 0, 0, 0, 0, 0)),
            (name: "rubble", part: Object, tu_cost: (6, 6, 6), armor: 50),
            (name: "scorched", part: Floor, tu_cost: (4, 4, 4), armor: 10, loft: (1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0)),
            (name: "roof", part: Floor, tu_cost: (4, 4, 4), armor: 30, loft: (1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0)),
            (name: "bush", part: Object, tu_cost: (6, 6, 6), armor: 5, flammability: 20, fuel: 4, light_source: 0),
        ],
    )],
    items: [
        (id: "rifle", battle_type: Firearm, accuracy_snap: 60, accuracy_auto: 35, accuracy_aimed: 110, tu_snap: 25, tu_auto: 35, tu_aimed: 80, compatible_ammo: ["rifle_clip"], attraction: 10, inventory_width: 1, inventory_height: 3, weight: 8),
        (id: "rifle_clip", battle_type: Ammo, damage_type: ArmorPiercing, power: 30, clip_size: 20, weight: 3, attraction: 4),
        (id: "plasma_pistol", battle_type: Firearm, accuracy_snap: 65, accuracy_auto: 50, accuracy_aimed: 85, tu_snap: 30, tu_auto: 30, tu_aimed: 60, compatible_ammo: ["plasma_clip"], attraction: 20, inventory_height: 2, weight: 3),
        (id: "plasma_clip", battle_type: Ammo, damage_type: Plasma, power: 52, clip_size: 26, weight: 1, attraction: 6),
        (id: "grenade", battle_type: Grenade, damage_type: HighExplosive, power: 50, weight: 3, attraction: 5),
        (id: "smoke_grenade", battle_type: Grenade, damage_type: Smoke, power: 60, weight: 3),
        (id: "incendiary", battle_type: Grenade, damage_type: Incendiary, power: 60, weight: 3),
        (id: "stun_rod", battle_type: Melee, damage_type: Stun, power: 65, accuracy_melee: 100, tu_melee: 30, weight: 3),
        (id: "psi_amp", battle_type: PsiAmp, tu_use: 25, weight: 1),
        (id: "medikit", battle_type: Medikit, tu_use: 10, heal_quantity: 10, stimulant_quantity: 10, painkiller_quantity: 10, heal_amount: 3, stimulant_amount: 10, weight: 5),
        (id: "soldier_corpse", battle_type: Corpse, inventory_width: 2, inventory_height: 3, weight: 22),
        (id: "sectoid_corpse", battle_type: Corpse, inventory_width: 2, inventory_height: 3, weight: 30),
    ],
    armors: [
        (id: "personal_armor", armor: (12, 8, 8, 5, 2), corpse_item: Some("soldier_corpse")),
        (id: "sectoid_skin", armor: (4, 3, 3, 2, 2), corpse_item: Some("sectoid_corpse")),
        (id: "floater_skin", armor: (8, 6, 6, 4, 2), movement: Fly, corpse_item: Some("sectoid_corpse")),
        (id: "clothes", armor: (0, 0, 0, 0, 0), corpse_item: Some("soldier_corpse")),
    ],
    units: [
        (id: "soldier", armor: "personal_armor", stats: (tu: 60, stamina: 60, health: 35, bravery: 50, reactions: 50, firing: 60, throwing: 60, strength: 30, melee: 50)),
        (id: "sectoid", armor: "sectoid_skin", intelligence: 3, aggression: 1, stats: (tu: 54, stamina: 90, health: 30, bravery: 80, reactions: 63, firing: 52, throwing: 58, strength: 30, psi_strength: 40, psi_skill: 0, melee: 40)),
        (id: "floater", armor: "floater_skin", intelligence: 2, aggression: 2, stats: (tu: 55, stamina: 90, health: 40, bravery: 80, reactions: 50, firing: 50, throwing: 58, strength: 40)),
        (id: "ethereal", armor: "sectoid_skin", intelligence: 5, aggression: 1, stats: (tu: 60, stamina: 90, health: 40, bravery: 100, reactions: 60, firing: 50, throwing: 50, strength: 40, psi_strength: 80, psi_skill: 80, melee: 40)),
        (id: "civilian", armor: "clothes", intelligence: 0, aggression: 0, stats: (tu: 40, stamina: 40, health: 12, bravery: 10, reactions: 20, firing: 10, throwing: 10, strength: 20)),
    ],
    scorched_earth: Some((set: 0, id: 9)),
)
"#;

/// Parse the shared test ruleset.
///
/// # Panics
///
/// Panics if the embedded RON is broken.
#[must_use]
pub fn rules() -> Arc<Ruleset> {
    Arc::new(Ruleset::from_ron_str(TEST_RULESET).expect("test ruleset parses"))
}

/// Parse a configuration override, starting from the defaults.
///
/// # Panics
///
/// Panics on malformed RON.
#[must_use]
pub fn config(ron: &str) -> SimulationConfig {
    ron::from_str(ron).expect("test config parses")
}

/// A map with grass on the ground level and empty air above, fully
/// revealed.
///
/// # Panics
///
/// Panics if the dimensions are not positive.
#[must_use]
pub fn flat_battle(width: i32, length: i32, height: i32) -> SavedBattleGame {
    let mut save = SavedBattleGame::new(rules(), width, length, height);
    for y in 0..length {
        for x in 0..width {
            place(&mut save, Position::new(x, y, 0), parts::GRASS);
        }
    }
    save.reveal_map();
    save
}

/// Place a part.
///
/// # Panics
///
/// Panics if the position is off the map or the part does not exist.
pub fn place(save: &mut SavedBattleGame, pos: Position, part: PartRef) {
    save.set_part(pos, part).expect("part placed");
}

/// A north-south wall along `x` from `y0` to `y1` inclusive, with an
/// optional door at `door_y`.
pub fn wall(save: &mut SavedBattleGame, x: i32, y0: i32, y1: i32, door_y: Option<i32>) {
    for y in y0..=y1 {
        let part = if Some(y) == door_y { parts::DOOR } else { parts::WEST_WALL };
        place(save, Position::new(x, y, 0), part);
    }
}

/// Spawn a unit holding `weapon` in the right hand, loaded with `clip`
/// when given.
///
/// # Panics
///
/// Panics if the tile is taken or an id is not in the ruleset.
pub fn armed_unit(
    save: &mut SavedBattleGame,
    template: &str,
    faction: Faction,
    pos: Position,
    weapon: &str,
    clip: Option<&str>,
) -> (UnitId, ItemId) {
    let unit = save.add_unit(template, faction, pos).expect("unit spawned");
    let gun = save.create_item(weapon).expect("weapon exists");
    assert!(save.give_item(gun, unit, InventorySlot::RightHand), "weapon fits");
    if let Some(clip) = clip {
        let ammo = save.create_item(clip).expect("clip exists");
        assert!(save.load_ammo(gun, ammo), "clip fits weapon");
    }
    (unit, gun)
}

/// A 20x20 field with some crates: four armed soldiers in the south-west
/// corner, three armed sectoids patrolling the north-east.
#[must_use]
pub fn skirmish() -> SavedBattleGame {
    let mut save = flat_battle(20, 20, 2);
    for pos in [(6, 6), (7, 6), (12, 9), (9, 13), (14, 14)] {
        place(&mut save, Position::new(pos.0, pos.1, 0), parts::CRATE);
    }
    place(&mut save, Position::new(10, 10, 0), parts::BUSH);

    for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
        armed_unit(&mut save, "soldier", Faction::Player, Position::new(x, y, 0), "rifle", Some("rifle_clip"));
    }
    for (x, y) in [(17, 17), (18, 16), (16, 18)] {
        armed_unit(&mut save, "sectoid", Faction::Hostile, Position::new(x, y, 0), "plasma_pistol", Some("plasma_clip"));
    }

    let spots = [(17, 17), (12, 16), (8, 10), (15, 5), (4, 15)];
    for (i, (x, y)) in spots.iter().enumerate() {
        let mut node = Node::new(i, Position::new(*x, *y, 0), i32::from(i > 0));
        node.links = (0..spots.len()).filter(|j| *j != i).collect();
        save.add_node(node);
    }
    let first = save.units().first().map(battlescape_core::unit::BattleUnit::id);
    save.set_selected_unit(first);
    save
}

/// A scheduler over [`skirmish`] with the AI playing both sides.
#[must_use]
pub fn autoplay_skirmish(seed: u64) -> BattlescapeGame<BattleRng> {
    let mut game = BattlescapeGame::new(skirmish(), SimulationConfig::default(), BattleRng::new(seed));
    game.set_autoplay(true);
    game
}

/// Replays a fixed list of raw values, cycling when exhausted.
///
/// `generate(min, max)` maps a raw value `v` to `min + v % (max - min + 1)`,
/// so scripting small numbers gives predictable rolls: 0 always succeeds
/// a percentage check and 99 fails anything short of 100.
#[derive(Debug, Clone)]
pub struct ScriptedRng {
    values: Vec<u32>,
    next: usize,
}

impl ScriptedRng {
    /// Source replaying `values`.
    #[must_use]
    pub fn new(values: &[u32]) -> Self {
        Self {
            values: values.to_vec(),
            next: 0,
        }
    }

    /// Values drawn so far.
    #[must_use]
    pub const fn drawn(&self) -> usize {
        self.next
    }
}

impl RandomSource for ScriptedRng {
    fn next_u32(&mut self) -> u32 {
        let value = self.values.get(self.next % self.values.len().max(1)).copied();
        self.next += 1;
        value.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skirmish_is_consistent() {
        let save = skirmish();
        assert!(save.check_invariants().is_empty());
        assert_eq!(save.active_units(Faction::Player).count(), 4);
        assert_eq!(save.active_units(Faction::Hostile).count(), 3);
        assert_eq!(save.nodes().len(), 5);
    }

    #[test]
    fn test_scripted_rng_cycles() {
        let mut rng = ScriptedRng::new(&[3, 5]);
        assert_eq!(rng.next_u32(), 3);
        assert_eq!(rng.next_u32(), 5);
        assert_eq!(rng.next_u32(), 3);
        assert_eq!(rng.drawn(), 3);
    }

    #[test]
    fn test_config_override_keeps_defaults() {
        let config = config("(ai_actions_per_unit: 3)");
        assert_eq!(config.ai_actions_per_unit, 3);
        assert_eq!(config.balance, SimulationConfig::default().balance);
    }
}
