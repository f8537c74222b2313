//! Shared fixtures for unit tests inside this crate.

use std::sync::Arc;

use crate::position::Position;
use crate::rng::RandomSource;
use crate::rules::{PartRef, Ruleset};
use crate::saved_battle::SavedBattleGame;

/// Part indices in the "plain" set.
pub(crate) mod parts {
    use crate::rules::PartRef;

    pub const GRASS: PartRef = PartRef::new(0, 0);
    pub const WEST_WALL: PartRef = PartRef::new(0, 1);
    pub const NORTH_WALL: PartRef = PartRef::new(0, 2);
    pub const DOOR: PartRef = PartRef::new(0, 3);
    pub const UFO_DOOR: PartRef = PartRef::new(0, 5);
    pub const CRATE: PartRef = PartRef::new(0, 6);
    pub const BARREL: PartRef = PartRef::new(0, 7);
    pub const ROOF: PartRef = PartRef::new(0, 10);
    pub const BUSH: PartRef = PartRef::new(0, 11);
}

const RULES: &str = r#"
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

/// The shared test ruleset.
pub(crate) fn rules() -> Arc<Ruleset> {
    Arc::new(Ruleset::from_ron_str(RULES).unwrap())
}

/// A map with grass on the ground level and empty air above.
pub(crate) fn flat_battle(width: i32, length: i32, height: i32) -> SavedBattleGame {
    let mut save = SavedBattleGame::new(rules(), width, length, height);
    for y in 0..length {
        for x in 0..width {
            save.set_part(Position::new(x, y, 0), parts::GRASS).unwrap();
        }
    }
    save.reveal_map();
    save
}

/// Place a part, panicking on bad input.
pub(crate) fn place(save: &mut SavedBattleGame, pos: Position, part: PartRef) {
    save.set_part(pos, part).unwrap();
}

/// Replays a fixed list of raw values, cycling when exhausted.
pub(crate) struct ScriptedRng {
    values: Vec<u32>,
    next: usize,
}

impl ScriptedRng {
    pub(crate) fn new(values: &[u32]) -> Self {
        Self {
            values: values.to_vec(),
            next: 0,
        }
    }
}

impl RandomSource for ScriptedRng {
    fn next_u32(&mut self) -> u32 {
        let value = self.values.get(self.next % self.values.len().max(1)).copied();
        self.next += 1;
        value.unwrap_or(0)
    }
}
