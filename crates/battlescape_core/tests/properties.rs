//! Property tests over the battle model.

use battlescape_core::prelude::*;
use battlescape_core::tile::MAX_SMOKE;
use battlescape_core::math::apply_modifier;
use battlescape_test_utils::determinism::strategies::{
    arb_damage_type, arb_direction, arb_modifier, arb_position, arb_power, arb_seed,
};
use battlescape_test_utils::fixtures::{flat_battle, parts, place, skirmish};
use battlescape_test_utils::proptest::prelude::*;

/// One inventory shuffle applied to a test battle.
#[derive(Debug, Clone)]
enum ItemOp {
    Give { item: usize, unit: usize, slot: InventorySlot },
    Drop { item: usize, x: i32, y: i32 },
    Destroy { item: usize },
    Load { weapon: usize, clip: usize },
}

fn arb_slot() -> impl Strategy<Value = InventorySlot> {
    prop_oneof![
        Just(InventorySlot::RightHand),
        Just(InventorySlot::LeftHand),
        Just(InventorySlot::Belt),
        Just(InventorySlot::Backpack),
    ]
}

fn arb_item_op() -> impl Strategy<Value = ItemOp> {
    prop_oneof![
        (0..6usize, 0..2usize, arb_slot()).prop_map(|(item, unit, slot)| ItemOp::Give { item, unit, slot }),
        (0..6usize, 0..6i32, 0..6i32).prop_map(|(item, x, y)| ItemOp::Drop { item, x, y }),
        (0..6usize).prop_map(|item| ItemOp::Destroy { item }),
        (0..6usize, 0..6usize).prop_map(|(weapon, clip)| ItemOp::Load { weapon, clip }),
    ]
}

proptest! {
    #[test]
    fn test_smoke_stays_in_range(
        smoke in prop::collection::vec((0..8i32, 0..8i32, 0..=MAX_SMOKE), 1..20),
        fires in prop::collection::vec((0..8i32, 0..8i32), 0..6),
        seed in arb_seed(),
        turns in 1..6usize,
    ) {
        let mut save = flat_battle(8, 8, 2);
        for (x, y, amount) in smoke {
            save.tile_mut(Position::new(x, y, 0)).unwrap().set_smoke(amount);
        }
        for (x, y) in fires {
            save.tile_mut(Position::new(x, y, 0)).unwrap().start_fire();
        }
        let config = SimulationConfig::default();
        let mut rng = BattleRng::new(seed);
        for _ in 0..turns {
            TileEngine::new(&mut save, &config).prepare_new_turn(&mut rng);
            for tile in save.tiles() {
                prop_assert!((0..=MAX_SMOKE).contains(&tile.smoke()), "smoke {} at {}", tile.smoke(), tile.position());
            }
        }
    }

    #[test]
    fn test_neighbouring_smoke_only_thins_out(smoke in 1..=MAX_SMOKE, seed in arb_seed()) {
        let mut save = flat_battle(2, 1, 1);
        save.tile_mut(Position::new(0, 0, 0)).unwrap().set_smoke(smoke);
        save.tile_mut(Position::new(1, 0, 0)).unwrap().set_smoke(smoke);
        let config = SimulationConfig::default();
        let mut rng = BattleRng::new(seed);
        let total = |save: &SavedBattleGame| save.tiles().iter().map(Tile::smoke).sum::<i32>();

        let mut before = total(&save);
        while before > 0 {
            TileEngine::new(&mut save, &config).prepare_new_turn(&mut rng);
            let after = total(&save);
            prop_assert!(after < before, "smoke went from {} to {}", before, after);
            before = after;
        }
    }

    #[test]
    fn test_fire_burns_down_one_per_turn(
        fires in prop::collection::vec((0..8i32, 0..8i32), 1..6),
        seed in arb_seed(),
    ) {
        let mut save = flat_battle(8, 8, 1);
        for (x, y) in &fires {
            save.tile_mut(Position::new(*x, *y, 0)).unwrap().start_fire();
        }
        let config = SimulationConfig::default();
        let mut rng = BattleRng::new(seed);
        let before: Vec<(Position, i32)> = save
            .tiles()
            .iter()
            .filter(|tile| tile.fire() > 0)
            .map(|tile| (tile.position(), tile.fire()))
            .collect();

        TileEngine::new(&mut save, &config).prepare_new_turn(&mut rng);
        for (pos, fire) in before {
            prop_assert_eq!(save.tile(pos).unwrap().fire(), fire - 1);
        }
    }

    #[test]
    fn test_modifier_truncates_towards_zero(power in arb_power(), modifier in arb_modifier()) {
        let scaled = apply_modifier(power, modifier);
        let exact = Fixed::from_num(power) * modifier;
        prop_assert!(scaled >= 0);
        prop_assert!(Fixed::from_num(scaled) <= exact);
        prop_assert!(exact < Fixed::from_num(scaled + 1));
    }

    #[test]
    fn test_armor_never_adds_damage(
        power in arb_power(),
        damage_type in arb_damage_type(),
        from in arb_direction(),
        facing in arb_direction(),
        seed in arb_seed(),
    ) {
        let mut save = flat_battle(3, 3, 1);
        let id = save.add_unit("sectoid", Faction::Hostile, Position::new(1, 1, 0)).unwrap();
        let unit = save.unit_mut(id).unwrap();
        unit.set_direction(facing);
        let ceiling = apply_modifier(power, unit.armor_rules().damage_modifier(damage_type));
        let before = unit.health();

        let mut rng = BattleRng::new(seed);
        let dealt = unit.damage(from.vector(), power, damage_type, false, &mut rng);
        prop_assert!((0..=ceiling).contains(&dealt), "dealt {} above {}", dealt, ceiling);
        if damage_type == DamageType::Stun {
            prop_assert_eq!(unit.health(), before);
        } else {
            prop_assert_eq!(before - unit.health(), dealt.min(before));
        }
    }

    #[test]
    fn test_pathfinding_is_idempotent(target in arb_position(20, 20, 1), unit_index in 0..7usize) {
        let save = skirmish();
        let unit = &save.units()[unit_index];
        let pathfinding = Pathfinding::new(&save);
        let first = pathfinding.calculate(unit, target, None);
        let second = pathfinding.calculate(unit, target, None);
        prop_assert_eq!(&first, &second);
        if let Some(end) = first.destination() {
            prop_assert_eq!(end, target);
        }
    }

    #[test]
    fn test_item_is_never_carried_and_on_the_ground(ops in prop::collection::vec(arb_item_op(), 1..40)) {
        let mut save = flat_battle(6, 6, 1);
        let units = [
            save.add_unit("soldier", Faction::Player, Position::new(1, 1, 0)).unwrap(),
            save.add_unit("sectoid", Faction::Hostile, Position::new(4, 4, 0)).unwrap(),
        ];
        let items: Vec<ItemId> = ["rifle", "rifle_clip", "grenade", "medikit", "plasma_pistol", "plasma_clip"]
            .iter()
            .map(|id| save.create_item(id).unwrap())
            .collect();

        for op in ops {
            match op {
                ItemOp::Give { item, unit, slot } => {
                    save.give_item(items[item], units[unit], slot);
                }
                ItemOp::Drop { item, x, y } => {
                    save.drop_item(items[item], Position::new(x, y, 0));
                }
                ItemOp::Destroy { item } => save.destroy_item(items[item]),
                ItemOp::Load { weapon, clip } => {
                    save.load_ammo(items[weapon], items[clip]);
                }
            }

            for item in save.items() {
                let carried = item.owner().is_some();
                let on_ground = save.tiles().iter().any(|tile| tile.inventory().contains(&item.id()));
                prop_assert!(!(carried && on_ground), "item {:?} is in two places", item.id());
            }
            let violations = save.check_invariants();
            prop_assert!(violations.is_empty(), "{:?}", violations);
        }
    }
}

#[test]
fn test_walled_off_fire_does_not_spread_west() {
    let mut save = flat_battle(5, 1, 1);
    place(&mut save, Position::new(2, 0, 0), parts::WEST_WALL);
    save.tile_mut(Position::new(2, 0, 0)).unwrap().start_fire();
    let config = SimulationConfig::default();
    let mut rng = BattleRng::new(3);
    for _ in 0..3 {
        TileEngine::new(&mut save, &config).prepare_new_turn(&mut rng);
        assert_eq!(save.tile(Position::new(1, 0, 0)).unwrap().fire(), 0);
    }
}
