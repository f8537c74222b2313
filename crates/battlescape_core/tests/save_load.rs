//! Saving and loading battles.

use battlescape_core::prelude::*;
use battlescape_core::rules::TilePart;
use battlescape_core::serialization::{SerializationKey, TileTable};
use battlescape_core::tile::Discovery;
use battlescape_test_utils::determinism::verify_snapshot_determinism;
use battlescape_test_utils::fixtures::{autoplay_skirmish, flat_battle, parts, place, rules, skirmish};
use battlescape_test_utils::proptest::prelude::*;

proptest! {
    #[test]
    fn test_tile_record_restores_fire_smoke_and_discovery(
        smoke in 0..=15i32,
        burn in any::<bool>(),
        west in any::<bool>(),
        north in any::<bool>(),
        content in any::<bool>(),
        with_crate in any::<bool>(),
    ) {
        let mut save = flat_battle(3, 3, 1);
        let pos = Position::new(1, 1, 0);
        if with_crate {
            place(&mut save, pos, parts::CRATE);
        }
        let tile = save.tile_mut(pos).unwrap();
        if burn {
            tile.start_fire();
        }
        tile.set_smoke(smoke);
        tile.set_discovered(Discovery::West, west);
        tile.set_discovered(Discovery::North, north);
        tile.set_discovered(Discovery::Content, content);
        let record = tile.to_record();

        let mut fresh = Tile::new(pos);
        fresh.load_record(&record, &rules()).unwrap();
        prop_assert_eq!(fresh.to_record(), record);
        prop_assert_eq!(fresh.fire(), tile.fire());
        prop_assert_eq!(fresh.smoke(), tile.smoke());
        prop_assert_eq!(fresh.discovered_flags(), [west, north, content]);
        prop_assert_eq!(fresh.part(TilePart::Object).is_some(), with_crate);
    }
}

#[test]
fn test_tile_table_carries_terrain_to_a_blank_map() {
    let source = skirmish();
    let table = TileTable::encode(&source, SerializationKey::default()).unwrap();
    assert_eq!(table.len(), source.tiles().len());

    let mut target = SavedBattleGame::new(rules(), 20, 20, 2);
    table.apply(&mut target).unwrap();
    for (a, b) in source.tiles().iter().zip(target.tiles()) {
        assert_eq!(a.to_record(), b.to_record());
    }
}

#[test]
fn test_ron_save_keeps_state_hash() {
    let mut game = autoplay_skirmish(8);
    for _ in 0..300 {
        game.think();
    }
    let ron = game.save().to_ron().unwrap();
    let loaded = SavedBattleGame::from_ron(&ron, rules()).unwrap();
    assert_eq!(loaded.state_hash(), game.save().state_hash());
    assert_eq!(loaded.turn(), game.save().turn());
    assert_eq!(loaded.side(), game.save().side());
    assert!(loaded.check_invariants().is_empty());
}

#[test]
fn test_snapshot_bytes_round_trip() {
    let game = autoplay_skirmish(2);
    let bytes = game.snapshot().unwrap().to_bytes().unwrap();
    let snapshot = BattleSnapshot::from_bytes(&bytes).unwrap();
    let restored = BattlescapeGame::restore(&snapshot, rules(), SimulationConfig::default()).unwrap();
    assert_eq!(restored.save().state_hash(), game.save().state_hash());
    assert_eq!(restored.rng().state(), game.rng().state());
}

#[test]
fn test_corrupt_snapshot_is_an_error() {
    let bytes = autoplay_skirmish(2).snapshot().unwrap().to_bytes().unwrap();
    assert!(BattleSnapshot::from_bytes(&bytes[..bytes.len() / 3]).is_err());
}

#[test]
fn test_restored_battle_plays_on_identically() {
    assert!(verify_snapshot_determinism(|| autoplay_skirmish(31), &rules(), 100, 400));
}
