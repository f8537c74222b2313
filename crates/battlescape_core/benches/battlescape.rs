//! Battle engine benchmarks for battlescape_core.
//!
//! Run with: `cargo bench -p battlescape_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use battlescape_core::config::SimulationConfig;
use battlescape_core::pathfinding::Pathfinding;
use battlescape_core::position::Position;
use battlescape_core::rng::BattleRng;
use battlescape_core::rules::DamageType;
use battlescape_core::tile_engine::TileEngine;
use battlescape_test_utils::fixtures::{autoplay_skirmish, skirmish};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

/// Pathfinding across the skirmish field, around the crates.
pub fn pathfinding_benchmark(c: &mut Criterion) {
    let save = skirmish();
    let unit = save.units()[0].clone();
    c.bench_function("path_corner_to_corner", |b| {
        b.iter(|| {
            let path = Pathfinding::new(&save).calculate(&unit, black_box(Position::new(18, 18, 0)), None);
            black_box(path.total_tu())
        })
    });
    c.bench_function("reachable_tiles", |b| {
        b.iter(|| black_box(Pathfinding::new(&save).find_reachable(&unit, black_box(60)).len()))
    });
}

/// Field of view and lighting for every unit.
pub fn vision_benchmark(c: &mut Criterion) {
    let config = SimulationConfig::default();
    c.bench_function("all_fov", |b| {
        b.iter_batched(
            skirmish,
            |mut save| TileEngine::new(&mut save, &config).calculate_all_fov(),
            BatchSize::SmallInput,
        )
    });
    c.bench_function("recalculate_all", |b| {
        b.iter_batched(
            skirmish,
            |mut save| TileEngine::new(&mut save, &config).recalculate_all(),
            BatchSize::SmallInput,
        )
    });
}

/// A grenade blast in the middle of the field.
pub fn explosion_benchmark(c: &mut Criterion) {
    let config = SimulationConfig::default();
    let center = Position::new(10, 10, 0).to_voxel_center();
    c.bench_function("high_explosive_blast", |b| {
        b.iter_batched(
            || (skirmish(), BattleRng::new(1)),
            |(mut save, mut rng)| {
                let report = TileEngine::new(&mut save, &config).explode(
                    center,
                    black_box(60),
                    DamageType::HighExplosive,
                    6,
                    None,
                    &mut rng,
                );
                black_box(report.tiles.len())
            },
            BatchSize::SmallInput,
        )
    });
}

/// Scheduler ticks with the AI playing both sides.
pub fn scheduler_benchmark(c: &mut Criterion) {
    c.bench_function("autoplay_500_ticks", |b| {
        b.iter_batched(
            || autoplay_skirmish(7),
            |mut game| {
                for _ in 0..500 {
                    game.think();
                }
                black_box(game.tick())
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    pathfinding_benchmark,
    vision_benchmark,
    explosion_benchmark,
    scheduler_benchmark
);
criterion_main!(benches);
