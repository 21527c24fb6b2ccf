//! Tick and collision throughput.
//!
//! Measures a full simulation tick with N wandering boxes on a grid, the
//! pairwise detector on its own, and a ray pick through a collision
//! selector.
//!
//! Run with: `cargo bench --bench collision_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;

use nero_engine::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TEMPLATES: &str = r#"{
    "roamer": {
        "scene": { "half_extents": [0.4, 0.4, 0.4], "kind": 1, "collision_mask": 1 },
        "ai": { "wander": { "speed": 1.0, "turn_rate": 90.0, "seed": 42 } }
    }
}"#;

/// A context with `count` roamers laid out on a square grid two units apart.
fn setup_context(count: usize) -> SimContext {
    let mut templates = TemplateRegistry::new();
    templates
        .load_json_str(TEMPLATES)
        .expect("benchmark templates parse");
    let mut ctx = SimContext::new(&SimConfig::default(), templates);

    let side = (count as f32).sqrt().ceil() as usize;
    for i in 0..count {
        let position = Vec3::new((i % side) as f32 * 2.0, 0.0, (i / side) as f32 * 2.0);
        ctx.add_object("roamer", ObjectSpawn::at(position).with_type(1))
            .expect("spawn roamer");
    }
    // Admit everyone.
    ctx.process_tick(0.0);
    ctx
}

// ---------------------------------------------------------------------------
// Benchmark 1: full tick
// ---------------------------------------------------------------------------

fn bench_full_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_tick");
    for count in [100usize, 400, 1000] {
        let mut ctx = setup_context(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(ctx.process_tick(0.1)));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 2: detector only
// ---------------------------------------------------------------------------

fn bench_detect(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect");
    for count in [100usize, 400, 1000] {
        let ctx = setup_context(count);
        let entities: Vec<&SimEntity> = ctx.simulation().entities().collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(CollisionDetector::detect(&entities)));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 3: ray pick
// ---------------------------------------------------------------------------

fn bench_ray_pick(c: &mut Criterion) {
    let mut ctx = setup_context(1000);
    let target = Vec3::new(64.0, 0.0, 64.0);

    c.bench_function("find_in_ray_1k", |b| {
        b.iter(|| black_box(ctx.find_in_ray(Vec3::new(-1.0, 0.0, -1.0), target, 1)));
    });
}

// ---------------------------------------------------------------------------
// Criterion groups and main
// ---------------------------------------------------------------------------

criterion_group!(benches, bench_full_tick, bench_detect, bench_ray_pick);
criterion_main!(benches);
