//! Headless arena -- a crowd of wandering boxes fenced in by walls.
//!
//! Run with:
//!   cargo run --example arena -p nero-engine
//!
//! Optional arguments: a simulation config JSON file and a template JSON
//! file. Set `RUST_LOG=debug` for per-entity spawn and removal logs.

use anyhow::Context;
use glam::Vec3;

use nero_engine::logging::init_logging;
use nero_engine::prelude::*;

// ---------------------------------------------------------------------------
// Scene setup
// ---------------------------------------------------------------------------

const ROAMER: u32 = 1 << 0;
const WALL: u32 = 1 << 1;

const DEFAULT_TEMPLATES: &str = r#"{
    "roamer": {
        "scene": { "half_extents": [0.4, 0.5, 0.4], "kind": 1, "collision_mask": 3 },
        "ai": { "wander": { "speed": 2.0, "turn_rate": 120.0, "seed": 2024 } }
    },
    "wall": {
        "scene": { "half_extents": [0.5, 1.0, 10.5], "kind": 2, "collision_mask": 1 }
    }
}"#;

const ROAMER_COUNT: usize = 24;
const FRAMES: usize = 600;
const FRAME_TIME: f32 = 1.0 / 60.0;

fn build_arena(ctx: &mut SimContext) -> anyhow::Result<()> {
    // The z-facing pair is the same box stretched along x.
    let walls = [
        (Vec3::new(-10.0, 0.0, 0.0), Vec3::ONE),
        (Vec3::new(10.0, 0.0, 0.0), Vec3::ONE),
        (Vec3::new(0.0, 0.0, -10.0), Vec3::new(21.0, 1.0, 1.0 / 21.0)),
        (Vec3::new(0.0, 0.0, 10.0), Vec3::new(21.0, 1.0, 1.0 / 21.0)),
    ];
    for (i, (position, scale)) in walls.into_iter().enumerate() {
        ctx.add_object(
            "wall",
            ObjectSpawn::at(position)
                .with_scale(scale)
                .with_label(format!("wall-{i}"))
                .with_type(WALL),
        )?;
    }

    for i in 0..ROAMER_COUNT {
        let x = (i % 6) as f32 * 2.5 - 6.25;
        let z = (i / 6) as f32 * 2.5 - 3.75;
        ctx.add_object(
            "roamer",
            ObjectSpawn::at(Vec3::new(x, 0.0, z))
                .with_rotation(Vec3::new(0.0, i as f32 * 15.0, 0.0))
                .with_label(format!("roamer-{i}"))
                .with_type(ROAMER),
        )?;
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let mut args = std::env::args().skip(1);

    let config = match args.next() {
        Some(path) => SimConfig::load(&path)?,
        None => SimConfig {
            frame_delay: 0.1,
            ..Default::default()
        },
    };
    init_logging(&config.log_filter);

    let mut templates = TemplateRegistry::new();
    match args.next() {
        Some(path) => templates.load_file(&path)?,
        None => templates
            .load_json_str(DEFAULT_TEMPLATES)
            .context("built-in arena templates")?,
    };

    let mut kernel = Kernel::new(&config, templates);
    build_arena(kernel.context_mut())?;

    let mut full_ticks = 0usize;
    let mut total_collisions = 0usize;
    for _ in 0..FRAMES {
        if let Frame::Full(report) = kernel.frame(FRAME_TIME) {
            full_ticks += 1;
            total_collisions += report.collisions.pairs.len();
            if !report.collisions.is_empty() {
                tracing::debug!(
                    tick = report.tick,
                    pairs = ?report.collisions.pairs,
                    "collisions rolled back"
                );
            }
        }
    }

    let ctx = kernel.context();
    let escaped = ctx
        .simulation()
        .entities_of_type(ROAMER)
        .into_iter()
        .filter(|&id| {
            ctx.object_position(id)
                .is_some_and(|p| p.x.abs() > 10.0 || p.z.abs() > 10.0)
        })
        .count();

    tracing::info!(
        full_ticks,
        total_collisions,
        escaped,
        entities = ctx.simulation().len(),
        hash = %ctx.state_hash(),
        "arena run finished"
    );
    Ok(())
}
