//! Property tests for id allocation, dirty-bit tracking and the tick.
//!
//! These tests use `proptest` to generate random operation sequences and
//! check that the core invariants hold after each one.

use glam::Vec3;
use nero_sim::prelude::*;
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum FieldOp {
    Position(f32),
    Rotation(f32),
    Velocity(f32),
    Scale(f32),
    Acceleration(f32),
    Label(String),
    Color(u8),
    Type(u32),
    Mask(u32),
    Clear,
}

fn finite_f32() -> impl Strategy<Value = f32> {
    -1000.0f32..1000.0f32
}

fn field_op_strategy() -> impl Strategy<Value = FieldOp> {
    prop_oneof![
        finite_f32().prop_map(FieldOp::Position),
        finite_f32().prop_map(FieldOp::Rotation),
        finite_f32().prop_map(FieldOp::Velocity),
        finite_f32().prop_map(FieldOp::Scale),
        finite_f32().prop_map(FieldOp::Acceleration),
        "[a-z]{0,8}".prop_map(FieldOp::Label),
        any::<u8>().prop_map(FieldOp::Color),
        any::<u32>().prop_map(FieldOp::Type),
        any::<u32>().prop_map(FieldOp::Mask),
        Just(FieldOp::Clear),
    ]
}

fn apply(state: &mut EntityState, op: &FieldOp) -> DirtyBits {
    match op {
        FieldOp::Position(v) => {
            state.set_position(Vec3::splat(*v));
            DirtyBits::POSITION
        }
        FieldOp::Rotation(v) => {
            state.set_rotation(Vec3::new(0.0, *v, 0.0));
            DirtyBits::ROTATION
        }
        FieldOp::Velocity(v) => {
            state.set_velocity(Vec3::splat(*v));
            DirtyBits::VELOCITY
        }
        FieldOp::Scale(v) => {
            state.set_scale(Vec3::splat(*v));
            DirtyBits::SCALE
        }
        FieldOp::Acceleration(v) => {
            state.set_acceleration(Vec3::splat(*v));
            DirtyBits::ACCELERATION
        }
        FieldOp::Label(s) => {
            state.set_label(s.clone());
            DirtyBits::LABEL
        }
        FieldOp::Color(c) => {
            state.set_color(Color::rgba(*c, *c, *c, 0xFF));
            DirtyBits::COLOR
        }
        FieldOp::Type(t) => {
            state.set_type(*t);
            DirtyBits::TYPE
        }
        FieldOp::Mask(m) => {
            state.set_collision_mask(*m);
            DirtyBits::COLLISION
        }
        FieldOp::Clear => DirtyBits::NONE,
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn reserved_ids_strictly_increase(
        ops in prop::collection::vec((any::<bool>(), 0u32..5000), 1..100)
    ) {
        let mut ids = IdAllocator::new();
        let mut last = SimId::INVALID;
        for (reserve, external) in ops {
            if reserve {
                let id = ids.reserve_new_id();
                prop_assert!(id > last);
                prop_assert!(id.is_valid());
                last = id;
            } else {
                ids.observe(SimId(external));
                prop_assert!(ids.peek_next_free_id() > SimId(external));
            }
            prop_assert!(ids.peek_next_free_id() > last);
        }
    }

    #[test]
    fn dirty_bits_are_a_superset_of_changes(
        ops in prop::collection::vec(field_op_strategy(), 1..60)
    ) {
        let mut state = EntityState::new(SimId(1), StateFields::default());
        state.clear_dirty_bits();
        let mut expected = DirtyBits::NONE;

        for op in &ops {
            if let FieldOp::Clear = op {
                let cleared = state.clear_dirty_bits();
                prop_assert_eq!(cleared, expected);
                expected = DirtyBits::NONE;
            } else {
                expected |= apply(&mut state, op);
            }
            prop_assert!(state.dirty_bits().contains(expected));
        }

        // A delta replays every flagged field onto a stale replica.
        let mut replica = EntityState::new(SimId(1), StateFields::default());
        replica.clear_dirty_bits();
        let delta = state.delta();
        prop_assert!(replica.apply_delta(&delta));
        prop_assert_eq!(replica.dirty_bits(), state.dirty_bits());
        if expected.intersects(DirtyBits::LABEL) {
            prop_assert_eq!(replica.label(), state.label());
        }
        if expected.intersects(DirtyBits::TYPE) {
            prop_assert_eq!(replica.entity_type(), state.entity_type());
        }
    }

    #[test]
    fn rollback_leaves_bumped_entities_at_committed_positions(
        starts in prop::collection::vec(-20.0f32..20.0, 2..12),
        targets in prop::collection::vec(-20.0f32..20.0, 12),
    ) {
        let mut sim = Simulation::default();
        let mut ids = Vec::new();
        for (i, start) in starts.iter().enumerate() {
            let id = sim.reserve_new_id();
            let fields = StateFields::placed(Vec3::new(*start, 0.0, 0.0), Vec3::ZERO, Vec3::ONE)
                .with_type(1)
                .with_collision_mask(1);
            let mut entity = SimEntity::new(EntityState::new(id, fields), "prop");
            let mut scene = BoxSceneObject::new(Vec3::splat(0.5), 0);
            prop_assert!(scene.load_from_template(&entity.state()));
            entity.set_scene_object(Some(Box::new(scene)));
            let target = targets[i];
            entity.set_ai_object(Some(Box::new(ScriptedAi::new(move |state, _dt, ctx| {
                if ctx.tick() == 1 {
                    state.set_position(Vec3::new(target, 0.0, 0.0));
                }
            }))));
            sim.add_sim_entity(entity).unwrap();
            ids.push(id);
        }

        sim.process_tick(0.1);
        let report = sim.process_tick(0.1);

        for (a, b) in &report.collisions.pairs {
            prop_assert!(a < b);
            prop_assert!(report.collisions.contains(*a));
            prop_assert!(report.collisions.contains(*b));
        }
        for id in ids {
            let entity = sim.find(id).unwrap();
            let bumped = entity.state().bumped();
            prop_assert_eq!(bumped, report.collisions.contains(id));
            if bumped {
                let committed = entity.committed_position().unwrap();
                prop_assert_eq!(entity.state().position(), committed);
            }
        }
    }

    #[test]
    fn ticks_are_deterministic(
        starts in prop::collection::vec(-10.0f32..10.0, 1..8),
        step in -2.0f32..2.0,
    ) {
        let run = move || {
            let mut sim = Simulation::default();
            for start in &starts {
                let id = sim.reserve_new_id();
                let fields = StateFields::placed(Vec3::new(*start, 0.0, 0.0), Vec3::ZERO, Vec3::ONE)
                    .with_type(1)
                    .with_collision_mask(1);
                let mut entity = SimEntity::new(EntityState::new(id, fields), "walker");
                let mut scene = BoxSceneObject::new(Vec3::splat(0.5), 0);
                assert!(scene.load_from_template(&entity.state()));
                entity.set_scene_object(Some(Box::new(scene)));
                entity.set_ai_object(Some(Box::new(ScriptedAi::new(move |state, dt, _ctx| {
                    let next = state.position() + Vec3::new(step * dt, 0.0, 0.0);
                    state.set_position(next);
                }))));
                sim.add_sim_entity(entity).unwrap();
            }
            (0..10).map(|_| sim.process_tick(0.5).deltas).collect::<Vec<_>>()
        };
        prop_assert_eq!(run(), run());
    }
}
