//! The facade scripts and UI use to drive a simulation.
//!
//! [`SimContext`] speaks purely in ids and state fields: create an object
//! from a template, read or write its placement, label and color, ask for
//! its bounding box, or pick entities along a ray. Geometry comes from the
//! entities' scene objects through the simulation's collision selectors.
//!
//! # Example
//!
//! ```
//! use glam::Vec3;
//! use nero_engine::context::{ObjectSpawn, SimContext};
//! use nero_engine::config::SimConfig;
//! use nero_engine::template::{ObjectTemplate, SceneTemplate, TemplateRegistry};
//!
//! let mut templates = TemplateRegistry::new();
//! templates.insert("crate", ObjectTemplate {
//!     scene: Some(SceneTemplate { half_extents: Vec3::splat(0.5), kind: 1, collision_mask: 1 }),
//!     ai: None,
//! });
//!
//! let mut ctx = SimContext::new(&SimConfig::default(), templates);
//! let id = ctx.add_object("crate", ObjectSpawn::at(Vec3::new(5.0, 0.0, 0.0)).with_type(1)).unwrap();
//! ctx.process_tick(0.5);
//!
//! let hit = ctx.find_in_ray(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 1).unwrap();
//! assert_eq!(hit.id, id);
//! assert_eq!(hit.point, Vec3::new(4.5, 0.0, 0.0));
//! ```

use glam::Vec3;

use nero_sim::collision::RayHit;
use nero_sim::entity::SimEntity;
use nero_sim::id::SimId;
use nero_sim::simulation::{Simulation, TickReport};
use nero_sim::spatial::{Aabb, Ray};
use nero_sim::state::{Color, EntityState, StateFields};
use nero_sim::SimError;

use crate::config::SimConfig;
use crate::template::TemplateRegistry;

// ---------------------------------------------------------------------------
// ObjectSpawn
// ---------------------------------------------------------------------------

/// Initial values for an object created with [`SimContext::add_object`].
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSpawn {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    pub label: String,
    pub entity_type: u32,
    pub collision_mask: u32,
}

impl Default for ObjectSpawn {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            label: String::new(),
            entity_type: 0,
            collision_mask: 0,
        }
    }
}

impl ObjectSpawn {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_type(mut self, entity_type: u32) -> Self {
        self.entity_type = entity_type;
        self
    }

    pub fn with_collision_mask(mut self, mask: u32) -> Self {
        self.collision_mask = mask;
        self
    }

    fn into_fields(self) -> StateFields {
        StateFields::placed(self.position, self.rotation, self.scale)
            .with_label(self.label)
            .with_type(self.entity_type)
            .with_collision_mask(self.collision_mask)
    }
}

// ---------------------------------------------------------------------------
// SimContext
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SimContext {
    sim: Simulation,
    templates: TemplateRegistry,
}

impl SimContext {
    pub fn new(config: &SimConfig, templates: TemplateRegistry) -> Self {
        let mut sim = Simulation::new(config.services());
        sim.set_frame_delay(config.frame_delay);
        sim.set_settle_passes(config.settle_passes);
        Self { sim, templates }
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn templates_mut(&mut self) -> &mut TemplateRegistry {
        &mut self.templates
    }

    // -- lifecycle ------------------------------------------------------------

    /// Create an object from a template. It joins the simulation at the
    /// start of the next tick, but its fields can be read and written at
    /// once.
    pub fn add_object(&mut self, template: &str, spawn: ObjectSpawn) -> Result<SimId, SimError> {
        if !self.templates.contains(template) {
            tracing::warn!(template, "creating object from unknown template");
        }
        let id = self.sim.reserve_new_id();
        let state = EntityState::new(id, spawn.into_fields());
        let entity = SimEntity::create(state, template, &self.templates);
        self.sim.add_sim_entity(entity)?;
        Ok(id)
    }

    /// Schedule an object for removal. Returns `false` for unknown ids.
    pub fn remove_object(&mut self, id: SimId) -> bool {
        let removed = self.sim.remove(id);
        if !removed {
            tracing::warn!(%id, "remove_object on unknown id");
        }
        removed
    }

    /// The id the next created object will get.
    pub fn next_free_id(&self) -> SimId {
        self.sim.next_free_id()
    }

    pub fn frame_delay(&self) -> f32 {
        self.sim.frame_delay()
    }

    /// # Panics
    ///
    /// Panics if `delay` is negative or not finite.
    pub fn set_frame_delay(&mut self, delay: f32) {
        self.sim.set_frame_delay(delay);
    }

    pub fn process_tick(&mut self, dt: f32) -> TickReport {
        self.sim.process_tick(dt)
    }

    pub fn process_animation_tick(&mut self, frac: f32) {
        self.sim.process_animation_tick(frac);
    }

    // -- field access -----------------------------------------------------------

    /// A registered or queued object.
    fn object(&self, id: SimId) -> Option<&SimEntity> {
        self.sim.find(id).or_else(|| self.sim.find_queued(id))
    }

    fn read<R>(&self, id: SimId, f: impl FnOnce(&EntityState) -> R) -> Option<R> {
        match self.object(id) {
            Some(entity) => Some(f(&entity.state())),
            None => {
                tracing::warn!(%id, "read of unknown object");
                None
            }
        }
    }

    fn write(&self, id: SimId, f: impl FnOnce(&mut EntityState)) -> Result<(), SimError> {
        let entity = self.object(id).ok_or_else(|| {
            tracing::warn!(%id, "write to unknown object");
            SimError::UnknownEntity(id)
        })?;
        f(&mut entity.state_mut());
        Ok(())
    }

    pub fn object_position(&self, id: SimId) -> Option<Vec3> {
        self.read(id, EntityState::position)
    }

    pub fn object_rotation(&self, id: SimId) -> Option<Vec3> {
        self.read(id, EntityState::rotation)
    }

    pub fn object_scale(&self, id: SimId) -> Option<Vec3> {
        self.read(id, EntityState::scale)
    }

    pub fn object_label(&self, id: SimId) -> Option<String> {
        self.read(id, |s| s.label().to_owned())
    }

    pub fn object_color(&self, id: SimId) -> Option<Color> {
        self.read(id, EntityState::color)
    }

    pub fn object_type(&self, id: SimId) -> Option<u32> {
        self.read(id, EntityState::entity_type)
    }

    pub fn set_object_position(&mut self, id: SimId, position: Vec3) -> Result<(), SimError> {
        self.write(id, |s| s.set_position(position))
    }

    pub fn set_object_rotation(&mut self, id: SimId, rotation: Vec3) -> Result<(), SimError> {
        self.write(id, |s| s.set_rotation(rotation))
    }

    pub fn set_object_scale(&mut self, id: SimId, scale: Vec3) -> Result<(), SimError> {
        self.write(id, |s| s.set_scale(scale))
    }

    pub fn set_object_label(&mut self, id: SimId, label: impl Into<String>) -> Result<(), SimError> {
        let label = label.into();
        self.write(id, |s| s.set_label(label))
    }

    pub fn set_object_color(&mut self, id: SimId, color: Color) -> Result<(), SimError> {
        self.write(id, |s| s.set_color(color))
    }

    /// Mark every field of the object dirty and let its next move bypass
    /// collision checks.
    pub fn update_object_immediately(&mut self, id: SimId) -> Result<(), SimError> {
        match self.sim.find_mut(id) {
            Some(entity) => {
                entity.update_immediately();
                Ok(())
            }
            None => {
                tracing::warn!(%id, "update_object_immediately on unknown id");
                Err(SimError::UnknownEntity(id))
            }
        }
    }

    // -- geometry -----------------------------------------------------------------

    /// The object's committed bounding box.
    pub fn object_bounds(&self, id: SimId) -> Option<Aabb> {
        let bounds = self.object(id)?.committed_footprint();
        if bounds.is_none() {
            tracing::debug!(%id, "object has no footprint");
        }
        bounds
    }

    pub fn object_bb_min_edge(&self, id: SimId) -> Option<Vec3> {
        self.object_bounds(id).map(|b| b.min)
    }

    pub fn object_bb_max_edge(&self, id: SimId) -> Option<Vec3> {
        self.object_bounds(id).map(|b| b.max)
    }

    /// The nearest object whose type intersects `types` along the segment
    /// from `origin` to `target`.
    pub fn find_in_ray(&mut self, origin: Vec3, target: Vec3, types: u32) -> Option<RayHit> {
        let ray = Ray::between(origin, target)?;
        let selector = self.sim.collision_selector(types);
        selector.cast_ray(&self.sim, &ray)
    }

    /// The id of the object under a pick ray, if any.
    pub fn entity_under_ray(&mut self, origin: Vec3, target: Vec3, types: u32) -> Option<SimId> {
        self.find_in_ray(origin, target, types).map(|hit| hit.id)
    }

    /// Objects whose type intersects `types` and whose committed bounds
    /// overlap `region`.
    pub fn objects_in_region(&mut self, region: &Aabb, types: u32) -> Vec<SimId> {
        let selector = self.sim.collision_selector(types);
        selector.overlapping(&self.sim, region)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{AiTemplate, ObjectTemplate, SceneTemplate};
    use nero_sim::component::ScriptedAi;

    fn context() -> SimContext {
        let mut templates = TemplateRegistry::new();
        templates.insert(
            "crate",
            ObjectTemplate {
                scene: Some(SceneTemplate {
                    half_extents: Vec3::splat(0.5),
                    kind: 1,
                    collision_mask: 1,
                }),
                ai: None,
            },
        );
        templates.insert("marker", ObjectTemplate::default());
        SimContext::new(&SimConfig::default(), templates)
    }

    // -- 1. Object fields -------------------------------------------------------

    #[test]
    fn fields_are_writable_before_admission() {
        let mut ctx = context();
        let id = ctx
            .add_object("marker", ObjectSpawn::at(Vec3::ONE).with_label("start"))
            .unwrap();
        assert_eq!(ctx.object_label(id).as_deref(), Some("start"));

        ctx.set_object_label(id, "renamed").unwrap();
        ctx.set_object_color(id, Color::rgba(1, 2, 3, 4)).unwrap();
        ctx.process_tick(0.5);

        assert_eq!(ctx.object_label(id).as_deref(), Some("renamed"));
        assert_eq!(ctx.object_color(id), Some(Color::rgba(1, 2, 3, 4)));
        assert_eq!(ctx.object_position(id), Some(Vec3::ONE));
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut ctx = context();
        assert_eq!(ctx.object_position(SimId(99)), None);
        assert_eq!(
            ctx.set_object_position(SimId(99), Vec3::ZERO),
            Err(SimError::UnknownEntity(SimId(99)))
        );
        assert!(!ctx.remove_object(SimId(99)));
        assert!(ctx.update_object_immediately(SimId(99)).is_err());
    }

    #[test]
    fn next_free_id_tracks_creation() {
        let mut ctx = context();
        let expected = ctx.next_free_id();
        let id = ctx.add_object("marker", ObjectSpawn::default()).unwrap();
        assert_eq!(id, expected);
        assert!(ctx.next_free_id() > id);
    }

    #[test]
    fn removed_object_disappears_after_tick() {
        let mut ctx = context();
        let id = ctx.add_object("crate", ObjectSpawn::default()).unwrap();
        ctx.process_tick(0.5);
        assert!(ctx.remove_object(id));
        assert!(ctx.object_position(id).is_some());
        ctx.process_tick(0.5);
        assert!(ctx.object_position(id).is_none());
    }

    // -- 2. Geometry ------------------------------------------------------------

    #[test]
    fn bounding_box_follows_scale() {
        let mut ctx = context();
        let id = ctx
            .add_object(
                "crate",
                ObjectSpawn::at(Vec3::new(1.0, 0.0, 0.0)).with_scale(Vec3::splat(2.0)),
            )
            .unwrap();
        ctx.process_tick(0.5);
        assert_eq!(ctx.object_bb_min_edge(id), Some(Vec3::new(0.0, -1.0, -1.0)));
        assert_eq!(ctx.object_bb_max_edge(id), Some(Vec3::new(2.0, 1.0, 1.0)));
    }

    #[test]
    fn marker_has_no_bounds() {
        let mut ctx = context();
        let id = ctx.add_object("marker", ObjectSpawn::default()).unwrap();
        ctx.process_tick(0.5);
        assert_eq!(ctx.object_bb_min_edge(id), None);
    }

    #[test]
    fn ray_picks_nearest_of_type() {
        let mut ctx = context();
        let near = ctx
            .add_object("crate", ObjectSpawn::at(Vec3::new(3.0, 0.0, 0.0)).with_type(0b01))
            .unwrap();
        let far = ctx
            .add_object("crate", ObjectSpawn::at(Vec3::new(6.0, 0.0, 0.0)).with_type(0b10))
            .unwrap();
        ctx.process_tick(0.5);

        let origin = Vec3::ZERO;
        let target = Vec3::new(10.0, 0.0, 0.0);
        assert_eq!(ctx.entity_under_ray(origin, target, 0b11), Some(near));
        assert_eq!(ctx.entity_under_ray(origin, target, 0b10), Some(far));
        assert_eq!(ctx.entity_under_ray(origin, target, 0b100), None);
        assert_eq!(ctx.entity_under_ray(origin, origin, 0b11), None);
    }

    #[test]
    fn region_query_uses_committed_bounds() {
        let mut ctx = context();
        let id = ctx
            .add_object("crate", ObjectSpawn::at(Vec3::ZERO).with_type(1))
            .unwrap();
        ctx.process_tick(0.5);
        let region = Aabb::new(Vec3::splat(0.2), Vec3::splat(2.0));
        assert_eq!(ctx.objects_in_region(&region, 1), vec![id]);
        let elsewhere = Aabb::new(Vec3::splat(5.0), Vec3::splat(6.0));
        assert!(ctx.objects_in_region(&elsewhere, 1).is_empty());
    }

    /// Two crates three units apart; the first dashes onto the second on
    /// tick 1. Returns the dasher's position after that tick.
    fn dash_into_neighbour(immediate: bool) -> Option<Vec3> {
        let mut ctx = context();
        ctx.templates_mut().register_ai("dash", |_| {
            Box::new(ScriptedAi::new(|state, _dt, tick| {
                if tick.tick() == 1 {
                    state.set_position(Vec3::new(2.9, 0.0, 0.0));
                }
            }))
        });
        let mut dasher = ctx.templates().get("crate").cloned().unwrap();
        dasher.ai = Some(AiTemplate::Named("dash".to_owned()));
        ctx.templates_mut().insert("dasher", dasher);

        let a = ctx
            .add_object("dasher", ObjectSpawn::at(Vec3::ZERO).with_type(1))
            .unwrap();
        ctx.add_object("crate", ObjectSpawn::at(Vec3::new(3.0, 0.0, 0.0)).with_type(1))
            .unwrap();
        ctx.process_tick(0.5);

        if immediate {
            ctx.update_object_immediately(a).unwrap();
        }
        ctx.process_tick(0.5);
        ctx.object_position(a)
    }

    #[test]
    fn proposed_overlap_is_rolled_back() {
        assert_eq!(dash_into_neighbour(false), Some(Vec3::ZERO));
    }

    #[test]
    fn update_immediately_keeps_proposed_overlap() {
        assert_eq!(dash_into_neighbour(true), Some(Vec3::new(2.9, 0.0, 0.0)));
    }
}
