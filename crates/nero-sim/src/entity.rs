//! The simulated entity: one state record plus optional capabilities.
//!
//! A [`SimEntity`] owns its [`EntityState`] and binds every attached
//! component to it, so the scene, AI, physics and audio components of one
//! entity all read and write the same record. Capabilities can be attached
//! explicitly with the `set_*` methods, or resolved from a template name
//! through a [`TemplateSource`] with [`SimEntity::create`].
//!
//! # Example
//!
//! ```
//! use nero_sim::prelude::*;
//! use glam::Vec3;
//!
//! let state = EntityState::new(SimId(1), StateFields::default().with_type(1));
//! let mut entity = SimEntity::new(state, "crate");
//! entity.set_scene_object(Some(Box::new(BoxSceneObject::new(Vec3::splat(0.5), 0))));
//!
//! assert!(entity.has_scene_object());
//! assert!(!entity.can_collide()); // collision mask is still zero
//! ```

use std::fmt;

use glam::Vec3;

use crate::component::{AiObject, AudioObject, PhysicsObject, SceneObject, SharedState, StateHandle};
use crate::id::{RenderHandle, SimId};
use crate::services::TickContext;
use crate::spatial::Aabb;
use crate::state::{DirtyBits, EntityDelta, EntityState};

// ---------------------------------------------------------------------------
// TemplateSource
// ---------------------------------------------------------------------------

/// A scene object produced from a template, with the collision mask the
/// template contributes.
pub struct SceneSpawn {
    pub object: Box<dyn SceneObject>,
    pub collision_mask: u32,
}

/// Produces capability components for a named template.
///
/// Every method defaults to "this template has no such capability".
pub trait TemplateSource {
    fn scene_object(&self, _template: &str, _initial: &EntityState) -> Option<SceneSpawn> {
        None
    }

    fn ai_object(&self, _template: &str, _initial: &EntityState) -> Option<Box<dyn AiObject>> {
        None
    }

    fn physics_object(
        &self,
        _template: &str,
        _initial: &EntityState,
    ) -> Option<Box<dyn PhysicsObject>> {
        None
    }

    fn audio_object(&self, _template: &str, _initial: &EntityState) -> Option<Box<dyn AudioObject>> {
        None
    }
}

/// A template source that provides nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTemplates;

impl TemplateSource for NoTemplates {}

// ---------------------------------------------------------------------------
// SimEntity
// ---------------------------------------------------------------------------

pub struct SimEntity {
    state: SharedState,
    scene: Option<Box<dyn SceneObject>>,
    ai: Option<Box<dyn AiObject>>,
    physics: Option<Box<dyn PhysicsObject>>,
    audio: Option<Box<dyn AudioObject>>,
    creation_template: String,
    removed: bool,
    /// Dirty bits cleared at the end of the last full tick. Drives
    /// animation interpolation between ticks.
    last_tick_changes: DirtyBits,
}

impl SimEntity {
    /// An entity with no capabilities.
    pub fn new(state: EntityState, creation_template: impl Into<String>) -> Self {
        Self {
            state: SharedState::new(state),
            scene: None,
            ai: None,
            physics: None,
            audio: None,
            creation_template: creation_template.into(),
            removed: false,
            last_tick_changes: DirtyBits::NONE,
        }
    }

    /// Build an entity and attach whatever capabilities `templates` provides
    /// for `template`.
    ///
    /// A component that refuses the initial state in
    /// [`load_from_template`](crate::component::Capability::load_from_template)
    /// is dropped. An accepted scene object ORs its template's collision mask
    /// into the entity's mask.
    pub fn create(initial: EntityState, template: &str, templates: &dyn TemplateSource) -> Self {
        let mut entity = Self::new(initial, template);

        let spawn = templates.scene_object(template, &entity.state.borrow());
        if let Some(SceneSpawn {
            mut object,
            collision_mask,
        }) = spawn
        {
            let accepted = object.load_from_template(&entity.state.borrow());
            if accepted {
                entity.set_scene_object(Some(object));
                let mut state = entity.state.borrow_mut();
                let mask = state.collision_mask() | collision_mask;
                state.set_collision_mask(mask);
            } else {
                tracing::warn!(id = %entity.id(), template, "scene object refused template");
            }
        }

        let ai = templates.ai_object(template, &entity.state.borrow());
        if let Some(mut ai) = ai {
            if ai.load_from_template(&entity.state.borrow()) {
                entity.set_ai_object(Some(ai));
            } else {
                tracing::warn!(id = %entity.id(), template, "ai object refused template");
            }
        }

        let physics = templates.physics_object(template, &entity.state.borrow());
        if let Some(mut physics) = physics {
            if physics.load_from_template(&entity.state.borrow()) {
                entity.set_physics_object(Some(physics));
            } else {
                tracing::warn!(id = %entity.id(), template, "physics object refused template");
            }
        }

        let audio = templates.audio_object(template, &entity.state.borrow());
        if let Some(mut audio) = audio {
            if audio.load_from_template(&entity.state.borrow()) {
                entity.set_audio_object(Some(audio));
            } else {
                tracing::warn!(id = %entity.id(), template, "audio object refused template");
            }
        }

        tracing::debug!(
            id = %entity.id(),
            template,
            scene = entity.has_scene_object(),
            ai = entity.has_ai_object(),
            physics = entity.has_physics_object(),
            audio = entity.has_audio_object(),
            "entity created"
        );
        entity
    }

    // -- identity and state -------------------------------------------------

    pub fn id(&self) -> SimId {
        self.state.borrow().id()
    }

    pub fn creation_template(&self) -> &str {
        &self.creation_template
    }

    /// Borrow the state record.
    ///
    /// # Panics
    ///
    /// Panics if a component is currently writing to it.
    pub fn state(&self) -> std::cell::Ref<'_, EntityState> {
        self.state.borrow()
    }

    /// Borrow the state record mutably.
    ///
    /// # Panics
    ///
    /// Panics if the state is already borrowed.
    pub fn state_mut(&self) -> std::cell::RefMut<'_, EntityState> {
        self.state.borrow_mut()
    }

    /// A weak handle to the state record.
    pub fn state_handle(&self) -> StateHandle {
        self.state.handle()
    }

    pub fn entity_type(&self) -> u32 {
        self.state.borrow().entity_type()
    }

    pub fn collision_mask(&self) -> u32 {
        self.state.borrow().collision_mask()
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub(crate) fn mark_removed(&mut self) {
        self.removed = true;
    }

    pub fn last_tick_changes(&self) -> DirtyBits {
        self.last_tick_changes
    }

    // -- capabilities -------------------------------------------------------

    pub fn set_scene_object(&mut self, scene: Option<Box<dyn SceneObject>>) {
        self.scene = scene.map(|mut s| {
            s.bind_state(self.state.handle());
            s
        });
    }

    pub fn set_ai_object(&mut self, ai: Option<Box<dyn AiObject>>) {
        self.ai = ai.map(|mut a| {
            a.bind_state(self.state.handle());
            a
        });
    }

    pub fn set_physics_object(&mut self, physics: Option<Box<dyn PhysicsObject>>) {
        self.physics = physics.map(|mut p| {
            p.bind_state(self.state.handle());
            p
        });
    }

    pub fn set_audio_object(&mut self, audio: Option<Box<dyn AudioObject>>) {
        self.audio = audio.map(|mut a| {
            a.bind_state(self.state.handle());
            a
        });
    }

    pub fn scene_object(&self) -> Option<&dyn SceneObject> {
        self.scene.as_deref()
    }

    pub fn scene_object_mut(&mut self) -> Option<&mut (dyn SceneObject + 'static)> {
        self.scene.as_deref_mut()
    }

    pub fn ai_object(&self) -> Option<&dyn AiObject> {
        self.ai.as_deref()
    }

    pub fn physics_object(&self) -> Option<&dyn PhysicsObject> {
        self.physics.as_deref()
    }

    pub fn audio_object(&self) -> Option<&dyn AudioObject> {
        self.audio.as_deref()
    }

    pub fn has_scene_object(&self) -> bool {
        self.scene.is_some()
    }

    pub fn has_ai_object(&self) -> bool {
        self.ai.is_some()
    }

    pub fn has_physics_object(&self) -> bool {
        self.physics.is_some()
    }

    pub fn has_audio_object(&self) -> bool {
        self.audio.is_some()
    }

    pub fn render_handle(&self) -> Option<RenderHandle> {
        self.scene.as_ref().and_then(|s| s.render_handle())
    }

    // -- ticking ------------------------------------------------------------

    /// Refresh the state's previous snapshot. Runs before any component
    /// proposes values for this tick.
    pub fn begin_tick(&mut self) {
        self.state.borrow_mut().process_tick();
    }

    /// Let the scene object commit the placement it currently shows.
    pub fn tick_scene(&mut self, dt: f32, ctx: &mut TickContext<'_>) {
        if let Some(scene) = self.scene.as_mut() {
            scene.process_tick(dt, ctx);
        }
    }

    pub fn tick_ai(&mut self, dt: f32, ctx: &mut TickContext<'_>) {
        if !ctx.services().ai_enabled {
            return;
        }
        if let Some(ai) = self.ai.as_mut() {
            ai.process_tick(dt, ctx);
        }
    }

    pub fn tick_physics(&mut self, dt: f32, ctx: &mut TickContext<'_>) {
        if !ctx.services().physics_enabled {
            return;
        }
        if let Some(physics) = self.physics.as_mut() {
            physics.process_tick(dt, ctx);
        }
    }

    pub fn tick_audio(&mut self, dt: f32, ctx: &mut TickContext<'_>) {
        if !ctx.services().audio_enabled {
            return;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.process_tick(dt, ctx);
        }
    }

    /// Run every proposal stage for this entity, in order: state
    /// bookkeeping, scene, AI, physics, audio.
    pub fn process_tick(&mut self, dt: f32, ctx: &mut TickContext<'_>) {
        self.begin_tick();
        self.tick_scene(dt, ctx);
        self.tick_ai(dt, ctx);
        self.tick_physics(dt, ctx);
        self.tick_audio(dt, ctx);
    }

    /// Pose the scene node between the last two ticks. Only fields that
    /// changed during the last tick are interpolated; simulation state is
    /// left untouched.
    pub fn process_animation_tick(&mut self, frac: f32) {
        let Some(scene) = self.scene.as_mut() else {
            return;
        };
        let changes = self.last_tick_changes;
        if !changes.intersects(DirtyBits::POSITION | DirtyBits::ROTATION) {
            return;
        }
        let state = self.state.borrow();
        let position = if changes.intersects(DirtyBits::POSITION) {
            state.interpolated_position(frac)
        } else {
            scene.visual_position()
        };
        let rotation = if changes.intersects(DirtyBits::ROTATION) {
            state.interpolated_rotation(frac)
        } else {
            scene.visual_rotation()
        };
        scene.set_visual_pose(position, rotation);
    }

    /// End-of-tick bookkeeping: publish the delta for any dirty fields,
    /// remember them for interpolation, clear the bits and lift a pending
    /// collision override.
    pub fn finish_tick(&mut self) -> Option<EntityDelta> {
        let mut state = self.state.borrow_mut();
        let delta = (!state.dirty_bits().is_empty()).then(|| state.delta());
        self.last_tick_changes = state.clear_dirty_bits();
        drop(state);
        if let Some(scene) = self.scene.as_mut() {
            scene.resume_collisions();
        }
        delta
    }

    // -- collision ----------------------------------------------------------

    /// Whether this entity takes part in collision detection at all.
    pub fn can_collide(&self) -> bool {
        self.collision_mask() != 0
    }

    /// Whether a collision override is active this tick.
    pub fn collisions_disregarded(&self) -> bool {
        self.scene
            .as_ref()
            .is_some_and(|s| s.collisions_disregarded())
    }

    /// Footprint at `position`, from the scene object or, failing that, the
    /// physics body.
    pub fn footprint_at(&self, position: Vec3) -> Option<Aabb> {
        if let Some(scene) = &self.scene {
            return scene.footprint_at(position);
        }
        self.physics.as_ref().and_then(|p| p.footprint_at(position))
    }

    /// Footprint at the candidate position currently in the state.
    pub fn candidate_footprint(&self) -> Option<Aabb> {
        let position = self.state.borrow().position();
        self.footprint_at(position)
    }

    /// The last position the scene (or physics body) accepted.
    pub fn committed_position(&self) -> Option<Vec3> {
        if let Some(scene) = &self.scene {
            return Some(scene.committed_position());
        }
        self.physics.as_ref().and_then(|p| p.committed_position())
    }

    /// Footprint at the committed position.
    pub fn committed_footprint(&self) -> Option<Aabb> {
        self.committed_position().and_then(|p| self.footprint_at(p))
    }

    /// Whether this entity, at its candidate position, overlaps `other` and
    /// `other`'s type is in this entity's collision mask.
    pub fn collides_with(&self, other: &SimEntity) -> bool {
        if std::ptr::eq(self, other) || self.id() == other.id() {
            return false;
        }
        if self.collision_mask() & other.entity_type() == 0 {
            return false;
        }
        match (self.candidate_footprint(), other.candidate_footprint()) {
            (Some(mine), Some(theirs)) => mine.overlaps(&theirs),
            _ => false,
        }
    }

    /// Whether this entity collides with any of `others`.
    pub fn is_colliding(&self, others: &[&SimEntity]) -> bool {
        others.iter().any(|other| self.collides_with(other))
    }

    /// The ids of every entity in `others` this entity collides with.
    pub fn get_collisions(&self, others: &[&SimEntity]) -> Vec<SimId> {
        others
            .iter()
            .filter(|other| self.collides_with(other))
            .map(|other| other.id())
            .collect()
    }

    /// Roll the position back to the committed placement and flag the bump.
    pub fn resolve_collision(&mut self) {
        let committed = self.committed_position();
        let mut state = self.state.borrow_mut();
        if let Some(position) = committed {
            state.set_position(position);
        }
        state.set_bumped(true);
    }

    /// Mark every field dirty and let this tick's proposal bypass collision
    /// checks.
    pub fn update_immediately(&mut self) {
        self.state.borrow_mut().set_all_dirty_bits();
        if let Some(scene) = self.scene.as_mut() {
            scene.disregard_collisions();
        }
    }
}

impl fmt::Debug for SimEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEntity")
            .field("id", &self.id())
            .field("template", &self.creation_template)
            .field("scene", &self.scene.is_some())
            .field("ai", &self.ai.is_some())
            .field("physics", &self.physics.is_some())
            .field("audio", &self.audio.is_some())
            .field("removed", &self.removed)
            .finish()
    }
}

impl fmt::Display for SimEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state.borrow())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
