//! Capability components and the shared state they observe.
//!
//! A [`SimEntity`](crate::entity::SimEntity) aggregates up to four optional
//! capability components: a render representation ([`SceneObject`]), a
//! decision maker ([`AiObject`]), a physics body ([`PhysicsObject`]) and an
//! audio emitter ([`AudioObject`]). Each of them is bound to the entity's one
//! [`EntityState`] through a [`StateHandle`], so every component reads and
//! writes the same record instead of a copy.
//!
//! The entity owns the record through [`SharedState`]; components only hold
//! weak handles. Once the entity is dropped, their handles go dead and every
//! access through them is a no-op.
//!
//! Two reference components ship with the core: [`BoxSceneObject`], an
//! axis-aligned box footprint that commits the entity's placement on every
//! scene tick, and [`ScriptedAi`], which runs a closure as the AI decision.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use glam::Vec3;

use crate::id::RenderHandle;
use crate::services::TickContext;
use crate::spatial::Aabb;
use crate::state::EntityState;

// ---------------------------------------------------------------------------
// SharedState / StateHandle
// ---------------------------------------------------------------------------

/// Owning handle to an entity's state record.
#[derive(Debug)]
pub struct SharedState(Rc<RefCell<EntityState>>);

impl SharedState {
    pub fn new(state: EntityState) -> Self {
        Self(Rc::new(RefCell::new(state)))
    }

    /// A non-owning handle for a component to bind to.
    pub fn handle(&self) -> StateHandle {
        StateHandle(Rc::downgrade(&self.0))
    }

    /// # Panics
    ///
    /// Panics if a component currently holds a write borrow.
    pub fn borrow(&self) -> Ref<'_, EntityState> {
        self.0.borrow()
    }

    /// # Panics
    ///
    /// Panics if the state is already borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, EntityState> {
        self.0.borrow_mut()
    }
}

/// Non-owning handle through which a component reaches its entity's state.
#[derive(Clone, Default)]
pub struct StateHandle(Weak<RefCell<EntityState>>);

impl StateHandle {
    /// A handle bound to nothing.
    pub fn unbound() -> Self {
        Self(Weak::new())
    }

    /// Whether the owning entity is still alive.
    pub fn is_bound(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Run `f` against the state. Returns `None` if the entity is gone.
    ///
    /// # Panics
    ///
    /// Panics if the state is currently borrowed for writing.
    pub fn read<R>(&self, f: impl FnOnce(&EntityState) -> R) -> Option<R> {
        let cell = self.0.upgrade()?;
        let state = cell.borrow();
        Some(f(&state))
    }

    /// Like [`read`](Self::read), but also returns `None` instead of
    /// panicking when the state is borrowed for writing.
    pub fn try_read<R>(&self, f: impl FnOnce(&EntityState) -> R) -> Option<R> {
        let cell = self.0.upgrade()?;
        let state = cell.try_borrow().ok()?;
        Some(f(&state))
    }

    /// Run `f` against the state mutably. Returns `None` if the entity is gone.
    ///
    /// # Panics
    ///
    /// Panics if the state is already borrowed.
    pub fn write<R>(&self, f: impl FnOnce(&mut EntityState) -> R) -> Option<R> {
        let cell = self.0.upgrade()?;
        let mut state = cell.borrow_mut();
        Some(f(&mut state))
    }
}

impl fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.try_read(|s| s.id());
        f.debug_tuple("StateHandle").field(&id).finish()
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Behaviour shared by every capability kind.
pub trait Capability {
    /// Configure the component from the entity's initial state. Returning
    /// `false` means the component cannot serve this entity and must not be
    /// attached.
    fn load_from_template(&mut self, _initial: &EntityState) -> bool {
        true
    }

    /// Bind the component to its entity's state record.
    fn bind_state(&mut self, state: StateHandle);

    /// Advance the component by `dt` seconds.
    fn process_tick(&mut self, dt: f32, ctx: &mut TickContext<'_>);
}

/// Render representation: the visual pose and the committed placement the
/// backend actually shows.
///
/// The committed position is the last placement the scene accepted. It is
/// what a collision rolls an entity back to.
pub trait SceneObject: Capability {
    /// The handle the render backend knows this node by.
    fn render_handle(&self) -> Option<RenderHandle> {
        None
    }

    /// Footprint of this object if it stood at `position`.
    fn footprint_at(&self, position: Vec3) -> Option<Aabb>;

    fn committed_position(&self) -> Vec3;
    fn committed_rotation(&self) -> Vec3;
    fn committed_scale(&self) -> Vec3;

    /// Footprint at the committed position.
    fn committed_footprint(&self) -> Option<Aabb> {
        self.footprint_at(self.committed_position())
    }

    /// Pose the visual node without touching simulation state.
    fn set_visual_pose(&mut self, position: Vec3, rotation: Vec3);
    fn visual_position(&self) -> Vec3;
    fn visual_rotation(&self) -> Vec3;

    /// Ignore collision constraints until [`resume_collisions`](Self::resume_collisions).
    fn disregard_collisions(&mut self);
    fn resume_collisions(&mut self);
    fn collisions_disregarded(&self) -> bool;
}

/// Decision maker. Writes proposed state during the AI phase.
pub trait AiObject: Capability {}

/// Physics body. May provide a footprint when the entity has no scene object.
pub trait PhysicsObject: Capability {
    fn footprint_at(&self, _position: Vec3) -> Option<Aabb> {
        None
    }

    fn committed_position(&self) -> Option<Vec3> {
        None
    }
}

/// Audio emitter.
pub trait AudioObject: Capability {}

// ---------------------------------------------------------------------------
// BoxSceneObject
// ---------------------------------------------------------------------------

/// A scene object whose footprint is an axis-aligned box.
///
/// On every scene tick it commits the entity's current position, rotation
/// and scale. The footprint's half extents are multiplied by the committed
/// scale.
#[derive(Debug)]
pub struct BoxSceneObject {
    state: StateHandle,
    half_extents: Vec3,
    kind: u32,
    handle: Option<RenderHandle>,
    committed_position: Vec3,
    committed_rotation: Vec3,
    committed_scale: Vec3,
    visual_position: Vec3,
    visual_rotation: Vec3,
    disregard: bool,
}

impl BoxSceneObject {
    /// A box with the given unscaled half extents and render node kind.
    pub fn new(half_extents: Vec3, kind: u32) -> Self {
        Self {
            state: StateHandle::unbound(),
            half_extents: half_extents.abs(),
            kind,
            handle: None,
            committed_position: Vec3::ZERO,
            committed_rotation: Vec3::ZERO,
            committed_scale: Vec3::ONE,
            visual_position: Vec3::ZERO,
            visual_rotation: Vec3::ZERO,
            disregard: false,
        }
    }

    pub fn half_extents(&self) -> Vec3 {
        self.half_extents
    }

    fn commit(&mut self, state: &EntityState) {
        self.committed_position = state.position();
        self.committed_rotation = state.rotation();
        self.committed_scale = state.scale();
        self.visual_position = self.committed_position;
        self.visual_rotation = self.committed_rotation;
    }
}

impl Capability for BoxSceneObject {
    fn load_from_template(&mut self, initial: &EntityState) -> bool {
        if !self.half_extents.is_finite() {
            return false;
        }
        self.handle = RenderHandle::encode(initial.id(), self.kind);
        if self.handle.is_none() {
            tracing::warn!(
                id = %initial.id(),
                "entity id too large for a render handle, it cannot be picked by render id"
            );
        }
        self.commit(initial);
        true
    }

    fn bind_state(&mut self, state: StateHandle) {
        self.state = state;
    }

    fn process_tick(&mut self, _dt: f32, _ctx: &mut TickContext<'_>) {
        debug_assert!(self.state.is_bound(), "scene object ticked while unbound");
        let state = self.state.clone();
        state.read(|s| self.commit(s));
    }
}

impl SceneObject for BoxSceneObject {
    fn render_handle(&self) -> Option<RenderHandle> {
        self.handle
    }

    fn footprint_at(&self, position: Vec3) -> Option<Aabb> {
        Some(Aabb::from_center_half_extents(
            position,
            self.half_extents * self.committed_scale.abs(),
        ))
    }

    fn committed_position(&self) -> Vec3 {
        self.committed_position
    }

    fn committed_rotation(&self) -> Vec3 {
        self.committed_rotation
    }

    fn committed_scale(&self) -> Vec3 {
        self.committed_scale
    }

    fn set_visual_pose(&mut self, position: Vec3, rotation: Vec3) {
        self.visual_position = position;
        self.visual_rotation = rotation;
    }

    fn visual_position(&self) -> Vec3 {
        self.visual_position
    }

    fn visual_rotation(&self) -> Vec3 {
        self.visual_rotation
    }

    fn disregard_collisions(&mut self) {
        self.disregard = true;
    }

    fn resume_collisions(&mut self) {
        self.disregard = false;
    }

    fn collisions_disregarded(&self) -> bool {
        self.disregard
    }
}

// ---------------------------------------------------------------------------
// ScriptedAi
// ---------------------------------------------------------------------------

/// The decision function of a [`ScriptedAi`].
///
/// The entity's own state is write-borrowed while the brain runs, so reads
/// of it through the tick context's world view come back empty.
pub type Brain = Box<dyn FnMut(&mut EntityState, f32, &mut TickContext<'_>)>;

/// An AI component that runs a closure each AI tick.
pub struct ScriptedAi {
    state: StateHandle,
    brain: Brain,
}

impl ScriptedAi {
    pub fn new(brain: impl FnMut(&mut EntityState, f32, &mut TickContext<'_>) + 'static) -> Self {
        Self {
            state: StateHandle::unbound(),
            brain: Box::new(brain),
        }
    }
}

impl fmt::Debug for ScriptedAi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedAi")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Capability for ScriptedAi {
    fn bind_state(&mut self, state: StateHandle) {
        self.state = state;
    }

    fn process_tick(&mut self, dt: f32, ctx: &mut TickContext<'_>) {
        let state = self.state.clone();
        let brain = &mut self.brain;
        if state.write(|s| brain(s, dt, ctx)).is_none() {
            tracing::trace!("scripted ai ticked without a bound entity");
        }
    }
}

impl AiObject for ScriptedAi {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SimId;
    use crate::state::StateFields;

    #[test]
    fn handle_goes_dead_with_owner() {
        let shared = SharedState::new(EntityState::new(SimId(3), StateFields::default()));
        let handle = shared.handle();
        assert!(handle.is_bound());
        assert_eq!(handle.read(|s| s.id()), Some(SimId(3)));
        drop(shared);
        assert!(!handle.is_bound());
        assert_eq!(handle.read(|s| s.id()), None);
        assert_eq!(handle.write(|s| s.set_label("x")), None);
    }

    #[test]
    fn writes_through_handle_are_visible_to_owner() {
        let shared = SharedState::new(EntityState::new(SimId(1), StateFields::default()));
        let handle = shared.handle();
        handle.write(|s| s.set_position(Vec3::new(2.0, 0.0, 0.0)));
        assert_eq!(shared.borrow().position(), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn try_read_skips_borrowed_state() {
        let shared = SharedState::new(EntityState::new(SimId(1), StateFields::default()));
        let handle = shared.handle();
        let _guard = shared.borrow_mut();
        assert_eq!(handle.try_read(|s| s.id()), None);
    }

    #[test]
    fn box_footprint_scales_with_committed_scale() {
        let state = EntityState::new(
            SimId(9),
            StateFields::placed(Vec3::ZERO, Vec3::ZERO, Vec3::splat(2.0)),
        );
        let mut scene = BoxSceneObject::new(Vec3::splat(0.5), 1);
        assert!(scene.load_from_template(&state));
        let footprint = scene.footprint_at(Vec3::new(10.0, 0.0, 0.0)).unwrap();
        assert_eq!(footprint.min, Vec3::new(9.0, -1.0, -1.0));
        assert_eq!(footprint.max, Vec3::new(11.0, 1.0, 1.0));
        assert_eq!(scene.render_handle().unwrap().sim_id(), SimId(9));
    }

    #[test]
    fn oversized_id_loads_without_render_handle() {
        let state = EntityState::new(SimId(1 << 30), StateFields::default());
        let mut scene = BoxSceneObject::new(Vec3::splat(0.5), 1);
        assert!(scene.load_from_template(&state));
        assert_eq!(scene.render_handle(), None);
        assert!(scene.footprint_at(Vec3::ZERO).is_some());
    }

    #[test]
    fn box_with_non_finite_extents_refuses_template() {
        let state = EntityState::new(SimId(1), StateFields::default());
        let mut scene = BoxSceneObject::new(Vec3::new(f32::NAN, 1.0, 1.0), 0);
        assert!(!scene.load_from_template(&state));
    }

    #[test]
    fn disregard_flag_toggles() {
        let mut scene = BoxSceneObject::new(Vec3::ONE, 0);
        assert!(!scene.collisions_disregarded());
        scene.disregard_collisions();
        assert!(scene.collisions_disregarded());
        scene.resume_collisions();
        assert!(!scene.collisions_disregarded());
    }
}
