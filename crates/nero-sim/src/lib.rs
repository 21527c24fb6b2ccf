//! Nero Sim -- the simulation core of an agent-training world.
//!
//! Every simulated object is a [`SimEntity`](entity::SimEntity): one
//! dirty-bit-tracked [`EntityState`](state::EntityState) shared by up to four
//! optional capability components (scene, AI, physics, audio). The
//! [`Simulation`](simulation::Simulation) registry owns the entities and
//! advances them in fixed phases: admit queued entities, let components
//! propose new state, detect and roll back collisions, flush removals, and
//! publish and clear the dirty bits.
//!
//! # Quick Start
//!
//! ```
//! use nero_sim::prelude::*;
//! use glam::Vec3;
//!
//! let mut sim = Simulation::new(WorldServices::default());
//!
//! let id = sim.reserve_new_id();
//! let fields = StateFields::placed(Vec3::ZERO, Vec3::ZERO, Vec3::ONE).with_type(1);
//! let mut entity = SimEntity::new(EntityState::new(id, fields), "walker");
//! entity.set_ai_object(Some(Box::new(ScriptedAi::new(|state, dt, _ctx| {
//!     let step = state.position() + Vec3::X * dt;
//!     state.set_position(step);
//! }))));
//! sim.add_sim_entity(entity).unwrap();
//!
//! sim.process_tick(1.0);
//! assert_eq!(sim.find(id).unwrap().state().position(), Vec3::X);
//! ```

#![deny(unsafe_code)]

pub mod collision;
pub mod component;
pub mod entity;
pub mod id;
pub mod services;
pub mod simulation;
pub mod spatial;
pub mod state;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    /// The id was already used by another entity, live or removed.
    #[error("entity id {0} is already in use")]
    DuplicateId(id::SimId),

    /// No live entity has this id.
    #[error("no entity with id {0}")]
    UnknownEntity(id::SimId),

    /// The reserved "invalid" id was used for an entity.
    #[error("entity id 0 is reserved and cannot be registered")]
    InvalidId,
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::collision::{
        CollisionDetector, CollisionReport, CollisionResolver, CollisionSelector, RayHit,
    };
    pub use crate::component::{
        AiObject, AudioObject, BoxSceneObject, Capability, PhysicsObject, SceneObject,
        ScriptedAi, SharedState, StateHandle,
    };
    pub use crate::entity::{NoTemplates, SceneSpawn, SimEntity, TemplateSource};
    pub use crate::id::{IdAllocator, RenderHandle, SimId};
    pub use crate::services::{PendingChanges, TickContext, WorldServices, WorldView};
    pub use crate::simulation::{Simulation, TickPhase, TickReport};
    pub use crate::spatial::{Aabb, Ray};
    pub use crate::state::{Color, DirtyBits, EntityDelta, EntityState, StateFields};
    pub use crate::SimError;
}
