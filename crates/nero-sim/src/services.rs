//! What a component can see and do while it ticks.
//!
//! Components never hold a reference to the [`Simulation`](crate::simulation::Simulation).
//! Instead each tick hands them a [`TickContext`]: the global service
//! switches, a read-only [`WorldView`] of the other entities, and a way to
//! request structural changes (spawn, remove) that the simulation applies at
//! its own safe points. Additions are admitted at the start of the next tick
//! and removals are flushed after collision resolution, so iteration over the
//! registry is never invalidated mid-tick.

use std::collections::BTreeSet;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::component::StateHandle;
use crate::entity::SimEntity;
use crate::id::{IdAllocator, SimId};
use crate::state::EntityState;
use crate::SimError;

// ---------------------------------------------------------------------------
// WorldServices
// ---------------------------------------------------------------------------

/// Global switches for the optional per-tick services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldServices {
    pub ai_enabled: bool,
    pub physics_enabled: bool,
    pub audio_enabled: bool,
}

impl Default for WorldServices {
    fn default() -> Self {
        Self {
            ai_enabled: true,
            physics_enabled: true,
            audio_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// WorldView
// ---------------------------------------------------------------------------

/// A read-only view of the live entities at the start of a tick's propose
/// phase. Entities admitted later in the tick are not part of it.
#[derive(Debug, Default, Clone)]
pub struct WorldView {
    /// Sorted by id.
    entries: Vec<(SimId, StateHandle)>,
}

impl WorldView {
    pub fn new(mut entries: Vec<(SimId, StateHandle)>) -> Self {
        entries.sort_by_key(|(id, _)| *id);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: SimId) -> bool {
        self.entries.binary_search_by_key(&id, |(id, _)| *id).is_ok()
    }

    pub fn ids(&self) -> impl Iterator<Item = SimId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// Read another entity's state.
    ///
    /// Returns `None` for unknown ids and for the entity currently being
    /// ticked, whose state is already borrowed.
    pub fn read<R>(&self, id: SimId, f: impl FnOnce(&EntityState) -> R) -> Option<R> {
        let index = self.entries.binary_search_by_key(&id, |(id, _)| *id).ok()?;
        self.entries[index].1.try_read(f)
    }

    /// Ids of readable entities whose type intersects `mask`.
    pub fn of_type(&self, mask: u32) -> Vec<SimId> {
        self.entries
            .iter()
            .filter(|(_, handle)| {
                handle
                    .try_read(|s| s.entity_type() & mask != 0)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// The readable entity of a type in `mask` closest to `from`, with its
    /// distance. Ties go to the lower id.
    pub fn nearest(&self, from: Vec3, mask: u32) -> Option<(SimId, f32)> {
        let mut best: Option<(SimId, f32)> = None;
        for (id, handle) in &self.entries {
            let Some(Some(distance)) = handle.try_read(|s| {
                (s.entity_type() & mask != 0).then(|| s.position().distance(from))
            }) else {
                continue;
            };
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((*id, distance));
            }
        }
        best
    }

    /// Readable entities of a type in `mask` within `radius` of `from`.
    pub fn within(&self, from: Vec3, radius: f32, mask: u32) -> Vec<SimId> {
        self.entries
            .iter()
            .filter(|(_, handle)| {
                handle
                    .try_read(|s| {
                        s.entity_type() & mask != 0 && s.position().distance(from) <= radius
                    })
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// PendingChanges
// ---------------------------------------------------------------------------

/// Structural changes queued for the simulation's next safe point.
#[derive(Debug, Default)]
pub struct PendingChanges {
    adds: Vec<SimEntity>,
    removals: BTreeSet<SimId>,
}

impl PendingChanges {
    pub fn push_add(&mut self, entity: SimEntity) {
        self.adds.push(entity);
    }

    pub fn request_removal(&mut self, id: SimId) -> bool {
        self.removals.insert(id)
    }

    pub fn is_removal_pending(&self, id: SimId) -> bool {
        self.removals.contains(&id)
    }

    pub fn is_add_pending(&self, id: SimId) -> bool {
        self.queued(id).is_some()
    }

    /// A queued entity that has not been admitted yet.
    pub fn queued(&self, id: SimId) -> Option<&SimEntity> {
        self.adds.iter().find(|e| e.id() == id)
    }

    pub fn add_count(&self) -> usize {
        self.adds.len()
    }

    pub fn removal_count(&self) -> usize {
        self.removals.len()
    }

    /// Pending removals, in id order.
    pub fn removals(&self) -> impl Iterator<Item = SimId> + '_ {
        self.removals.iter().copied()
    }

    pub(crate) fn take_adds(&mut self) -> Vec<SimEntity> {
        std::mem::take(&mut self.adds)
    }

    pub(crate) fn take_removals(&mut self) -> BTreeSet<SimId> {
        std::mem::take(&mut self.removals)
    }

    pub(crate) fn forget_removal(&mut self, id: SimId) -> bool {
        self.removals.remove(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.adds.clear();
        self.removals.clear();
    }
}

// ---------------------------------------------------------------------------
// TickContext
// ---------------------------------------------------------------------------

/// Everything a component may touch outside its own entity during a tick.
pub struct TickContext<'a> {
    services: &'a WorldServices,
    view: &'a WorldView,
    ids: &'a mut IdAllocator,
    pending: &'a mut PendingChanges,
    tick: u64,
}

impl<'a> TickContext<'a> {
    pub fn new(
        services: &'a WorldServices,
        view: &'a WorldView,
        ids: &'a mut IdAllocator,
        pending: &'a mut PendingChanges,
        tick: u64,
    ) -> Self {
        Self {
            services,
            view,
            ids,
            pending,
            tick,
        }
    }

    pub fn services(&self) -> &WorldServices {
        self.services
    }

    pub fn view(&self) -> &WorldView {
        self.view
    }

    /// The number of the tick in progress.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Reserve an id for an entity this component is about to spawn.
    pub fn reserve_new_id(&mut self) -> SimId {
        self.ids.reserve_new_id()
    }

    /// Queue an entity for admission at the start of the next tick.
    ///
    /// Fails, with a warning, for the invalid id and for any id already
    /// used by a live, queued or removed entity.
    pub fn add_entity(&mut self, entity: SimEntity) -> Result<SimId, SimError> {
        let id = entity.id();
        if let Err(err) = self.ids.claim(id) {
            tracing::warn!(%id, tick = self.tick, %err, "rejected spawn");
            return Err(err);
        }
        tracing::debug!(%id, tick = self.tick, "entity spawn queued");
        self.pending.push_add(entity);
        Ok(id)
    }

    /// Request removal of an entity. It is skipped for the rest of this tick
    /// and erased after collision resolution.
    pub fn remove(&mut self, id: SimId) -> bool {
        tracing::debug!(%id, tick = self.tick, "entity removal queued");
        self.pending.request_removal(id)
    }

    pub fn is_removal_pending(&self, id: SimId) -> bool {
        self.pending.is_removal_pending(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::SharedState;
    use crate::state::StateFields;

    fn shared(id: u32, x: f32, entity_type: u32) -> SharedState {
        SharedState::new(EntityState::new(
            SimId(id),
            StateFields::placed(Vec3::new(x, 0.0, 0.0), Vec3::ZERO, Vec3::ONE).with_type(entity_type),
        ))
    }

    #[test]
    fn view_filters_by_type_and_distance() {
        let a = shared(1, 0.0, 0b01);
        let b = shared(2, 5.0, 0b10);
        let c = shared(3, 2.0, 0b10);
        let view = WorldView::new(vec![
            (SimId(3), c.handle()),
            (SimId(1), a.handle()),
            (SimId(2), b.handle()),
        ]);

        assert_eq!(view.ids().collect::<Vec<_>>(), vec![SimId(1), SimId(2), SimId(3)]);
        assert_eq!(view.of_type(0b10), vec![SimId(2), SimId(3)]);
        assert_eq!(view.nearest(Vec3::ZERO, 0b10), Some((SimId(3), 2.0)));
        assert_eq!(view.within(Vec3::ZERO, 2.5, u32::MAX), vec![SimId(1), SimId(3)]);
    }

    #[test]
    fn view_skips_borrowed_entity() {
        let a = shared(1, 0.0, 1);
        let view = WorldView::new(vec![(SimId(1), a.handle())]);
        let _guard = a.borrow_mut();
        assert!(view.read(SimId(1), |s| s.id()).is_none());
        assert!(view.of_type(1).is_empty());
    }

    #[test]
    fn context_queues_removals_and_reserves_ids() {
        let services = WorldServices::default();
        let view = WorldView::default();
        let mut ids = IdAllocator::new();
        let mut pending = PendingChanges::default();
        {
            let mut ctx = TickContext::new(&services, &view, &mut ids, &mut pending, 4);
            assert_eq!(ctx.reserve_new_id(), SimId(1));
            assert!(ctx.remove(SimId(9)));
            assert!(!ctx.remove(SimId(9)));
            assert!(ctx.is_removal_pending(SimId(9)));
        }
        assert_eq!(pending.removals().collect::<Vec<_>>(), vec![SimId(9)]);
        assert_eq!(ids.peek_next_free_id(), SimId(2));
    }

    #[test]
    fn context_refuses_invalid_and_reused_ids() {
        let services = WorldServices::default();
        let view = WorldView::default();
        let mut ids = IdAllocator::new();
        let mut pending = PendingChanges::default();
        let mut ctx = TickContext::new(&services, &view, &mut ids, &mut pending, 0);

        let invalid = SimEntity::new(EntityState::new(SimId::INVALID, StateFields::default()), "x");
        assert_eq!(ctx.add_entity(invalid), Err(SimError::InvalidId));

        let id = ctx.reserve_new_id();
        let first = SimEntity::new(EntityState::new(id, StateFields::default()), "first");
        assert_eq!(ctx.add_entity(first), Ok(id));
        let again = SimEntity::new(EntityState::new(id, StateFields::default()), "again");
        assert_eq!(ctx.add_entity(again), Err(SimError::DuplicateId(id)));
        assert_eq!(pending.add_count(), 1);
    }
}
