//! The entity registry and the phased simulation tick.
//!
//! A [`Simulation`] owns every live [`SimEntity`], indexes them by id and by
//! type bit, and advances them one tick at a time. Each tick runs these
//! phases, in order:
//!
//! 1. **Admit**: entities added since the last tick join the registry. Adds
//!    are never visible to the tick that queued them.
//! 2. **Propose**: every live entity refreshes its previous-state snapshot
//!    and its components run (scene, then AI, physics and audio as their
//!    services allow). Components write candidate values into the shared
//!    state and may queue spawns and removals.
//! 3. **Detect**: colliding pairs are found among the candidate positions.
//! 4. **Resolve**: each colliding entity is rolled back to its committed
//!    position and flagged as bumped. Detection and resolution repeat while
//!    a rollback produces new overlaps, up to the configured settle passes.
//! 5. **Flush**: entities removed during the tick are erased.
//! 6. **ClearDirty**: per-entity deltas are published, the type index is
//!    refreshed for retyped entities, and every dirty bit is cleared.
//!
//! Iteration order is ascending [`SimId`] throughout, so the same initial
//! registry and the same inputs always produce the same tick.
//!
//! # Example
//!
//! ```
//! use nero_sim::prelude::*;
//! use glam::Vec3;
//!
//! let mut sim = Simulation::new(WorldServices::default());
//! let id = sim.reserve_new_id();
//! let state = EntityState::new(id, StateFields::default().with_type(1));
//! sim.add_sim_entity(SimEntity::new(state, "marker")).unwrap();
//!
//! assert!(sim.find(id).is_none()); // visible from the next tick
//! let report = sim.process_tick(0.1);
//! assert_eq!(report.admitted, vec![id]);
//! assert!(sim.find(id).is_some());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::collision::{CollisionDetector, CollisionReport, CollisionResolver, CollisionSelector};
use crate::entity::SimEntity;
use crate::id::{IdAllocator, RenderHandle, SimId};
use crate::services::{PendingChanges, TickContext, WorldServices, WorldView};
use crate::state::{DirtyBits, EntityDelta};
use crate::SimError;

/// Frame delay used until configured otherwise, in seconds.
pub const DEFAULT_FRAME_DELAY: f32 = 0.5;

/// Detect/resolve rounds per tick used until configured otherwise.
pub const DEFAULT_SETTLE_PASSES: u32 = 8;

// ---------------------------------------------------------------------------
// TickPhase
// ---------------------------------------------------------------------------

/// Where the simulation is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickPhase {
    Idle,
    Admit,
    Propose,
    Detect,
    Resolve,
    Flush,
    ClearDirty,
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TickPhase::Idle => "idle",
            TickPhase::Admit => "admit",
            TickPhase::Propose => "propose",
            TickPhase::Detect => "detect",
            TickPhase::Resolve => "resolve",
            TickPhase::Flush => "flush",
            TickPhase::ClearDirty => "clear-dirty",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

/// What happened during one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// The tick number (0-based).
    pub tick: u64,
    /// Entities admitted at the start of the tick.
    pub admitted: Vec<SimId>,
    /// Every colliding pair across all settle passes.
    pub collisions: CollisionReport,
    /// Entities erased during the flush.
    pub removed: Vec<SimId>,
    /// Changed fields of every entity that was dirty at the end of the tick.
    pub deltas: Vec<EntityDelta>,
    /// Wall-clock time spent in the tick.
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// TypeIndex
// ---------------------------------------------------------------------------

/// Entity ids bucketed by each set bit of their type.
#[derive(Debug)]
struct TypeIndex {
    buckets: Vec<BTreeSet<SimId>>,
    indexed: HashMap<SimId, u32>,
}

impl Default for TypeIndex {
    fn default() -> Self {
        Self {
            buckets: vec![BTreeSet::new(); u32::BITS as usize],
            indexed: HashMap::new(),
        }
    }
}

impl TypeIndex {
    fn bits(entity_type: u32) -> impl Iterator<Item = usize> {
        (0..u32::BITS as usize).filter(move |bit| entity_type & (1 << bit) != 0)
    }

    fn insert(&mut self, id: SimId, entity_type: u32) {
        self.remove(id);
        for bit in Self::bits(entity_type) {
            self.buckets[bit].insert(id);
        }
        self.indexed.insert(id, entity_type);
    }

    fn remove(&mut self, id: SimId) {
        if let Some(old) = self.indexed.remove(&id) {
            for bit in Self::bits(old) {
                self.buckets[bit].remove(&id);
            }
        }
    }

    /// Re-bucket `id` under `entity_type`. Returns whether anything moved.
    fn update(&mut self, id: SimId, entity_type: u32) -> bool {
        if self.indexed.get(&id) == Some(&entity_type) {
            return false;
        }
        self.insert(id, entity_type);
        true
    }

    fn query(&self, mask: u32) -> BTreeSet<SimId> {
        let mut ids = BTreeSet::new();
        for bit in Self::bits(mask) {
            ids.extend(self.buckets[bit].iter().copied());
        }
        ids
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// The registry of simulated entities and their tick scheduler.
pub struct Simulation {
    entities: BTreeMap<SimId, SimEntity>,
    type_index: TypeIndex,
    pending: PendingChanges,
    ids: IdAllocator,
    services: WorldServices,
    frame_delay: f32,
    settle_passes: u32,
    phase: TickPhase,
    tick_count: u64,
    /// Bumped whenever membership or typing changes. Selectors built at an
    /// older generation are rebuilt on next use.
    generation: u64,
    selectors: HashMap<u32, Rc<CollisionSelector>>,
}

impl Simulation {
    pub fn new(services: WorldServices) -> Self {
        Self {
            entities: BTreeMap::new(),
            type_index: TypeIndex::default(),
            pending: PendingChanges::default(),
            ids: IdAllocator::new(),
            services,
            frame_delay: DEFAULT_FRAME_DELAY,
            settle_passes: DEFAULT_SETTLE_PASSES,
            phase: TickPhase::Idle,
            tick_count: 0,
            generation: 0,
            selectors: HashMap::new(),
        }
    }

    // -- configuration ------------------------------------------------------

    pub fn services(&self) -> &WorldServices {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut WorldServices {
        &mut self.services
    }

    /// Seconds of wall time between two full ticks.
    pub fn frame_delay(&self) -> f32 {
        self.frame_delay
    }

    /// # Panics
    ///
    /// Panics if `delay` is negative or not finite.
    pub fn set_frame_delay(&mut self, delay: f32) {
        assert!(
            delay.is_finite() && delay >= 0.0,
            "frame delay must be finite and non-negative, got {delay}"
        );
        self.frame_delay = delay;
    }

    pub fn settle_passes(&self) -> u32 {
        self.settle_passes
    }

    /// Maximum detect/resolve rounds per tick. At least one round always runs.
    pub fn set_settle_passes(&mut self, passes: u32) {
        self.settle_passes = passes.max(1);
    }

    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Overwrite the tick counter, e.g. when restoring a snapshot.
    pub fn set_tick_count(&mut self, tick_count: u64) {
        self.tick_count = tick_count;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    // -- ids ----------------------------------------------------------------

    /// Reserve a fresh id. The id is consumed whether or not an entity is
    /// ever created with it.
    pub fn reserve_new_id(&mut self) -> SimId {
        self.ids.reserve_new_id()
    }

    /// The id the next reservation will return.
    pub fn next_free_id(&self) -> SimId {
        self.ids.peek_next_free_id()
    }

    // -- registry -----------------------------------------------------------

    /// Queue an entity for admission at the start of the next tick.
    pub fn add_sim_entity(&mut self, entity: SimEntity) -> Result<(), SimError> {
        let id = entity.id();
        if let Err(err) = self.ids.claim(id) {
            tracing::warn!(%id, %err, "rejected entity");
            return Err(err);
        }
        tracing::debug!(%id, template = entity.creation_template(), "entity queued");
        self.pending.push_add(entity);
        Ok(())
    }

    /// Mark an entity for removal. It stops ticking immediately and is
    /// erased during the next flush. Returns `false` for unknown ids.
    pub fn remove(&mut self, id: SimId) -> bool {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.mark_removed();
        } else if !self.pending.is_add_pending(id) {
            tracing::debug!(%id, "removal of unknown entity ignored");
            return false;
        }
        self.pending.request_removal(id);
        true
    }

    /// Drop every entity, pending change and cached selector. Ids already
    /// handed out stay consumed.
    pub fn clear(&mut self) {
        let count = self.entities.len();
        self.entities.clear();
        self.pending.clear();
        self.type_index = TypeIndex::default();
        self.selectors.clear();
        self.generation += 1;
        tracing::info!(count, "simulation cleared");
    }

    /// Look up a registered entity, including one marked for removal but
    /// not yet flushed.
    pub fn find(&self, id: SimId) -> Option<&SimEntity> {
        self.entities.get(&id)
    }

    /// Look up an entity queued for admission at the next tick.
    pub fn find_queued(&self, id: SimId) -> Option<&SimEntity> {
        self.pending.queued(id)
    }

    pub fn find_mut(&mut self, id: SimId) -> Option<&mut SimEntity> {
        self.entities.get_mut(&id)
    }

    /// Look up the entity a render backend node belongs to.
    pub fn find_by_render_id(&self, handle: RenderHandle) -> Option<&SimEntity> {
        let entity = self.entities.get(&handle.sim_id())?;
        (entity.render_handle() == Some(handle)).then_some(entity)
    }

    /// Live entities in id order, excluding those marked for removal.
    pub fn entities(&self) -> impl Iterator<Item = &SimEntity> + '_ {
        self.entities.values().filter(|e| !e.is_removed())
    }

    /// Ids of live entities whose type intersects `mask`, as of the last
    /// type index refresh.
    pub fn entities_of_type(&self, mask: u32) -> Vec<SimId> {
        self.type_index
            .query(mask)
            .into_iter()
            .filter(|id| self.entities.get(id).is_some_and(|e| !e.is_removed()))
            .collect()
    }

    /// Number of registered entities, including ones awaiting flush.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn pending_add_count(&self) -> usize {
        self.pending.add_count()
    }

    pub fn pending_removal_count(&self) -> usize {
        self.pending.removal_count()
    }

    // -- collision selectors ------------------------------------------------

    /// The cached selector for entities whose type intersects `types`,
    /// rebuilt if membership changed since it was built.
    pub fn collision_selector(&mut self, types: u32) -> Rc<CollisionSelector> {
        if let Some(selector) = self.selectors.get(&types) {
            if selector.generation() == self.generation {
                return Rc::clone(selector);
            }
        }
        let selector = Rc::new(CollisionSelector::build(
            types,
            self.generation,
            self.entities.values(),
        ));
        self.selectors.insert(types, Rc::clone(&selector));
        selector
    }

    /// Force every cached selector to rebuild on next use.
    pub fn invalidate_selectors(&mut self) {
        self.generation += 1;
    }

    // -- ticking ------------------------------------------------------------

    /// Run one full simulation tick of `dt` seconds.
    pub fn process_tick(&mut self, dt: f32) -> TickReport {
        let start = Instant::now();
        let mut report = TickReport {
            tick: self.tick_count,
            ..Default::default()
        };

        self.phase = TickPhase::Admit;
        report.admitted = self.admit_pending();

        self.phase = TickPhase::Propose;
        self.propose(dt);

        report.collisions = self.settle_collisions();

        self.phase = TickPhase::Flush;
        report.removed = self.flush_removals();

        self.phase = TickPhase::ClearDirty;
        report.deltas = self.clear_dirty();

        self.phase = TickPhase::Idle;
        self.tick_count += 1;
        report.duration = start.elapsed();

        tracing::trace!(
            tick = report.tick,
            admitted = report.admitted.len(),
            collisions = report.collisions.pairs.len(),
            removed = report.removed.len(),
            deltas = report.deltas.len(),
            "tick complete"
        );
        report
    }

    /// Re-pose every scene node `frac` of the way from the previous tick's
    /// state to the current one. Simulation state is not modified.
    pub fn process_animation_tick(&mut self, frac: f32) {
        for entity in self.entities.values_mut().filter(|e| !e.is_removed()) {
            entity.process_animation_tick(frac);
        }
    }

    /// Run collision detection and resolution on the current candidate
    /// positions, outside the regular tick.
    pub fn do_collisions(&mut self) -> CollisionReport {
        let report = self.settle_collisions();
        self.phase = TickPhase::Idle;
        report
    }

    fn admit_pending(&mut self) -> Vec<SimId> {
        let mut admitted = Vec::new();
        for entity in self.pending.take_adds() {
            let id = entity.id();
            if !id.is_valid() {
                tracing::warn!("dropping queued entity with the invalid id");
                continue;
            }
            if self.entities.contains_key(&id) {
                tracing::warn!(%id, "dropping queued entity with duplicate id");
                continue;
            }
            if self.pending.forget_removal(id) {
                tracing::debug!(%id, "entity removed before admission");
                continue;
            }
            self.type_index.insert(id, entity.entity_type());
            self.entities.insert(id, entity);
            admitted.push(id);
        }
        if !admitted.is_empty() {
            self.generation += 1;
        }
        self.mark_pending_removals();
        admitted
    }

    fn propose(&mut self, dt: f32) {
        let Self {
            entities,
            ids,
            pending,
            services,
            tick_count,
            ..
        } = self;

        let view = WorldView::new(
            entities
                .iter()
                .filter(|(_, e)| !e.is_removed())
                .map(|(id, e)| (*id, e.state_handle()))
                .collect(),
        );
        let order: Vec<SimId> = view.ids().collect();

        for id in order {
            let Some(entity) = entities.get_mut(&id) else {
                continue;
            };
            if pending.is_removal_pending(id) {
                entity.mark_removed();
                continue;
            }
            let mut ctx = TickContext::new(services, &view, ids, pending, *tick_count);
            entity.process_tick(dt, &mut ctx);
        }

        self.mark_pending_removals();
    }

    fn settle_collisions(&mut self) -> CollisionReport {
        for entity in self.entities.values() {
            entity.state_mut().set_bumped(false);
        }

        self.phase = TickPhase::Detect;
        let mut report = {
            let snapshot: Vec<&SimEntity> = self.entities.values().collect();
            CollisionDetector::detect(&snapshot)
        };
        if report.is_empty() {
            return report;
        }

        self.phase = TickPhase::Resolve;
        CollisionResolver::resolve(&report, self.entities.values_mut());
        let mut resolved = report.colliding.clone();

        for pass in 1..self.settle_passes {
            self.phase = TickPhase::Detect;
            let next = {
                let snapshot: Vec<&SimEntity> = self.entities.values().collect();
                CollisionDetector::detect_filtered(&snapshot, |a, b| {
                    !(resolved.contains(&a) && resolved.contains(&b))
                })
            };
            let fresh: Vec<SimId> = next.colliding.difference(&resolved).copied().collect();
            if fresh.is_empty() {
                break;
            }
            tracing::debug!(pass, fresh = fresh.len(), "rollback caused further collisions");

            self.phase = TickPhase::Resolve;
            CollisionResolver::resolve(&next, self.entities.values_mut());
            resolved.extend(fresh);
            report.merge(next);
        }
        report
    }

    fn flush_removals(&mut self) -> Vec<SimId> {
        let mut removed = Vec::new();
        for id in self.pending.take_removals() {
            if let Some(entity) = self.entities.remove(&id) {
                self.type_index.remove(id);
                tracing::debug!(%id, template = entity.creation_template(), "entity removed");
                removed.push(id);
            } else if self.pending.is_add_pending(id) {
                // Spawned and removed in the same tick; drop it at admission.
                self.pending.request_removal(id);
            }
        }
        if !removed.is_empty() {
            self.generation += 1;
        }
        removed
    }

    fn clear_dirty(&mut self) -> Vec<EntityDelta> {
        let mut deltas = Vec::new();
        let mut retyped = Vec::new();
        for (id, entity) in self.entities.iter_mut() {
            if entity.state().is_dirty(DirtyBits::TYPE) {
                retyped.push((*id, entity.entity_type()));
            }
            if let Some(delta) = entity.finish_tick() {
                deltas.push(delta);
            }
        }

        let mut moved = false;
        for (id, entity_type) in retyped {
            moved |= self.type_index.update(id, entity_type);
        }
        if moved {
            self.generation += 1;
        }
        deltas
    }

    fn mark_pending_removals(&mut self) {
        for id in self.pending.removals() {
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.mark_removed();
            }
        }
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(WorldServices::default())
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("entities", &self.entities.len())
            .field("pending_adds", &self.pending.add_count())
            .field("pending_removals", &self.pending.removal_count())
            .field("tick_count", &self.tick_count)
            .field("phase", &self.phase)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
