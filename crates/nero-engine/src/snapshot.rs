//! Simulation snapshots with BLAKE3 hashing.
//!
//! A [`ContextSnapshot`] captures the state record of every live object,
//! sorted by id, together with the tick counter. Its BLAKE3 digest covers the
//! tick counter and each entity's id, fields and bump flag; dirty bits and
//! the previous-tick fields are bookkeeping and stay out of it. Equal digests
//! mean equal simulation state, which makes the digest a cheap determinism
//! check between two runs.
//!
//! # Usage
//!
//! ```
//! use glam::Vec3;
//! use nero_engine::config::SimConfig;
//! use nero_engine::context::{ObjectSpawn, SimContext};
//! use nero_engine::template::TemplateRegistry;
//!
//! let mut ctx = SimContext::new(&SimConfig::default(), TemplateRegistry::new());
//! let id = ctx.add_object("marker", ObjectSpawn::at(Vec3::ONE)).unwrap();
//! ctx.process_tick(0.5);
//!
//! let snapshot = ctx.capture_snapshot();
//! assert_eq!(snapshot.hash.len(), 64); // BLAKE3 hex digest
//!
//! ctx.set_object_position(id, Vec3::ZERO).unwrap();
//! ctx.restore_snapshot(&snapshot).unwrap();
//! assert_eq!(ctx.object_position(id), Some(Vec3::ONE));
//! ```
//!
//! # What Is NOT Captured
//!
//! - **Components**: AI brains, scene objects and their committed
//!   placement stay as they are. Restore only rewrites state records.
//! - **Membership**: objects are matched by id. Restore neither creates
//!   missing objects nor removes extra ones.
//! - **Queued changes**: pending adds and removals are left alone.

use serde::{Deserialize, Serialize};

use nero_sim::id::SimId;
use nero_sim::state::{EntityState, StateFields};

use crate::context::SimContext;

// ---------------------------------------------------------------------------
// ContextSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Number of completed ticks at capture time.
    pub tick_count: u64,
    /// State records of every live object, sorted by id.
    pub entities: Vec<EntityState>,
    /// BLAKE3 hex digest (64 lowercase hex chars) of the tick count and
    /// entity fields.
    pub hash: String,
}

impl ContextSnapshot {
    /// Serialize to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ContextSnapshot should always be JSON-serializable")
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether the recorded hash matches the snapshot's contents.
    pub fn verify(&self) -> bool {
        compute_hash(self.tick_count, &self.entities) == self.hash
    }
}

fn compute_hash(tick_count: u64, entities: &[EntityState]) -> String {
    #[derive(Serialize)]
    struct HashableEntity<'a> {
        id: SimId,
        fields: &'a StateFields,
        bumped: bool,
    }

    #[derive(Serialize)]
    struct HashableState<'a> {
        tick_count: u64,
        entities: Vec<HashableEntity<'a>>,
    }

    let entities = entities
        .iter()
        .map(|e| HashableEntity {
            id: e.id(),
            fields: e.fields(),
            bumped: e.bumped(),
        })
        .collect();
    let json_bytes = serde_json::to_vec(&HashableState {
        tick_count,
        entities,
    })
    .expect("simulation state should always be JSON-serializable");

    blake3::hash(&json_bytes).to_hex().to_string()
}

// ---------------------------------------------------------------------------
// SimContext snapshot/restore methods
// ---------------------------------------------------------------------------

impl SimContext {
    fn live_states(&self) -> Vec<EntityState> {
        self.simulation()
            .entities()
            .map(|e| e.state().clone())
            .collect()
    }

    pub fn capture_snapshot(&self) -> ContextSnapshot {
        let tick_count = self.simulation().tick_count();
        let entities = self.live_states();
        let hash = compute_hash(tick_count, &entities);
        ContextSnapshot {
            tick_count,
            entities,
            hash,
        }
    }

    /// The BLAKE3 digest a snapshot taken now would carry.
    pub fn state_hash(&self) -> String {
        compute_hash(self.simulation().tick_count(), &self.live_states())
    }

    /// Write a snapshot's state records back onto the live objects with
    /// matching ids, and restore the tick counter. Returns how many objects
    /// were restored.
    ///
    /// # Errors
    ///
    /// Fails without touching anything if the snapshot's hash does not
    /// match its contents.
    pub fn restore_snapshot(&mut self, snapshot: &ContextSnapshot) -> anyhow::Result<usize> {
        let expected = compute_hash(snapshot.tick_count, &snapshot.entities);
        if expected != snapshot.hash {
            return Err(anyhow::anyhow!(
                "snapshot hash mismatch: recorded {} but recomputed {}",
                snapshot.hash,
                expected
            ));
        }

        let mut restored = 0;
        let mut missing: Vec<SimId> = Vec::new();
        for saved in &snapshot.entities {
            let Some(entity) = self.simulation().find(saved.id()) else {
                missing.push(saved.id());
                continue;
            };
            let mut state = entity.state_mut();
            state.overwrite_fields(saved.fields().clone());
            state.set_bumped(saved.bumped());
            restored += 1;
        }
        if !missing.is_empty() {
            tracing::warn!(?missing, "snapshot objects not present in the simulation");
        }

        self.simulation_mut().set_tick_count(snapshot.tick_count);
        tracing::info!(restored, tick = snapshot.tick_count, "snapshot restored");
        Ok(restored)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
