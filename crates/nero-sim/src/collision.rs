//! Collision detection, resolution, and cached collision selectors.
//!
//! Detection works on candidate positions: the positions every component
//! proposed during the current tick. Two entities collide when their
//! footprints at those positions overlap and at least one of them has the
//! other's type in its collision mask. Both members of a colliding pair are
//! reported, so the outcome never depends on which side ran the test.
//!
//! Resolution rolls each reported entity back to the position its scene
//! object last committed and sets its `bumped` flag. Rolling back twice is
//! the same as rolling back once.
//!
//! A [`CollisionSelector`] is a cached set of entities filtered by type, used
//! for picking and region queries against committed footprints.

use std::collections::BTreeSet;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::entity::SimEntity;
use crate::id::SimId;
use crate::simulation::Simulation;
use crate::spatial::{Aabb, Ray};

// ---------------------------------------------------------------------------
// CollisionReport
// ---------------------------------------------------------------------------

/// The outcome of one detection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionReport {
    /// Colliding pairs, lower id first, in detection order.
    pub pairs: Vec<(SimId, SimId)>,
    /// Every entity that is a member of at least one pair.
    pub colliding: BTreeSet<SimId>,
}

impl CollisionReport {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn contains(&self, id: SimId) -> bool {
        self.colliding.contains(&id)
    }

    /// Fold another pass into this report, skipping pairs already present.
    pub fn merge(&mut self, other: CollisionReport) {
        for pair in other.pairs {
            if !self.pairs.contains(&pair) {
                self.pairs.push(pair);
            }
        }
        self.colliding.extend(other.colliding);
    }
}

// ---------------------------------------------------------------------------
// CollisionDetector
// ---------------------------------------------------------------------------

struct Candidate {
    id: SimId,
    entity_type: u32,
    mask: u32,
    footprint: Aabb,
}

/// Pairwise footprint overlap over a stable snapshot of candidate positions.
pub struct CollisionDetector;

impl CollisionDetector {
    /// Whether `entity` takes part in detection this tick.
    ///
    /// Removed entities, entities with an empty collision mask, entities
    /// under a collision override, and entities without a solid footprint
    /// are left out.
    pub fn is_eligible(entity: &SimEntity) -> bool {
        !entity.is_removed()
            && entity.can_collide()
            && !entity.collisions_disregarded()
            && entity
                .candidate_footprint()
                .is_some_and(|b| !b.is_degenerate())
    }

    /// Detect every colliding pair among `entities`.
    pub fn detect(entities: &[&SimEntity]) -> CollisionReport {
        Self::detect_filtered(entities, |_, _| true)
    }

    /// Like [`detect`](Self::detect), but only pairs for which `consider`
    /// returns true are tested.
    pub fn detect_filtered(
        entities: &[&SimEntity],
        consider: impl Fn(SimId, SimId) -> bool,
    ) -> CollisionReport {
        let mut candidates: Vec<Candidate> = entities
            .iter()
            .filter(|e| Self::is_eligible(e))
            .filter_map(|e| {
                let state = e.state();
                let footprint = e.footprint_at(state.position())?;
                Some(Candidate {
                    id: state.id(),
                    entity_type: state.entity_type(),
                    mask: state.collision_mask(),
                    footprint,
                })
            })
            .collect();
        candidates.sort_by_key(|c| c.id);

        let mut report = CollisionReport::default();
        for (i, a) in candidates.iter().enumerate() {
            for b in &candidates[i + 1..] {
                if a.id == b.id {
                    continue;
                }
                let masked = a.mask & b.entity_type != 0 || b.mask & a.entity_type != 0;
                if !masked || !consider(a.id, b.id) {
                    continue;
                }
                if a.footprint.overlaps(&b.footprint) {
                    report.pairs.push((a.id, b.id));
                    report.colliding.insert(a.id);
                    report.colliding.insert(b.id);
                }
            }
        }
        report
    }

    /// Whether any pair among `entities` collides.
    pub fn any_collision(entities: &[&SimEntity]) -> bool {
        !Self::detect(entities).is_empty()
    }
}

// ---------------------------------------------------------------------------
// CollisionResolver
// ---------------------------------------------------------------------------

/// Rolls colliding entities back to their committed positions.
pub struct CollisionResolver;

impl CollisionResolver {
    /// Resolve every entity in `entities` that `report` lists as colliding.
    /// Returns how many were rolled back.
    pub fn resolve<'a>(
        report: &CollisionReport,
        entities: impl IntoIterator<Item = &'a mut SimEntity>,
    ) -> usize {
        let mut resolved = 0;
        for entity in entities {
            if report.contains(entity.id()) {
                entity.resolve_collision();
                resolved += 1;
            }
        }
        resolved
    }
}

// ---------------------------------------------------------------------------
// CollisionSelector
// ---------------------------------------------------------------------------

/// A ray hit against a selector member.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub id: SimId,
    pub point: Vec3,
    pub distance: f32,
}

/// The entities of a type set, captured at one registry generation.
///
/// Queries evaluate members' committed footprints at query time, so a
/// selector stays valid while its members move; it only goes stale when
/// membership may have changed.
#[derive(Debug, Clone)]
pub struct CollisionSelector {
    types: u32,
    generation: u64,
    members: Vec<SimId>,
}

impl CollisionSelector {
    pub(crate) fn build<'a>(
        types: u32,
        generation: u64,
        entities: impl IntoIterator<Item = &'a SimEntity>,
    ) -> Self {
        let mut members = Vec::new();
        for entity in entities {
            if entity.is_removed() || entity.entity_type() & types == 0 {
                continue;
            }
            if entity.committed_footprint().is_none() {
                tracing::warn!(
                    id = %entity.id(),
                    types,
                    "entity has no collision footprint, leaving it out of selector"
                );
                continue;
            }
            members.push(entity.id());
        }
        members.sort();
        tracing::debug!(types, generation, members = members.len(), "collision selector built");
        Self {
            types,
            generation,
            members,
        }
    }

    pub fn types(&self) -> u32 {
        self.types
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn members(&self) -> &[SimId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The nearest member whose committed footprint `ray` enters. Ties go to
    /// the lower id.
    pub fn cast_ray(&self, sim: &Simulation, ray: &Ray) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        for &id in &self.members {
            let footprint = sim
                .find(id)
                .filter(|e| !e.is_removed())
                .and_then(|e| e.committed_footprint());
            let Some(footprint) = footprint else {
                continue;
            };
            let Some(distance) = footprint.intersect_ray(ray) else {
                continue;
            };
            if best.map_or(true, |hit| distance < hit.distance) {
                best = Some(RayHit {
                    id,
                    point: ray.point_at(distance),
                    distance,
                });
            }
        }
        best
    }

    /// Members whose committed footprint overlaps `region`.
    pub fn overlapping(&self, sim: &Simulation, region: &Aabb) -> Vec<SimId> {
        self.members
            .iter()
            .copied()
            .filter(|&id| {
                sim.find(id)
                    .filter(|e| !e.is_removed())
                    .and_then(|e| e.committed_footprint())
                    .is_some_and(|b| b.overlaps(region))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
