//! Simulation identifiers and id allocation.
//!
//! A [`SimId`] names one simulated entity for the lifetime of a
//! [`Simulation`](crate::simulation::Simulation). Ids are handed out by an
//! [`IdAllocator`] in strictly increasing order and are never recycled, so a
//! stale id can never alias a newer entity.
//!
//! A [`RenderHandle`] is the id the render backend knows an entity by. It packs
//! the sim id in the high bits and a 4-bit node kind in the low bits, which lets
//! a pick result coming back from the renderer be mapped to its entity without a
//! second lookup table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::SimError;

// ---------------------------------------------------------------------------
// SimId
// ---------------------------------------------------------------------------

/// A unique, never-reused entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimId(pub u32);

impl SimId {
    /// Signifies that an object is not valid.
    pub const INVALID: SimId = SimId(0);

    /// The first id an allocator hands out.
    pub const FIRST: SimId = SimId(1);

    /// Whether this id can refer to an entity at all.
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Raw `u32` representation.
    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimId({})", self.0)
    }
}

impl fmt::Display for SimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RenderHandle
// ---------------------------------------------------------------------------

/// The identifier a render backend uses for an entity's scene node.
///
/// Layout: `[sim_id: 28 bits | kind: 4 bits]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderHandle(pub u32);

impl RenderHandle {
    /// Number of low bits reserved for the node kind.
    pub const KIND_BITS: u32 = 4;

    /// Largest sim id that fits beside the kind bits.
    pub const MAX_SIM_ID: SimId = SimId(u32::MAX >> Self::KIND_BITS);

    /// Pack a sim id and a node kind into a render handle.
    ///
    /// Returns `None` for ids above [`MAX_SIM_ID`](Self::MAX_SIM_ID). Kinds
    /// wider than [`KIND_BITS`](Self::KIND_BITS) are truncated.
    pub fn encode(id: SimId, kind: u32) -> Option<Self> {
        debug_assert!(
            kind < (1 << Self::KIND_BITS),
            "render node kind {kind} does not fit in {} bits",
            Self::KIND_BITS
        );
        if id > Self::MAX_SIM_ID {
            return None;
        }
        let kind = kind & ((1 << Self::KIND_BITS) - 1);
        Some(Self((id.0 << Self::KIND_BITS) | kind))
    }

    /// The sim id this handle was encoded from.
    #[inline]
    pub fn sim_id(self) -> SimId {
        SimId(self.0 >> Self::KIND_BITS)
    }

    /// The node kind stored in the low bits.
    #[inline]
    pub fn kind(self) -> u32 {
        self.0 & ((1 << Self::KIND_BITS) - 1)
    }
}

impl fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RenderHandle({}k{})", self.sim_id().0, self.kind())
    }
}

// ---------------------------------------------------------------------------
// IdAllocator
// ---------------------------------------------------------------------------

/// Hands out strictly increasing [`SimId`]s.
///
/// Reservation commits immediately: an id returned by
/// [`reserve_new_id`](Self::reserve_new_id) is consumed even if the caller never
/// creates an entity with it, so the id sequence may contain gaps but never
/// repeats.
///
/// The allocator also remembers every id an entity was registered under.
/// A claimed id stays claimed after its entity is gone.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    /// The id the next reservation will return.
    next: u32,
    claimed: BTreeSet<SimId>,
}

impl IdAllocator {
    /// Create an allocator whose first reservation returns [`SimId::FIRST`].
    pub fn new() -> Self {
        Self {
            next: SimId::FIRST.0,
            claimed: BTreeSet::new(),
        }
    }

    /// Reserve and return a fresh id.
    ///
    /// # Panics
    ///
    /// Panics if the id space is exhausted.
    pub fn reserve_new_id(&mut self) -> SimId {
        let id = SimId(self.next);
        self.next = self
            .next
            .checked_add(1)
            .expect("sim id space exhausted");
        id
    }

    /// The id the next reservation will return, without reserving it.
    pub fn peek_next_free_id(&self) -> SimId {
        SimId(self.next)
    }

    /// Move the counter past an id that was assigned elsewhere, so it is
    /// never handed out again.
    pub fn observe(&mut self, id: SimId) {
        if id.0 >= self.next {
            self.next = id.0.saturating_add(1);
        }
    }

    /// Record that an entity is being registered under `id`.
    ///
    /// Fails for [`SimId::INVALID`] and for any id claimed before, including
    /// ids whose entity has since been removed.
    pub fn claim(&mut self, id: SimId) -> Result<(), SimError> {
        if !id.is_valid() {
            return Err(SimError::InvalidId);
        }
        if !self.claimed.insert(id) {
            return Err(SimError::DuplicateId(id));
        }
        self.observe(id);
        Ok(())
    }

    pub fn is_claimed(&self, id: SimId) -> bool {
        self.claimed.contains(&id)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reserved_id_is_first() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.reserve_new_id(), SimId::FIRST);
        assert!(SimId::FIRST.is_valid());
        assert!(!SimId::INVALID.is_valid());
    }

    #[test]
    fn reservations_strictly_increase() {
        let mut ids = IdAllocator::new();
        let reserved: Vec<SimId> = (0..100).map(|_| ids.reserve_new_id()).collect();
        for pair in reserved.windows(2) {
            assert!(pair[0] < pair[1], "{:?} should precede {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn peek_does_not_consume() {
        let mut ids = IdAllocator::new();
        let peeked = ids.peek_next_free_id();
        assert_eq!(ids.peek_next_free_id(), peeked);
        assert_eq!(ids.reserve_new_id(), peeked);
        assert!(ids.peek_next_free_id() > peeked);
    }

    #[test]
    fn observe_skips_external_ids() {
        let mut ids = IdAllocator::new();
        ids.observe(SimId(41));
        assert_eq!(ids.reserve_new_id(), SimId(42));
        // Observing an older id never moves the counter backwards.
        ids.observe(SimId(3));
        assert_eq!(ids.reserve_new_id(), SimId(43));
    }

    #[test]
    fn claims_are_single_use() {
        let mut ids = IdAllocator::new();
        let id = ids.reserve_new_id();
        assert!(!ids.is_claimed(id));
        assert_eq!(ids.claim(id), Ok(()));
        assert_eq!(ids.claim(id), Err(SimError::DuplicateId(id)));
        assert_eq!(ids.claim(SimId::INVALID), Err(SimError::InvalidId));

        assert_eq!(ids.claim(SimId(20)), Ok(()));
        assert_eq!(ids.reserve_new_id(), SimId(21));
    }

    #[test]
    fn render_handle_roundtrip() {
        let handle = RenderHandle::encode(SimId(1234), 5).unwrap();
        assert_eq!(handle.sim_id(), SimId(1234));
        assert_eq!(handle.kind(), 5);
        assert_eq!(handle.0, (1234 << 4) | 5);
    }

    #[test]
    fn render_handle_rejects_ids_past_the_kind_bits() {
        let max = RenderHandle::MAX_SIM_ID;
        assert_eq!(RenderHandle::encode(max, 3).unwrap().sim_id(), max);
        assert_eq!(RenderHandle::encode(SimId(1 << 28), 0), None);
        assert_eq!(RenderHandle::encode(SimId(u32::MAX), 1), None);
    }
}
