//! Versioned, dirty-bit-tracked entity state.
//!
//! [`EntityState`] is the single authoritative record of one simulated object:
//! transform, kinematics, label, color, type and collision masks. Every setter
//! ORs the field's [`DirtyBits`] flag, so downstream consumers (render sync,
//! network deltas, the type index) can skip fields that have not changed since
//! the bits were last cleared.
//!
//! The record also keeps a `previous` copy of its fields. It is refreshed once
//! per simulation tick by [`EntityState::process_tick`], before any component
//! proposes new values, so `previous` always lags `current` by exactly one tick.
//! Animation interpolation blends between the two.
//!
//! # Example
//!
//! ```
//! use nero_sim::prelude::*;
//! use glam::Vec3;
//!
//! let mut state = EntityState::new(SimId(7), StateFields::default());
//! assert_eq!(state.dirty_bits(), DirtyBits::ALL); // new state is fully dirty
//!
//! state.clear_dirty_bits();
//! state.set_position(Vec3::new(1.0, 0.0, 0.0));
//! assert!(state.is_dirty(DirtyBits::POSITION));
//! assert!(!state.is_dirty(DirtyBits::ROTATION));
//! ```

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::id::SimId;

// ---------------------------------------------------------------------------
// DirtyBits
// ---------------------------------------------------------------------------

/// A set of per-field change flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DirtyBits(pub u32);

impl DirtyBits {
    pub const NONE: DirtyBits = DirtyBits(0);
    pub const POSITION: DirtyBits = DirtyBits(1 << 0);
    pub const ROTATION: DirtyBits = DirtyBits(1 << 1);
    pub const VELOCITY: DirtyBits = DirtyBits(1 << 2);
    pub const SCALE: DirtyBits = DirtyBits(1 << 4);
    pub const ACCELERATION: DirtyBits = DirtyBits(1 << 5);
    pub const LABEL: DirtyBits = DirtyBits(1 << 6);
    pub const COLOR: DirtyBits = DirtyBits(1 << 7);
    pub const ID: DirtyBits = DirtyBits(1 << 8);
    pub const TYPE: DirtyBits = DirtyBits(1 << 9);
    pub const COLLISION: DirtyBits = DirtyBits(1 << 10);
    /// Every bit set; forces a full update.
    pub const ALL: DirtyBits = DirtyBits(u32::MAX);

    /// One flag per tracked field, in wire order.
    pub const FIELDS: [DirtyBits; 10] = [
        Self::POSITION,
        Self::ROTATION,
        Self::VELOCITY,
        Self::SCALE,
        Self::ACCELERATION,
        Self::LABEL,
        Self::COLOR,
        Self::ID,
        Self::TYPE,
        Self::COLLISION,
    ];

    /// Whether any bit of `other` is set in `self`.
    #[inline]
    pub fn intersects(self, other: DirtyBits) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether every bit of `other` is set in `self`.
    #[inline]
    pub fn contains(self, other: DirtyBits) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    #[inline]
    pub fn insert(&mut self, other: DirtyBits) {
        self.0 |= other.0;
    }

    /// Whether no bit is set.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DirtyBits {
    type Output = DirtyBits;

    fn bitor(self, rhs: DirtyBits) -> DirtyBits {
        DirtyBits(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirtyBits {
    fn bitor_assign(&mut self, rhs: DirtyBits) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for DirtyBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirtyBits({:#x})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// An RGBA color, 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgba(0xFF, 0xFF, 0xFF, 0xFF);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

// ---------------------------------------------------------------------------
// StateFields
// ---------------------------------------------------------------------------

/// The value fields of an entity state, without id or change tracking.
///
/// This is also the shape of the `previous` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFields {
    /// World position.
    pub position: Vec3,
    /// Euler rotation angles in degrees.
    pub rotation: Vec3,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Per-axis scale.
    pub scale: Vec3,
    /// Linear acceleration.
    pub acceleration: Vec3,
    /// Text label.
    pub label: String,
    /// Display color.
    pub color: Color,
    /// Type bitmask (collision category and sensor visibility).
    pub entity_type: u32,
    /// Bitmask of types this entity collides with.
    pub collision_mask: u32,
}

impl Default for StateFields {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            velocity: Vec3::ZERO,
            scale: Vec3::ONE,
            acceleration: Vec3::ZERO,
            label: String::new(),
            color: Color::WHITE,
            entity_type: 0,
            collision_mask: 0,
        }
    }
}

impl StateFields {
    /// Fields at the given placement, all other values default.
    pub fn placed(position: Vec3, rotation: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
            ..Default::default()
        }
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
}

// ---------------------------------------------------------------------------
// EntityDelta
// ---------------------------------------------------------------------------

/// The changed subset of one entity's state.
///
/// Produced from the dirty bits by [`EntityState::delta`]; only the fields
/// whose bit is set are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDelta {
    pub id: SimId,
    pub bits: DirtyBits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_mask: Option<u32>,
}

// ---------------------------------------------------------------------------
// EntityState
// ---------------------------------------------------------------------------

/// Mutable state shared by every capability component of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    id: SimId,
    current: StateFields,
    previous: StateFields,
    dirty: DirtyBits,
    /// Set when the last collision pass rolled this entity back.
    bumped: bool,
}

impl EntityState {
    /// Create a state with the given id and initial fields.
    ///
    /// The previous snapshot starts equal to the current fields, and every
    /// dirty bit is set so the first consumer sees a full update.
    pub fn new(id: SimId, fields: StateFields) -> Self {
        Self {
            id,
            previous: fields.clone(),
            current: fields,
            dirty: DirtyBits::ALL,
            bumped: false,
        }
    }

    // -- setters ------------------------------------------------------------

    pub fn set_position(&mut self, position: Vec3) {
        self.current.position = position;
        self.dirty |= DirtyBits::POSITION;
    }

    pub fn set_rotation(&mut self, rotation: Vec3) {
        self.current.rotation = rotation;
        self.dirty |= DirtyBits::ROTATION;
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.current.velocity = velocity;
        self.dirty |= DirtyBits::VELOCITY;
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.current.scale = scale;
        self.dirty |= DirtyBits::SCALE;
    }

    pub fn set_acceleration(&mut self, acceleration: Vec3) {
        self.current.acceleration = acceleration;
        self.dirty |= DirtyBits::ACCELERATION;
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.current.label = label.into();
        self.dirty |= DirtyBits::LABEL;
    }

    pub fn set_color(&mut self, color: Color) {
        self.current.color = color;
        self.dirty |= DirtyBits::COLOR;
    }

    pub fn set_type(&mut self, entity_type: u32) {
        self.current.entity_type = entity_type;
        self.dirty |= DirtyBits::TYPE;
    }

    pub fn set_collision_mask(&mut self, mask: u32) {
        self.current.collision_mask = mask;
        self.dirty |= DirtyBits::COLLISION;
    }

    /// Transient collision feedback; not change-tracked.
    pub fn set_bumped(&mut self, bumped: bool) {
        self.bumped = bumped;
    }

    // -- getters ------------------------------------------------------------

    pub fn id(&self) -> SimId {
        self.id
    }

    pub fn position(&self) -> Vec3 {
        self.current.position
    }

    pub fn rotation(&self) -> Vec3 {
        self.current.rotation
    }

    pub fn velocity(&self) -> Vec3 {
        self.current.velocity
    }

    pub fn scale(&self) -> Vec3 {
        self.current.scale
    }

    pub fn acceleration(&self) -> Vec3 {
        self.current.acceleration
    }

    pub fn label(&self) -> &str {
        &self.current.label
    }

    pub fn color(&self) -> Color {
        self.current.color
    }

    pub fn entity_type(&self) -> u32 {
        self.current.entity_type
    }

    pub fn collision_mask(&self) -> u32 {
        self.current.collision_mask
    }

    pub fn bumped(&self) -> bool {
        self.bumped
    }

    /// All current field values.
    pub fn fields(&self) -> &StateFields {
        &self.current
    }

    /// The field values as they were before the most recent
    /// [`process_tick`](Self::process_tick).
    pub fn previous(&self) -> &StateFields {
        &self.previous
    }

    // -- dirty bits ---------------------------------------------------------

    pub fn dirty_bits(&self) -> DirtyBits {
        self.dirty
    }

    /// Whether any bit of `bits` changed since the last clear.
    pub fn is_dirty(&self, bits: DirtyBits) -> bool {
        self.dirty.intersects(bits)
    }

    pub fn set_dirty_bits(&mut self, bits: DirtyBits) {
        self.dirty |= bits;
    }

    pub fn set_all_dirty_bits(&mut self) {
        self.dirty = DirtyBits::ALL;
    }

    /// Clear every bit, returning the set that was cleared.
    pub fn clear_dirty_bits(&mut self) -> DirtyBits {
        std::mem::take(&mut self.dirty)
    }

    // -- tick bookkeeping ---------------------------------------------------

    /// Copy the current fields into the previous snapshot.
    pub fn process_tick(&mut self) {
        self.previous.clone_from(&self.current);
    }

    /// Position blended between previous and current by `frac` in `[0, 1]`.
    pub fn interpolated_position(&self, frac: f32) -> Vec3 {
        let frac = frac.clamp(0.0, 1.0);
        self.previous.position.lerp(self.current.position, frac)
    }

    /// Rotation (degrees) spherically blended between previous and current.
    pub fn interpolated_rotation(&self, frac: f32) -> Vec3 {
        let frac = frac.clamp(0.0, 1.0);
        let from = euler_degrees_to_quat(self.previous.rotation);
        let to = euler_degrees_to_quat(self.current.rotation);
        quat_to_euler_degrees(from.slerp(to, frac))
    }

    // -- deltas -------------------------------------------------------------

    /// The fields changed since the last clear, tagged with the dirty bits.
    pub fn delta(&self) -> EntityDelta {
        let bits = self.dirty;
        let pick = |bit: DirtyBits| bits.intersects(bit);
        EntityDelta {
            id: self.id,
            bits,
            position: pick(DirtyBits::POSITION).then_some(self.current.position),
            rotation: pick(DirtyBits::ROTATION).then_some(self.current.rotation),
            velocity: pick(DirtyBits::VELOCITY).then_some(self.current.velocity),
            scale: pick(DirtyBits::SCALE).then_some(self.current.scale),
            acceleration: pick(DirtyBits::ACCELERATION).then_some(self.current.acceleration),
            label: pick(DirtyBits::LABEL).then(|| self.current.label.clone()),
            color: pick(DirtyBits::COLOR).then_some(self.current.color),
            entity_type: pick(DirtyBits::TYPE).then_some(self.current.entity_type),
            collision_mask: pick(DirtyBits::COLLISION).then_some(self.current.collision_mask),
        }
    }

    /// Apply a delta produced by another replica of this entity.
    ///
    /// The delta's bits are ORed into this state's dirty set; whatever was
    /// dirty before stays dirty. Returns `false` (and changes nothing) if the
    /// delta belongs to a different entity.
    pub fn apply_delta(&mut self, delta: &EntityDelta) -> bool {
        if delta.id != self.id {
            tracing::warn!(delta = %delta.id, state = %self.id, "delta applied to the wrong entity");
            return false;
        }
        self.dirty |= delta.bits;
        if let Some(v) = delta.position {
            self.current.position = v;
        }
        if let Some(v) = delta.rotation {
            self.current.rotation = v;
        }
        if let Some(v) = delta.velocity {
            self.current.velocity = v;
        }
        if let Some(v) = delta.scale {
            self.current.scale = v;
        }
        if let Some(v) = delta.acceleration {
            self.current.acceleration = v;
        }
        if let Some(v) = &delta.label {
            self.current.label.clone_from(v);
        }
        if let Some(v) = delta.color {
            self.current.color = v;
        }
        if let Some(v) = delta.entity_type {
            self.current.entity_type = v;
        }
        if let Some(v) = delta.collision_mask {
            self.current.collision_mask = v;
        }
        true
    }

    /// Overwrite every value field, marking all of them dirty.
    pub fn overwrite_fields(&mut self, fields: StateFields) {
        self.current = fields;
        self.dirty = DirtyBits::ALL;
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{id: {}, position: {}, rotation: {}, velocity: {}, scale: {}}}",
            self.id,
            self.current.position,
            self.current.rotation,
            self.current.velocity,
            self.current.scale
        )
    }
}

fn euler_degrees_to_quat(degrees: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::XYZ,
        degrees.x.to_radians(),
        degrees.y.to_radians(),
        degrees.z.to_radians(),
    )
}

fn quat_to_euler_degrees(q: Quat) -> Vec3 {
    let (x, y, z) = q.to_euler(EulerRot::XYZ);
    Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_state() -> EntityState {
        let mut state = EntityState::new(SimId(1), StateFields::default());
        state.clear_dirty_bits();
        state
    }

    // -- 1. Dirty bit bookkeeping -------------------------------------------

    #[test]
    fn new_state_is_fully_dirty() {
        let state = EntityState::new(SimId(1), StateFields::default());
        assert_eq!(state.dirty_bits(), DirtyBits::ALL);
    }

    #[test]
    fn clear_returns_previous_bits() {
        let mut state = clean_state();
        state.set_velocity(Vec3::Y);
        state.set_position(Vec3::X);
        let cleared = state.clear_dirty_bits();
        assert_eq!(cleared, DirtyBits::VELOCITY | DirtyBits::POSITION);
        assert!(state.dirty_bits().is_empty());
    }

    #[test]
    fn setting_same_value_still_marks_dirty() {
        let mut state = clean_state();
        state.set_position(Vec3::ZERO);
        assert!(state.is_dirty(DirtyBits::POSITION));
    }

    #[test]
    fn setters_accumulate_bits() {
        let mut state = clean_state();
        state.set_velocity(Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(state.dirty_bits(), DirtyBits::VELOCITY);
        state.set_position(Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(state.dirty_bits(), DirtyBits::POSITION | DirtyBits::VELOCITY);
    }

    #[test]
    fn bumped_is_not_change_tracked() {
        let mut state = clean_state();
        state.set_bumped(true);
        assert!(state.bumped());
        assert!(state.dirty_bits().is_empty());
    }

    // -- 2. Previous snapshot -----------------------------------------------

    #[test]
    fn process_tick_copies_current_into_previous() {
        let mut state = clean_state();
        state.set_position(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(state.previous().position, Vec3::ZERO);
        state.process_tick();
        assert_eq!(state.previous().position, Vec3::new(1.0, 2.0, 3.0));
        state.set_position(Vec3::new(4.0, 2.0, 3.0));
        assert_eq!(state.previous().position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn interpolated_position_blends_linearly() {
        let mut state = clean_state();
        state.process_tick();
        state.set_position(Vec3::new(10.0, 0.0, -4.0));
        let mid = state.interpolated_position(0.5);
        assert!((mid - Vec3::new(5.0, 0.0, -2.0)).length() < 1e-5);
        assert_eq!(state.interpolated_position(0.0), Vec3::ZERO);
        assert_eq!(state.interpolated_position(1.0), Vec3::new(10.0, 0.0, -4.0));
    }

    #[test]
    fn interpolated_rotation_follows_shortest_arc() {
        let mut state = clean_state();
        state.process_tick();
        state.set_rotation(Vec3::new(0.0, 0.0, 90.0));
        let mid = state.interpolated_rotation(0.5);
        assert!((mid.z - 45.0).abs() < 1e-3, "got {mid}");
        assert!(mid.x.abs() < 1e-3 && mid.y.abs() < 1e-3);
    }

    // -- 3. Deltas ------------------------------------------------------------

    #[test]
    fn delta_only_carries_dirty_fields() {
        let mut state = clean_state();
        state.set_label("scout");
        state.set_position(Vec3::X);
        let delta = state.delta();
        assert_eq!(delta.bits, DirtyBits::LABEL | DirtyBits::POSITION);
        assert_eq!(delta.position, Some(Vec3::X));
        assert_eq!(delta.label.as_deref(), Some("scout"));
        assert_eq!(delta.rotation, None);
        assert_eq!(delta.color, None);
    }

    #[test]
    fn apply_delta_keeps_existing_dirty_bits() {
        let mut source = clean_state();
        source.set_color(Color::rgba(1, 2, 3, 4));
        let delta = source.delta();

        let mut replica = clean_state();
        replica.set_scale(Vec3::splat(2.0));
        assert!(replica.apply_delta(&delta));
        assert_eq!(replica.color(), Color::rgba(1, 2, 3, 4));
        assert_eq!(replica.dirty_bits(), DirtyBits::SCALE | DirtyBits::COLOR);
    }

    #[test]
    fn delta_for_another_entity_is_refused() {
        let mut other = EntityState::new(SimId(2), StateFields::default());
        other.set_position(Vec3::X);
        let mut state = clean_state();
        assert!(!state.apply_delta(&other.delta()));
        assert_eq!(state.position(), Vec3::ZERO);
        assert!(state.dirty_bits().is_empty());
    }

    #[test]
    fn delta_serializes_without_absent_fields() {
        let mut state = clean_state();
        state.set_type(4);
        let json = serde_json::to_value(state.delta()).unwrap();
        let object = json.as_object().unwrap();
        assert!(object.contains_key("entity_type"));
        assert!(!object.contains_key("position"));
    }
}
