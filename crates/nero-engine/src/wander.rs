//! A seeded random-walk AI.
//!
//! [`WanderAi`] drifts its entity across the ground plane: each AI tick it
//! turns by a small random amount, then steps forward at a fixed speed. When
//! the last collision pass bumped the entity, it turns around instead. The
//! random stream comes from a per-entity [`Pcg32`], so a run with the same
//! seeds is reproducible.

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use nero_sim::component::{AiObject, Capability, StateHandle};
use nero_sim::services::TickContext;
use nero_sim::state::EntityState;

// ---------------------------------------------------------------------------
// WanderParams
// ---------------------------------------------------------------------------

/// Tuning for a [`WanderAi`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WanderParams {
    /// Forward speed in units per second.
    pub speed: f32,
    /// Largest heading change per second, in degrees.
    pub turn_rate: f32,
    /// Base seed. Each entity mixes its own id into it.
    pub seed: u64,
}

impl Default for WanderParams {
    fn default() -> Self {
        Self {
            speed: 1.0,
            turn_rate: 90.0,
            seed: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// WanderAi
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct WanderAi {
    state: StateHandle,
    params: WanderParams,
    rng: Pcg32,
    /// Heading around the Y axis, in degrees.
    heading: f32,
}

impl WanderAi {
    pub fn new(params: WanderParams) -> Self {
        Self {
            state: StateHandle::unbound(),
            params,
            rng: Pcg32::seed_from_u64(params.seed),
            heading: 0.0,
        }
    }

    pub fn params(&self) -> &WanderParams {
        &self.params
    }

    pub fn heading(&self) -> f32 {
        self.heading
    }

    fn step(&mut self, state: &mut EntityState, dt: f32) {
        if state.bumped() {
            self.heading += 180.0 + self.rng.gen_range(-45.0..45.0);
        } else if self.params.turn_rate > 0.0 {
            let max_turn = self.params.turn_rate * dt;
            if max_turn > 0.0 {
                self.heading += self.rng.gen_range(-max_turn..max_turn);
            }
        }
        self.heading = self.heading.rem_euclid(360.0);

        let radians = self.heading.to_radians();
        let velocity = Vec3::new(radians.cos(), 0.0, radians.sin()) * self.params.speed;
        let position = state.position() + velocity * dt;

        state.set_velocity(velocity);
        state.set_position(position);
        state.set_rotation(Vec3::new(0.0, self.heading, 0.0));
    }
}

impl Capability for WanderAi {
    fn load_from_template(&mut self, initial: &EntityState) -> bool {
        if !(self.params.speed.is_finite() && self.params.turn_rate.is_finite()) {
            return false;
        }
        let mixed = self.params.seed ^ u64::from(initial.id().to_raw()).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        self.rng = Pcg32::seed_from_u64(mixed);
        self.heading = initial.rotation().y.rem_euclid(360.0);
        true
    }

    fn bind_state(&mut self, state: StateHandle) {
        self.state = state;
    }

    fn process_tick(&mut self, dt: f32, _ctx: &mut TickContext<'_>) {
        let state = self.state.clone();
        if state.write(|s| self.step(s, dt)).is_none() {
            tracing::trace!("wander ai ticked without a bound entity");
        }
    }
}

impl AiObject for WanderAi {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
