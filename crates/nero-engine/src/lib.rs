//! Nero Engine -- configuration, templates and frame pacing around the
//! simulation core.
//!
//! This crate builds on [`nero_sim`] to provide the pieces a running world
//! needs: a JSON [`SimConfig`](config::SimConfig), a
//! [`TemplateRegistry`](template::TemplateRegistry) that turns template names
//! into capability components, the [`SimContext`](context::SimContext)
//! facade for scripts, BLAKE3-hashed snapshots, and a
//! [`Kernel`](kernel::Kernel) that splits rendered frames into full ticks and
//! animation frames.
//!
//! # Quick Start
//!
//! ```
//! use nero_engine::prelude::*;
//! use glam::Vec3;
//!
//! let mut templates = TemplateRegistry::new();
//! templates
//!     .load_json_str(r#"{
//!         "roamer": {
//!             "scene": { "half_extents": [0.5, 0.5, 0.5], "kind": 1, "collision_mask": 1 },
//!             "ai": { "wander": { "speed": 1.0, "turn_rate": 45.0, "seed": 7 } }
//!         }
//!     }"#)
//!     .unwrap();
//!
//! let mut kernel = Kernel::new(&SimConfig::default(), templates);
//! kernel
//!     .context_mut()
//!     .add_object("roamer", ObjectSpawn::at(Vec3::ZERO).with_type(1))
//!     .unwrap();
//!
//! for _ in 0..10 {
//!     kernel.frame(0.25);
//! }
//! assert_eq!(kernel.context().simulation().tick_count(), 5);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod kernel;
pub mod logging;
pub mod snapshot;
pub mod template;
pub mod wander;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the simulation core for convenience.
pub use nero_sim;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    // Re-export everything from the simulation prelude.
    pub use nero_sim::prelude::*;

    pub use crate::config::{ConfigError, SimConfig};
    pub use crate::context::{ObjectSpawn, SimContext};
    pub use crate::kernel::{Frame, FrameKind, FramePacer, Kernel};
    pub use crate::logging::init_logging;
    pub use crate::snapshot::ContextSnapshot;
    pub use crate::template::{AiTemplate, ObjectTemplate, SceneTemplate, TemplateRegistry};
    pub use crate::wander::{WanderAi, WanderParams};
}
