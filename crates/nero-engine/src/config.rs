//! Simulation configuration.
//!
//! [`SimConfig`] is read from JSON. Every field is optional and falls back to
//! its default, so `{}` is a valid configuration.
//!
//! ```
//! use nero_engine::config::SimConfig;
//!
//! let config = SimConfig::from_json_str(r#"{ "frame_delay": 0.25, "ai_enabled": false }"#).unwrap();
//! assert_eq!(config.frame_delay, 0.25);
//! assert!(!config.services().ai_enabled);
//! assert!(config.services().physics_enabled);
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use nero_sim::services::WorldServices;
use nero_sim::simulation::{DEFAULT_FRAME_DELAY, DEFAULT_SETTLE_PASSES};

/// Errors found while validating a loaded configuration.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("frame_delay must be finite and non-negative, got {0}")]
    InvalidFrameDelay(f32),

    #[error("settle_passes must be at least 1")]
    NoSettlePasses,
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seconds of wall time between two full simulation ticks.
    pub frame_delay: f32,
    pub ai_enabled: bool,
    pub physics_enabled: bool,
    pub audio_enabled: bool,
    /// Maximum detect/resolve rounds per tick.
    pub settle_passes: u32,
    /// Fallback `tracing` filter when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frame_delay: DEFAULT_FRAME_DELAY,
            ai_enabled: true,
            physics_enabled: true,
            audio_enabled: true,
            settle_passes: DEFAULT_SETTLE_PASSES,
            log_filter: "info".to_owned(),
        }
    }
}

impl SimConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: SimConfig =
            serde_json::from_str(json).context("failed to parse simulation config")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("in config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frame_delay.is_finite() && self.frame_delay >= 0.0) {
            return Err(ConfigError::InvalidFrameDelay(self.frame_delay));
        }
        if self.settle_passes == 0 {
            return Err(ConfigError::NoSettlePasses);
        }
        Ok(())
    }

    /// The service switches this configuration enables.
    pub fn services(&self) -> WorldServices {
        WorldServices {
            ai_enabled: self.ai_enabled,
            physics_enabled: self.physics_enabled,
            audio_enabled: self.audio_enabled,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
