//! Frame pacing: full simulation ticks versus in-between animation frames.
//!
//! Rendering runs far more often than the simulation should think. The
//! [`FramePacer`] accumulates wall time between frames; once a full frame
//! delay has passed it asks for a full tick over the accumulated time,
//! otherwise it asks for an animation frame at the fraction of the delay
//! elapsed so far. [`Kernel`] pairs a pacer with a [`SimContext`] and runs
//! whichever frame the pacer asks for.
//!
//! # Example
//!
//! ```
//! use nero_engine::kernel::{FrameKind, FramePacer};
//!
//! let mut pacer = FramePacer::new(0.5);
//! assert_eq!(pacer.advance(0.2), FrameKind::Animation { frac: 0.4 });
//! assert_eq!(pacer.advance(0.3), FrameKind::Full { dt: 0.5 });
//! ```

use nero_sim::simulation::TickReport;

use crate::config::SimConfig;
use crate::context::SimContext;
use crate::template::TemplateRegistry;

// ---------------------------------------------------------------------------
// FramePacer
// ---------------------------------------------------------------------------

/// What a frame should do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameKind {
    /// Run a full simulation tick over `dt` seconds.
    Full { dt: f32 },
    /// Re-pose visuals `frac` of the way to the next full tick.
    Animation { frac: f32 },
}

#[derive(Debug, Clone)]
pub struct FramePacer {
    frame_delay: f32,
    /// Wall time since the last full tick.
    since_full: f32,
}

impl FramePacer {
    /// # Panics
    ///
    /// Panics if `frame_delay` is negative or not finite.
    pub fn new(frame_delay: f32) -> Self {
        assert!(
            frame_delay.is_finite() && frame_delay >= 0.0,
            "frame delay must be finite and non-negative, got {frame_delay}"
        );
        Self {
            frame_delay,
            since_full: 0.0,
        }
    }

    pub fn frame_delay(&self) -> f32 {
        self.frame_delay
    }

    /// # Panics
    ///
    /// Panics if `frame_delay` is negative or not finite.
    pub fn set_frame_delay(&mut self, frame_delay: f32) {
        assert!(
            frame_delay.is_finite() && frame_delay >= 0.0,
            "frame delay must be finite and non-negative, got {frame_delay}"
        );
        self.frame_delay = frame_delay;
    }

    /// Account for `elapsed` seconds of wall time and decide the next frame.
    /// Negative or non-finite elapsed time counts as zero.
    pub fn advance(&mut self, elapsed: f32) -> FrameKind {
        let elapsed = if elapsed.is_finite() { elapsed.max(0.0) } else { 0.0 };
        self.since_full += elapsed;
        if self.since_full >= self.frame_delay {
            let dt = std::mem::take(&mut self.since_full);
            FrameKind::Full { dt }
        } else {
            FrameKind::Animation {
                frac: self.since_full / self.frame_delay,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// The outcome of one [`Kernel::frame`].
#[derive(Debug, Clone)]
pub enum Frame {
    Full(TickReport),
    Animation { frac: f32 },
}

/// A simulation context driven by a frame pacer.
#[derive(Debug)]
pub struct Kernel {
    context: SimContext,
    pacer: FramePacer,
}

impl Kernel {
    pub fn new(config: &SimConfig, templates: TemplateRegistry) -> Self {
        let context = SimContext::new(config, templates);
        let pacer = FramePacer::new(context.frame_delay());
        Self { context, pacer }
    }

    pub fn context(&self) -> &SimContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SimContext {
        &mut self.context
    }

    pub fn pacer(&self) -> &FramePacer {
        &self.pacer
    }

    /// Change the frame delay of both the pacer and the simulation.
    pub fn set_frame_delay(&mut self, delay: f32) {
        self.pacer.set_frame_delay(delay);
        self.context.set_frame_delay(delay);
    }

    /// Run one rendered frame after `elapsed` seconds of wall time.
    pub fn frame(&mut self, elapsed: f32) -> Frame {
        match self.pacer.advance(elapsed) {
            FrameKind::Full { dt } => Frame::Full(self.context.process_tick(dt)),
            FrameKind::Animation { frac } => {
                self.context.process_animation_tick(frac);
                Frame::Animation { frac }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
