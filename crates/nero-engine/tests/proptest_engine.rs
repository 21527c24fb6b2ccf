//! Property tests for frame pacing and configuration parsing.

use nero_engine::prelude::*;
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn frame_times() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(0.0f32..0.3, 1..120)
}

fn config_strategy() -> impl Strategy<Value = SimConfig> {
    (
        0.0f32..5.0,
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        1u32..32,
        prop_oneof![Just("info"), Just("debug"), Just("nero_sim=trace")],
    )
        .prop_map(
            |(frame_delay, ai_enabled, physics_enabled, audio_enabled, settle_passes, filter)| {
                SimConfig {
                    frame_delay,
                    ai_enabled,
                    physics_enabled,
                    audio_enabled,
                    settle_passes,
                    log_filter: filter.to_owned(),
                }
            },
        )
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Animation fractions stay in [0, 1) and full ticks never consume more
    /// time than has elapsed.
    #[test]
    fn pacer_accounts_for_elapsed_time(delay in 0.05f32..1.0, frames in frame_times()) {
        let mut pacer = FramePacer::new(delay);
        let mut elapsed = 0.0f64;
        let mut consumed = 0.0f64;
        for dt in frames {
            elapsed += f64::from(dt);
            match pacer.advance(dt) {
                FrameKind::Full { dt } => {
                    prop_assert!(dt >= delay);
                    consumed += f64::from(dt);
                }
                FrameKind::Animation { frac } => {
                    prop_assert!((0.0..1.0).contains(&frac), "frac {}", frac);
                }
            }
        }
        prop_assert!(consumed <= elapsed + 1e-3);
        prop_assert!(elapsed - consumed < f64::from(delay) + 1e-3);
    }

    /// With no frame delay every frame is a full tick.
    #[test]
    fn zero_delay_never_animates(frames in frame_times()) {
        let mut pacer = FramePacer::new(0.0);
        for dt in frames {
            prop_assert_eq!(pacer.advance(dt), FrameKind::Full { dt });
        }
    }

    /// Any valid configuration survives a JSON round trip.
    #[test]
    fn config_json_roundtrip(config in config_strategy()) {
        let json = serde_json::to_string(&config).unwrap();
        let parsed = SimConfig::from_json_str(&json).unwrap();
        prop_assert_eq!(parsed, config);
    }
}
