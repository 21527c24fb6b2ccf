//! `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber. `RUST_LOG` takes precedence over
/// `fallback_filter`.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case nothing changes.
pub fn init_logging(fallback_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(fallback_filter).unwrap_or_else(|err| {
            eprintln!("invalid log filter {fallback_filter:?} ({err}), using \"warn\"");
            EnvFilter::new("warn")
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
