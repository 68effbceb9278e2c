//! Tracing subscriber setup shared by the binaries

use crate::config::ObservabilityConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    // A second init (tests, repeated setup) keeps the first subscriber.
    let _ = if config.json_logging {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
