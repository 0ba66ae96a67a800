//! Log setup for the binary.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives
pub const LOG_ENV: &str = "ZIPCHECK_LOG";

/// Install the global subscriber, writing to stderr.
///
/// Directives come from `ZIPCHECK_LOG` (e.g. `zipcheck=debug,info`) and
/// default to `default_level`. Calling this twice is harmless.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
