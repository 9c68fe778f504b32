use tracing::Level;

use crate::config::LoggingConfig;

/// Parse a level name, falling back to `info`
pub fn parse_level(name: &str) -> Level {
    name.trim().parse().unwrap_or(Level::INFO)
}

/// Install the global fmt subscriber.
///
/// Returns false if a subscriber was already installed, which is expected
/// when the host set up its own.
pub fn init_logging(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(parse_level(&config.level))
        .with_target(config.with_target)
        .try_init()
        .is_ok()
}
