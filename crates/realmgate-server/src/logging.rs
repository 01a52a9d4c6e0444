//! Logging initialization
//!
//! Logs go to stderr, human-readable by default or as JSON lines for log
//! shippers. `RUST_LOG` takes precedence over the configured level.

use std::io;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::ServerSettings;

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init(settings: &ServerSettings) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let subscriber = tracing_subscriber::registry().with(filter);

    if settings.log_json {
        subscriber
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .map_err(|e| io::Error::other(e.to_string()))
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_writer(io::stderr))
            .try_init()
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_instead_of_panicking() {
        let settings = ServerSettings {
            log_level: "warn".to_string(),
            ..ServerSettings::default()
        };
        // Whichever call wins, the other reports an error
        let first = init(&settings);
        let second = init(&settings);
        assert!(first.is_err() || second.is_err());
    }
}
