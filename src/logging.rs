//! `tracing` subscriber setup for binaries and long-running workers.

use crate::config::LoggingConfig;
use crate::error::{FrbrError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, overrides `config.filter`. Calling this twice is not
/// an error; the second call leaves the first subscriber in place.
///
/// # Errors
///
/// `Config` when the filter directive does not parse.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|err| FrbrError::Config(format!("logging.filter: {err}")))?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // Already installed is fine (tests, embedding applications).
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    Ok(())
}
