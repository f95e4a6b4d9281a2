//! Logging setup for the binary
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application. Logs go to stderr so command output on stdout stays
//! machine-readable.

use std::io;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init(level: &str, json: bool) -> Result<(), String> {
    let default_level = parse_log_level(level)?;
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| format!("failed to install logger: {e}"))
}

fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(format!("invalid log level: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert!(parse_log_level("loud").is_err());
    }
}
