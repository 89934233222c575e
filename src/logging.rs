//! Logging setup for the provider process.
//!
//! All logs go to **stderr**: stdout carries the handshake line the engine
//! reads to find the gRPC address, so nothing else may be printed there.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `debug`,
//!   `hemmer_provider_mysql=debug`). Executed SQL statements are logged at
//!   `debug`.
//!
//! ```bash
//! # Show every statement the provider sends to the server
//! RUST_LOG=hemmer_provider_mysql=debug ./hemmer-provider-mysql
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Level used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_LEVEL: &str = "info";

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the global subscriber at [`DEFAULT_LOG_LEVEL`].
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_LOG_LEVEL);
}

/// Initialize logging with a custom default level, used when `RUST_LOG` is
/// not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if a subscriber already exists.
///
/// Tests call this freely since only the first call in a process wins.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter(DEFAULT_LOG_LEVEL))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_LEVEL).is_ok());
        assert!(EnvFilter::try_new("hemmer_provider_mysql=debug").is_ok());
        assert!(EnvFilter::try_new("warn,hemmer_provider_mysql::database=debug").is_ok());
    }

    #[test]
    fn test_try_init_is_idempotent() {
        // The first call may or may not win depending on test ordering, but
        // a second call must never panic and must report failure.
        let _ = try_init_logging();
        assert!(!try_init_logging());
    }
}
