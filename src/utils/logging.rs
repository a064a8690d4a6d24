//! Logging initialization for the host
//!
//! - RUST_LOG always wins
//! - otherwise the configured filter, otherwise "info"
//! - human-readable output on stderr, honoring NO_COLOR
//! - JSON lines when the `json-logging` feature is enabled and requested
//!
//! ```no_run
//! use modhost::utils::init_logging;
//!
//! init_logging(Some("modhost::module=debug"));
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Resolve the effective filter
fn build_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or("info"))
}

/// Initialize human-readable logging
///
/// Call once at startup; a second call panics inside `tracing-subscriber`, so
/// tests use [`try_init_logging`] instead.
pub fn init_logging(filter: Option<&str>) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(build_filter(filter))
        .init();
}

/// Like [`init_logging`], but a subscriber that is already installed is kept
pub fn try_init_logging(filter: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(false),
        )
        .with(build_filter(filter))
        .try_init()
        .is_ok()
}

/// Initialize JSON logging for log aggregation
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(build_filter(filter))
        .init();
}

/// Initialize logging from the `[logging]` config section
pub fn init_logging_from_config(config: &LoggingConfig) {
    let filter = config.filter.as_deref();

    if config.json_format {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
            return;
        }
        #[cfg(not(feature = "json-logging"))]
        eprintln!("json_format requested but the json-logging feature is disabled");
    }
    init_logging(filter);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_is_idempotent() {
        // Whichever call wins, the second never panics
        let _ = try_init_logging(Some("debug"));
        assert!(!try_init_logging(None));
    }
}
