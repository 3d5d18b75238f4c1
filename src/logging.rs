//! Process-wide `tracing` subscriber for the CLI.
//!
//! Log lines go to stderr so command output on stdout stays machine-readable.
//! `RUST_LOG` takes precedence over the configured filter.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogFormat;

/// Resolve the filter: `RUST_LOG` if set and valid, else `configured`.
pub fn build_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init(filter: &str, format: LogFormat) -> Result<()> {
    let pretty = (format == LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });
    let json = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(true)
    });

    tracing_subscriber::registry()
        .with(build_filter(filter))
        .with(pretty)
        .with(json)
        .try_init()
        .context("Failed to install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configured_filter_falls_back() {
        // An unparsable directive must not prevent startup.
        let filter = build_filter("feature_tracker=[[[");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn test_configured_filter_is_used() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = build_filter("feature_tracker=debug");
        assert!(filter.to_string().contains("feature_tracker=debug"));
    }

    #[test]
    fn test_second_init_is_an_error_not_a_panic() {
        let first = init("warn", LogFormat::Json);
        let second = init("warn", LogFormat::Pretty);
        // At most one subscriber can be installed per process.
        assert!(first.is_err() || second.is_err());
    }
}
