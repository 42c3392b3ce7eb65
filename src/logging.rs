//! # Structured Logging Module
//!
//! Environment-aware structured logging for tracing batches, sequences, and
//! lifecycle transitions through the orchestration engine.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// The filter comes from `SEARCHWORK_LOG` (falling back to `RUST_LOG`, then
/// `info`). Setting `SEARCHWORK_LOG_JSON=1` switches to JSON output for log
/// collectors. Safe to call from multiple entry points: later calls and an
/// already-installed global subscriber are both tolerated.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = std::env::var("SEARCHWORK_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());
        let json = std::env::var("SEARCHWORK_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        let subscriber = tracing_subscriber::registry();
        let result = if json {
            subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true)
                        .with_filter(EnvFilter::new(filter)),
                )
                .try_init()
        } else {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_filter(EnvFilter::new(filter)),
                )
                .try_init()
        };

        if result.is_err() {
            // A global subscriber is already set; continue with it.
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}
