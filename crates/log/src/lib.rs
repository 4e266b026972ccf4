//! # Warden Log
//!
//! Structured logging setup built on `tracing` + `tracing-subscriber`. This
//! crate owns process-wide subscriber initialization; individual crates
//! just `use tracing::{debug, info, warn, error}` and instrument their own
//! spans — re-exported here so call sites can write `warden_log::info!`
//! interchangeably with `tracing::info!`.

pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format for the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, ANSI-colored — the default for interactive use.
    #[default]
    Pretty,
    /// Newline-delimited JSON — for ingestion by a log aggregator.
    Json,
}

/// Logging configuration resolved once at process start.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format.
    pub format: LogFormat,
    /// Default filter directive applied when `RUST_LOG` is unset.
    pub default_directive: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_directive: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// The preset used by `warden-sandbox`'s integration tests and examples:
    /// pretty output, debug-level for the crate under test.
    #[must_use]
    pub fn test_preset() -> Self {
        Self {
            format: LogFormat::Pretty,
            default_directive: "warden=debug,warn".to_string(),
        }
    }

    /// The preset for production deployments: JSON lines on stdout, info
    /// level unless overridden by `RUST_LOG`.
    #[must_use]
    pub fn production_preset() -> Self {
        Self {
            format: LogFormat::Json,
            default_directive: "info".to_string(),
        }
    }
}

/// Installs the global `tracing` subscriber. Call once, at process start.
/// Safe to call more than once in tests — a second call is a no-op.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_ansi(true))
            .try_init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init(),
    };

    // `try_init` fails if a global subscriber is already set; that is
    // expected when `init` is called from more than one test in the same
    // process and is not an error worth surfacing.
    let _ = result;
}
