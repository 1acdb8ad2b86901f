//! Logging initialization
//!
//! Installs a global `tracing` subscriber. Output is JSON by default so log
//! lines can be shipped as-is; `pretty` switches to the human-readable
//! formatter for local development. `RUST_LOG` always wins over the
//! configured level.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured level is not a valid filter directive
    #[error("invalid log level '{level}': {message}")]
    InvalidLevel {
        /// Configured level
        level: String,
        /// Parser message
        message: String,
    },

    /// A global subscriber was already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Build the filter used by [`init_logging`]
///
/// Falls back to the configured level when `RUST_LOG` is unset or invalid.
pub fn build_filter(config: &LogConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directives = format!("{},hyper=warn,reqwest=warn,tower=warn", config.level);
    EnvFilter::try_new(&directives).map_err(|e| TelemetryError::InvalidLevel {
        level: config.level.clone(),
        message: e.to_string(),
    })
}

/// Install the global subscriber
pub fn init_logging(config: &LogConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;

    // Option<Layer> is a Layer, so exactly one formatter ends up active
    let (json_layer, pretty_layer) = if config.pretty {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(config.color)
                    .with_target(false),
            ),
        )
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))
}
