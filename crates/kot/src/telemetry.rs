//! Tracing subscriber setup for controller binaries
//!
//! Installs a `tracing-subscriber` registry with:
//! - an `EnvFilter` taken from `RUST_LOG`, or a default tuned for controllers
//! - JSON structured output (`KOT_LOG_FORMAT=json`) or plain text

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when neither the config nor `RUST_LOG` sets one
pub const DEFAULT_FILTER: &str = "info,kot=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directives could not be parsed
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber was already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for [`init_tracing`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directives; `None` falls back to `RUST_LOG`, then [`DEFAULT_FILTER`]
    pub filter: Option<String>,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: None,
            json: std::env::var("KOT_LOG_FORMAT").is_ok_and(|format| format == "json"),
        }
    }
}

impl TelemetryConfig {
    fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        match &self.filter {
            Some(directives) => EnvFilter::try_new(directives)
                .map_err(|e| TelemetryError::Filter(e.to_string())),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
        }
    }
}

/// Install the global tracing subscriber
///
/// # Example
///
/// ```ignore
/// use kot::telemetry::{init_tracing, TelemetryConfig};
///
/// init_tracing(TelemetryConfig::default())?;
/// ```
pub fn init_tracing(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = config.env_filter()?;

    // Option<Layer> implements Layer, so only one of the two formats is active
    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })
}
