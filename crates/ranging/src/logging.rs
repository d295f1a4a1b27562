// Logging setup for hosts embedding the coordinator
// RANGING_LOG_FORMAT picks json or pretty output; RUST_LOG overrides the filter

use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::RangingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = RangingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(RangingError::Configuration(format!(
                "RANGING_LOG_FORMAT must be json or pretty, got {}",
                other
            ))),
        }
    }
}

impl LogFormat {
    /// Format from RANGING_LOG_FORMAT; unset or invalid means JSON
    pub fn from_env() -> Self {
        std::env::var("RANGING_LOG_FORMAT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    fn default_directive(self) -> &'static str {
        match self {
            LogFormat::Json => "ranging=info,warn",
            LogFormat::Pretty => "ranging=debug,info",
        }
    }
}

fn env_filter(format: LogFormat) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format.default_directive()))
}

/// Install a global subscriber. A second call is a no-op.
pub fn init(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter(format));
    let installed = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .json(),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .pretty(),
            )
            .try_init(),
    };

    if installed.is_ok() {
        tracing::info!(?format, "Ranging logging initialized");
    }
}

/// Install the subscriber chosen by RANGING_LOG_FORMAT
pub fn init_from_env() -> LogFormat {
    let format = LogFormat::from_env();
    init(format);
    format
}

/// Structured JSON output
pub fn init_logging() {
    init(LogFormat::Json);
}

/// Human-readable output for development
pub fn init_logging_pretty() {
    init(LogFormat::Pretty);
}
