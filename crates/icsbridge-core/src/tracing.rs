//! Logging setup shared by the one-shot commands and the daemon.
//!
//! `RUST_LOG` always wins. Without it the filter is `icsbridge=<level>`, which
//! keeps reqwest and hyper quiet.
//!
//! ```ignore
//! use icsbridge_core::tracing::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::daemon())?;
//! ```

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Crate prefix every icsbridge target starts with.
const FILTER_PREFIX: &str = "icsbridge";

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
}

/// How log lines are written to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One line per event, for terminals.
    #[default]
    Text,
    /// JSON lines, for the daemon under a supervisor.
    Json,
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level used when neither `RUST_LOG` nor `filter` is set.
    pub level: Level,
    pub format: LogFormat,
    pub timestamps: bool,
    /// File, line and module path on every line.
    pub source_location: bool,
    /// Log span close events, which carry each sync run's duration.
    pub run_spans: bool,
    /// Explicit directive; takes precedence over `RUST_LOG`.
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            timestamps: true,
            source_location: false,
            run_spans: false,
            filter: None,
        }
    }
}

impl TracingConfig {
    /// One-shot command run with `--debug`.
    #[must_use]
    pub fn cli_debug() -> Self {
        Self {
            level: Level::DEBUG,
            timestamps: false,
            source_location: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn daemon() -> Self {
        Self {
            format: LogFormat::Json,
            run_spans: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, directive: impl Into<String>) -> Self {
        self.filter = Some(directive.into());
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, TracingError> {
        match &self.filter {
            Some(directive) => Ok(EnvFilter::try_new(directive)?),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", FILTER_PREFIX, self.level)))),
        }
    }

    fn output_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.run_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(self.source_location)
            .with_line_number(self.source_location)
            .with_target(self.source_location)
            .with_span_events(spans);

        match (self.format, self.timestamps) {
            (LogFormat::Json, _) => layer.json().boxed(),
            (LogFormat::Text, true) => layer.compact().boxed(),
            (LogFormat::Text, false) => layer.compact().without_time().boxed(),
        }
    }
}

/// Installs the global subscriber. Call once at process start.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = config.env_filter()?;
    let subscriber = tracing_subscriber::registry()
        .with(config.output_layer())
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_text_at_info() {
        let config = TracingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Text);
        assert!(config.timestamps);
        assert!(config.filter.is_none());
    }

    #[test]
    fn daemon_logs_json_with_run_spans() {
        let config = TracingConfig::daemon();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.run_spans);
        assert!(!config.source_location);
    }

    #[test]
    fn explicit_filter_is_parsed() {
        let config = TracingConfig::default().with_filter("icsbridge_server=trace");
        assert_eq!(config.filter.as_deref(), Some("icsbridge_server=trace"));
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn debug_preset_can_be_adjusted() {
        let config = TracingConfig::cli_debug()
            .with_level(Level::WARN)
            .with_format(LogFormat::Json);
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.source_location);
        assert!(!config.timestamps);
    }
}
