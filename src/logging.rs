//! Logging Setup
//!
//! Structured, async-aware logging built on `tracing` / `tracing-subscriber`:
//! environment-based filtering, and pretty, compact, or JSON output. The
//! controller itself only emits `tracing` events; initialization lives here so
//! the embedding application owns the subscriber's lifecycle instead of a
//! process-wide static being set up behind its back.

use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::Settings;
use crate::error::{SessionError, SessionResult};

/// Output format for log events.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Pretty-printed with colors (development).
    Pretty,
    /// Compact single-line output (production).
    Compact,
    /// JSON for log aggregation.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: OutputFormat,
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Parse a textual log level.
pub fn parse_log_level(level: &str) -> SessionResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(SessionError::Configuration(format!(
            "invalid log level '{other}'"
        ))),
    }
}

/// Initialize the global subscriber from [`Settings`].
pub fn init_from_settings(settings: &Settings) -> SessionResult<()> {
    let level = parse_log_level(&settings.log_level)?;
    init(LoggingConfig::new(level))
}

/// Initialize the global subscriber.
///
/// Idempotent: a second call returns Ok(()) instead of failing, which keeps
/// test binaries that initialize logging per-test working.
pub fn init(config: LoggingConfig) -> SessionResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    let fmt_layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer().json().with_filter(env_filter).boxed(),
    };

    match tracing_subscriber::registry().with(fmt_layer).try_init() {
        Ok(()) => Ok(()),
        // A subscriber is already installed; keep it.
        Err(_) => Ok(()),
    }
}
