//! # Structured Logging Module
//!
//! Two halves: an optional process-wide `tracing` subscriber setup for binaries that
//! embed the health checks, and the [`HealthLogger`] capability that is injected into
//! every component that logs. Nothing in the library reaches for a global logger.

use parking_lot::Mutex;
use std::fmt;
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Honours `RUST_LOG` when set, otherwise picks a level from the detected environment.
/// `HEALTH_CHECKS_LOG_FORMAT=json` switches the console output to JSON lines.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let json_output = std::env::var("HEALTH_CHECKS_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let console_layer = if json_output {
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            tracing_fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A host application may already own the global subscriber
        if tracing_subscriber::registry().with(console_layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json_output,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("HEALTH_CHECKS_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Logging capability handed to the health check components
pub trait HealthLogger: Send + Sync + fmt::Debug {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default logger, forwarding to `tracing` with a component field
#[derive(Debug, Clone)]
pub struct TracingLogger {
    component: &'static str,
}

impl TracingLogger {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("health_checks")
    }
}

impl HealthLogger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(component = self.component, "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(component = self.component, "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(component = self.component, "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(component = self.component, "{message}");
    }
}

/// Logger that keeps every line in memory
///
/// Useful for asserting on what was reported and at which severity.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded lines in order
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().clone()
    }

    /// Messages recorded at exactly `level`
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(line_level, _)| *line_level == level)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn count(&self, level: Level) -> usize {
        self.lines.lock().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    fn record(&self, level: Level, message: &str) {
        self.lines.lock().push((level, message.to_string()));
    }
}

impl HealthLogger for MemoryLogger {
    fn debug(&self, message: &str) {
        self.record(Level::DEBUG, message);
    }

    fn info(&self, message: &str) {
        self.record(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.record(Level::WARN, message);
    }

    fn error(&self, message: &str) {
        self.record(Level::ERROR, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_memory_logger_records_levels() {
        let logger = MemoryLogger::new();
        logger.error("first");
        logger.warn("second");
        logger.error("third");

        assert_eq!(logger.count(Level::ERROR), 2);
        assert_eq!(logger.messages_at(Level::WARN), vec!["second".to_string()]);
        assert_eq!(logger.lines().len(), 3);

        logger.clear();
        assert!(logger.lines().is_empty());
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        TracingLogger::default().info("logging initialized twice");
    }
}
