//! # Health Checks Configuration
//!
//! Serde-backed construction options for [`crate::HealthChecks`]. Every field has a
//! default, so an empty document (or no file at all) yields the legacy setup:
//! a single `healthy` endpoint at `/_ah/health` and a two-minute quiet period.
//!
//! ## Usage
//!
//! ```rust
//! use health_checks::config::{EndpointSetting, HealthChecksConfig};
//!
//! let config = HealthChecksConfig::default()
//!     .with_updated_health_checks(true)
//!     .with_readiness(EndpointSetting::path("/ready"));
//!
//! assert_eq!(config.readiness_path().as_deref(), Some("/ready"));
//! assert_eq!(config.liveness_path().as_deref(), Some("/liveness_check"));
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{HealthCheckError, Result};

pub use loader::{load_config, CONFIG_ENV_PREFIX, CONFIG_PATH_ENV};

/// Default maximum silence tolerated on a subscription
pub const DEFAULT_MAX_SUBSCRIPTION_QUIET_PERIOD_MS: u64 = 120_000;

/// Legacy aggregate health path
pub const DEFAULT_HEALTH_PATH: &str = "/_ah/health";

/// Liveness path used by the updated scheme
pub const DEFAULT_LIVENESS_PATH: &str = "/liveness_check";

/// Readiness path used by the updated scheme
pub const DEFAULT_READINESS_PATH: &str = "/readiness_check";

/// Detailed endpoint configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub path: Option<String>,
    /// Initial error value; missing or `null` means valid, `true` is rejected
    #[serde(default)]
    pub initial_value: Option<Value>,
}

/// An endpoint given either as a bare path or as a full [`EndpointConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointSetting {
    Path(String),
    Config(EndpointConfig),
}

impl EndpointSetting {
    pub fn path(path: impl Into<String>) -> Self {
        EndpointSetting::Path(path.into())
    }

    pub fn with_initial_value(path: Option<String>, initial_value: Value) -> Self {
        EndpointSetting::Config(EndpointConfig {
            path,
            initial_value: Some(initial_value),
        })
    }

    fn configured_path(&self) -> Option<&str> {
        match self {
            EndpointSetting::Path(path) => Some(path),
            EndpointSetting::Config(config) => config.path.as_deref(),
        }
    }

    fn initial_value(&self) -> Option<&Value> {
        match self {
            EndpointSetting::Path(_) => None,
            EndpointSetting::Config(config) => config.initial_value.as_ref(),
        }
    }
}

/// Construction options for the health checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthChecksConfig {
    pub default_max_subscription_quiet_period_ms: u64,
    pub health: Option<EndpointSetting>,
    pub liveness: Option<EndpointSetting>,
    pub readiness: Option<EndpointSetting>,
    /// Adds `/liveness_check` and `/readiness_check` next to the legacy endpoint
    pub updated_health_checks: bool,
    /// `None` derives the flag from the `DEBUG` environment variable
    pub verbose_error_responses: Option<bool>,
}

impl Default for HealthChecksConfig {
    fn default() -> Self {
        Self {
            default_max_subscription_quiet_period_ms: DEFAULT_MAX_SUBSCRIPTION_QUIET_PERIOD_MS,
            health: None,
            liveness: None,
            readiness: None,
            updated_health_checks: false,
            verbose_error_responses: None,
        }
    }
}

impl HealthChecksConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_max_subscription_quiet_period_ms(mut self, quiet_period_ms: u64) -> Self {
        self.default_max_subscription_quiet_period_ms = quiet_period_ms;
        self
    }

    pub fn with_health(mut self, setting: EndpointSetting) -> Self {
        self.health = Some(setting);
        self
    }

    pub fn with_liveness(mut self, setting: EndpointSetting) -> Self {
        self.liveness = Some(setting);
        self
    }

    pub fn with_readiness(mut self, setting: EndpointSetting) -> Self {
        self.readiness = Some(setting);
        self
    }

    pub fn with_updated_health_checks(mut self, enabled: bool) -> Self {
        self.updated_health_checks = enabled;
        self
    }

    pub fn with_verbose_error_responses(mut self, verbose: bool) -> Self {
        self.verbose_error_responses = Some(verbose);
        self
    }

    pub fn default_quiet_period(&self) -> Duration {
        Duration::from_millis(self.default_max_subscription_quiet_period_ms)
    }

    /// Path of the legacy `healthy` endpoint
    ///
    /// A detailed setting without a path keeps the default path.
    pub fn health_path(&self) -> String {
        self.health
            .as_ref()
            .and_then(EndpointSetting::configured_path)
            .unwrap_or(DEFAULT_HEALTH_PATH)
            .to_string()
    }

    pub fn liveness_path(&self) -> Option<String> {
        self.optional_path(self.liveness.as_ref(), DEFAULT_LIVENESS_PATH)
    }

    pub fn readiness_path(&self) -> Option<String> {
        self.optional_path(self.readiness.as_ref(), DEFAULT_READINESS_PATH)
    }

    fn optional_path(&self, setting: Option<&EndpointSetting>, updated_default: &str) -> Option<String> {
        setting
            .and_then(EndpointSetting::configured_path)
            .map(str::to_string)
            .or_else(|| self.updated_health_checks.then(|| updated_default.to_string()))
    }

    pub fn health_initial_value(&self) -> Option<Value> {
        self.health.as_ref().and_then(EndpointSetting::initial_value).cloned()
    }

    pub fn liveness_initial_value(&self) -> Option<Value> {
        self.liveness.as_ref().and_then(EndpointSetting::initial_value).cloned()
    }

    pub fn readiness_initial_value(&self) -> Option<Value> {
        self.readiness.as_ref().and_then(EndpointSetting::initial_value).cloned()
    }

    /// Resolve the verbose flag, falling back to a non-empty `DEBUG` variable
    pub fn resolve_verbose_error_responses(&self) -> bool {
        self.verbose_error_responses.unwrap_or_else(debug_mode_enabled)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_max_subscription_quiet_period_ms == 0 {
            return Err(HealthCheckError::configuration(
                "default_max_subscription_quiet_period_ms must be greater than 0",
            ));
        }

        let paths = [
            ("health", Some(self.health_path())),
            ("liveness", self.liveness_path()),
            ("readiness", self.readiness_path()),
        ];
        for (name, path) in paths {
            if let Some(path) = path {
                if !path.starts_with('/') {
                    return Err(HealthCheckError::configuration(format!(
                        "{name} path must start with '/': {path}"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn debug_mode_enabled() -> bool {
    std::env::var("DEBUG").map(|value| !value.is_empty()).unwrap_or(false)
}
