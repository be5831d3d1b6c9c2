//! Configuration Loader
//!
//! Layers an optional configuration file under environment overrides using the
//! `config` crate. File format is detected from the extension (TOML, YAML, JSON, ...).
//!
//! Environment overrides use the `HEALTH_CHECKS` prefix and `__` as the nesting
//! separator, e.g. `HEALTH_CHECKS__DEFAULT_MAX_SUBSCRIPTION_QUIET_PERIOD_MS=30000` or
//! `HEALTH_CHECKS__LIVENESS__PATH=/live`.

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::HealthChecksConfig;
use crate::error::Result;

/// Prefix of environment overrides
pub const CONFIG_ENV_PREFIX: &str = "HEALTH_CHECKS";

/// Environment variable naming a configuration file when no path is passed
pub const CONFIG_PATH_ENV: &str = "HEALTH_CHECKS_CONFIG";

/// Load and validate the health checks configuration
///
/// `path` takes precedence over `HEALTH_CHECKS_CONFIG`; with neither, only defaults
/// and environment overrides apply. An explicitly named file must exist.
pub fn load_config(path: Option<&Path>) -> Result<HealthChecksConfig> {
    let file = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

    load_from_sources(file.as_deref(), Environment::with_prefix(CONFIG_ENV_PREFIX).separator("__"))
}

fn load_from_sources(file: Option<&Path>, environment: Environment) -> Result<HealthChecksConfig> {
    let mut builder = Config::builder();
    if let Some(file) = file {
        debug!(path = %file.display(), "Loading health checks configuration file");
        builder = builder.add_source(File::from(file).required(true));
    }

    let config: HealthChecksConfig = builder
        .add_source(environment.try_parsing(true))
        .build()?
        .try_deserialize()?;

    config.validate()?;

    debug!(
        quiet_period_ms = config.default_max_subscription_quiet_period_ms,
        health_path = %config.health_path(),
        updated_health_checks = config.updated_health_checks,
        "Health checks configuration loaded"
    );
    Ok(config)
}
