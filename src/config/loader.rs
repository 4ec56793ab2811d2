//! Configuration loading
//!
//! Loads the policy file, overlays the defaults, and validates the result.
//! Callers always receive a merged configuration; the raw file never
//! travels further into the crate.

use std::path::Path;

use tracing::{debug, info};

use super::merge::merge_with_defaults;
use super::types::Config;
use crate::error::ConfigError;

/// Load, merge, and validate a JSON policy file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails
/// validation.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let config = load_config_str(&contents)?;

    info!(
        "Configuration loaded: inbound={} outbound={} dns={}",
        config.redirect.inbound.enabled,
        config.redirect.outbound.enabled,
        config.redirect.dns.enabled,
    );

    Ok(config)
}

/// Load, merge, and validate a configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let config = merge_with_defaults(config);
    config.validate()?;

    Ok(config)
}
