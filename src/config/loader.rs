//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{Environment, GuardConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply environment overrides, then validate.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GuardConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build configuration from defaults and environment only.
pub fn config_from_env() -> Result<GuardConfig, ConfigError> {
    let mut config = GuardConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay environment variables onto a loaded config.
///
/// `lookup` is injected so tests don't have to mutate the process environment.
pub fn apply_env_overrides<F>(config: &mut GuardConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env) = lookup("APP_ENV").as_deref().and_then(Environment::parse) {
        config.security.environment = env;
    }
    if let Some(secret) = lookup("GUARD_SECRET").filter(|s| !s.is_empty()) {
        config.security.secret = secret;
    }
    if let Some(emails) = lookup("ADMIN_EMAILS") {
        config.security.admin_emails = emails
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_lowercase)
            .collect();
    }
    if let Some(cron) = lookup("CRON_SECRET").filter(|s| !s.is_empty()) {
        config.security.cron_secret = Some(cron);
    }
    if let Some(url) = lookup("CACHE_URL").filter(|s| !s.is_empty()) {
        config.store.url = Some(url);
        config.store.backend = crate::config::schema::StoreBackend::Redis;
    }
    if let Some(addr) = lookup("GUARD_BIND_ADDRESS").filter(|s| !s.is_empty()) {
        config.listener.bind_address = addr;
    }
}
