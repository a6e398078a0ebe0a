//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and cross-field rules.
//! All errors are collected, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GuardConfig, StoreBackend, PLACEHOLDER_SECRET};
use crate::security::rate_limit::Tier;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    for tier in Tier::ALL {
        let limit = config.rate_limit.for_tier(tier);
        if limit.limit == 0 {
            errors.push(ValidationError::new(
                format!("rate_limit.{}.limit", tier.as_str()),
                "must be > 0",
            ));
        }
        if limit.window_secs == 0 {
            errors.push(ValidationError::new(
                format!("rate_limit.{}.window_secs", tier.as_str()),
                "must be > 0",
            ));
        }
    }

    if config.csrf.cookie_name.is_empty() || config.csrf.header_name.is_empty() {
        errors.push(ValidationError::new("csrf", "cookie_name and header_name are required"));
    }

    let security = &config.security;
    if security.secret.is_empty() {
        errors.push(ValidationError::new("security.secret", "must not be empty"));
    }
    if security.environment.is_production() && security.secret == PLACEHOLDER_SECRET {
        errors.push(ValidationError::new(
            "security.secret",
            "placeholder secret is not allowed in production",
        ));
    }
    if security.environment.is_production() && security.admin_emails.is_empty() {
        errors.push(ValidationError::new(
            "security.admin_emails",
            "at least one admin is required in production",
        ));
    }

    if config.store.backend == StoreBackend::Redis && config.store.url.is_none() {
        errors.push(ValidationError::new("store.url", "required for the redis backend"));
    }

    if config.ingestion.max_attempts == 0 {
        errors.push(ValidationError::new("ingestion.max_attempts", "must be >= 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
