//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::security::rate_limit::Tier;

/// Placeholder secret shipped in the defaults. Rejected in production.
pub const PLACEHOLDER_SECRET: &str = "CHANGE_ME_IN_PRODUCTION";

/// Root configuration for the guard service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Per-tier rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Double-submit cookie settings.
    pub csrf: CsrfConfig,

    /// Secrets, allowlists and request hardening.
    pub security: SecurityConfig,

    /// Counter/cache store backend.
    pub store: StoreConfig,

    /// Admin audit log persistence.
    pub audit: AuditConfig,

    /// Retry policy for ingestion jobs.
    pub ingestion: IngestionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Ceiling and window for one caller class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TierLimit {
    /// Requests allowed per window.
    pub limit: u64,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Allow requests when the store is unreachable.
    pub fail_open: bool,
}

impl TierLimit {
    pub const fn per_minute(limit: u64) -> Self {
        Self {
            limit,
            window_secs: 60,
            fail_open: true,
        }
    }
}

impl Default for TierLimit {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Take the client IP from the first `X-Forwarded-For` hop.
    /// Only enable behind a trusted reverse proxy.
    pub trust_forwarded_for: bool,

    pub anon: TierLimit,
    pub auth: TierLimit,
    pub premium: TierLimit,
    pub admin: TierLimit,
}

impl RateLimitConfig {
    pub fn for_tier(&self, tier: Tier) -> &TierLimit {
        match tier {
            Tier::Anon => &self.anon,
            Tier::Auth => &self.auth,
            Tier::Premium => &self.premium,
            Tier::Admin => &self.admin,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_for: false,
            anon: TierLimit::per_minute(60),
            auth: TierLimit::per_minute(120),
            premium: TierLimit::per_minute(600),
            admin: TierLimit::per_minute(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    pub cookie_name: String,
    pub header_name: String,
    pub max_age_secs: u64,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: "csrf-token".to_string(),
            header_name: "x-csrf-token".to_string(),
            max_age_secs: 24 * 3600,
        }
    }
}

/// Deployment environment. Production turns on secure cookies and
/// refuses placeholder secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub environment: Environment,

    /// Shared secret for API key hashing.
    pub secret: String,

    /// E-mail addresses allowed into the admin console.
    pub admin_emails: Vec<String>,

    /// Bearer secret for cron/machine endpoints. Unset disables them.
    pub cron_secret: Option<String>,

    /// Name of the session cookie written by the auth service.
    pub session_cookie: String,

    /// Maximum body size in bytes.
    pub max_body_size: usize,

    /// Start in read-only mode.
    pub read_only: bool,
}

impl SecurityConfig {
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(email.trim()))
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            // WARNING: This is a placeholder! Change this in production.
            secret: PLACEHOLDER_SECRET.to_string(),
            admin_emails: Vec::new(),
            cron_secret: None,
            session_cookie: "session".to_string(),
            max_body_size: 1024 * 1024, // 1MB
            read_only: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Connection URL for the redis backend.
    pub url: Option<String>,

    /// How often the memory backend purges expired keys.
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON-lines file the audit chain is persisted to. Memory only when unset.
    pub path: Option<String>,
}

/// Retry configuration for ingestion jobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Maximum number of attempts per job run.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: GuardConfig = toml::from_str(
            r#"
            [rate_limit.admin]
            limit = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.admin.limit, 5);
        assert_eq!(config.rate_limit.admin.window_secs, 60);
        assert_eq!(config.rate_limit.anon, TierLimit::per_minute(60));
        assert_eq!(config.csrf.cookie_name, "csrf-token");
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_tier_lookup() {
        let config = RateLimitConfig::default();
        assert_eq!(config.for_tier(Tier::Admin).limit, 10);
        assert!(config.for_tier(Tier::Premium).limit > config.for_tier(Tier::Auth).limit);
        assert!(config.for_tier(Tier::Auth).limit > config.for_tier(Tier::Anon).limit);
    }

    #[test]
    fn test_admin_email_match_is_case_insensitive() {
        let security = SecurityConfig {
            admin_emails: vec!["Ops@Example.com".into()],
            ..Default::default()
        };
        assert!(security.is_admin_email("ops@example.com"));
        assert!(!security.is_admin_email("someone@example.com"));
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("PROD"), Some(Environment::Production));
        assert_eq!(Environment::parse("development"), Some(Environment::Development));
        assert_eq!(Environment::parse("staging"), None);
    }
}
