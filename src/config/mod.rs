//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, apply env overrides)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → rate-limit tiers swapped atomically; everything else needs a restart
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Secrets come from the environment in production (APP_ENV, GUARD_SECRET, ...)
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AuditConfig, CsrfConfig, Environment, GuardConfig, IngestionConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, RateLimitConfig, SecurityConfig, StoreBackend, StoreConfig,
    TierLimit,
};
