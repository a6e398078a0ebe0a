//! Security subsystem: the guard layer every mutating endpoint composes.
//!
//! # Data Flow
//! ```text
//! User mutation:
//!     → session.rs (load principal, if any)
//!     → rate_limit.rs (tier from principal, else client IP)
//!     → session.rs (require principal)
//!     → csrf.rs (cookie == header)
//!     → read_only.rs
//!     → cooldown.rs (checked and committed by the handler)
//!
//! Admin mutation:
//!     → rate_limit.rs (admin tier, client IP)
//!     → session.rs + admin allowlist
//!     → csrf.rs → read_only.rs → handler → audit log
//!
//! Machine call:
//!     → api_key.rs → rate_limit.rs (key owner) → read_only.rs
//!
//! Cron call:
//!     → rate_limit.rs (admin tier) → cron.rs → read_only.rs
//! ```
//!
//! # Design Decisions
//! - Guards decide with result values; only the middleware turns them into responses
//! - Rate limiting and cooldown checks fail open on store outages, CSRF and auth fail closed
//! - Secrets are compared in constant time

pub mod api_key;
pub mod cooldown;
pub mod cron;
pub mod csrf;
pub mod rate_limit;
pub mod read_only;
pub mod session;
