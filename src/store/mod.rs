//! Key-value counter store shared by all guards.
//!
//! # Data Flow
//! ```text
//! rate_limit.rs  → incr_window("ratelimit:{tier}:{id}")
//! cooldown.rs    → ttl / set_ex("cooldown:{kind}:{user}:{resource}")
//! session.rs     → get("session:{token}")
//! api_key.rs     → get / set_ex("apikey:{hash}")
//!     → KvStore (memory.rs | redis.rs)
//! ```
//!
//! # Design Decisions
//! - Guards never hold process-local state; everything lives behind `KvStore`
//! - Expiry is TTL based; nothing in the guard layer deletes its own keys
//! - Counters use a single atomic increment-with-expiry primitive

pub mod clock;
pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryStore;

/// Errors surfaced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("value at '{0}' is not a counter")]
    NotACounter(String),
}

/// Result of an atomic window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Counter value after the increment.
    pub count: u64,
    /// Time left until the window key expires.
    pub ttl: Duration,
}

/// Generic get/set/incr/ttl store with per-key expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set `key` to `value`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment the counter at `key`.
    ///
    /// A missing or expired key starts at 1 and expires after `window`.
    /// Later increments keep the existing expiry.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Remaining time to live, `None` when the key is absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;
}
