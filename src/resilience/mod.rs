//! Resilience helpers for calls into external collaborators.
//!
//! # Design Decisions
//! - Only collaborators (ingestion jobs) are retried, never the guards
//! - Jittered exponential backoff prevents thundering herd
//! - Callers decide which errors are worth retrying

pub mod retry;

pub use retry::RetryPolicy;
