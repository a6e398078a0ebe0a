//! Per-user cooldowns on repeatable actions.
//!
//! A key `cooldown:{kind}:{user}:{resource}` existing in the store means the
//! action is blocked until it expires. Commit only after the action succeeded
//! so a failed attempt can be retried right away.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::observability::metrics;
use crate::store::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownKind {
    /// Claiming a company profile.
    Claim,
    /// Submitting a data correction.
    Submission,
}

impl CooldownKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CooldownKind::Claim => "claim",
            CooldownKind::Submission => "submission",
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(cooldown_seconds(*self))
    }
}

impl fmt::Display for CooldownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CooldownKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claim" => Ok(CooldownKind::Claim),
            "submission" => Ok(CooldownKind::Submission),
            other => Err(format!("unknown cooldown kind '{other}'")),
        }
    }
}

pub fn cooldown_seconds(kind: CooldownKind) -> u64 {
    match kind {
        CooldownKind::Claim => 30 * 24 * 3600,
        CooldownKind::Submission => 7 * 24 * 3600,
    }
}

pub fn cooldown_key(kind: CooldownKind, user_id: &str, resource_id: &str) -> String {
    format!("cooldown:{}:{}:{}", kind.as_str(), user_id, resource_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CooldownStatus {
    pub ok: bool,
    pub remaining_secs: u64,
}

impl CooldownStatus {
    const READY: CooldownStatus = CooldownStatus {
        ok: true,
        remaining_secs: 0,
    };
}

pub struct CooldownGuard {
    store: Arc<dyn KvStore>,
}

impl CooldownGuard {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Whether `user_id` may perform `kind` on `resource_id` now.
    ///
    /// A store outage allows the action; the error is logged.
    pub async fn check(&self, kind: CooldownKind, user_id: &str, resource_id: &str) -> CooldownStatus {
        let key = cooldown_key(kind, user_id, resource_id);
        match self.store.ttl(&key).await {
            Ok(Some(ttl)) if !ttl.is_zero() => {
                // A key with no expiry reports `Duration::MAX`.
                let ttl = ttl.min(kind.duration());
                let remaining_secs = u64::try_from(ttl.as_millis().div_ceil(1000)).unwrap_or(u64::MAX);
                metrics::record_cooldown_blocked(kind.as_str());
                tracing::debug!(kind = %kind, user_id, resource_id, remaining_secs, "Cooldown active");
                CooldownStatus {
                    ok: false,
                    remaining_secs,
                }
            }
            Ok(_) => CooldownStatus::READY,
            Err(e) => {
                metrics::record_store_error("cooldown");
                tracing::error!(kind = %kind, error = %e, "Cooldown check failed, allowing");
                CooldownStatus::READY
            }
        }
    }

    /// Start the cooldown. Failures are logged and swallowed.
    pub async fn commit(&self, kind: CooldownKind, user_id: &str, resource_id: &str) {
        let key = cooldown_key(kind, user_id, resource_id);
        if let Err(e) = self.store.set_ex(&key, "1", kind.duration()).await {
            metrics::record_store_error("cooldown");
            tracing::error!(kind = %kind, user_id, resource_id, error = %e, "Failed to commit cooldown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore, StoreError, WindowCount};
    use async_trait::async_trait;

    /// Every key exists and never expires.
    struct PersistentKeys;

    #[async_trait]
    impl KvStore for PersistentKeys {
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(Some("1".into()))
        }
        async fn set_ex(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            Ok(())
        }
        async fn incr_window(&self, _: &str, _: Duration) -> Result<WindowCount, StoreError> {
            Err(StoreError::NotACounter("cooldown".into()))
        }
        async fn ttl(&self, _: &str) -> Result<Option<Duration>, StoreError> {
            Ok(Some(Duration::MAX))
        }
        async fn del(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn guard() -> (CooldownGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        (CooldownGuard::new(store), clock)
    }

    #[test]
    fn test_key_and_durations() {
        assert_eq!(cooldown_key(CooldownKind::Claim, "u1", "c1"), "cooldown:claim:u1:c1");
        assert_eq!(cooldown_seconds(CooldownKind::Claim), 2_592_000);
        assert_eq!(cooldown_seconds(CooldownKind::Submission), 604_800);
        assert_eq!("submission".parse::<CooldownKind>(), Ok(CooldownKind::Submission));
        assert!("vote".parse::<CooldownKind>().is_err());
    }

    #[tokio::test]
    async fn test_check_after_commit_blocks_until_expiry() {
        let (guard, clock) = guard();
        assert!(guard.check(CooldownKind::Claim, "u1", "c1").await.ok);

        guard.commit(CooldownKind::Claim, "u1", "c1").await;
        let blocked = guard.check(CooldownKind::Claim, "u1", "c1").await;
        assert!(!blocked.ok);
        assert_eq!(blocked.remaining_secs, 2_592_000);

        clock.advance(Duration::from_secs(2_592_000 - 10));
        let almost = guard.check(CooldownKind::Claim, "u1", "c1").await;
        assert_eq!(almost.remaining_secs, 10);

        clock.advance(Duration::from_secs(10));
        assert!(guard.check(CooldownKind::Claim, "u1", "c1").await.ok);
    }

    #[tokio::test]
    async fn test_cooldowns_are_scoped_per_tuple() {
        let (guard, _) = guard();
        guard.commit(CooldownKind::Submission, "u1", "c1").await;

        assert!(!guard.check(CooldownKind::Submission, "u1", "c1").await.ok);
        assert!(guard.check(CooldownKind::Submission, "u2", "c1").await.ok);
        assert!(guard.check(CooldownKind::Submission, "u1", "c2").await.ok);
        assert!(guard.check(CooldownKind::Claim, "u1", "c1").await.ok);
    }

    #[tokio::test]
    async fn test_key_without_expiry_blocks_for_full_duration() {
        let guard = CooldownGuard::new(Arc::new(PersistentKeys));

        let status = guard.check(CooldownKind::Submission, "u1", "c1").await;
        assert!(!status.ok);
        assert_eq!(status.remaining_secs, 604_800);
    }
}
