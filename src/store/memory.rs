//! In-process store backed by `DashMap`.
//!
//! Suitable for a single instance and for tests. State is not shared
//! between processes, so multi-instance deployments use the Redis store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::store::{Clock, KvStore, StoreError, SystemClock, WindowCount};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at_ms: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }
}

/// Thread-safe key-value store with lazy TTL expiry.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Periodically purge expired entries so idle keys do not accumulate.
    pub fn start_sweeper(&self, every: Duration) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Purged expired store entries");
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        Ok(self.entries.get(key).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms: Some(now + ttl.as_millis() as u64),
            },
        );
        Ok(())
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = self.clock.now_ms();
        let window_ms = window.as_millis() as u64;

        // The entry guard holds the shard lock, so read-modify-write is atomic.
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at_ms: Some(now + window_ms),
        });
        if entry.is_expired(now) {
            *entry = Entry {
                value: "0".to_string(),
                expires_at_ms: Some(now + window_ms),
            };
        }

        let count = entry
            .value
            .parse::<u64>()
            .map_err(|_| StoreError::NotACounter(key.to_string()))?
            + 1;
        entry.value = count.to_string();
        let expires_at = *entry.expires_at_ms.get_or_insert(now + window_ms);

        Ok(WindowCount {
            count,
            ttl: Duration::from_millis(expires_at.saturating_sub(now)),
        })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now_ms();
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        Ok(self.entries.get(key).map(|e| match e.expires_at_ms {
            Some(at) => Duration::from_millis(at.saturating_sub(now)),
            None => Duration::MAX,
        }))
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
