//! Admin audit log.
//!
//! # Data Flow
//! ```text
//! admin handler
//!     → AuditLog::record (spawned, never blocks or fails the action)
//!     → AuditStore::append (tail read + link + write under one lock)
//!     → chain.rs (prev_hash = digest of previous entry)
//!
//! GET /admin/audit/verify
//!     → AuditStore::all (re-read from disk for the file store)
//!     → chain::verify_chain
//! ```

pub mod chain;
pub mod store;

use std::sync::Arc;

use tokio::task::JoinHandle;

pub use chain::{verify_chain, AuditDraft, AuditEntry, ChainVerification};
pub use store::{AuditError, AuditStore, FileAuditStore, MemoryAuditStore};

use crate::observability::metrics;

/// Handle admin handlers use to record their actions.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append and wait for the result.
    pub async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, AuditError> {
        let action = draft.action.clone();
        match self.store.append(draft).await {
            Ok(entry) => {
                metrics::record_audit_append();
                tracing::info!(
                    id = %entry.id,
                    actor = %entry.actor_user_id,
                    action = %entry.action,
                    entity = %format!("{}:{}", entry.entity_type, entry.entity_id),
                    "Audit entry recorded"
                );
                Ok(entry)
            }
            Err(e) => {
                metrics::record_audit_append_failure();
                tracing::error!(action = %action, error = %e, "Failed to append audit entry");
                Err(e)
            }
        }
    }

    /// Fire-and-forget append. Failures are logged, never returned.
    pub fn record(&self, draft: AuditDraft) -> JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            let _ = log.append(draft).await;
        })
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        self.store.recent(limit).await
    }

    /// Walk the stored chain. A line the store cannot parse fails
    /// verification instead of erroring.
    pub async fn verify(&self) -> Result<ChainVerification, AuditError> {
        match self.store.all().await {
            Ok(entries) => Ok(verify_chain(&entries)),
            Err(AuditError::Corrupt { line, source }) => {
                tracing::error!(line, error = %source, "Audit log has an unreadable line");
                Ok(ChainVerification {
                    valid: false,
                    verified_entries: 0,
                    first_break: None,
                    unreadable_line: Some(line),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl AuditStore for BrokenStore {
        async fn append(&self, _: AuditDraft) -> Result<AuditEntry, AuditError> {
            Err(AuditError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
        async fn recent(&self, _: usize) -> Result<Vec<AuditEntry>, AuditError> {
            Ok(Vec::new())
        }
        async fn all(&self) -> Result<Vec<AuditEntry>, AuditError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_record_swallows_store_failures() {
        let log = AuditLog::new(Arc::new(BrokenStore));
        let handle = log.record(AuditDraft::new("admin", "read_only.set", "flag", "read_only"));
        // The task completes without panicking even though the store failed.
        handle.await.unwrap();
        assert!(log.append(AuditDraft::new("a", "b", "c", "d")).await.is_err());
    }

    #[tokio::test]
    async fn test_sequential_appends_verify() {
        let log = AuditLog::new(Arc::new(MemoryAuditStore::new(Arc::new(ManualClock::new(0)))));
        for i in 0..3 {
            log.append(AuditDraft::new("admin", "api_key.create", "api_key", i.to_string()))
                .await
                .unwrap();
        }
        let check = log.verify().await.unwrap();
        assert!(check.valid);
        assert_eq!(check.verified_entries, 3);
    }

    async fn file_log_with_three_entries() -> (tempfile::TempDir, std::path::PathBuf, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let store = FileAuditStore::open(&path, Arc::new(ManualClock::new(1_700_000_000_000)))
            .await
            .unwrap();
        let log = AuditLog::new(Arc::new(store));
        for i in 0..3 {
            log.append(AuditDraft::new("admin", "api_key.create", "api_key", i.to_string()))
                .await
                .unwrap();
        }
        (dir, path, log)
    }

    #[tokio::test]
    async fn test_verify_detects_file_edited_while_running() {
        let (_dir, path, log) = file_log_with_three_entries().await;
        assert!(log.verify().await.unwrap().valid);

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let mut forged: AuditEntry = serde_json::from_str(&lines[1]).unwrap();
        forged.entity_id = "forged".into();
        lines[1] = serde_json::to_string(&forged).unwrap();
        let third: AuditEntry = serde_json::from_str(&lines[2]).unwrap();
        tokio::fs::write(&path, lines.join("\n") + "\n").await.unwrap();

        let check = log.verify().await.unwrap();
        assert!(!check.valid);
        assert_eq!(check.verified_entries, 2);
        assert_eq!(check.first_break, Some(third.id));

        let recent = log.recent(3).await.unwrap();
        assert_eq!(recent[1].entity_id, "forged");
    }

    #[tokio::test]
    async fn test_verify_reports_unreadable_line() {
        let (_dir, path, log) = file_log_with_three_entries().await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let mut lines: Vec<&str> = content.lines().collect();
        lines[1] = "{\"truncated\": ";
        tokio::fs::write(&path, lines.join("\n") + "\n").await.unwrap();

        let check = log.verify().await.unwrap();
        assert!(!check.valid);
        assert_eq!(check.unreadable_line, Some(2));
        // Browsing still works around the damaged line.
        assert_eq!(log.recent(10).await.unwrap().len(), 2);
    }
}
