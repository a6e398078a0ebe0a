//! Durable storage for the audit chain.
//!
//! `append` reads the tail and writes the new entry under one lock, so
//! concurrent admin actions can never link two entries to the same tail.
//! A failed file write is truncated away before the lock is released.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::audit::chain::{verify_chain, AuditDraft, AuditEntry};
use crate::store::Clock;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit log line {line} is corrupt: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },

    #[error("failed to encode audit entry: {0}")]
    Encode(serde_json::Error),

    #[error("audit write failed and left a partial record: {0}")]
    Torn(std::io::Error),
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Link `draft` to the current tail and persist it, atomically.
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, AuditError>;

    /// Up to `limit` entries, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, AuditError>;

    /// Every entry, oldest first.
    async fn all(&self) -> Result<Vec<AuditEntry>, AuditError>;
}

/// Creation time for the next entry. Never earlier than the tail, so
/// creation order and chain order agree.
fn next_timestamp(clock: &dyn Clock, tail: Option<&AuditEntry>) -> DateTime<Utc> {
    let now = Utc
        .timestamp_millis_opt(clock.now_ms() as i64)
        .single()
        .unwrap_or_else(Utc::now);
    match tail {
        Some(t) if t.created_at > now => t.created_at,
        _ => now,
    }
}

fn newest_first(entries: &[AuditEntry], limit: usize) -> Vec<AuditEntry> {
    entries.iter().rev().take(limit).cloned().collect()
}

/// Audit store kept in memory only.
pub struct MemoryAuditStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, AuditError> {
        let mut entries = self.entries.lock().await;
        let created_at = next_timestamp(self.clock.as_ref(), entries.last());
        let entry = AuditEntry::link(draft, entries.last(), created_at);
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(newest_first(&self.entries.lock().await, limit))
    }

    async fn all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.entries.lock().await.clone())
    }
}

/// Audit store persisted as JSON lines, one entry per line.
///
/// Reads always go back to the file, so verification sees what is on disk
/// rather than what this process last wrote.
pub struct FileAuditStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    tail: Mutex<FileTail>,
}

struct FileTail {
    last: Option<AuditEntry>,
    /// The file may end mid-record; the next write starts on a new line.
    torn: bool,
}

impl FileAuditStore {
    /// Open or create the log. Unreadable lines are logged and skipped so a
    /// damaged file never keeps the service from starting.
    pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let content = read_log(&path).await?;
        let entries = parse_lines_lenient(&content);

        let check = verify_chain(&entries);
        if check.valid {
            tracing::info!(path = ?path, entries = entries.len(), "Loaded audit log");
        } else {
            tracing::error!(
                path = ?path,
                first_break = ?check.first_break,
                "Audit chain on disk does not verify"
            );
        }

        let torn = !content.is_empty() && !content.ends_with('\n');
        Ok(Self {
            path,
            clock,
            tail: Mutex::new(FileTail {
                last: entries.into_iter().last(),
                torn,
            }),
        })
    }

    async fn write_line(&self, line: &[u8]) -> Result<(), AuditError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let len = file.metadata().await?.len();

        let written = async {
            file.write_all(line).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            // Drop the partial record so the next append lands on a clean line.
            if let Err(truncate) = file.set_len(len).await {
                tracing::error!(error = %truncate, "Failed to truncate partial audit record");
                return Err(AuditError::Torn(e));
            }
            return Err(e.into());
        }
        Ok(())
    }
}

async fn read_log(path: &Path) -> Result<String, AuditError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

fn parse_lines(content: &str) -> impl Iterator<Item = Result<AuditEntry, AuditError>> + '_ {
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l).map_err(|source| AuditError::Corrupt { line: i + 1, source })
        })
}

fn parse_lines_lenient(content: &str) -> Vec<AuditEntry> {
    parse_lines(content)
        .filter_map(|parsed| match parsed {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::error!(error = %e, "Skipping unreadable audit line");
                None
            }
        })
        .collect()
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, AuditError> {
        let mut tail = self.tail.lock().await;
        let created_at = next_timestamp(self.clock.as_ref(), tail.last.as_ref());
        let entry = AuditEntry::link(draft, tail.last.as_ref(), created_at);

        let mut line = serde_json::to_string(&entry).map_err(AuditError::Encode)?;
        line.push('\n');
        if tail.torn {
            line.insert(0, '\n');
        }

        match self.write_line(line.as_bytes()).await {
            Ok(()) => tail.torn = false,
            Err(e) => {
                if matches!(e, AuditError::Torn(_)) {
                    tail.torn = true;
                }
                return Err(e);
            }
        }

        // Only advance the tail once the entry is on disk.
        tail.last = Some(entry.clone());
        Ok(entry)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let _tail = self.tail.lock().await;
        let content = read_log(&self.path).await?;
        Ok(newest_first(&parse_lines_lenient(&content), limit))
    }

    /// Strict: an unreadable line is an error, not a gap.
    async fn all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let _tail = self.tail.lock().await;
        let content = read_log(&self.path).await?;
        let entries = parse_lines(&content).collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;
    use std::time::Duration;

    fn draft(i: usize) -> AuditDraft {
        AuditDraft::new("admin-1", "ingest.run", "job", format!("job-{i}"))
    }

    #[tokio::test]
    async fn test_memory_store_chains_entries() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = MemoryAuditStore::new(clock.clone());

        let first = store.append(draft(0)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let second = store.append(draft(1)).await.unwrap();

        assert!(first.prev_hash.is_none());
        assert_eq!(second.prev_hash, Some(first.digest()));
        assert!(verify_chain(&store.all().await.unwrap()).valid);

        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, second.id);
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_linked() {
        let store = Arc::new(MemoryAuditStore::new(Arc::new(ManualClock::new(0))));
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.append(draft(i)).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 32);
        assert!(verify_chain(&all).valid);
    }

    #[tokio::test]
    async fn test_clock_going_backwards_keeps_order() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = MemoryAuditStore::new(clock.clone());
        let first = store.append(draft(0)).await.unwrap();
        clock.set(5_000);
        let second = store.append(draft(1)).await.unwrap();
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_700_000_000_000));

        let store = FileAuditStore::open(&path, clock.clone()).await.unwrap();
        store.append(draft(0)).await.unwrap();
        store.append(draft(1)).await.unwrap();
        drop(store);

        let reopened = FileAuditStore::open(&path, clock).await.unwrap();
        let third = reopened.append(draft(2)).await.unwrap();
        let all = reopened.all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(third.prev_hash, Some(all[1].digest()));
        assert!(verify_chain(&all).valid);
    }

    #[tokio::test]
    async fn test_file_store_skips_corrupt_lines_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_700_000_000_000));

        let store = FileAuditStore::open(&path, clock.clone()).await.unwrap();
        let first = store.append(draft(0)).await.unwrap();
        drop(store);
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str("{\"not\": \"an entry\"}\n");
        tokio::fs::write(&path, content).await.unwrap();

        let reopened = FileAuditStore::open(&path, clock).await.unwrap();
        let second = reopened.append(draft(1)).await.unwrap();
        assert_eq!(second.prev_hash, Some(first.digest()));

        let err = reopened.all().await.err().unwrap();
        assert!(matches!(err, AuditError::Corrupt { line: 2, .. }));
        assert_eq!(reopened.recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_record_does_not_swallow_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_700_000_000_000));

        let store = FileAuditStore::open(&path, clock.clone()).await.unwrap();
        let first = store.append(draft(0)).await.unwrap();
        drop(store);
        // A write cut short by a crash leaves a fragment with no newline.
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str("{\"id\": \"7f1c");
        tokio::fs::write(&path, content).await.unwrap();

        let reopened = FileAuditStore::open(&path, clock.clone()).await.unwrap();
        let second = reopened.append(draft(1)).await.unwrap();
        drop(reopened);

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 3);
        let restarted = FileAuditStore::open(&path, clock).await.unwrap();
        let recent = restarted.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(second.prev_hash, Some(first.digest()));
    }

    #[tokio::test]
    async fn test_file_store_reads_back_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let store = FileAuditStore::open(&path, Arc::new(ManualClock::new(0)))
            .await
            .unwrap();
        store.append(draft(0)).await.unwrap();
        store.append(draft(1)).await.unwrap();

        tokio::fs::write(&path, "").await.unwrap();
        assert!(store.all().await.unwrap().is_empty());
    }
}
