//! Hash linking and verification for the admin audit log.
//!
//! Entry N stores in `prev_hash` the digest of entry N-1, where that digest
//! covers entry N-1's own `prev_hash` and its content. The first entry has
//! no `prev_hash`. Changing any field of any entry breaks every later link.
//!
//! ```text
//! digest(e) = sha256_hex( e.prev_hash|"" | action | entity_type | entity_id
//!                         | created_at (RFC 3339, ms, Z) | metadata JSON or "{}" )
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// What an admin handler asks to record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditDraft {
    pub actor_user_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub metadata: Option<serde_json::Value>,
}

impl AuditDraft {
    pub fn new(
        actor_user_id: impl Into<String>,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            actor_user_id: actor_user_id.into(),
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// An immutable, chained audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_user_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub prev_hash: Option<String>,
}

impl AuditEntry {
    /// Build the entry that follows `tail`.
    pub fn link(draft: AuditDraft, tail: Option<&AuditEntry>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_user_id: draft.actor_user_id,
            action: draft.action,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            metadata: draft.metadata,
            created_at,
            prev_hash: tail.map(AuditEntry::digest),
        }
    }

    /// Digest the next entry must carry as its `prev_hash`.
    pub fn digest(&self) -> String {
        compute_hash(
            self.prev_hash.as_deref(),
            &self.action,
            &self.entity_type,
            &self.entity_id,
            &self.created_at,
            self.metadata.as_ref(),
        )
    }
}

/// Timestamp format fed into the digest.
pub fn timestamp_string(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn compute_hash(
    prev_hash: Option<&str>,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    created_at: &DateTime<Utc>,
    metadata: Option<&serde_json::Value>,
) -> String {
    let metadata = metadata.map_or_else(|| "{}".to_string(), |m| m.to_string());
    let timestamp = timestamp_string(created_at);
    let input = [
        prev_hash.unwrap_or(""),
        action,
        entity_type,
        entity_id,
        timestamp.as_str(),
        metadata.as_str(),
    ]
    .join("|");
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Outcome of walking the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub verified_entries: usize,
    /// First entry whose `prev_hash` does not match.
    pub first_break: Option<Uuid>,
    /// Line of the durable log that could not be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unreadable_line: Option<usize>,
}

/// Verify `entries`, ordered oldest first.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
    let mut expected: Option<String> = None;
    for (i, entry) in entries.iter().enumerate() {
        if entry.prev_hash != expected {
            return ChainVerification {
                valid: false,
                verified_entries: i,
                first_break: Some(entry.id),
                unreadable_line: None,
            };
        }
        expected = Some(entry.digest());
    }
    ChainVerification {
        valid: true,
        verified_entries: entries.len(),
        first_break: None,
        unreadable_line: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn build_chain(n: usize) -> Vec<AuditEntry> {
        let mut chain: Vec<AuditEntry> = Vec::new();
        for i in 0..n {
            let draft = AuditDraft::new("admin-1", "company.update", "company", format!("c{i}"))
                .with_metadata(serde_json::json!({ "field": "name", "n": i }));
            let entry = AuditEntry::link(draft, chain.last(), ts(1_700_000_000_000 + i as i64));
            chain.push(entry);
        }
        chain
    }

    #[test]
    fn test_hash_input_format() {
        let expected = hex::encode(Sha256::digest(
            b"|ingest.run|job|enrich|2023-11-14T22:13:20.000Z|{}",
        ));
        let got = compute_hash(None, "ingest.run", "job", "enrich", &ts(1_700_000_000_000), None);
        assert_eq!(got, expected);
    }

    #[test]
    fn test_first_entry_has_no_prev_hash() {
        let chain = build_chain(2);
        assert!(chain[0].prev_hash.is_none());
        assert_eq!(chain[1].prev_hash.as_deref(), Some(chain[0].digest().as_str()));
    }

    #[test]
    fn test_sequential_chain_verifies() {
        let chain = build_chain(5);
        let result = verify_chain(&chain);
        assert!(result.valid);
        assert_eq!(result.verified_entries, 5);
        assert!(verify_chain(&[]).valid);
    }

    #[test]
    fn test_tampered_prev_hash_is_detected() {
        let mut chain = build_chain(4);
        chain[2].prev_hash = Some("0".repeat(64));

        let result = verify_chain(&chain);
        assert!(!result.valid);
        assert_eq!(result.verified_entries, 2);
        assert_eq!(result.first_break, Some(chain[2].id));
    }

    #[test]
    fn test_tampered_content_breaks_next_link() {
        let mut chain = build_chain(3);
        chain[1].entity_id = "someone-else".into();

        let result = verify_chain(&chain);
        assert!(!result.valid);
        assert_eq!(result.first_break, Some(chain[2].id));
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(timestamp_string(&ts(1_700_000_000_123)), "2023-11-14T22:13:20.123Z");
    }
}
