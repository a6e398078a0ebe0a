//! Company directory: the persistence collaborator behind claims and submissions.
//!
//! The production directory lives in the relational database owned by the
//! web application. `MemoryDirectory` lets the service run on its own and
//! backs the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("unknown company '{0}'")]
    UnknownCompany(String),

    #[error("company '{0}' is already claimed")]
    AlreadyClaimed(String),

    #[error("directory backend failed: {0}")]
    Backend(String),
}

impl From<DirectoryError> for ApiError {
    fn from(e: DirectoryError) -> Self {
        let message = e.to_string();
        match e {
            DirectoryError::UnknownCompany(_) => ApiError::NotFound("company"),
            DirectoryError::AlreadyClaimed(_) => ApiError::Validation(message),
            DirectoryError::Backend(_) => ApiError::Internal(message),
        }
    }
}

/// A proposed correction to one field of a company profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub field: String,
    pub value: String,
    #[serde(default)]
    pub source_url: Option<String>,
}

impl Submission {
    pub const MAX_VALUE_LEN: usize = 2000;

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.field.trim().is_empty() {
            return Err(ApiError::Validation("field is required".into()));
        }
        if self.value.trim().is_empty() {
            return Err(ApiError::Validation("value is required".into()));
        }
        if self.value.len() > Self::MAX_VALUE_LEN {
            return Err(ApiError::Validation("value is too long".into()));
        }
        if let Some(url) = &self.source_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(ApiError::Validation("source_url must be an http(s) URL".into()));
            }
        }
        Ok(())
    }
}

/// Company ids are lower-case slugs, e.g. `acme-corp`.
pub fn validate_company_id(id: &str) -> Result<(), ApiError> {
    let well_formed = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("invalid company id '{id}'")))
    }
}

#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    async fn claim(&self, company_id: &str, user_id: &str) -> Result<(), DirectoryError>;

    async fn submit(
        &self,
        company_id: &str,
        submitter_id: &str,
        submission: &Submission,
    ) -> Result<Uuid, DirectoryError>;

    /// Create or refresh a company record. Used by ingestion.
    async fn upsert(&self, company_id: &str) -> Result<(), DirectoryError>;

    /// Mark a company as enriched. Used by ingestion.
    async fn mark_enriched(&self, company_id: &str, at: DateTime<Utc>) -> Result<(), DirectoryError>;
}

#[derive(Debug, Clone, Default)]
pub struct CompanyRecord {
    pub claimed_by: Option<String>,
    pub submissions: Vec<(Uuid, String, Submission)>,
    pub enriched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    companies: DashMap<String, CompanyRecord>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_companies<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dir = Self::new();
        for id in ids {
            dir.companies.insert(id.into(), CompanyRecord::default());
        }
        dir
    }

    pub fn get(&self, company_id: &str) -> Option<CompanyRecord> {
        self.companies.get(company_id).map(|r| r.value().clone())
    }
}

#[async_trait]
impl CompanyDirectory for MemoryDirectory {
    async fn claim(&self, company_id: &str, user_id: &str) -> Result<(), DirectoryError> {
        let mut record = self
            .companies
            .get_mut(company_id)
            .ok_or_else(|| DirectoryError::UnknownCompany(company_id.to_string()))?;
        if let Some(owner) = &record.claimed_by {
            if owner != user_id {
                return Err(DirectoryError::AlreadyClaimed(company_id.to_string()));
            }
        }
        record.claimed_by = Some(user_id.to_string());
        Ok(())
    }

    async fn submit(
        &self,
        company_id: &str,
        submitter_id: &str,
        submission: &Submission,
    ) -> Result<Uuid, DirectoryError> {
        let mut record = self
            .companies
            .get_mut(company_id)
            .ok_or_else(|| DirectoryError::UnknownCompany(company_id.to_string()))?;
        let id = Uuid::new_v4();
        record
            .submissions
            .push((id, submitter_id.to_string(), submission.clone()));
        Ok(id)
    }

    async fn upsert(&self, company_id: &str) -> Result<(), DirectoryError> {
        self.companies.entry(company_id.to_string()).or_default();
        Ok(())
    }

    async fn mark_enriched(&self, company_id: &str, at: DateTime<Utc>) -> Result<(), DirectoryError> {
        let mut record = self
            .companies
            .get_mut(company_id)
            .ok_or_else(|| DirectoryError::UnknownCompany(company_id.to_string()))?;
        record.enriched_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_rules() {
        let dir = MemoryDirectory::with_companies(["acme"]);
        dir.claim("acme", "u1").await.unwrap();
        // Re-claiming by the owner is a no-op.
        dir.claim("acme", "u1").await.unwrap();
        assert!(matches!(
            dir.claim("acme", "u2").await,
            Err(DirectoryError::AlreadyClaimed(_))
        ));
        assert!(matches!(
            dir.claim("globex", "u1").await,
            Err(DirectoryError::UnknownCompany(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_then_submit() {
        let dir = MemoryDirectory::new();
        dir.upsert("initech").await.unwrap();
        let submission = Submission {
            field: "employees".into(),
            value: "120".into(),
            source_url: None,
        };
        dir.submit("initech", "u9", &submission).await.unwrap();
        assert_eq!(dir.get("initech").unwrap().submissions.len(), 1);
    }

    #[test]
    fn test_validation() {
        assert!(validate_company_id("acme-corp-2").is_ok());
        assert!(validate_company_id("").is_err());
        assert!(validate_company_id("Acme").is_err());
        assert!(validate_company_id("../etc").is_err());

        let bad_url = Submission {
            field: "website".into(),
            value: "x".into(),
            source_url: Some("javascript:alert(1)".into()),
        };
        assert!(bad_url.validate().is_err());
    }
}
