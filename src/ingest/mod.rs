//! Ingestion jobs triggered by cron or by an admin.
//!
//! The guards only decide whether a trigger may run. The jobs themselves are
//! an external collaborator behind `IngestionJobs`. `DirectoryJobs` is the
//! in-process implementation that writes to the company directory.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::directory::{validate_company_id, CompanyDirectory, DirectoryError};
use crate::error::ApiError;
use crate::resilience::RetryPolicy;
use crate::store::Clock;

/// Upper bound on company ids per trigger.
pub const MAX_BATCH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    VerifyAndUpsert,
    Enrich,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::VerifyAndUpsert => "verify-and-upsert",
            JobKind::Enrich => "enrich",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verify-and-upsert" => Ok(JobKind::VerifyAndUpsert),
            "enrich" => Ok(JobKind::Enrich),
            _ => Err(ApiError::NotFound("job")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JobRequest {
    #[serde(default)]
    pub company_ids: Vec<String>,
}

impl JobRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.company_ids.len() > MAX_BATCH {
            return Err(ApiError::Validation(format!(
                "at most {MAX_BATCH} company ids per run"
            )));
        }
        self.company_ids.iter().try_for_each(|id| validate_company_id(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job: JobKind,
    pub processed: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}

impl From<DirectoryError> for JobError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::Backend(msg) => JobError::Transient(msg),
            other => JobError::Permanent(other.to_string()),
        }
    }
}

#[async_trait]
pub trait IngestionJobs: Send + Sync {
    async fn verify_and_upsert(&self, company_id: &str) -> Result<(), JobError>;

    async fn enrich_company(&self, company_id: &str) -> Result<(), JobError>;
}

/// Jobs that write straight to a `CompanyDirectory`.
pub struct DirectoryJobs {
    directory: Arc<dyn CompanyDirectory>,
    clock: Arc<dyn Clock>,
}

impl DirectoryJobs {
    pub fn new(directory: Arc<dyn CompanyDirectory>, clock: Arc<dyn Clock>) -> Self {
        Self { directory, clock }
    }
}

#[async_trait]
impl IngestionJobs for DirectoryJobs {
    async fn verify_and_upsert(&self, company_id: &str) -> Result<(), JobError> {
        validate_company_id(company_id).map_err(|e| JobError::Permanent(e.to_string()))?;
        self.directory.upsert(company_id).await?;
        Ok(())
    }

    async fn enrich_company(&self, company_id: &str) -> Result<(), JobError> {
        let at = Utc
            .timestamp_millis_opt(self.clock.now_ms() as i64)
            .single()
            .unwrap_or_else(Utc::now);
        self.directory.mark_enriched(company_id, at).await?;
        Ok(())
    }
}

/// Runs a job over a batch of companies, retrying transient failures.
pub struct IngestionRunner {
    jobs: Arc<dyn IngestionJobs>,
    policy: RetryPolicy,
}

impl IngestionRunner {
    pub fn new(jobs: Arc<dyn IngestionJobs>, policy: RetryPolicy) -> Self {
        Self { jobs, policy }
    }

    /// Process every company in `request`. One company failing does not stop
    /// the rest; failures are listed in the report.
    pub async fn run(&self, job: JobKind, request: &JobRequest) -> JobReport {
        let mut processed = 0;
        let mut failed = Vec::new();

        let jobs = &self.jobs;
        for company_id in &request.company_ids {
            let result = self
                .policy
                .retry(JobError::is_transient, move || async move {
                    match job {
                        JobKind::VerifyAndUpsert => jobs.verify_and_upsert(company_id).await,
                        JobKind::Enrich => jobs.enrich_company(company_id).await,
                    }
                })
                .await;

            match result {
                Ok(()) => processed += 1,
                Err(e) => {
                    tracing::warn!(job = %job, company = %company_id, error = %e, "Ingestion step failed");
                    failed.push(company_id.clone());
                }
            }
        }

        tracing::info!(job = %job, processed, failed = failed.len(), "Ingestion run finished");
        JobReport {
            job,
            processed,
            failed,
        }
    }
}
