use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditDraft, AuditEntry};
use crate::error::ApiError;
use crate::http::handlers::parse_job_request;
use crate::http::response::ok;
use crate::http::server::AppState;
use crate::ingest::JobKind;
use crate::security::session::Principal;

pub const DEFAULT_AUDIT_LIMIT: usize = 50;
pub const MAX_AUDIT_LIMIT: usize = 500;

#[derive(Serialize)]
pub struct SystemStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub environment: &'static str,
    pub read_only: bool,
}

pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    ok(SystemStatus {
        status: "operational",
        version: env!("CARGO_PKG_VERSION"),
        environment: if state.config.security.environment.is_production() {
            "production"
        } else {
            "development"
        },
        read_only: state.read_only.is_enabled(),
    })
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct AuditPage {
    entries: Vec<AuditEntry>,
}

pub async fn get_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    let entries = state
        .audit
        .recent(limit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(ok(AuditPage { entries }))
}

pub async fn verify_audit(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .audit
        .verify()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !result.valid {
        tracing::error!(
            first_break = ?result.first_break,
            verified = result.verified_entries,
            "Audit chain verification failed"
        );
    }
    Ok(ok(result))
}

pub async fn run_ingest(
    State(state): State<AppState>,
    Extension(admin): Extension<Principal>,
    Path(job): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let job: JobKind = job.parse()?;
    let request = parse_job_request(&body)?;
    let report = state.ingestion.run(job, &request).await;

    state.audit.record(
        AuditDraft::new(&admin.user_id, "ingest.run", "job", job.as_str()).with_metadata(
            serde_json::json!({
                "company_ids": request.company_ids,
                "processed": report.processed,
                "failed": report.failed,
            }),
        ),
    );
    Ok(ok(report))
}

#[derive(Debug, Deserialize)]
pub struct ReadOnlyRequest {
    pub enabled: bool,
}

#[derive(Serialize)]
struct ReadOnlyState {
    read_only: bool,
    previous: bool,
}

pub async fn set_read_only(
    State(state): State<AppState>,
    Extension(admin): Extension<Principal>,
    body: Result<Json<ReadOnlyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let previous = state.read_only.set(request.enabled);
    tracing::warn!(admin = %admin.user_id, enabled = request.enabled, "Read-only mode changed");

    state.audit.record(
        AuditDraft::new(&admin.user_id, "read_only.set", "system", "read_only").with_metadata(
            serde_json::json!({ "enabled": request.enabled, "previous": previous }),
        ),
    );
    Ok(ok(ReadOnlyState {
        read_only: request.enabled,
        previous,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    /// Defaults to the calling admin.
    pub owner_user_id: Option<String>,
    pub label: String,
}

#[derive(Serialize)]
struct CreatedApiKey {
    /// Shown once. Only the keyed hash is stored.
    api_key: String,
    last4: String,
    owner_user_id: String,
    label: String,
}

pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(admin): Extension<Principal>,
    body: Result<Json<CreateApiKeyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let label = request.label.trim();
    if label.is_empty() || label.len() > 100 {
        return Err(ApiError::Validation("label must be 1-100 characters".into()));
    }
    let owner = request
        .owner_user_id
        .filter(|o| !o.trim().is_empty())
        .unwrap_or_else(|| admin.user_id.clone());

    let created_at = Utc
        .timestamp_millis_opt(state.clock.now_ms() as i64)
        .single()
        .unwrap_or_else(Utc::now);
    let (api_key, record) = state.api_keys.create(&owner, label, created_at).await?;

    state.audit.record(
        AuditDraft::new(&admin.user_id, "api_key.create", "api_key", &record.last4).with_metadata(
            serde_json::json!({ "owner_user_id": record.owner_user_id, "label": record.label }),
        ),
    );
    Ok(ok(CreatedApiKey {
        api_key,
        last4: record.last4,
        owner_user_id: record.owner_user_id,
        label: record.label,
    }))
}
