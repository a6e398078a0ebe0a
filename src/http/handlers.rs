//! Public and machine-facing route handlers.
//!
//! Guards run as middleware before these. Handlers only check cooldowns,
//! call the collaborator, and commit the cooldown once the action succeeded.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::directory::{validate_company_id, Submission};
use crate::error::ApiError;
use crate::http::response::ok;
use crate::http::server::AppState;
use crate::ingest::{JobKind, JobRequest};
use crate::security::api_key::ApiKeyRecord;
use crate::security::cooldown::CooldownKind;
use crate::security::session::Principal;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> impl IntoResponse {
    ok(Health {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct CsrfTokenBody {
    token: String,
}

/// Issue a fresh CSRF token in both the body and the `csrf-token` cookie.
pub async fn csrf_token(State(state): State<AppState>) -> Response {
    let (token, cookie) = state.csrf.issue();
    let mut response = ok(CsrfTokenBody { token }).into_response();
    if let Some(cookie) = cookie {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

#[derive(Serialize)]
struct ClaimBody {
    company_id: String,
    claimed_by: String,
}

pub async fn claim_company(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_company_id(&company_id)?;
    ensure_cooled_down(&state, CooldownKind::Claim, &principal.user_id, &company_id).await?;

    state.directory.claim(&company_id, &principal.user_id).await?;
    state
        .cooldowns
        .commit(CooldownKind::Claim, &principal.user_id, &company_id)
        .await;

    tracing::info!(company = %company_id, user = %principal.user_id, "Company claimed");
    Ok(ok(ClaimBody {
        company_id,
        claimed_by: principal.user_id,
    }))
}

#[derive(Serialize)]
struct SubmissionBody {
    submission_id: Uuid,
    company_id: String,
}

pub async fn submit_company_data(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(company_id): Path<String>,
    body: Result<Json<Submission>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    record_submission(&state, &principal.user_id, company_id, body).await
}

/// Same as `submit_company_data`, for API key callers. The cooldown is
/// charged to the key's owner.
pub async fn submit_company_data_machine(
    State(state): State<AppState>,
    Extension(key): Extension<ApiKeyRecord>,
    Path(company_id): Path<String>,
    body: Result<Json<Submission>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    record_submission(&state, &key.owner_user_id, company_id, body).await
}

async fn record_submission(
    state: &AppState,
    user_id: &str,
    company_id: String,
    body: Result<Json<Submission>, JsonRejection>,
) -> Result<Json<crate::http::response::OkBody<SubmissionBody>>, ApiError> {
    validate_company_id(&company_id)?;
    let Json(submission) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    submission.validate()?;
    ensure_cooled_down(state, CooldownKind::Submission, user_id, &company_id).await?;

    let submission_id = state.directory.submit(&company_id, user_id, &submission).await?;
    state
        .cooldowns
        .commit(CooldownKind::Submission, user_id, &company_id)
        .await;

    tracing::info!(
        company = %company_id,
        user = %user_id,
        field = %submission.field,
        submission_id = %submission_id,
        "Submission recorded"
    );
    Ok(ok(SubmissionBody {
        submission_id,
        company_id,
    }))
}

async fn ensure_cooled_down(
    state: &AppState,
    kind: CooldownKind,
    user_id: &str,
    resource_id: &str,
) -> Result<(), ApiError> {
    let status = state.cooldowns.check(kind, user_id, resource_id).await;
    if status.ok {
        Ok(())
    } else {
        Err(ApiError::Cooldown {
            remaining_secs: status.remaining_secs,
        })
    }
}

/// Parse an optional JSON job body. An empty body means "no companies".
pub fn parse_job_request(body: &Bytes) -> Result<JobRequest, ApiError> {
    let request = if body.is_empty() {
        JobRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ApiError::Validation(format!("invalid job request: {e}")))?
    };
    request.validate()?;
    Ok(request)
}

pub async fn run_cron_job(
    State(state): State<AppState>,
    Path(job): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let job: JobKind = job.parse()?;
    let request = parse_job_request(&body)?;
    tracing::info!(job = %job, companies = request.company_ids.len(), "Cron job triggered");
    let report = state.ingestion.run(job, &request).await;
    Ok(ok(report))
}
