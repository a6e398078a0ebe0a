use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::http::server::AppState;
use crate::security::session::Principal;

/// Admit only signed-in users whose e-mail is on the admin allowlist.
///
/// Expects `load_session_middleware` to have run.
pub async fn require_admin_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = request
        .extensions()
        .get::<Principal>()
        .ok_or(ApiError::Unauthorized)?;

    if !state.config.security.is_admin_email(&principal.email) {
        tracing::warn!(
            user = %principal.user_id,
            path = %request.uri().path(),
            "Non-admin attempted admin access"
        );
        return Err(ApiError::Forbidden("admin access required"));
    }

    Ok(next.run(request).await)
}
