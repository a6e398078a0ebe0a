//! Shared-secret authentication for scheduled jobs and other machine callers.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::http::request::bearer_token;
use crate::http::server::AppState;

/// Constant-time check of a presented bearer token against the configured secret.
pub fn secret_matches(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len() && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

/// Require `Authorization: Bearer <cron secret>`.
///
/// Without a configured secret the endpoints are unusable and report a
/// configuration error rather than silently accepting anyone.
pub async fn cron_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.security.cron_secret.as_deref() else {
        return Err(ApiError::Configuration("cron secret is not set"));
    };
    match bearer_token(request.headers()) {
        Some(presented) if secret_matches(presented, expected) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Invalid cron secret");
            Err(ApiError::Forbidden("invalid credentials"))
        }
        None => Err(ApiError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches("s3cret", "s3cret"));
        assert!(!secret_matches("s3cret", "s3creT"));
        assert!(!secret_matches("s3cre", "s3cret"));
        assert!(!secret_matches("", "s3cret"));
    }
}
