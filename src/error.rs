//! Error taxonomy for HTTP handlers.
//!
//! Every variant maps to one status code and a short client-facing message.
//! Internal details are logged here and never sent to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::response::{self, ErrorBody};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("please wait {remaining_secs}s before trying again")]
    Cooldown { remaining_secs: u64 },

    #[error("service is in read-only mode")]
    ReadOnly,

    #[error("server misconfigured: {0}")]
    Configuration(&'static str),

    #[error("dependency unavailable: {0}")]
    Dependency(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } | ApiError::Cooldown { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::ReadOnly | ApiError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Configuration(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show the client.
    fn public_message(&self) -> String {
        match self {
            ApiError::Configuration(_) | ApiError::Internal(_) => {
                "Internal server error".to_string()
            }
            ApiError::Dependency(_) => "Service temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let mut res = (status, axum::Json(ErrorBody::new(self.public_message()))).into_response();
        match self {
            ApiError::RateLimited { retry_after_secs } => {
                response::set_retry_after(res.headers_mut(), retry_after_secs)
            }
            ApiError::Cooldown { remaining_secs } => {
                response::set_retry_after(res.headers_mut(), remaining_secs)
            }
            _ => {}
        }
        res
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(e: crate::store::StoreError) -> Self {
        ApiError::Dependency(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden("no").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("company").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::RateLimited { retry_after_secs: 3 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::Configuration("secret").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = ApiError::Internal("db password rejected".into());
        assert_eq!(err.public_message(), "Internal server error");

        let err = ApiError::NotFound("company");
        assert_eq!(err.public_message(), "company not found");
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let res = ApiError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get("retry-after").unwrap(), "42");
    }

    #[test]
    fn test_cooldown_reports_remaining_time() {
        let err = ApiError::Cooldown { remaining_secs: 604_799 };
        assert_eq!(err.public_message(), "please wait 604799s before trying again");
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get("retry-after").unwrap(), "604799");
    }
}
