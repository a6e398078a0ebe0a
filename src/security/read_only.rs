//! Read-only mode: a runtime switch that refuses every mutation.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::http::server::AppState;

#[derive(Debug, Default)]
pub struct ReadOnlyFlag {
    enabled: AtomicBool,
}

impl ReadOnlyFlag {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Set the flag and return the previous value.
    pub fn set(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::Relaxed)
    }
}

pub async fn read_only_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let mutating = !matches!(*request.method(), Method::GET | Method::HEAD | Method::OPTIONS);
    if mutating && state.read_only.is_enabled() {
        tracing::info!(path = %request.uri().path(), "Rejected mutation in read-only mode");
        return Err(ApiError::ReadOnly);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_returns_previous() {
        let flag = ReadOnlyFlag::new(false);
        assert!(!flag.set(true));
        assert!(flag.is_enabled());
        assert!(flag.set(false));
        assert!(!flag.is_enabled());
    }
}
