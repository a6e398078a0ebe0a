//! JSON response envelope and rate-limit headers.
//!
//! Every JSON body carries `ok`. Success payloads are flattened next to it,
//! failures carry a short `error` string.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::security::rate_limit::RateLimitDecision;

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// `{"ok": true, ...payload}`
#[derive(Debug, Serialize)]
pub struct OkBody<T: Serialize> {
    ok: bool,
    #[serde(flatten)]
    payload: T,
}

/// Wrap a payload in a success envelope.
pub fn ok<T: Serialize>(payload: T) -> axum::Json<OkBody<T>> {
    axum::Json(OkBody { ok: true, payload })
}

/// `{"ok": false, "error": "..."}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    ok: bool,
    error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
        }
    }
}

pub fn set_retry_after(headers: &mut HeaderMap, secs: u64) {
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
}

/// Attach `RateLimit-*` headers, plus `Retry-After` when the request was refused.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision, now_ms: u64) {
    let reset_secs = decision.retry_after_secs(now_ms);
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(reset_secs));
    if !decision.allowed {
        set_retry_after(headers, reset_secs);
    }
}
