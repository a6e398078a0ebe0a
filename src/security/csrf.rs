//! Double-submit cookie CSRF protection.
//!
//! The token is set in a cookie readable by page scripts and must be echoed
//! back in a request header. A cross-site attacker can make the browser send
//! the cookie but cannot read it to build the header.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::config::CsrfConfig;
use crate::error::ApiError;
use crate::http::request::cookie_value;
use crate::http::server::AppState;
use crate::observability::metrics;

/// Random bytes per token; hex encoding doubles the length.
pub const TOKEN_BYTES: usize = 32;

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time comparison of the cookie and header values.
///
/// Missing values and length mismatches are rejected before comparing bytes.
pub fn tokens_match(cookie: Option<&str>, header: Option<&str>) -> bool {
    match (cookie, header) {
        (Some(c), Some(h)) if !c.is_empty() && c.len() == h.len() => {
            c.as_bytes().ct_eq(h.as_bytes()).into()
        }
        _ => false,
    }
}

/// Issues tokens and validates requests against one cookie/header pair.
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    config: CsrfConfig,
    secure: bool,
}

impl CsrfGuard {
    pub fn new(config: CsrfConfig, secure: bool) -> Self {
        Self { config, secure }
    }

    /// `Set-Cookie` value for `token`. Deliberately not HttpOnly.
    pub fn cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; SameSite=Lax",
            self.config.cookie_name, token, self.config.max_age_secs
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Fresh token plus the header value that stores it client side.
    pub fn issue(&self) -> (String, Option<HeaderValue>) {
        let token = generate_token();
        let cookie = HeaderValue::from_str(&self.cookie(&token)).ok();
        (token, cookie)
    }

    pub fn validate(&self, headers: &HeaderMap) -> bool {
        let cookie = cookie_value(headers, &self.config.cookie_name);
        let header = headers
            .get(self.config.header_name.as_str())
            .and_then(|v| v.to_str().ok());
        tokens_match(cookie, header)
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Require a matching CSRF token on state-changing requests.
pub async fn csrf_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !is_safe_method(request.method()) && !state.csrf.validate(request.headers()) {
        metrics::record_csrf_rejected();
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "CSRF validation failed"
        );
        return Err(ApiError::Forbidden("invalid CSRF token"));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    fn headers_with(cookie: Option<&str>, header_token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(c) = cookie {
            headers.insert(
                header::COOKIE,
                HeaderValue::from_str(&format!("csrf-token={c}")).unwrap(),
            );
        }
        if let Some(h) = header_token {
            headers.insert("x-csrf-token", HeaderValue::from_str(h).unwrap());
        }
        headers
    }

    #[test]
    fn test_generated_token_shape() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_tokens_match_rules() {
        assert!(tokens_match(Some("abcd"), Some("abcd")));
        assert!(!tokens_match(None, Some("abcd")));
        assert!(!tokens_match(Some("abcd"), None));
        assert!(!tokens_match(Some("abcd"), Some("abce")));
        assert!(!tokens_match(Some("abcd"), Some("abcde")));
        assert!(!tokens_match(Some(""), Some("")));
    }

    #[test]
    fn test_guard_validates_cookie_against_header() {
        let guard = CsrfGuard::new(CsrfConfig::default(), false);
        let (token, _) = guard.issue();

        assert!(guard.validate(&headers_with(Some(&token), Some(&token))));
        assert!(!guard.validate(&headers_with(Some(&token), None)));
        assert!(!guard.validate(&headers_with(None, Some(&token))));
        assert!(!guard.validate(&headers_with(Some(&token), Some(&generate_token()))));
    }

    #[test]
    fn test_cookie_attributes() {
        let dev = CsrfGuard::new(CsrfConfig::default(), false);
        let cookie = dev.cookie("t");
        assert_eq!(cookie, "csrf-token=t; Path=/; Max-Age=86400; SameSite=Lax");
        assert!(!cookie.contains("HttpOnly"));

        let prod = CsrfGuard::new(CsrfConfig::default(), true);
        assert!(prod.cookie("t").ends_with("; Secure"));
    }
}
