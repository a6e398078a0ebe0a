//! Session lookup and role gating.
//!
//! Sessions are created by the auth service and stored under
//! `session:{token}` as a JSON principal. This module only reads them.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::http::request::{bearer_token, cookie_value};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::rate_limit::Tier;
use crate::store::{KvStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Premium,
}

/// The signed-in user behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub plan: Plan,
}

impl Principal {
    pub fn tier(&self) -> Tier {
        match self.plan {
            Plan::Free => Tier::Auth,
            Plan::Premium => Tier::Premium,
        }
    }
}

pub fn session_key(token: &str) -> String {
    format!("session:{}", token)
}

/// Resolves session tokens to principals through the shared store.
pub struct SessionResolver {
    store: Arc<dyn KvStore>,
    cookie_name: String,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn KvStore>, cookie_name: impl Into<String>) -> Self {
        Self {
            store,
            cookie_name: cookie_name.into(),
        }
    }

    /// Session token from the session cookie, else from a bearer header.
    pub fn token<'a>(&self, headers: &'a axum::http::HeaderMap) -> Option<&'a str> {
        cookie_value(headers, &self.cookie_name).or_else(|| bearer_token(headers))
    }

    pub async fn resolve(&self, token: &str) -> Result<Option<Principal>, StoreError> {
        let Some(raw) = self.store.get(&session_key(token)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(principal) => Ok(Some(principal)),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed session record");
                Ok(None)
            }
        }
    }

    /// Store a new session and return its token.
    pub async fn create(&self, principal: &Principal, ttl: Duration) -> Result<String, StoreError> {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let record = serde_json::to_string(principal)
            .map_err(|e| StoreError::Unavailable(format!("encode session: {e}")))?;
        self.store.set_ex(&session_key(&token), &record, ttl).await?;
        Ok(token)
    }
}

/// Attach the caller's `Principal` to the request when a valid session exists.
///
/// Never rejects. A store outage is logged and the caller treated as anonymous.
pub async fn load_session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = state.sessions.token(request.headers()).map(str::to_owned) {
        match state.sessions.resolve(&token).await {
            Ok(Some(principal)) => {
                request.extensions_mut().insert(principal);
            }
            Ok(None) => {}
            Err(e) => {
                metrics::record_store_error("session");
                tracing::error!(error = %e, "Session lookup failed");
            }
        }
    }
    next.run(request).await
}

/// Reject requests without a session.
pub async fn require_session_middleware(request: Request, next: Next) -> Result<Response, ApiError> {
    if request.extensions().get::<Principal>().is_none() {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}
