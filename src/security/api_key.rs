//! API keys for machine-to-machine callers.
//!
//! Keys look like `romc_<32 hex>`. Only an HMAC-SHA256 of the key under the
//! service secret is stored, under `apikey:{hash}`, together with the last
//! four characters for display.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::ApiError;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::store::{KvStore, StoreError};

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_PREFIX: &str = "romc_";
pub const API_KEY_HEADER: &str = "x-api-key";

const KEY_RANDOM_BYTES: usize = 16;

/// Keys expire from the store after a year.
pub const API_KEY_LIFETIME: Duration = Duration::from_secs(365 * 24 * 3600);

pub fn generate_api_key() -> String {
    let mut bytes = [0u8; KEY_RANDOM_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, hex::encode(bytes))
}

/// Deterministic keyed digest of an API key, lower-case hex.
pub fn hash_api_key(key: &str, secret: &str) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        unreachable!("HMAC accepts keys of any length");
    };
    mac.update(key.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Last four characters, for showing which key is which.
pub fn last4(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    chars[chars.len().saturating_sub(4)..].iter().collect()
}

fn is_well_formed(key: &str) -> bool {
    key.strip_prefix(API_KEY_PREFIX).is_some_and(|rest| {
        rest.len() == KEY_RANDOM_BYTES * 2 && rest.chars().all(|c| c.is_ascii_hexdigit())
    })
}

pub fn api_key_store_key(hash: &str) -> String {
    format!("apikey:{}", hash)
}

/// What is stored for an issued key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub owner_user_id: String,
    pub label: String,
    pub last4: String,
    pub created_at: DateTime<Utc>,
}

pub struct ApiKeyRegistry {
    store: Arc<dyn KvStore>,
    secret: String,
}

impl ApiKeyRegistry {
    pub fn new(store: Arc<dyn KvStore>, secret: impl Into<String>) -> Self {
        Self {
            store,
            secret: secret.into(),
        }
    }

    /// Issue a key. The plaintext is returned once and never stored.
    pub async fn create(
        &self,
        owner_user_id: &str,
        label: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(String, ApiKeyRecord), StoreError> {
        let key = generate_api_key();
        let record = ApiKeyRecord {
            owner_user_id: owner_user_id.to_string(),
            label: label.to_string(),
            last4: last4(&key),
            created_at,
        };
        let encoded = serde_json::to_string(&record)
            .map_err(|e| StoreError::Unavailable(format!("encode api key: {e}")))?;
        let hash = hash_api_key(&key, &self.secret);
        self.store
            .set_ex(&api_key_store_key(&hash), &encoded, API_KEY_LIFETIME)
            .await?;
        Ok((key, record))
    }

    pub async fn authenticate(&self, key: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        if !is_well_formed(key) {
            return Ok(None);
        }
        let hash = hash_api_key(key, &self.secret);
        let Some(raw) = self.store.get(&api_key_store_key(&hash)).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw).ok())
    }
}

/// Require a valid `x-api-key`. Attaches the `ApiKeyRecord` for handlers.
pub async fn api_key_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?
        .to_owned();

    let record = state.api_keys.authenticate(&key).await.map_err(|e| {
        metrics::record_store_error("api_key");
        ApiError::from(e)
    })?;

    match record {
        Some(record) => {
            tracing::debug!(owner = %record.owner_user_id, key = %record.last4, "API key accepted");
            request.extensions_mut().insert(record);
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!(key = %last4(&key), "Unknown API key");
            Err(ApiError::Unauthorized)
        }
    }
}
