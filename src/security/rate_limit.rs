//! Rate limiting middleware with tiered caller classes.
//!
//! Each (tier, identity) pair owns one counter key in the shared store. The
//! first request of a window creates the key with a TTL of one window; the
//! store drops it when the window ends and the next request starts over.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::config::{RateLimitConfig, TierLimit};
use crate::error::ApiError;
use crate::http::request::client_ip;
use crate::http::response::apply_rate_limit_headers;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::session::Principal;
use crate::store::{Clock, KvStore, StoreError};

/// Caller class. Decides both the ceiling and the identity used as key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// No session, keyed by client IP.
    Anon,
    /// Signed-in user, keyed by user id.
    Auth,
    /// Paying user, keyed by user id.
    Premium,
    /// Admin console and machine endpoints, keyed by client IP.
    Admin,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Anon, Tier::Auth, Tier::Premium, Tier::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anon => "anon",
            Tier::Auth => "auth",
            Tier::Premium => "premium",
            Tier::Admin => "admin",
        }
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// When the current window ends (ms since epoch).
    pub reset_at_ms: u64,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up, at least 1.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
    }
}

/// Store key for a (tier, identity) pair.
pub fn rate_limit_key(tier: Tier, identity: &str) -> String {
    format!("ratelimit:{}:{}", tier.as_str(), identity)
}

/// Tiered fixed-window limiter over a shared counter store.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    limits: ArcSwap<RateLimitConfig>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, limits: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            limits: ArcSwap::from_pointee(limits),
        }
    }

    /// Swap in new tier limits. Existing windows keep counting.
    pub fn update_limits(&self, limits: RateLimitConfig) {
        self.limits.store(Arc::new(limits));
        tracing::info!("Rate limit tiers reloaded");
    }

    pub fn limits(&self) -> Arc<RateLimitConfig> {
        self.limits.load_full()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Count one request for `identity` and decide whether it may proceed.
    ///
    /// Store failures allow the request when the tier fails open. Otherwise
    /// the error is returned so the caller can refuse the request.
    pub async fn check(&self, identity: &str, tier: Tier) -> Result<RateLimitDecision, StoreError> {
        let limits = self.limits.load();
        let tier_limit: TierLimit = *limits.for_tier(tier);
        let window = Duration::from_secs(tier_limit.window_secs);
        let key = rate_limit_key(tier, identity);
        let now = self.clock.now_ms();

        match self.store.incr_window(&key, window).await {
            Ok(counted) => Ok(RateLimitDecision {
                allowed: counted.count <= tier_limit.limit,
                limit: tier_limit.limit,
                remaining: tier_limit.limit.saturating_sub(counted.count),
                reset_at_ms: now + counted.ttl.as_millis() as u64,
            }),
            Err(e) => {
                metrics::record_store_error("rate_limit");
                if tier_limit.fail_open {
                    tracing::error!(
                        tier = tier.as_str(),
                        error = %e,
                        "Rate limit store unavailable, failing open"
                    );
                    Ok(RateLimitDecision {
                        allowed: true,
                        limit: tier_limit.limit,
                        remaining: tier_limit.limit,
                        reset_at_ms: now + window.as_millis() as u64,
                    })
                } else {
                    tracing::error!(
                        tier = tier.as_str(),
                        error = %e,
                        "Rate limit store unavailable, failing closed"
                    );
                    Err(e)
                }
            }
        }
    }
}

/// Tier and identity for a user-facing request.
///
/// Session users are keyed by user id, everyone else by client IP.
fn caller_identity(req: &Request, trust_forwarded_for: bool) -> (Tier, String) {
    if let Some(principal) = req.extensions().get::<Principal>() {
        return (principal.tier(), principal.user_id.clone());
    }
    (Tier::Anon, client_ip(req, trust_forwarded_for).to_string())
}

/// Rate limit user-facing routes. Runs after the session has been loaded.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let trust = state.rate_limiter.limits().trust_forwarded_for;
    let (tier, identity) = caller_identity(&request, trust);
    enforce(&state, tier, identity, request, next).await
}

/// Rate limit admin and machine routes by client IP, whoever the caller is.
/// Runs before any credential check so guessing keys or secrets is throttled.
pub async fn admin_rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let trust = state.rate_limiter.limits().trust_forwarded_for;
    let identity = client_ip(&request, trust).to_string();
    enforce(&state, Tier::Admin, identity, request, next).await
}

async fn enforce(
    state: &AppState,
    tier: Tier,
    identity: String,
    request: Request,
    next: Next,
) -> Response {
    let decision = match state.rate_limiter.check(&identity, tier).await {
        Ok(d) => d,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let now = state.rate_limiter.now_ms();

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(client = %identity, tier = tier.as_str(), "Rate limit exceeded");
        metrics::record_rate_limited(tier.as_str());
        ApiError::RateLimited {
            retry_after_secs: decision.retry_after_secs(now),
        }
        .into_response()
    };

    apply_rate_limit_headers(response.headers_mut(), &decision, now);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore, WindowCount};
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set_ex(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn incr_window(&self, _: &str, _: Duration) -> Result<WindowCount, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn ttl(&self, _: &str) -> Result<Option<Duration>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn del(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn limiter(limits: RateLimitConfig) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        (RateLimiter::new(store, clock.clone(), limits), clock)
    }

    #[tokio::test]
    async fn test_admin_tier_allows_ten_then_rejects() {
        let (limiter, clock) = limiter(RateLimitConfig::default());

        for i in 1..=10u64 {
            let d = limiter.check("203.0.113.7", Tier::Admin).await.unwrap();
            assert!(d.allowed, "request {i} should pass");
            assert_eq!(d.remaining, 10 - i);
        }

        let rejected = limiter.check("203.0.113.7", Tier::Admin).await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.retry_after_secs(clock.now_ms()), 60);
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let (limiter, clock) = limiter(RateLimitConfig::default());
        for _ in 0..11 {
            let _ = limiter.check("ip", Tier::Admin).await.unwrap();
        }

        clock.advance(Duration::from_millis(59_500));
        let still_blocked = limiter.check("ip", Tier::Admin).await.unwrap();
        assert!(!still_blocked.allowed);
        assert_eq!(still_blocked.retry_after_secs(clock.now_ms()), 1);

        clock.advance(Duration::from_millis(500));
        let fresh = limiter.check("ip", Tier::Admin).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 9);
    }

    #[tokio::test]
    async fn test_identities_and_tiers_are_isolated() {
        let mut limits = RateLimitConfig::default();
        limits.auth.limit = 1;
        let (limiter, _) = limiter(limits);

        assert!(limiter.check("user-a", Tier::Auth).await.unwrap().allowed);
        assert!(!limiter.check("user-a", Tier::Auth).await.unwrap().allowed);

        assert!(limiter.check("user-b", Tier::Auth).await.unwrap().allowed);
        assert!(limiter.check("user-a", Tier::Premium).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open_by_default() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::new(Arc::new(DownStore), clock, RateLimitConfig::default());

        let d = limiter.check("ip", Tier::Admin).await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.remaining, 10);
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed_when_configured() {
        let mut limits = RateLimitConfig::default();
        limits.anon.fail_open = false;
        let limiter = RateLimiter::new(Arc::new(DownStore), Arc::new(ManualClock::new(0)), limits);

        assert!(limiter.check("ip", Tier::Anon).await.is_err());
    }

    #[tokio::test]
    async fn test_update_limits_applies_to_next_check() {
        let (limiter, _) = limiter(RateLimitConfig::default());
        assert!(limiter.check("ip", Tier::Anon).await.unwrap().allowed);

        let mut tighter = RateLimitConfig::default();
        tighter.anon.limit = 1;
        limiter.update_limits(tighter);

        let d = limiter.check("ip", Tier::Anon).await.unwrap();
        assert!(!d.allowed);
        assert_eq!(d.limit, 1);
    }

    #[test]
    fn test_key_format() {
        assert_eq!(rate_limit_key(Tier::Premium, "u1"), "ratelimit:premium:u1");
    }
}
