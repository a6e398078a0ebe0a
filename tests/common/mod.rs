//! Shared helpers for integration tests.
//!
//! Each test gets its own server on an ephemeral port with in-memory
//! stores, two seeded companies and two sessions (an admin and a user).

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use intel_guard::audit::MemoryAuditStore;
use intel_guard::config::GuardConfig;
use intel_guard::directory::MemoryDirectory;
use intel_guard::security::session::{Plan, Principal};
use intel_guard::store::{Clock, MemoryStore, SystemClock};
use intel_guard::{AppState, GuardServer, Shutdown};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const CRON_SECRET: &str = "cron-test-secret";

pub struct TestServer {
    pub base: String,
    pub state: AppState,
    pub client: reqwest::Client,
    pub admin_session: String,
    pub user_session: String,
    shutdown: Shutdown,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn test_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.security.secret = "integration-secret".into();
    config.security.admin_emails = vec![ADMIN_EMAIL.into()];
    config.security.cron_secret = Some(CRON_SECRET.into());
    config.ingestion.base_delay_ms = 1;
    config.ingestion.max_delay_ms = 5;
    config
}

pub async fn spawn_server() -> TestServer {
    spawn_server_with(test_config()).await
}

pub async fn spawn_server_with(config: GuardConfig) -> TestServer {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = AppState::new(
        config,
        Arc::new(MemoryStore::new(clock.clone())),
        Arc::new(MemoryAuditStore::new(clock.clone())),
        Arc::new(MemoryDirectory::with_companies(["acme", "globex"])),
        clock,
    );

    let admin_session = state
        .sessions
        .create(
            &Principal {
                user_id: "admin-1".into(),
                email: ADMIN_EMAIL.into(),
                plan: Plan::Free,
            },
            Duration::from_secs(3600),
        )
        .await
        .unwrap();
    let user_session = state
        .sessions
        .create(
            &Principal {
                user_id: "user-1".into(),
                email: "user@example.com".into(),
                plan: Plan::Free,
            },
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server = GuardServer::new(state.clone());
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();

    TestServer {
        base: format!("http://{}", addr),
        state,
        client,
        admin_session,
        user_session,
        shutdown,
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Headers for a session, without CSRF.
    pub fn session_headers(&self, session: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("session={}", session)).unwrap(),
        );
        headers
    }

    /// Fetch a CSRF token and return headers carrying session, CSRF cookie
    /// and the matching header.
    pub async fn csrf_headers(&self, session: &str) -> HeaderMap {
        let body: Value = self
            .client
            .get(self.url("/api/csrf-token"))
            .headers(self.session_headers(session))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let token = body["token"].as_str().unwrap().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("session={}; csrf-token={}", session, token)).unwrap(),
        );
        headers.insert("x-csrf-token", HeaderValue::from_str(&token).unwrap());
        headers
    }

    pub async fn get_admin(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .headers(self.session_headers(&self.admin_session))
            .send()
            .await
            .unwrap()
    }

    pub async fn post_admin(&self, path: &str, body: Value) -> reqwest::Response {
        let headers = self.csrf_headers(&self.admin_session).await;
        self.client
            .post(self.url(path))
            .headers(headers)
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

/// Wait for fire-and-forget audit appends to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
