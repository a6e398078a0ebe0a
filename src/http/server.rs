//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared `AppState` from config and collaborators
//! - Compose the guard chain for each route group
//! - Wire up cross-cutting layers (request ID, tracing, timeout, body limit, metrics)
//! - Serve over plain TCP or rustls, with graceful shutdown
//! - Apply hot-reloaded rate limits

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin;
use crate::audit::{AuditLog, AuditStore};
use crate::config::GuardConfig;
use crate::directory::CompanyDirectory;
use crate::http::handlers;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::ingest::{DirectoryJobs, IngestionJobs, IngestionRunner};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::security::{
    api_key::{api_key_middleware, ApiKeyRegistry},
    cooldown::CooldownGuard,
    cron::cron_auth_middleware,
    csrf::{csrf_middleware, CsrfGuard},
    rate_limit::{admin_rate_limit_middleware, rate_limit_middleware, RateLimiter},
    read_only::{read_only_middleware, ReadOnlyFlag},
    session::{load_session_middleware, require_session_middleware, SessionResolver},
};
use crate::store::{Clock, KvStore};

/// Application state injected into handlers and guards.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GuardConfig>,
    pub clock: Arc<dyn Clock>,
    pub rate_limiter: Arc<RateLimiter>,
    pub csrf: Arc<CsrfGuard>,
    pub cooldowns: Arc<CooldownGuard>,
    pub sessions: Arc<SessionResolver>,
    pub api_keys: Arc<ApiKeyRegistry>,
    pub read_only: Arc<ReadOnlyFlag>,
    pub audit: AuditLog,
    pub directory: Arc<dyn CompanyDirectory>,
    pub ingestion: Arc<IngestionRunner>,
}

impl AppState {
    /// Wire every guard to the shared store. Ingestion defaults to
    /// `DirectoryJobs` over `directory`.
    pub fn new(
        config: GuardConfig,
        store: Arc<dyn KvStore>,
        audit_store: Arc<dyn AuditStore>,
        directory: Arc<dyn CompanyDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let jobs: Arc<dyn IngestionJobs> =
            Arc::new(DirectoryJobs::new(directory.clone(), clock.clone()));
        let secure_cookies = config.security.environment.is_production();

        Self {
            rate_limiter: Arc::new(RateLimiter::new(
                store.clone(),
                clock.clone(),
                config.rate_limit.clone(),
            )),
            csrf: Arc::new(CsrfGuard::new(config.csrf.clone(), secure_cookies)),
            cooldowns: Arc::new(CooldownGuard::new(store.clone())),
            sessions: Arc::new(SessionResolver::new(
                store.clone(),
                config.security.session_cookie.clone(),
            )),
            api_keys: Arc::new(ApiKeyRegistry::new(store, config.security.secret.clone())),
            read_only: Arc::new(ReadOnlyFlag::new(config.security.read_only)),
            audit: AuditLog::new(audit_store),
            ingestion: Arc::new(IngestionRunner::new(
                jobs,
                RetryPolicy::from(&config.ingestion),
            )),
            directory,
            clock,
            config: Arc::new(config),
        }
    }

    /// Replace the ingestion collaborator.
    pub fn with_ingestion_jobs(mut self, jobs: Arc<dyn IngestionJobs>) -> Self {
        self.ingestion = Arc::new(IngestionRunner::new(
            jobs,
            RetryPolicy::from(&self.config.ingestion),
        ));
        self
    }
}

/// HTTP server for the guard service.
pub struct GuardServer {
    router: Router,
    state: AppState,
}

impl GuardServer {
    pub fn new(state: AppState) -> Self {
        let router = build_router(state.clone());
        Self { router, state }
    }

    /// Serve until `shutdown` fires. Validated configs arriving on
    /// `config_updates` replace the rate-limit table in place.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GuardConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;

        let limiter = self.state.rate_limiter.clone();
        tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                limiter.update_limits(new_config.rate_limit);
                tracing::info!("Rate limits reloaded");
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        match self.state.config.listener.tls.clone() {
            Some(tls) => {
                tracing::info!(address = %addr, "HTTPS server starting");
                let rustls =
                    axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                        .await?;
                let handle = axum_server::Handle::new();
                let shutdown_handle = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
                });
                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                        tracing::info!("Shutdown signal received");
                    })
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}

/// Build the router. Within each `ServiceBuilder` the first layer runs first.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    // Session users: load session, limit by tier, then require it.
    let user_mutations = Router::new()
        .route("/api/companies/{id}/claim", post(handlers::claim_company))
        .route(
            "/api/companies/{id}/submissions",
            post(handlers::submit_company_data),
        )
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.clone(), load_session_middleware))
                .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
                .layer(from_fn(require_session_middleware))
                .layer(from_fn_with_state(state.clone(), csrf_middleware))
                .layer(from_fn_with_state(state.clone(), read_only_middleware)),
        );

    let csrf_token = Router::new()
        .route("/api/csrf-token", get(handlers::csrf_token))
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.clone(), load_session_middleware))
                .layer(from_fn_with_state(state.clone(), rate_limit_middleware)),
        );

    // Machine callers: limited by IP before the key is looked at, no CSRF.
    let machine = Router::new()
        .route(
            "/api/v1/companies/{id}/submissions",
            post(handlers::submit_company_data_machine),
        )
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.clone(), admin_rate_limit_middleware))
                .layer(from_fn_with_state(state.clone(), api_key_middleware))
                .layer(from_fn_with_state(state.clone(), read_only_middleware)),
        );

    let cron = Router::new()
        .route("/api/cron/{job}", post(handlers::run_cron_job))
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.clone(), admin_rate_limit_middleware))
                .layer(from_fn_with_state(state.clone(), cron_auth_middleware))
                .layer(from_fn_with_state(state.clone(), read_only_middleware)),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .merge(csrf_token)
        .merge(user_mutations)
        .merge(machine)
        .merge(cron)
        .merge(admin::router(state.clone()))
        .with_state(state)
        .layer(from_fn(metrics::track_requests))
        .layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        method = %req.method(),
                        path = %req.uri().path(),
                        request_id = %request_id(req.headers()),
                    )
                }))
                .layer(propagate_request_id_layer())
                .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(config.timeouts.request_secs),
                )),
        )
}
