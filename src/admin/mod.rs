//! Admin console API.
//!
//! Every route runs the admin chain: admin-tier rate limit by client IP,
//! session load, e-mail allowlist. Mutations additionally need CSRF and,
//! except for the read-only toggle itself, a writable service.

pub mod auth;
pub mod handlers;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;

use self::auth::require_admin_middleware;
use self::handlers::*;
use crate::http::server::AppState;
use crate::security::{
    csrf::csrf_middleware, rate_limit::admin_rate_limit_middleware,
    read_only::read_only_middleware, session::load_session_middleware,
};

pub fn router(state: AppState) -> Router<AppState> {
    let guarded = Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/audit", get(get_audit))
        .route("/admin/audit/verify", get(verify_audit))
        .route("/admin/ingest/{job}", post(run_ingest))
        .route("/admin/api-keys", post(create_api_key))
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.clone(), csrf_middleware))
                .layer(from_fn_with_state(state.clone(), read_only_middleware)),
        );

    let toggle = Router::new()
        .route("/admin/read-only", post(set_read_only))
        .route_layer(from_fn_with_state(state.clone(), csrf_middleware));

    guarded.merge(toggle).route_layer(
        ServiceBuilder::new()
            .layer(from_fn_with_state(state.clone(), admin_rate_limit_middleware))
            .layer(from_fn_with_state(state.clone(), load_session_middleware))
            .layer(from_fn_with_state(state, require_admin_middleware)),
    )
}
