//! HTTP surface of the guard service.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (request ID, trace span, timeout, body limit, metrics)
//!     → guard chain for the route group (security/*)
//!     → handlers.rs or admin/handlers.rs
//!     → response.rs (JSON envelope, RateLimit-* headers)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{build_router, AppState, GuardServer};
