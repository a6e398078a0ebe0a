//! Request-guard and audit layer for the company-intelligence web application.

pub mod admin;
pub mod audit;
pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod ingest;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod store;

pub use config::schema::GuardConfig;
pub use error::ApiError;
pub use http::{AppState, GuardServer};
pub use lifecycle::Shutdown;
