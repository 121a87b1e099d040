//! Axum HTTP API server.
//!
//! This crate provides:
//! - Synchronous generation (`POST /api/generate`, answers with the mp4)
//! - Background jobs with status, cancel and one-shot download
//! - One JSON error envelope for every failure
//! - Rate limiting, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod form;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
