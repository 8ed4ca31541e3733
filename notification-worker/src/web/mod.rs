//! Health server.
//!
//! A single plain-text route reporting whether the worker currently holds a
//! live broker connection. Nothing else is exposed over HTTP.

pub mod handlers;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

pub use handlers::{health, AppState, HEALTHY_MESSAGE, UNHEALTHY_MESSAGE};

pub const HEALTH_PATH: &str = "/notification-health";

/// Build the router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
