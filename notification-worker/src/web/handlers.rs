//! Health endpoint handler.

use axum::{extract::State, http::StatusCode};
use tracing::warn;

use crate::queue::BrokerStatus;

pub const HEALTHY_MESSAGE: &str = "Notification service is healthy and OK.";
pub const UNHEALTHY_MESSAGE: &str =
    "Notification service is up but not connected to the message broker.";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub broker: BrokerStatus,
}

impl AppState {
    pub fn new(broker: BrokerStatus) -> Self {
        Self { broker }
    }
}

/// `GET /notification-health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.broker.is_connected() {
        (StatusCode::OK, HEALTHY_MESSAGE)
    } else {
        warn!("health_check_broker_disconnected");
        (StatusCode::SERVICE_UNAVAILABLE, UNHEALTHY_MESSAGE)
    }
}
