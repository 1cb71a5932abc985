//! API routes for the acquisition service

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers::{
    apply_variables, get_log_level, health_check, list_variables, polling_status,
    set_log_level, start_polling, stop_polling,
};
use super::AppState;
use crate::client::PlcClient;

/// Create all API routes with state
pub fn create_routes<C: PlcClient>(state: Arc<AppState<C>>) -> Router {
    Router::new()
        .route("/health", get(health_check::<C>))
        // Polling control
        .route("/api/polling/start", post(start_polling::<C>))
        .route("/api/polling/stop", post(stop_polling::<C>))
        .route("/api/polling/status", get(polling_status::<C>))
        // Variable catalogue
        .route("/api/variables", get(list_variables::<C>))
        .route("/api/variables/apply", post(apply_variables::<C>))
        // Runtime log level
        .route(
            "/api/admin/logs/level",
            get(get_log_level).put(set_log_level),
        )
        // Apply HTTP request logging middleware
        .layer(axum::middleware::from_fn(common::logging::http_request_logger))
        .with_state(state)
}
