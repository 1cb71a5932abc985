//! HTTP handlers
//!
//! Control endpoints answer with a `{message}` body; failures map through
//! `PlcsrvError` to an `ErrorInfo` body with the matching status code.

use axum::{extract::State, http::StatusCode, response::Json};
use common::api_types::{MessageResponse, SuccessResponse};
use errors::PlcsrvError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn, Level};

use super::AppState;
use crate::client::PlcClient;
use crate::scheduler::{grouping, SchedulerStatus};
use crate::types::VariableSet;

/// Liveness body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub polling_running: bool,
    pub timestamp: String,
}

fn report(action: &str, err: &PlcsrvError) {
    match err.log_level() {
        Level::ERROR => error!("{} failed: {}", action, err),
        Level::WARN => warn!("{} failed: {}", action, err),
        _ => info!("{} rejected: {}", action, err),
    }
}

/// Health check endpoint
pub async fn health_check<C: PlcClient>(
    State(state): State<Arc<AppState<C>>>,
) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        service: state.service_name.clone(),
        polling_running: state.scheduler.is_running(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Start polling the registry's current variable set
pub async fn start_polling<C: PlcClient>(
    State(state): State<Arc<AppState<C>>>,
) -> Result<Json<MessageResponse>, PlcsrvError> {
    let variables = state.registry.variables().await?;

    if let Err(e) = state
        .scheduler
        .start(&variables, Arc::clone(&state.sink))
        .await
    {
        let err = PlcsrvError::from(e);
        report("Polling start", &err);
        return Err(err);
    }

    Ok(Json(MessageResponse::new("Polling started")))
}

/// Stop polling and close the PLC session
pub async fn stop_polling<C: PlcClient>(
    State(state): State<Arc<AppState<C>>>,
) -> Result<Json<MessageResponse>, PlcsrvError> {
    if let Err(e) = state.scheduler.stop().await {
        let err = PlcsrvError::from(e);
        report("Polling stop", &err);
        return Err(err);
    }

    Ok(Json(MessageResponse::new("Polling stopped")))
}

pub async fn polling_status<C: PlcClient>(
    State(state): State<Arc<AppState<C>>>,
) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

/// List the variables the next start will poll
pub async fn list_variables<C: PlcClient>(
    State(state): State<Arc<AppState<C>>>,
) -> Result<Json<SuccessResponse<VariableSet>>, PlcsrvError> {
    let variables = state.registry.variables().await?;
    let count = variables.len();
    Ok(Json(
        SuccessResponse::new(variables).with_metadata("count", serde_json::Value::from(count)),
    ))
}

/// Replace the variable set as a whole
///
/// Rejected sets leave the registry unchanged. A running poll keeps its
/// variables until it is restarted.
pub async fn apply_variables<C: PlcClient>(
    State(state): State<Arc<AppState<C>>>,
    Json(variables): Json<VariableSet>,
) -> Result<(StatusCode, Json<MessageResponse>), PlcsrvError> {
    if let Err(e) = grouping::validate(&variables) {
        let err = PlcsrvError::from(e);
        report("Variable apply", &err);
        return Err(err);
    }

    let count = variables.len();
    state.registry.apply(variables).await?;
    info!("Applied {} variables", count);

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("Configuration applied successfully")),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLevelResponse {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetLogLevelRequest {
    /// Level name or full filter directive, e.g. `debug` or `info,plcsrv=trace`
    pub level: String,
}

pub async fn get_log_level() -> Json<LogLevelResponse> {
    Json(LogLevelResponse {
        level: common::logging::get_log_level(),
    })
}

/// Change the console filter without restarting
pub async fn set_log_level(
    Json(request): Json<SetLogLevelRequest>,
) -> Result<Json<LogLevelResponse>, PlcsrvError> {
    common::logging::set_log_level(&request.level).map_err(|reason| {
        PlcsrvError::InvalidParameter {
            param: "level".to_string(),
            reason,
        }
    })?;
    Ok(Json(LogLevelResponse {
        level: common::logging::get_log_level(),
    }))
}
