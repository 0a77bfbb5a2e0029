//! HTTP routes.
//!
//! ```text
//! POST /installation/start          -> 201 {session_id, component_count}
//! POST /installation/:id/execute    -> 200 ExecutionStatus
//! GET  /installation/:id/status     -> 200 ExecutionStatus
//! GET  /installation                -> 200 [ExecutionStatus]
//! POST /installation/:id/cancel     -> 200 ExecutionStatus
//! POST /installation/:id/rollback   -> 200 {session_id, errors}
//! GET  /health                      -> 200 {status, version, uptime_secs, live_sessions}
//! ```
//!
//! Errors are `{error, message}` with 400, 404, 409 or 500.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rigup_core::{Component, GpuVendor, VERSION};
use rigup_install::{
    ExecutionStatus, InstallRequest, InstallationService, RollbackReport, ServiceError,
    StartResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

pub struct DaemonState {
    pub service: InstallationService,
    pub started: Instant,
}

impl DaemonState {
    pub fn new(service: InstallationService) -> Self {
        Self {
            service,
            started: Instant::now(),
        }
    }
}

pub type SharedState = Arc<DaemonState>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Wrapper so `ServiceError` can be returned from handlers.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body = Json(ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Body of `POST /installation/start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartBody {
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub gpu: Option<GpuVendor>,
    #[serde(default)]
    pub merge_existing: Option<bool>,
}

impl StartBody {
    fn into_request(self) -> InstallRequest {
        let mut request = InstallRequest::latest(&self.components);
        if let Some(vendor) = self.gpu {
            request = request.with_gpu(vendor);
        }
        if let Some(merge) = self.merge_existing {
            request = request.with_merge_existing(merge);
        }
        request
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Sessions pending or running in this daemon
    pub live_sessions: usize,
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/installation", get(list_handler))
        .route("/installation/start", post(start_handler))
        .route("/installation/:id/execute", post(execute_handler))
        .route("/installation/:id/status", get(status_handler))
        .route("/installation/:id/cancel", post(cancel_handler))
        .route("/installation/:id/rollback", post(rollback_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION.to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        live_sessions: state.service.live_sessions().await,
    })
}

async fn start_handler(
    State(state): State<SharedState>,
    Json(body): Json<StartBody>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    let started = state.service.start(body.into_request()).await?;
    debug!(session_id = %started.session_id, "session started over http");
    Ok((StatusCode::CREATED, Json(started)))
}

async fn execute_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExecutionStatus>> {
    Ok(Json(state.service.execute(&id).await?))
}

async fn status_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExecutionStatus>> {
    Ok(Json(state.service.status(&id).await?))
}

async fn list_handler(State(state): State<SharedState>) -> ApiResult<Json<Vec<ExecutionStatus>>> {
    Ok(Json(state.service.list().await?))
}

async fn cancel_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExecutionStatus>> {
    Ok(Json(state.service.cancel(&id).await?))
}

async fn rollback_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RollbackReport>> {
    Ok(Json(state.service.rollback(&id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigup_core::ValidationError;

    #[test]
    fn test_api_error_status_mapping() {
        let cases = [
            (ServiceError::from(ValidationError::MissingCore), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
            (ServiceError::Conflict("running".to_string()), StatusCode::CONFLICT),
            (
                ServiceError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_start_body_defaults() {
        let body: StartBody = serde_json::from_str(r#"{"components": ["core", "terminal"]}"#).unwrap();
        let request = body.into_request();
        assert_eq!(request.components.len(), 2);
        assert_eq!(request.gpu, None);
        assert_eq!(request.merge_existing, None);
    }
}
