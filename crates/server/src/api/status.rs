//! 会话状态查询路由。
//!
//! 只读取协调器缓存，不触发新的轮询。

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use context_sync::SyncError;
use serde::Serialize;

use super::state::AppState;

/// 创建状态查询路由。
pub fn create_status_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/health", get(get_health))
        .route("/api/contexts", get(list_contexts))
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let status = state.coordinator.cached_status().await?;
    Ok(Json(status).into_response())
}

async fn get_health(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let health = state.coordinator.health().await?;
    let code = if health.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((code, Json(health)).into_response())
}

#[derive(Debug, Serialize)]
struct ContextsResponse {
    contexts: Vec<String>,
}

async fn list_contexts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ContextsResponse>, ApiError> {
    let contexts = state.coordinator.ready_contexts().await?;
    Ok(Json(ContextsResponse {
        contexts: contexts.iter().map(ToString::to_string).collect(),
    }))
}

#[derive(Debug, Serialize)]
struct ApiErrorResponse {
    error: String,
    code: String,
}

/// API 错误类型。
#[derive(Debug)]
struct ApiError {
    message: String,
    code: String,
    status: StatusCode,
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError {
            message: err.to_string(),
            code: format!("{:?}", err.kind()).to_uppercase(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorResponse {
            error: self.message,
            code: self.code,
        });
        (self.status, body).into_response()
    }
}
