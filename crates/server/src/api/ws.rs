//! WebSocket API 处理器包装。
//!
//! 将统一的应用状态适配到 context_sync 的上下文通道。

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use context_sync::ws_api::serve_context;
use tracing::info;

use super::state::AppState;

/// Axum WebSocket 升级 handler，使用统一的 AppState。
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("new context connection request");
    let coordinator = state.coordinator.clone();
    ws.on_upgrade(move |socket| serve_context(socket, coordinator))
}
