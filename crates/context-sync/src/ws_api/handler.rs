use axum::extract::ws::{Message, WebSocket};
use convo_copilot_api_types::ContextMessage;
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use crate::coordinator::CoordinatorHandle;

/// 在一个已升级的 WebSocket 上运行上下文链路，连接关闭即拆除上下文。
pub async fn serve_context(socket: WebSocket, coordinator: CoordinatorHandle) {
    let (mut sender, mut receiver) = socket.split();
    let connection = coordinator.connect("websocket");
    let context_id = connection.id;
    let to_coordinator = connection.to_coordinator;
    let mut from_coordinator = connection.from_coordinator;
    info!(context_id = %context_id, "context connection established");

    let writer_task = tokio::spawn(async move {
        while let Some(message) = from_coordinator.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to serialize context message");
                    break;
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ContextMessage>(&text) {
                Ok(message) => {
                    if to_coordinator.send(message).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        context_id = %context_id,
                        error = %err,
                        "ignoring malformed context message"
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(context_id = %context_id, error = %err, "WebSocket receive error");
                break;
            }
        }
    }

    drop(to_coordinator);
    writer_task.abort();
    if let Err(err) = writer_task.await
        && !err.is_cancelled()
    {
        warn!(error = %err, "WebSocket writer task exited with join error");
    }

    info!(context_id = %context_id, "context connection closed");
}
