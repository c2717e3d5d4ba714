use convo_copilot_api_types::{
    ContextMessage, ErrorKind, FocusSnapshot, HealthResponse, RequestPayload, ResponseOutcome,
    StatusReport,
};
use convo_copilot_core::domain::ContextId;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::actor::CoordinatorCommand;
use crate::{Result, SyncError};

const COORDINATOR_GONE: &str = "coordinator is no longer running";

/// 协调器 actor 的句柄，可随意克隆。
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorCommand>,
    context_buffer: usize,
}

/// 页面上下文与协调器之间的一条双向消息链路。
pub struct ContextConnection {
    pub id: ContextId,
    pub to_coordinator: mpsc::Sender<ContextMessage>,
    pub from_coordinator: mpsc::Receiver<ContextMessage>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<CoordinatorCommand>, context_buffer: usize) -> Self {
        Self {
            tx,
            context_buffer: context_buffer.max(1),
        }
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> CoordinatorCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| SyncError::ChannelInvalidated(COORDINATOR_GONE.to_string()))?;
        reply_rx
            .await
            .map_err(|_| SyncError::ChannelInvalidated(COORDINATOR_GONE.to_string()))
    }

    /// 握手。回复的是当前缓存状态，同时 `READY_ACK` 已投递到 `sender`。
    pub async fn announce(
        &self,
        context_id: ContextId,
        label: impl Into<String>,
        sender: mpsc::Sender<ContextMessage>,
    ) -> Result<StatusReport> {
        let label = label.into();
        self.call(|reply| CoordinatorCommand::Announce {
            context_id,
            label,
            sender,
            reply,
        })
        .await
    }

    pub async fn teardown(&self, context_id: ContextId) {
        if self
            .tx
            .send(CoordinatorCommand::Teardown { context_id })
            .await
            .is_err()
        {
            debug!(context_id = %context_id, "teardown after coordinator stopped");
        }
    }

    pub async fn publish_focus(
        &self,
        origin: Option<ContextId>,
        focus: FocusSnapshot,
    ) -> Result<()> {
        self.tx
            .send(CoordinatorCommand::PublishFocus { origin, focus })
            .await
            .map_err(|_| SyncError::ChannelInvalidated(COORDINATOR_GONE.to_string()))
    }

    /// 请求总是得到一个结果；协调器已停止时返回 `channel_invalidated`。
    pub async fn request(
        &self,
        context_id: Option<ContextId>,
        payload: RequestPayload,
    ) -> ResponseOutcome {
        let result = self
            .call(|reply| CoordinatorCommand::Request {
                context_id,
                payload,
                reply,
            })
            .await;

        match result {
            Ok(outcome) => outcome,
            Err(err) => ResponseOutcome::err(ErrorKind::ChannelInvalidated, err.to_string()),
        }
    }

    pub async fn cached_status(&self) -> Result<StatusReport> {
        self.call(|reply| CoordinatorCommand::GetStatus { reply })
            .await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.call(|reply| CoordinatorCommand::GetHealth { reply })
            .await
    }

    /// 立即触发一次轮询并等待其结果写入缓存。
    pub async fn poll_now(&self) -> Result<StatusReport> {
        self.call(|reply| CoordinatorCommand::PollNow { reply })
            .await
    }

    pub async fn ready_contexts(&self) -> Result<Vec<ContextId>> {
        self.call(|reply| CoordinatorCommand::ReadyContexts { reply })
            .await
    }

    /// 为一个新的页面上下文建立链路。
    ///
    /// 链路任务把上下文发来的 `ContextMessage` 翻译成协调器命令；
    /// 上下文一侧关闭发送端即视为拆除。
    pub fn connect(&self, label: impl Into<String>) -> ContextConnection {
        let id = ContextId::new();
        let (to_coordinator, inbound) = mpsc::channel(self.context_buffer);
        let (outbound, from_coordinator) = mpsc::channel(self.context_buffer);

        tokio::spawn(link(self.clone(), id, label.into(), inbound, outbound));

        ContextConnection {
            id,
            to_coordinator,
            from_coordinator,
        }
    }
}

async fn link(
    handle: CoordinatorHandle,
    id: ContextId,
    label: String,
    mut inbound: mpsc::Receiver<ContextMessage>,
    outbound: mpsc::Sender<ContextMessage>,
) {
    debug!(context_id = %id, label = %label, "context link opened");

    while let Some(message) = inbound.recv().await {
        match message {
            ContextMessage::ReadyAnnounce { context_id } => {
                debug!(context_id = %id, announced_as = %context_id, "ready announce");
                if let Err(err) = handle.announce(id, label.clone(), outbound.clone()).await {
                    warn!(context_id = %id, error = %err, "handshake failed");
                    break;
                }
            }
            ContextMessage::FocusChanged { focus } => {
                if let Err(err) = handle.publish_focus(Some(id), focus).await {
                    warn!(context_id = %id, error = %err, "failed to relay focus");
                    break;
                }
            }
            ContextMessage::Request {
                id: request_id,
                payload,
            } => {
                let handle = handle.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let outcome = handle.request(Some(id), payload).await;
                    let response = ContextMessage::Response {
                        id: request_id.clone(),
                        outcome,
                    };
                    if outbound.send(response).await.is_err() {
                        debug!(
                            context_id = %id,
                            request_id = %request_id,
                            "context closed before response"
                        );
                    }
                });
            }
            other => {
                warn!(context_id = %id, message = ?other, "unexpected message from context");
            }
        }
    }

    handle.teardown(id).await;
    debug!(context_id = %id, "context link closed");
}
