use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use convo_copilot_api_types::{
    ContextMessage, ErrorKind, RequestPayload, ResponseBody, ResponseOutcome,
};
use convo_copilot_core::domain::{FocusSource, FocusedConversation, RequestId};
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info, warn};

use super::channel::{ChannelError, ContextChannel};
use super::flags::DegradedFlagStore;
use crate::Result;
use crate::adapter::{conversation_identity, focus_snapshot};
use crate::events::EventBroadcaster;
use crate::focus::FocusDetector;

const RECOVERY_MESSAGE: &str =
    "Lost connection to the copilot. Reload the page to reconnect.";

/// 推送给面板的降级提示。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayNotice {
    RecoveryRequired {
        message: String,
        suggest_reload: bool,
    },
    Recovered,
}

/// 一个面板请求的最终结果，`id` 与请求一一对应。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReply {
    pub id: RequestId,
    pub outcome: ResponseOutcome,
    pub timed_out: bool,
}

impl RelayReply {
    fn new(id: RequestId, outcome: ResponseOutcome) -> Self {
        Self {
            id,
            outcome,
            timed_out: false,
        }
    }

    /// 转换为回给面板的消息。
    pub fn into_message(self) -> ContextMessage {
        if self.timed_out {
            ContextMessage::Timeout {
                id: self.id.to_string(),
            }
        } else {
            ContextMessage::Response {
                id: self.id.to_string(),
                outcome: self.outcome,
            }
        }
    }
}

type PendingMap = HashMap<RequestId, oneshot::Sender<ResponseOutcome>>;

/// 面板请求中继。
///
/// 每个请求分配新的关联 id 并带超时；每个 id 只会被解决一次。
pub struct PanelRelay {
    channel: Arc<dyn ContextChannel>,
    detector: Arc<FocusDetector>,
    flags: Arc<dyn DegradedFlagStore>,
    pending: RwLock<PendingMap>,
    timeout: Duration,
    notices: EventBroadcaster<RelayNotice>,
}

impl PanelRelay {
    pub fn new(
        channel: Arc<dyn ContextChannel>,
        detector: Arc<FocusDetector>,
        flags: Arc<dyn DegradedFlagStore>,
        timeout: Duration,
        notices: EventBroadcaster<RelayNotice>,
    ) -> Self {
        Self {
            channel,
            detector,
            flags,
            pending: RwLock::new(HashMap::new()),
            timeout,
            notices,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.flags.is_set()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn request(&self, payload: RequestPayload) -> RelayReply {
        let id = RequestId::new();

        if let RequestPayload::SelectConversation { identity } = &payload {
            let outcome = match conversation_identity(identity) {
                Ok(identity) => {
                    self.detector.select_manually(identity);
                    ResponseOutcome::ok(ResponseBody::Ack)
                }
                Err(err) => ResponseOutcome::err(ErrorKind::Unsupported, err.to_string()),
            };
            return RelayReply::new(id, outcome);
        }

        let wants_focus = matches!(payload, RequestPayload::GetFocus);
        let reply = self.round_trip(id, payload).await;

        if wants_focus
            && needs_focus_fallback(&reply.outcome)
            && let Some(outcome) = self.local_focus()
        {
            return RelayReply::new(id, outcome);
        }
        reply
    }

    async fn round_trip(&self, id: RequestId, payload: RequestPayload) -> RelayReply {
        if self.is_degraded() {
            return RelayReply::new(id, invalidated_outcome());
        }

        let (tx, mut rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        let message = ContextMessage::Request {
            id: id.to_string(),
            payload,
        };
        if let Err(err) = self.channel.post(message) {
            self.pending.write().await.remove(&id);
            let outcome = match err {
                ChannelError::Dropped => {
                    warn!(request_id = %id, "request dropped by messaging channel");
                    ResponseOutcome::err(
                        ErrorKind::TransportUnavailable,
                        "request could not be delivered to the coordinator",
                    )
                }
                ChannelError::Invalidated => {
                    self.enter_degraded().await;
                    invalidated_outcome()
                }
            };
            return RelayReply::new(id, outcome);
        }

        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(outcome)) => RelayReply::new(id, outcome),
            Ok(Err(_)) => RelayReply::new(id, invalidated_outcome()),
            Err(_) => {
                if self.pending.write().await.remove(&id).is_none() {
                    // 超时与响应同时到达，以已送达的响应为准
                    if let Ok(outcome) = rx.try_recv() {
                        return RelayReply::new(id, outcome);
                    }
                }
                warn!(
                    request_id = %id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "request timed out"
                );
                RelayReply {
                    id,
                    outcome: ResponseOutcome::err(
                        ErrorKind::Timeout,
                        format!("no response within {}ms", self.timeout.as_millis()),
                    ),
                    timed_out: true,
                }
            }
        }
    }

    /// 用响应解决对应的请求，未知 id 只记录日志。
    pub async fn resolve(&self, id: &str, outcome: ResponseOutcome) -> bool {
        let sender = match id.parse::<RequestId>() {
            Ok(request_id) => self.pending.write().await.remove(&request_id),
            Err(_) => None,
        };

        match sender {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    debug!(request_id = %id, "requester gone before response");
                }
                true
            }
            None => {
                warn!(request_id = %id, "response for unknown request id");
                false
            }
        }
    }

    /// 发送握手。降级状态下不再发送。
    pub async fn announce(&self, label: &str) -> std::result::Result<(), ChannelError> {
        if self.is_degraded() {
            return Err(ChannelError::Invalidated);
        }
        let result = self.channel.post(ContextMessage::ReadyAnnounce {
            context_id: label.to_string(),
        });
        if result == Err(ChannelError::Invalidated) {
            self.enter_degraded().await;
        }
        result
    }

    /// 把本页检测到的焦点变化发给协调器。
    pub async fn forward_focus(&self, focus: &FocusedConversation) {
        if self.is_degraded() {
            return;
        }
        let message = ContextMessage::FocusChanged {
            focus: focus_snapshot(focus),
        };
        match self.channel.post(message) {
            Ok(()) => {}
            Err(ChannelError::Dropped) => debug!("focus change dropped by messaging channel"),
            Err(ChannelError::Invalidated) => self.enter_degraded().await,
        }
    }

    /// 进入降级模式：持久化标记、提示面板、结束所有在途请求。
    pub async fn enter_degraded(&self) {
        if self.is_degraded() {
            return;
        }
        if let Err(err) = self.flags.set() {
            warn!(error = %err, "failed to persist degraded flag");
        }
        warn!("messaging channel invalidated, entering degraded mode");

        let drained: Vec<_> = self.pending.write().await.drain().collect();
        for (_, sender) in drained {
            let _ = sender.send(invalidated_outcome());
        }

        self.notices.emit(RelayNotice::RecoveryRequired {
            message: RECOVERY_MESSAGE.to_string(),
            suggest_reload: true,
        });
    }

    /// 页面重新加载后清除降级标记。
    pub fn reload(&self) -> Result<()> {
        self.flags.clear()?;
        info!("degraded flag cleared after reload");
        self.notices.emit(RelayNotice::Recovered);
        Ok(())
    }

    fn local_focus(&self) -> Option<ResponseOutcome> {
        let identity = self.detector.extract_now()?;
        let focus = FocusedConversation::new(identity, FocusSource::DomFallback);
        debug!(display_name = %focus.identity().display_name(), "answered focus from page");
        Some(ResponseOutcome::ok(ResponseBody::Focus {
            focus: Some(focus_snapshot(&focus)),
        }))
    }
}

fn needs_focus_fallback(outcome: &ResponseOutcome) -> bool {
    match outcome {
        ResponseOutcome::Ok {
            body: ResponseBody::Focus { focus },
        } => focus.is_none(),
        ResponseOutcome::Ok { .. } => false,
        ResponseOutcome::Err { .. } => true,
    }
}

fn invalidated_outcome() -> ResponseOutcome {
    ResponseOutcome::err(ErrorKind::ChannelInvalidated, RECOVERY_MESSAGE)
}
