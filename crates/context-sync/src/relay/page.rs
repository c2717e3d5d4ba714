use std::sync::Arc;
use std::time::Duration;

use convo_copilot_api_types::{
    ContextMessage, ErrorKind, FocusSnapshot, RequestPayload, ResponseOutcome, StatusReport,
    StatusSignal,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{ChannelError, ContextChannel};
use super::flags::DegradedFlagStore;
use super::panel::{PanelRelay, RelayNotice, RelayReply};
use crate::adapter::focus_snapshot;
use crate::config::CopilotConfig;
use crate::events::{EventBroadcaster, EventStream, FocusEvent};
use crate::focus::{ConversationSurface, FocusDetector, SurfaceMutation};

const PANEL_EVENT_BUFFER: usize = 64;

/// 推送给面板界面的事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    Ready { status: StatusReport },
    Status { signal: StatusSignal },
    Focus { focus: FocusSnapshot },
    Notice(RelayNotice),
}

/// 页面上下文启动所需的外部连接。
pub struct PageWiring {
    pub channel: Arc<dyn ContextChannel>,
    pub inbound: mpsc::Receiver<ContextMessage>,
    pub surface: Arc<dyn ConversationSurface>,
    pub mutations: mpsc::Receiver<SurfaceMutation>,
    pub flags: Arc<dyn DegradedFlagStore>,
}

/// 一个页面上下文：焦点检测、握手与面板请求中继。
pub struct PageContext {
    relay: Arc<PanelRelay>,
    panel: EventBroadcaster<PanelEvent>,
    acked: watch::Receiver<bool>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PageContext {
    pub fn start(config: &CopilotConfig, label: impl Into<String>, wiring: PageWiring) -> Self {
        let label = label.into();
        let cancel = CancellationToken::new();
        let panel = EventBroadcaster::new(PANEL_EVENT_BUFFER);
        let notices = EventBroadcaster::new(PANEL_EVENT_BUFFER);
        let detector = FocusDetector::new(
            wiring.surface,
            config.focus.clone(),
            EventBroadcaster::new(PANEL_EVENT_BUFFER),
        );
        let relay = Arc::new(PanelRelay::new(
            wiring.channel,
            Arc::clone(&detector),
            wiring.flags,
            config.relay.request_timeout(),
            notices.clone(),
        ));
        let (acked_tx, acked) = watch::channel(false);

        info!(label = %label, degraded = relay.is_degraded(), "page context starting");

        let tasks = vec![
            tokio::spawn(Arc::clone(&detector).run(wiring.mutations, cancel.clone())),
            tokio::spawn(forward_focus(
                detector.subscribe(),
                Arc::clone(&relay),
                panel.clone(),
                cancel.clone(),
            )),
            tokio::spawn(forward_notices(notices.subscribe(), panel.clone(), cancel.clone())),
            tokio::spawn(pump_inbound(
                wiring.inbound,
                Arc::clone(&relay),
                panel.clone(),
                acked_tx,
                cancel.clone(),
            )),
            tokio::spawn(announce_until_acked(
                label,
                Arc::clone(&relay),
                acked.clone(),
                config.relay.announce_retry(),
                cancel.clone(),
            )),
        ];

        Self {
            relay,
            panel,
            acked,
            cancel,
            tasks,
        }
    }

    pub fn relay(&self) -> Arc<PanelRelay> {
        Arc::clone(&self.relay)
    }

    pub fn subscribe(&self) -> EventStream<PanelEvent> {
        self.panel.subscribe()
    }

    /// 是否已收到协调器的 `READY_ACK`。
    pub fn is_acknowledged(&self) -> bool {
        *self.acked.borrow()
    }

    pub async fn request(&self, payload: RequestPayload) -> RelayReply {
        self.relay.request(payload).await
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "page context task ended abnormally");
            }
        }
    }
}

async fn announce_until_acked(
    label: String,
    relay: Arc<PanelRelay>,
    mut acked: watch::Receiver<bool>,
    retry: Duration,
    cancel: CancellationToken,
) {
    loop {
        match relay.announce(&label).await {
            Ok(()) | Err(ChannelError::Dropped) => {}
            Err(ChannelError::Invalidated) => {
                debug!("stopping handshake, channel invalidated");
                return;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            result = acked.wait_for(|acked| *acked) => {
                if result.is_ok() {
                    debug!(label = %label, "handshake acknowledged");
                }
                return;
            }
            _ = tokio::time::sleep(retry) => {
                debug!(label = %label, "no acknowledgement yet, announcing again");
            }
        }
    }
}

async fn pump_inbound(
    mut inbound: mpsc::Receiver<ContextMessage>,
    relay: Arc<PanelRelay>,
    panel: EventBroadcaster<PanelEvent>,
    acked: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            message = inbound.recv() => message,
        };

        let Some(message) = message else {
            relay.enter_degraded().await;
            return;
        };

        match message {
            ContextMessage::ReadyAck { status } => {
                acked.send_replace(true);
                panel.emit(PanelEvent::Ready { status });
            }
            ContextMessage::StatusChanged { signal } => panel.emit(PanelEvent::Status { signal }),
            ContextMessage::FocusChanged { focus } => panel.emit(PanelEvent::Focus { focus }),
            ContextMessage::Response { id, outcome } => {
                relay.resolve(&id, outcome).await;
            }
            ContextMessage::Timeout { id } => {
                let outcome = ResponseOutcome::err(ErrorKind::Timeout, "coordinator timed out");
                relay.resolve(&id, outcome).await;
            }
            other => warn!(message = ?other, "unexpected message from coordinator"),
        }
    }
}

/// 焦点变化发往协调器；降级时直接推给本页面板。
async fn forward_focus(
    mut events: EventStream<FocusEvent>,
    relay: Arc<PanelRelay>,
    panel: EventBroadcaster<PanelEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.next() => event,
        };

        let Some(event) = event else {
            debug!("focus event stream ended");
            return;
        };
        if relay.is_degraded() {
            panel.emit(PanelEvent::Focus {
                focus: focus_snapshot(&event.focus),
            });
        } else {
            relay.forward_focus(&event.focus).await;
        }
    }
}

async fn forward_notices(
    mut notices: EventStream<RelayNotice>,
    panel: EventBroadcaster<PanelEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            notice = notices.next() => match notice {
                Some(notice) => panel.emit(PanelEvent::Notice(notice)),
                None => return,
            },
        }
    }
}
