use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use convo_copilot_api_types::{
    ContextMessage, FocusSnapshot, HealthResponse, RequestPayload, ResponseBody, ResponseOutcome,
    StatusReport,
};
use convo_copilot_core::domain::ContextId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::services::RequestServices;
use super::status::{StatusSource, classify, unreachable_report};

pub(crate) const COMMAND_BUFFER: usize = 256;

/// 发送给协调器 actor 的命令。
pub enum CoordinatorCommand {
    Announce {
        context_id: ContextId,
        label: String,
        sender: mpsc::Sender<ContextMessage>,
        reply: oneshot::Sender<StatusReport>,
    },
    Teardown {
        context_id: ContextId,
    },
    PublishFocus {
        origin: Option<ContextId>,
        focus: FocusSnapshot,
    },
    Request {
        context_id: Option<ContextId>,
        payload: RequestPayload,
        reply: oneshot::Sender<ResponseOutcome>,
    },
    GetStatus {
        reply: oneshot::Sender<StatusReport>,
    },
    GetHealth {
        reply: oneshot::Sender<HealthResponse>,
    },
    PollNow {
        reply: oneshot::Sender<StatusReport>,
    },
    ReadyContexts {
        reply: oneshot::Sender<Vec<ContextId>>,
    },
}

/// 已完成握手的上下文。
struct ReadyContext {
    label: String,
    sender: mpsc::Sender<ContextMessage>,
    last_heartbeat_at: DateTime<Utc>,
}

/// 连接状态缓存与就绪上下文表的唯一持有者。
pub struct CoordinatorActor {
    status_source: Arc<dyn StatusSource>,
    services: Arc<RequestServices>,
    cache: StatusReport,
    focus: Option<FocusSnapshot>,
    contexts: HashMap<ContextId, ReadyContext>,
    poll_interval: Duration,
    poll_in_flight: bool,
    poll_waiters: Vec<oneshot::Sender<StatusReport>>,
    poll_tx: mpsc::Sender<crate::Result<StatusReport>>,
    poll_rx: mpsc::Receiver<crate::Result<StatusReport>>,
    command_rx: mpsc::Receiver<CoordinatorCommand>,
    shutdown: CancellationToken,
}

impl CoordinatorActor {
    pub fn spawn(
        status_source: Arc<dyn StatusSource>,
        services: Arc<RequestServices>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> (mpsc::Sender<CoordinatorCommand>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (poll_tx, poll_rx) = mpsc::channel(1);

        let actor = Self {
            status_source,
            services,
            cache: StatusReport::unknown(),
            focus: None,
            contexts: HashMap::new(),
            poll_interval,
            poll_in_flight: false,
            poll_waiters: Vec::new(),
            poll_tx,
            poll_rx,
            command_rx: rx,
            shutdown,
        };

        let handle = tokio::spawn(actor.run());
        (tx, handle)
    }

    /// 单一定时器驱动轮询，同一时刻最多一个轮询在途；结果回到本任务串行应用。
    async fn run(mut self) {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "coordinator started");

        let mut poll_timer = interval(self.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("coordinator received shutdown signal");
                    break;
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("all coordinator handles dropped, shutting down");
                        break;
                    }
                },

                _ = poll_timer.tick() => self.start_poll(),

                Some(result) = self.poll_rx.recv() => self.apply_poll(result),
            }
        }

        info!(contexts = self.contexts.len(), "coordinator stopped");
    }

    fn handle_command(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::Announce {
                context_id,
                label,
                sender,
                reply,
            } => {
                self.register(context_id, label, sender);
                let _ = reply.send(self.cache.clone());
            }
            CoordinatorCommand::Teardown { context_id } => {
                if let Some(context) = self.contexts.remove(&context_id) {
                    info!(context_id = %context_id, label = %context.label, "context torn down");
                }
            }
            CoordinatorCommand::PublishFocus { origin, focus } => {
                if let Some(origin) = origin {
                    self.touch(&origin);
                }
                debug!(
                    display_name = %focus.identity.display_name,
                    source = ?focus.source,
                    "relaying focus change"
                );
                self.focus = Some(focus.clone());
                self.broadcast(ContextMessage::FocusChanged { focus });
            }
            CoordinatorCommand::Request {
                context_id,
                payload,
                reply,
            } => {
                if let Some(context_id) = context_id {
                    self.touch(&context_id);
                }
                self.handle_request(payload, reply);
            }
            CoordinatorCommand::GetStatus { reply } => {
                let _ = reply.send(self.cache.clone());
            }
            CoordinatorCommand::GetHealth { reply } => {
                let _ = reply.send(self.health());
            }
            CoordinatorCommand::PollNow { reply } => {
                self.poll_waiters.push(reply);
                self.start_poll();
            }
            CoordinatorCommand::ReadyContexts { reply } => {
                let _ = reply.send(self.contexts.keys().copied().collect());
            }
        }
    }

    fn handle_request(&self, payload: RequestPayload, reply: oneshot::Sender<ResponseOutcome>) {
        let cached = match &payload {
            RequestPayload::GetStatus => Some(ResponseBody::Status {
                status: self.cache.clone(),
            }),
            RequestPayload::Health => Some(ResponseBody::Health {
                health: self.health(),
            }),
            RequestPayload::GetFocus => Some(ResponseBody::Focus {
                focus: self.focus.clone(),
            }),
            _ => None,
        };

        if let Some(body) = cached {
            let _ = reply.send(ResponseOutcome::ok(body));
            return;
        }

        let services = Arc::clone(&self.services);
        tokio::spawn(async move {
            let outcome = services.handle(payload).await;
            if reply.send(outcome).is_err() {
                debug!("requester dropped before response was ready");
            }
        });
    }

    /// 握手：登记上下文并立即回复缓存状态，不等待新一轮轮询。
    fn register(
        &mut self,
        context_id: ContextId,
        label: String,
        sender: mpsc::Sender<ContextMessage>,
    ) {
        let ack = ContextMessage::ReadyAck {
            status: self.cache.clone(),
        };
        if let Err(err) = sender.try_send(ack) {
            warn!(context_id = %context_id, error = %err, "failed to acknowledge context");
            return;
        }

        let now = Utc::now();
        let previous = self.contexts.insert(
            context_id,
            ReadyContext {
                label: label.clone(),
                sender,
                last_heartbeat_at: now,
            },
        );
        info!(
            context_id = %context_id,
            label = %label,
            reannounce = previous.is_some(),
            ready_contexts = self.contexts.len(),
            "context completed handshake"
        );
    }

    fn touch(&mut self, context_id: &ContextId) {
        if let Some(context) = self.contexts.get_mut(context_id) {
            context.last_heartbeat_at = Utc::now();
        }
    }

    fn health(&self) -> HealthResponse {
        HealthResponse {
            ready: self.cache.ready,
            status_message: self.cache.message.clone(),
        }
    }

    fn start_poll(&mut self) {
        if self.poll_in_flight {
            debug!("status poll already in flight, skipping tick");
            return;
        }
        self.poll_in_flight = true;

        let source = Arc::clone(&self.status_source);
        let poll_tx = self.poll_tx.clone();
        tokio::spawn(async move {
            let _ = poll_tx.send(source.poll_status().await).await;
        });
    }

    fn apply_poll(&mut self, result: crate::Result<StatusReport>) {
        self.poll_in_flight = false;
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "status poll failed");
                unreachable_report(err.to_string())
            }
        };

        if report != self.cache {
            self.update_cache(report);
        }
        for waiter in self.poll_waiters.drain(..) {
            let _ = waiter.send(self.cache.clone());
        }
    }

    fn update_cache(&mut self, report: StatusReport) {
        info!(
            ready = report.ready,
            phase = %report.phase,
            message = %report.message,
            "session status changed"
        );
        let signal = classify(&report);
        self.cache = report;
        self.broadcast(ContextMessage::StatusChanged { signal });
    }

    /// 尽力投递：队列已满只丢弃这一条，通道关闭才移除该上下文。
    fn broadcast(&mut self, message: ContextMessage) {
        let mut closed = Vec::new();

        for (context_id, context) in &self.contexts {
            match context.sender.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        context_id = %context_id,
                        label = %context.label,
                        "context queue full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(
                        context_id = %context_id,
                        label = %context.label,
                        "context channel closed, dropping context"
                    );
                    closed.push(*context_id);
                }
            }
        }

        for context_id in closed {
            if let Some(context) = self.contexts.remove(&context_id) {
                debug!(
                    context_id = %context_id,
                    last_heartbeat_at = %context.last_heartbeat_at,
                    "removed context after its channel closed"
                );
            }
        }
    }
}
