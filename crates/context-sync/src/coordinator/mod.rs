//! 协调器：连接状态缓存与就绪上下文表的唯一持有者。
//!
//! 按固定间隔轮询会话状态，变化时分类后推送给所有完成握手的上下文，
//! 同时中转焦点变化与面板请求。

mod actor;
mod handle;
mod services;
mod status;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use handle::{ContextConnection, CoordinatorHandle};
pub use services::RequestServices;
pub use status::{StatusSource, classify};

use crate::config::CoordinatorConfig;
use actor::CoordinatorActor;

pub struct Coordinator {
    handle: CoordinatorHandle,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Coordinator {
    pub fn spawn(
        config: &CoordinatorConfig,
        status_source: Arc<dyn StatusSource>,
        services: Arc<RequestServices>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let (tx, task) = CoordinatorActor::spawn(
            status_source,
            services,
            config.poll_interval(),
            shutdown.clone(),
        );

        Self {
            handle: CoordinatorHandle::new(tx, config.context_buffer_size),
            shutdown,
            task,
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "coordinator task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use convo_copilot_api_types::{
        ContextMessage, ConversationRef, ErrorKind, FocusSnapshot, FocusSource, RequestPayload,
        ResponseBody, ResponseOutcome, StatusReport, StatusSignal,
    };
    use convo_copilot_core::domain::{ContextId, WindowPolicy};
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::SessionConfig;
    use crate::events::EventBroadcaster;
    use crate::session::SessionLifecycleManager;
    use crate::window::MessageWindowSelector;
    use crate::{Result, SyncError};

    mod common {
        mod context_sync {
            pub use crate::focus::{AnchorId, ConversationSurface};
            pub use crate::session::{BackendEvent, SessionBackend};
            pub use crate::summarize::{SummaryRequest, Summarizer};
            pub use crate::{Result, SyncError};
        }

        include!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/common/mod.rs"));
    }

    use common::{ScriptedBackend, StaticSummarizer};

    #[derive(Default)]
    struct FakeStatus {
        report: Mutex<Option<StatusReport>>,
        hang: bool,
    }

    impl FakeStatus {
        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::default()
            }
        }

        fn set(&self, report: Option<StatusReport>) {
            *self.report.lock().expect("status lock") = report;
        }
    }

    #[async_trait]
    impl StatusSource for FakeStatus {
        async fn poll_status(&self) -> Result<StatusReport> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            match self.report.lock().expect("status lock").clone() {
                Some(report) => Ok(report),
                None => Err(SyncError::TransportUnavailable(
                    "connection refused".to_string(),
                )),
            }
        }
    }

    fn services() -> Arc<RequestServices> {
        let lifecycle = SessionLifecycleManager::new(
            Arc::new(ScriptedBackend::new()),
            SessionConfig::default(),
            EventBroadcaster::new(16),
        );
        let selector = MessageWindowSelector::new(Arc::clone(&lifecycle), WindowPolicy::default());
        Arc::new(RequestServices::new(
            lifecycle,
            selector,
            Arc::new(StaticSummarizer::new("summary")),
        ))
    }

    fn spawn(source: Arc<dyn StatusSource>) -> Coordinator {
        Coordinator::spawn(&CoordinatorConfig::default(), source, services())
    }

    fn ready_report() -> StatusReport {
        StatusReport {
            ready: true,
            message: "Client is ready and connected.".to_string(),
            credential_artifact_available: false,
            phase: "ready".to_string(),
        }
    }

    fn focus(name: &str) -> FocusSnapshot {
        FocusSnapshot {
            identity: ConversationRef {
                display_name: name.to_string(),
                stable_id: None,
            },
            source: FocusSource::Mutation,
            observed_at: 1_717_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_handshake_replies_from_cache_without_poll() {
        let coordinator = spawn(Arc::new(FakeStatus::hanging()));
        let handle = coordinator.handle();
        let (tx, mut rx) = mpsc::channel(8);

        let status = handle
            .announce(ContextId::new(), "tab", tx)
            .await
            .expect("announce");

        assert_eq!(status, StatusReport::unknown());
        assert_eq!(
            rx.recv().await,
            Some(ContextMessage::ReadyAck {
                status: StatusReport::unknown()
            })
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_change_is_classified_and_broadcast() {
        let source = Arc::new(FakeStatus::default());
        source.set(Some(StatusReport::unknown()));
        let coordinator = spawn(source.clone());
        let handle = coordinator.handle();
        let (tx, mut rx) = mpsc::channel(8);
        handle
            .announce(ContextId::new(), "tab", tx)
            .await
            .expect("announce");
        assert!(matches!(rx.recv().await, Some(ContextMessage::ReadyAck { .. })));

        source.set(Some(ready_report()));
        let mut status = handle.poll_now().await.expect("poll");
        if !status.ready {
            // 启动时的首轮轮询可能仍在途，再触发一次
            status = handle.poll_now().await.expect("poll");
        }

        assert!(status.ready);
        assert_eq!(
            rx.recv().await,
            Some(ContextMessage::StatusChanged {
                signal: StatusSignal::SessionReady
            })
        );
        let health = handle.health().await.expect("health");
        assert_eq!(health.status_message, "Client is ready and connected.");
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_context_is_removed_and_others_still_delivered() {
        let coordinator = spawn(Arc::new(FakeStatus::hanging()));
        let handle = coordinator.handle();

        let healthy_id = ContextId::new();
        let (healthy_tx, mut healthy_rx) = mpsc::channel(8);
        handle
            .announce(healthy_id, "healthy", healthy_tx)
            .await
            .expect("announce");

        let closed_id = ContextId::new();
        let (closed_tx, closed_rx) = mpsc::channel(8);
        handle
            .announce(closed_id, "closed", closed_tx)
            .await
            .expect("announce");
        drop(closed_rx);

        handle
            .publish_focus(None, focus("Family"))
            .await
            .expect("publish");

        assert!(matches!(healthy_rx.recv().await, Some(ContextMessage::ReadyAck { .. })));
        assert_eq!(
            healthy_rx.recv().await,
            Some(ContextMessage::FocusChanged {
                focus: focus("Family")
            })
        );
        assert_eq!(
            handle.ready_contexts().await.expect("contexts"),
            vec![healthy_id]
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_message_but_keeps_context() {
        let coordinator = spawn(Arc::new(FakeStatus::hanging()));
        let handle = coordinator.handle();

        // 容量为 2：READY_ACK 加一条焦点之后即满
        let slow_id = ContextId::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(2);
        handle
            .announce(slow_id, "slow", slow_tx)
            .await
            .expect("announce");

        for name in ["A", "B", "C"] {
            handle
                .publish_focus(None, focus(name))
                .await
                .expect("publish");
        }
        assert_eq!(
            handle.ready_contexts().await.expect("contexts"),
            vec![slow_id]
        );

        assert!(matches!(slow_rx.recv().await, Some(ContextMessage::ReadyAck { .. })));
        assert_eq!(
            slow_rx.recv().await,
            Some(ContextMessage::FocusChanged { focus: focus("A") })
        );

        handle
            .publish_focus(None, focus("D"))
            .await
            .expect("publish");
        handle.ready_contexts().await.expect("contexts");

        assert_eq!(
            slow_rx.try_recv(),
            Ok(ContextMessage::FocusChanged { focus: focus("D") })
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_poll_failure_caches_unreachable_status() {
        let source = Arc::new(FakeStatus::default());
        let coordinator = spawn(source);
        let handle = coordinator.handle();

        let status = handle.poll_now().await.expect("poll");

        assert!(!status.ready);
        assert_eq!(status.phase, "unknown");
        assert!(status.message.contains("connection refused"));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_link_round_trip() {
        let coordinator = spawn(Arc::new(FakeStatus::hanging()));
        let handle = coordinator.handle();
        let mut conn = handle.connect("panel");

        conn.to_coordinator
            .send(ContextMessage::ReadyAnnounce {
                context_id: "tab-7".to_string(),
            })
            .await
            .expect("announce");
        assert!(matches!(
            conn.from_coordinator.recv().await,
            Some(ContextMessage::ReadyAck { .. })
        ));

        conn.to_coordinator
            .send(ContextMessage::Request {
                id: "r-1".to_string(),
                payload: RequestPayload::ListGroups,
            })
            .await
            .expect("request");

        match conn.from_coordinator.recv().await {
            Some(ContextMessage::Response { id, outcome }) => {
                assert_eq!(id, "r-1");
                match outcome {
                    ResponseOutcome::Err { error } => assert_eq!(error.kind, ErrorKind::NotReady),
                    other => panic!("expected not ready, got: {other:?}"),
                }
            }
            other => panic!("expected response, got: {other:?}"),
        }

        conn.to_coordinator
            .send(ContextMessage::Request {
                id: "r-2".to_string(),
                payload: RequestPayload::GetFocus,
            })
            .await
            .expect("request");
        assert_eq!(
            conn.from_coordinator.recv().await,
            Some(ContextMessage::Response {
                id: "r-2".to_string(),
                outcome: ResponseOutcome::ok(ResponseBody::Focus { focus: None }),
            })
        );

        drop(conn.to_coordinator);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(handle.ready_contexts().await.expect("contexts").is_empty());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_resolve_as_invalidated() {
        let coordinator = spawn(Arc::new(FakeStatus::hanging()));
        let handle = coordinator.handle();
        coordinator.shutdown().await;

        let outcome = handle.request(None, RequestPayload::GetStatus).await;

        match outcome {
            ResponseOutcome::Err { error } => {
                assert_eq!(error.kind, ErrorKind::ChannelInvalidated)
            }
            other => panic!("expected invalidated, got: {other:?}"),
        }
    }
}
