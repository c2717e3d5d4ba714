use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use convo_copilot_core::domain::{
    ChatInfo, ConnectionPhase, ConnectionState, DomainError, MessageRecord,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BackendEvent, SessionBackend, SessionStatus};
use crate::config::SessionConfig;
use crate::events::{EventBroadcaster, EventStream, SessionEvent};
use crate::{Result, SyncError};

const BACKEND_EVENT_BUFFER: usize = 64;
const SCAN_MESSAGE: &str = "QR code received. Please scan.";
const AUTHENTICATED_MESSAGE: &str = "Authenticated successfully.";
const READY_MESSAGE: &str = "Client is ready and connected.";
const RECONNECTING_MESSAGE: &str = "Reconnecting...";

/// 后端会话生命周期管理器。
///
/// 连接状态只由本管理器写入；读取方通过 `status` 拿到缓存值，从不等待网络。
pub struct SessionLifecycleManager {
    backend: Arc<dyn SessionBackend>,
    config: SessionConfig,
    state: watch::Sender<ConnectionState>,
    events: EventBroadcaster<SessionEvent>,
    backend_tx: mpsc::Sender<BackendEvent>,
    backend_rx: Mutex<Option<mpsc::Receiver<BackendEvent>>>,
    start_lock: tokio::sync::Mutex<()>,
    max_retries: AtomicU32,
    shutdown: CancellationToken,
}

impl SessionLifecycleManager {
    /// 创建生命周期管理器，初始阶段为 `initializing`。
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        config: SessionConfig,
        events: EventBroadcaster<SessionEvent>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::new(config.max_retries));
        let (backend_tx, backend_rx) = mpsc::channel(BACKEND_EVENT_BUFFER);

        Arc::new(Self {
            backend,
            max_retries: AtomicU32::new(config.max_retries),
            config,
            state,
            events,
            backend_tx,
            backend_rx: Mutex::new(Some(backend_rx)),
            start_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    /// 读取缓存状态，不阻塞。
    pub fn status(&self) -> SessionStatus {
        SessionStatus::from(&*self.state.borrow())
    }

    /// 仅在等待扫码阶段返回凭证。
    pub fn credential_artifact(&self) -> Option<String> {
        self.state.borrow().credential_artifact().map(str::to_string)
    }

    /// 当前连接状态快照。
    pub fn snapshot(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// 订阅连接状态的最新值。
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// 订阅生命周期事件。
    pub fn subscribe(&self) -> EventStream<SessionEvent> {
        self.events.subscribe()
    }

    /// 启动后端会话。
    ///
    /// 传输层失败按固定间隔重试，共尝试 `max_retries + 1` 次，全部失败后进入 `failed`。
    #[tracing::instrument(skip(self), fields(backend = %self.backend.name()))]
    pub async fn start(self: &Arc<Self>, max_retries: u32) -> Result<()> {
        let _guard = self.start_lock.lock().await;
        self.ensure_event_pump();
        self.max_retries.store(max_retries, Ordering::Relaxed);
        self.enter_initializing()?;

        let mut retries_left = max_retries;
        self.state.send_modify(|state| state.set_retries_left(retries_left));

        let mut attempt: u32 = 1;
        loop {
            info!(attempt, retries_left, "initializing backing session");

            let err = match self.backend.initialize(self.backend_tx.clone()).await {
                Ok(()) => {
                    info!(attempt, "backing session initialized");
                    return Ok(());
                }
                Err(err) => err,
            };

            warn!(attempt, error = %err, "backing session initialization failed");
            self.ensure_not_failed()?;
            if retries_left == 0 {
                let message = format!("Client initialization error: {err}");
                self.fail(&message);
                return Err(SyncError::TransportUnavailable(message));
            }

            let delay = self.config.retry_delay();
            self.state.send_modify(|state| {
                state.set_status_message(format!(
                    "Client initialization error: {err}. Retrying in {}s ({retries_left} retries left)",
                    delay.as_secs()
                ));
            });
            retries_left -= 1;
            self.state
                .send_modify(|state| state.set_retries_left(retries_left));

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(SyncError::TransportUnavailable(
                        "session manager shut down during retry".to_string(),
                    ));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // 等待期间可能已收到认证失败
            self.ensure_not_failed()?;
            self.reset_for_retry();
            attempt += 1;
        }
    }

    /// 列出群聊，要求会话已就绪。
    pub async fn list_groups(&self) -> Result<Vec<ChatInfo>> {
        self.ensure_ready()?;
        self.backend.list_groups().await
    }

    /// 查询会话信息，要求会话已就绪。
    pub async fn get_chat(&self, conversation_id: &str) -> Result<Option<ChatInfo>> {
        self.ensure_ready()?;
        self.backend.get_chat(conversation_id).await
    }

    /// 拉取消息，要求会话已就绪。
    pub async fn fetch_messages(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        self.ensure_ready()?;
        self.backend.fetch_messages(conversation_id, limit).await
    }

    /// 停止事件处理与重试，并关闭后端。
    pub async fn shutdown(&self) -> Result<()> {
        info!(backend = %self.backend.name(), "shutting down session lifecycle manager");
        self.shutdown.cancel();
        self.backend.shutdown().await
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = self.state.borrow();
        if state.is_ready() {
            return Ok(());
        }
        Err(SyncError::NotReady(state.status_message().to_string()))
    }

    fn ensure_event_pump(self: &Arc<Self>) {
        let receiver = match self.backend_rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut receiver) = receiver else {
            return;
        };

        let manager = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = receiver.recv() => event,
                };
                let Some(event) = event else {
                    break;
                };
                let Some(manager) = Weak::upgrade(&manager) else {
                    break;
                };
                manager.apply_backend_event(event);
            }
            debug!("backend event pump stopped");
        });
    }

    fn apply_backend_event(self: &Arc<Self>, event: BackendEvent) {
        debug!(event = ?event, "applying backend event");

        match event {
            BackendEvent::CredentialIssued(artifact) => self.issue_credential(artifact),
            BackendEvent::Loading { percent, message } => {
                self.state.send_modify(|state| {
                    state.set_status_message(format!("Loading: {percent}% - {message}"));
                });
                self.events.emit(SessionEvent::Loading { percent, message });
            }
            BackendEvent::Authenticated => {
                self.transition_or_warn(ConnectionPhase::Authenticating, AUTHENTICATED_MESSAGE);
            }
            BackendEvent::Ready => {
                self.transition_or_warn(ConnectionPhase::Ready, READY_MESSAGE);
            }
            BackendEvent::AuthFailure(reason) => {
                self.fail(&format!("Authentication failure: {reason}"));
            }
            BackendEvent::Disconnected(reason) => {
                let reconnect = self.config.auto_reconnect && !self.shutdown.is_cancelled();
                let message = if reconnect {
                    format!("Client disconnected: {reason}. Attempting to reconnect...")
                } else {
                    format!("Client disconnected: {reason}.")
                };

                if self.transition_or_warn(ConnectionPhase::Disconnected, message) && reconnect {
                    self.spawn_reconnect();
                }
            }
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let max_retries = manager.max_retries.load(Ordering::Relaxed);
            if let Err(err) = manager.start(max_retries).await {
                warn!(error = %err, "automatic reconnect failed");
            }
        });
    }

    fn issue_credential(&self, artifact: String) {
        let mut outcome = Ok(false);
        let from = self.state.borrow().phase();
        self.state
            .send_if_modified(|state| match state.issue_credential(artifact, SCAN_MESSAGE) {
                Ok(changed) => {
                    outcome = Ok(changed);
                    true
                }
                Err(err) => {
                    outcome = Err(err);
                    false
                }
            });

        match outcome {
            Ok(changed) => {
                if changed {
                    self.announce_transition(from, ConnectionPhase::AwaitingScan, SCAN_MESSAGE);
                }
                self.events.emit(SessionEvent::CredentialIssued);
            }
            Err(err) => warn!(error = %err, "ignoring credential artifact"),
        }
    }

    fn enter_initializing(&self) -> Result<()> {
        match self.state.borrow().phase() {
            ConnectionPhase::Initializing => return Ok(()),
            ConnectionPhase::Disconnected => {}
            other => {
                return Err(DomainError::InvalidTransition {
                    from: other,
                    to: ConnectionPhase::Initializing,
                }
                .into());
            }
        }

        self.transition(ConnectionPhase::Initializing, RECONNECTING_MESSAGE)?;
        Ok(())
    }

    /// 一次失败的尝试可能已推进到扫码等阶段，重试前先回到 `initializing`。
    fn ensure_not_failed(&self) -> Result<()> {
        let state = self.state.borrow();
        if state.phase() == ConnectionPhase::Failed {
            warn!(status = %state.status_message(), "session failed, abandoning retries");
            return Err(SyncError::Upstream(state.status_message().to_string()));
        }
        Ok(())
    }

    fn reset_for_retry(&self) {
        let phase = self.state.borrow().phase();
        if phase == ConnectionPhase::Initializing {
            return;
        }
        if phase != ConnectionPhase::Disconnected {
            self.transition_or_warn(ConnectionPhase::Disconnected, RECONNECTING_MESSAGE);
        }
        self.transition_or_warn(ConnectionPhase::Initializing, RECONNECTING_MESSAGE);
    }

    fn fail(&self, message: &str) {
        let phase = self.state.borrow().phase();
        if !phase.can_transition_to(ConnectionPhase::Failed) {
            self.transition_or_warn(ConnectionPhase::Disconnected, message);
        }
        self.transition_or_warn(ConnectionPhase::Failed, message);
    }

    fn transition_or_warn(&self, next: ConnectionPhase, message: impl Into<String>) -> bool {
        match self.transition(next, message) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "rejected connection phase transition");
                false
            }
        }
    }

    fn transition(
        &self,
        next: ConnectionPhase,
        message: impl Into<String>,
    ) -> std::result::Result<(), DomainError> {
        let message = message.into();
        let mut outcome = Ok(());
        let mut from = next;

        self.state.send_if_modified(|state| {
            from = state.phase();
            match state.transition(next, message.clone()) {
                Ok(()) => true,
                Err(err) => {
                    outcome = Err(err);
                    false
                }
            }
        });

        outcome?;
        self.announce_transition(from, next, &message);
        Ok(())
    }

    fn announce_transition(&self, from: ConnectionPhase, to: ConnectionPhase, message: &str) {
        info!(from = %from, to = %to, message, "connection phase changed");
        self.events.emit(SessionEvent::PhaseChanged {
            from,
            to,
            message: message.to_string(),
        });
    }
}

impl Drop for SessionLifecycleManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use convo_copilot_core::domain::ConnectionPhase;

    use super::*;
    use crate::config::SessionConfig;

    mod common {
        mod context_sync {
            pub use crate::focus::{AnchorId, ConversationSurface};
            pub use crate::session::{BackendEvent, SessionBackend};
            pub use crate::summarize::{SummaryRequest, Summarizer};
            pub use crate::{Result, SyncError};
        }

        include!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/common/mod.rs"));
    }

    use common::ScriptedBackend;

    fn config(max_retries: u32, auto_reconnect: bool) -> SessionConfig {
        SessionConfig {
            max_retries,
            retry_delay_ms: 10_000,
            auto_reconnect,
            ..SessionConfig::default()
        }
    }

    fn manager(
        backend: &ScriptedBackend,
        config: SessionConfig,
    ) -> Arc<SessionLifecycleManager> {
        SessionLifecycleManager::new(
            Arc::new(backend.clone()),
            config,
            EventBroadcaster::new(64),
        )
    }

    async fn wait_for_phase(manager: &SessionLifecycleManager, phase: ConnectionPhase) {
        let mut state = manager.watch_state();
        state
            .wait_for(|state| state.phase() == phase)
            .await
            .expect("state channel should stay open");
    }

    #[tokio::test]
    async fn test_scan_then_ready() {
        let backend = ScriptedBackend::new()
            .with_init_events(vec![BackendEvent::CredentialIssued("qr-1".to_string())]);
        let manager = manager(&backend, config(3, true));

        manager.start(3).await.expect("start should succeed");
        wait_for_phase(&manager, ConnectionPhase::AwaitingScan).await;

        let status = manager.status();
        assert!(status.credential_artifact_available);
        assert_eq!(status.status_message, "QR code received. Please scan.");
        assert_eq!(manager.credential_artifact().as_deref(), Some("qr-1"));

        backend.push(BackendEvent::Authenticated).await;
        backend.push(BackendEvent::Ready).await;
        wait_for_phase(&manager, ConnectionPhase::Ready).await;

        assert!(manager.status().is_ready());
        assert_eq!(manager.credential_artifact(), None);
        assert_eq!(backend.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_make_exactly_n_plus_one_attempts() {
        let backend = ScriptedBackend::new().always_failing();
        let manager = manager(&backend, config(2, true));

        let err = manager.start(2).await.expect_err("start should give up");

        assert!(matches!(err, SyncError::TransportUnavailable(_)));
        assert_eq!(backend.attempts(), 3);
        let state = manager.snapshot();
        assert_eq!(state.phase(), ConnectionPhase::Failed);
        assert_eq!(state.retries_left(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let backend = ScriptedBackend::new().failing(1);
        let manager = manager(&backend, config(3, true));

        manager.start(3).await.expect("second attempt should succeed");

        assert_eq!(backend.attempts(), 2);
        let state = manager.snapshot();
        assert_eq!(state.phase(), ConnectionPhase::Initializing);
        assert_eq!(state.retries_left(), 2);
    }

    #[tokio::test]
    async fn test_restored_credentials_skip_scan() {
        let backend = ScriptedBackend::new()
            .with_init_events(vec![BackendEvent::Authenticated, BackendEvent::Ready]);
        let manager = manager(&backend, config(0, true));

        manager.start(0).await.expect("start should succeed");
        wait_for_phase(&manager, ConnectionPhase::Ready).await;

        assert_eq!(manager.status().status_message, "Client is ready and connected.");
    }

    #[tokio::test]
    async fn test_loading_updates_message_without_phase_change() {
        let backend = ScriptedBackend::new().with_init_events(vec![BackendEvent::Loading {
            percent: 42,
            message: "Syncing chats".to_string(),
        }]);
        let manager = manager(&backend, config(0, true));
        let mut events = manager.subscribe();

        manager.start(0).await.expect("start should succeed");
        let event = events.recv().await.expect("loading event");

        assert!(matches!(event, SessionEvent::Loading { percent: 42, .. }));
        let status = manager.status();
        assert_eq!(status.phase, ConnectionPhase::Initializing);
        assert_eq!(status.status_message, "Loading: 42% - Syncing chats");
    }

    #[tokio::test]
    async fn test_auth_failure_is_terminal() {
        let backend = ScriptedBackend::new().with_init_events(vec![
            BackendEvent::CredentialIssued("qr-1".to_string()),
            BackendEvent::AuthFailure("bad session".to_string()),
        ]);
        let manager = manager(&backend, config(3, true));

        manager.start(3).await.expect("start should succeed");
        wait_for_phase(&manager, ConnectionPhase::Failed).await;

        assert_eq!(manager.credential_artifact(), None);
        let err = manager.start(3).await.expect_err("failed is terminal");
        assert!(matches!(err, SyncError::InvalidTransition(_)));
        assert_eq!(backend.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_during_failed_attempt_stops_retries() {
        let backend = ScriptedBackend::new()
            .with_init_events(vec![
                BackendEvent::CredentialIssued("qr-1".to_string()),
                BackendEvent::AuthFailure("bad session".to_string()),
            ])
            .failing(1)
            .emitting_before_failure();
        let manager = manager(&backend, config(3, true));

        let err = manager
            .start(3)
            .await
            .expect_err("auth failure should end the retry loop");

        assert!(matches!(err, SyncError::Upstream(ref message) if message.contains("bad session")));
        assert_eq!(backend.attempts(), 1);
        assert_eq!(manager.snapshot().phase(), ConnectionPhase::Failed);
    }

    #[tokio::test]
    async fn test_disconnect_triggers_reconnect() {
        let backend = ScriptedBackend::new()
            .with_init_events(vec![BackendEvent::Authenticated, BackendEvent::Ready]);
        let manager = manager(&backend, config(1, true));
        let mut events = manager.subscribe();

        manager.start(1).await.expect("start should succeed");
        wait_for_phase(&manager, ConnectionPhase::Ready).await;
        backend.push(BackendEvent::Disconnected("NAVIGATION".to_string())).await;

        loop {
            let event = events.recv().await.expect("session event");
            if let SessionEvent::PhaseChanged {
                from: ConnectionPhase::Disconnected,
                to: ConnectionPhase::Initializing,
                ..
            } = event
            {
                break;
            }
        }

        wait_for_phase(&manager, ConnectionPhase::Ready).await;
        assert_eq!(backend.attempts(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_without_auto_reconnect_stays_disconnected() {
        let backend = ScriptedBackend::new()
            .with_init_events(vec![BackendEvent::Authenticated, BackendEvent::Ready]);
        let manager = manager(&backend, config(1, false));

        manager.start(1).await.expect("start should succeed");
        wait_for_phase(&manager, ConnectionPhase::Ready).await;
        backend.push(BackendEvent::Disconnected("LOGOUT".to_string())).await;
        wait_for_phase(&manager, ConnectionPhase::Disconnected).await;

        assert_eq!(manager.status().status_message, "Client disconnected: LOGOUT.");
        assert_eq!(backend.attempts(), 1);
    }

    #[tokio::test]
    async fn test_queries_require_ready_session() {
        let backend = ScriptedBackend::new();
        let manager = manager(&backend, config(0, true));

        let err = manager
            .list_groups()
            .await
            .expect_err("groups need a ready session");

        assert!(matches!(err, SyncError::NotReady(_)));
    }
}
