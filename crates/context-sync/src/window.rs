use std::sync::Arc;

use convo_copilot_core::domain::{
    MessageRecord, MessageWindow, WindowPolicy, WindowRequest, WindowWarning,
};
use tracing::{info, warn};

use crate::session::SessionLifecycleManager;
use crate::{Result, SyncError};

/// 一次窗口选择的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSelection {
    pub messages: Vec<MessageRecord>,
    pub pool_size: u32,
    pub warnings: Vec<WindowWarning>,
}

/// 消息窗口选择器：决定拉取多少历史消息，并按日期过滤。
pub struct MessageWindowSelector {
    lifecycle: Arc<SessionLifecycleManager>,
    policy: WindowPolicy,
}

impl MessageWindowSelector {
    pub fn new(lifecycle: Arc<SessionLifecycleManager>, policy: WindowPolicy) -> Self {
        Self { lifecycle, policy }
    }

    /// 会话未就绪返回 `NotReady`，会话不存在返回 `NotFound`；日期解析问题只记录告警。
    #[tracing::instrument(skip(self, request), fields(conversation_id = %request.conversation_id))]
    pub async fn select_window(&self, request: &WindowRequest) -> Result<WindowSelection> {
        let chat = self
            .lifecycle
            .get_chat(&request.conversation_id)
            .await?
            .ok_or_else(|| {
                SyncError::NotFound(format!(
                    "conversation {} not found",
                    request.conversation_id
                ))
            })?;

        let window = MessageWindow::plan(request, chat.unread_count, &self.policy);
        for warning in window.warnings() {
            warn!(warning = %warning, "message window degraded");
        }

        let fetched = self
            .lifecycle
            .fetch_messages(window.conversation_id(), window.pool_size())
            .await?;
        let fetched_count = fetched.len();
        let messages = window.apply(fetched);

        info!(
            pool_size = window.pool_size(),
            fetched = fetched_count,
            kept = messages.len(),
            "selected message window"
        );

        Ok(WindowSelection {
            messages,
            pool_size: window.pool_size(),
            warnings: window.warnings().to_vec(),
        })
    }
}
