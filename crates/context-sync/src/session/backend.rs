use async_trait::async_trait;
use convo_copilot_core::domain::{ChatInfo, MessageRecord};
use tokio::sync::mpsc;

use crate::error::Result;

/// 后端消息客户端推送的原始事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// 收到一次性扫码凭证。
    CredentialIssued(String),
    /// 加载进度。
    Loading { percent: u8, message: String },
    /// 凭证已被消费，认证通过。
    Authenticated,
    /// 认证失败，不再自动重试。
    AuthFailure(String),
    /// 握手完成，会话可用。
    Ready,
    /// 会话掉线。
    Disconnected(String),
}

/// 后端消息会话抽象。
///
/// 生命周期事件通过 `initialize` 传入的通道异步推送，
/// 查询接口仅在会话就绪后由调用方使用。
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// 后端名称，用于日志。
    fn name(&self) -> &str;

    /// 发起一次初始化尝试。
    ///
    /// 返回 `Err` 表示传输层失败，由生命周期管理器决定是否重试。
    async fn initialize(&self, events: mpsc::Sender<BackendEvent>) -> Result<()>;

    /// 查询单个会话，不存在时返回 `None`。
    async fn get_chat(&self, conversation_id: &str) -> Result<Option<ChatInfo>>;

    /// 拉取最近的 `limit` 条消息，顺序由后端决定。
    async fn fetch_messages(&self, conversation_id: &str, limit: u32)
    -> Result<Vec<MessageRecord>>;

    /// 列出全部群聊。
    async fn list_groups(&self) -> Result<Vec<ChatInfo>>;

    /// 释放后端资源。
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
