use convo_copilot_api_types::ContextMessage;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// 单次投递失败的类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// 本条消息丢失，通道仍可用。
    #[error("message dropped")]
    Dropped,
    /// 通道已永久失效。
    #[error("messaging channel invalidated")]
    Invalidated,
}

/// 页面上下文通往协调器的出站通道。
pub trait ContextChannel: Send + Sync {
    fn post(&self, message: ContextMessage) -> Result<(), ChannelError>;
}

impl ContextChannel for mpsc::Sender<ContextMessage> {
    fn post(&self, message: ContextMessage) -> Result<(), ChannelError> {
        self.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => ChannelError::Dropped,
            TrySendError::Closed(_) => ChannelError::Invalidated,
        })
    }
}
