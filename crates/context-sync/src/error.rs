use convo_copilot_api_types::{ErrorBody, ErrorKind};
use convo_copilot_core::domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("后端会话不可达: {0}")]
    TransportUnavailable(String),

    #[error("后端会话未就绪: {0}")]
    NotReady(String),

    #[error("会话未找到: {0}")]
    NotFound(String),

    #[error("跨上下文通道已失效: {0}")]
    ChannelInvalidated(String),

    #[error("请求超时: {0}")]
    RequestTimeout(String),

    #[error("上游错误: {0}")]
    Upstream(String),

    #[error("不支持的请求: {0}")]
    Unsupported(String),

    #[error("状态迁移非法: {0}")]
    InvalidTransition(#[from] DomainError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML 错误: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// 映射为跨上下文传输使用的错误类别。
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::TransportUnavailable(_) => ErrorKind::TransportUnavailable,
            SyncError::NotReady(_) => ErrorKind::NotReady,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::ChannelInvalidated(_) => ErrorKind::ChannelInvalidated,
            SyncError::RequestTimeout(_) => ErrorKind::Timeout,
            SyncError::Unsupported(_) => ErrorKind::Unsupported,
            SyncError::Config(_)
            | SyncError::Upstream(_)
            | SyncError::InvalidTransition(_)
            | SyncError::Io(_)
            | SyncError::Json(_)
            | SyncError::Toml(_)
            | SyncError::Other(_) => ErrorKind::Upstream,
        }
    }

    /// 转换为错误值，跨上下文边界时不再抛出。
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody::new(self.kind(), self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
