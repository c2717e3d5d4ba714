//! 后端会话生命周期模块。

use convo_copilot_core::domain::{ConnectionPhase, ConnectionState};

/// 后端会话抽象与原始事件。
pub mod backend;
/// 基于标准输入输出的 JSON-RPC 桥接后端。
pub mod bridge;
/// 会话生命周期管理器实现。
pub mod manager;

pub use backend::{BackendEvent, SessionBackend};
pub use bridge::BridgeBackend;
pub use manager::SessionLifecycleManager;

/// 对外暴露的会话状态，读取自缓存。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// 当前连接阶段。
    pub phase: ConnectionPhase,
    /// 状态描述。
    pub status_message: String,
    /// 是否有可用的扫码凭证。
    pub credential_artifact_available: bool,
}

impl SessionStatus {
    /// 会话是否已就绪。
    pub fn is_ready(&self) -> bool {
        self.phase == ConnectionPhase::Ready
    }
}

impl From<&ConnectionState> for SessionStatus {
    fn from(state: &ConnectionState) -> Self {
        Self {
            phase: state.phase(),
            status_message: state.status_message().to_string(),
            credential_artifact_available: state.credential_artifact().is_some(),
        }
    }
}
