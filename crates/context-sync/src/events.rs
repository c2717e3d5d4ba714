use anyhow::Result;
use convo_copilot_core::domain::{ConnectionPhase, FocusedConversation};
use tokio::sync::broadcast;

/// 会话生命周期对外广播的事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// 连接阶段发生迁移。
    PhaseChanged {
        /// 迁移前阶段。
        from: ConnectionPhase,
        /// 迁移后阶段。
        to: ConnectionPhase,
        /// 迁移后的状态描述。
        message: String,
    },
    /// 收到新的扫码凭证。
    CredentialIssued,
    /// 加载进度更新，不伴随阶段变化。
    Loading {
        /// 进度百分比。
        percent: u8,
        /// 进度描述。
        message: String,
    },
}

/// 焦点检测器对外广播的事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusEvent {
    /// 当前聚焦的会话。
    pub focus: FocusedConversation,
    /// 是否为心跳强制推送。
    pub forced: bool,
}

/// 基于 `tokio::broadcast` 的事件广播器，一个发布者对多个订阅者。
#[derive(Debug, Clone)]
pub struct EventBroadcaster<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBroadcaster<E> {
    /// 创建事件广播器。
    ///
    /// `capacity` 表示内部广播队列容量。
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 广播一个事件，没有订阅者时直接丢弃。
    pub fn emit(&self, event: E) {
        let _ = self.sender.send(event);
    }

    /// 订阅事件流。
    pub fn subscribe(&self) -> EventStream<E> {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }

}

/// 事件接收流包装器。
#[derive(Debug)]
pub struct EventStream<E> {
    receiver: broadcast::Receiver<E>,
}

impl<E: Clone> EventStream<E> {
    /// 异步接收下一条事件。
    pub async fn recv(&mut self) -> Result<E> {
        Ok(self.receiver.recv().await?)
    }

    /// 接收下一条事件，落后时跳过丢失部分；发布端关闭后返回 `None`。
    pub async fn next(&mut self) -> Option<E> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// 非阻塞尝试接收一条事件。
    pub fn try_recv(&mut self) -> Result<E> {
        Ok(self.receiver.try_recv()?)
    }
}
