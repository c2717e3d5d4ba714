use convo_copilot_core::domain::HeaderSnapshot;

/// 会话标题锚点元素的标识，元素被替换后标识随之改变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorId(pub u64);

/// 宿主页面渲染出的会话界面。
///
/// 读取均为同步操作，找不到内容时返回 `None` 而不是错误。
pub trait ConversationSurface: Send + Sync {
    /// 当前渲染的标题锚点。
    fn anchor(&self) -> Option<AnchorId>;

    /// 读取锚点下的标题内容；锚点已不存在时返回 `None`。
    fn header(&self, anchor: AnchorId) -> Option<HeaderSnapshot>;
}

/// 页面结构变更通知。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMutation {
    /// 锚点子树发生结构变化。
    Subtree { anchor: AnchorId },
    /// 锚点元素本身被移除或替换。
    AnchorRemoved { anchor: AnchorId },
}
