//! 页面侧焦点检测模块。

/// 焦点检测器实现。
pub mod detector;
/// 宿主页面的抽象。
pub mod surface;

pub use detector::FocusDetector;
pub use surface::{AnchorId, ConversationSurface, SurfaceMutation};
