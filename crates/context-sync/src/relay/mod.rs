//! 页面上下文一侧：面板请求中继、握手重试与降级模式。

mod channel;
mod flags;
mod page;
mod panel;

pub use channel::{ChannelError, ContextChannel};
pub use flags::{DegradedFlagStore, FileFlagStore, MemoryFlagStore, flag_store};
pub use page::{PageContext, PageWiring, PanelEvent};
pub use panel::{PanelRelay, RelayNotice, RelayReply};
