pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod focus;
pub mod relay;
pub mod session;
pub mod summarize;
pub mod window;

#[cfg(feature = "ws-api")]
pub mod ws_api;

pub use config::{
    CoordinatorConfig, CopilotConfig, EnvVar, FocusConfig, RelayConfig, ServerConfig,
    SessionConfig, SummarizerConfig, WindowConfig,
};
pub use coordinator::{
    ContextConnection, Coordinator, CoordinatorHandle, RequestServices, StatusSource,
};
pub use error::{Result, SyncError};
pub use events::{EventBroadcaster, EventStream, FocusEvent, SessionEvent};
pub use focus::{AnchorId, ConversationSurface, FocusDetector, SurfaceMutation};
pub use relay::{
    ChannelError, ContextChannel, DegradedFlagStore, FileFlagStore, MemoryFlagStore, PageContext,
    PageWiring, PanelEvent, PanelRelay, RelayNotice, RelayReply, flag_store,
};
pub use session::{
    BackendEvent, BridgeBackend, SessionBackend, SessionLifecycleManager, SessionStatus,
};
pub use summarize::{HttpSummarizer, SummaryRequest, Summarizer};
pub use window::{MessageWindowSelector, WindowSelection};
