//! API 路由模块。
//!
//! 页面上下文通过 WebSocket 接入协调器，另提供只读的状态查询。

pub mod state;
pub mod status;
pub mod ws;

pub use state::AppState;
pub use status::create_status_router;
pub use ws::websocket_handler;
