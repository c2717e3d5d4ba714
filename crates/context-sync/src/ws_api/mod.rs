//! WebSocket 上下文通道，仅在 `ws-api` feature 启用时可用。

mod handler;

pub use handler::serve_context;
