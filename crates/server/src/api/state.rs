//! 统一的应用状态。

use context_sync::CoordinatorHandle;

/// 统一的应用状态，包含所有服务共享的数据。
#[derive(Clone)]
pub struct AppState {
    /// 协调器句柄。
    pub coordinator: CoordinatorHandle,
}

impl AppState {
    /// 创建新的应用状态。
    pub fn new(coordinator: CoordinatorHandle) -> Self {
        Self { coordinator }
    }
}
