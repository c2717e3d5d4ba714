use async_trait::async_trait;
use convo_copilot_api_types::{StatusReport, StatusSignal};

use crate::Result;
use crate::adapter::status_report;
use crate::session::SessionLifecycleManager;

/// 协调器轮询的会话状态来源。
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn poll_status(&self) -> Result<StatusReport>;
}

#[async_trait]
impl StatusSource for SessionLifecycleManager {
    async fn poll_status(&self) -> Result<StatusReport> {
        Ok(status_report(&self.status()))
    }
}

/// 把一次状态变化归类为下游关心的粗粒度信号。
pub fn classify(report: &StatusReport) -> StatusSignal {
    if report.ready {
        StatusSignal::SessionReady
    } else if report.credential_artifact_available {
        StatusSignal::CredentialAvailable
    } else {
        StatusSignal::StatusChanged {
            status: report.clone(),
        }
    }
}

/// 轮询失败时写入缓存的状态。
pub fn unreachable_report(message: String) -> StatusReport {
    StatusReport {
        ready: false,
        message,
        credential_artifact_available: false,
        phase: "unknown".to_string(),
    }
}
