use std::fmt;

use super::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    Initializing,
    AwaitingScan,
    Authenticating,
    Ready,
    Disconnected,
    Failed,
}

impl ConnectionPhase {
    pub const ALL: [ConnectionPhase; 6] = [
        ConnectionPhase::Initializing,
        ConnectionPhase::AwaitingScan,
        ConnectionPhase::Authenticating,
        ConnectionPhase::Ready,
        ConnectionPhase::Disconnected,
        ConnectionPhase::Failed,
    ];

    /// `self -> next` 是否为合法的生命周期转换。
    ///
    /// `Initializing -> Authenticating` 对应已保存的凭证无需扫码即可认证；`Failed` 为终态。
    pub fn can_transition_to(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;

        match (self, next) {
            (Failed, _) => false,
            (Disconnected, Disconnected) => false,
            (_, Disconnected) => true,
            (Initializing, AwaitingScan)
            | (Initializing, Authenticating)
            | (Initializing, Failed)
            | (AwaitingScan, Authenticating)
            | (Authenticating, Ready)
            | (Disconnected, Initializing)
            | (Disconnected, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionPhase::Initializing => "initializing",
            ConnectionPhase::AwaitingScan => "awaiting_scan",
            ConnectionPhase::Authenticating => "authenticating",
            ConnectionPhase::Ready => "ready",
            ConnectionPhase::Disconnected => "disconnected",
            ConnectionPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    status_message: String,
    credential_artifact: Option<String>,
    retries_left: u32,
}

impl ConnectionState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            phase: ConnectionPhase::Initializing,
            status_message: "Initializing...".to_string(),
            credential_artifact: None,
            retries_left: max_retries,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    pub fn is_ready(&self) -> bool {
        self.phase == ConnectionPhase::Ready
    }

    /// 扫码凭证，仅在仍然有效时返回。
    pub fn credential_artifact(&self) -> Option<&str> {
        match self.phase {
            ConnectionPhase::AwaitingScan => self.credential_artifact.as_deref(),
            _ => None,
        }
    }

    pub fn transition(
        &mut self,
        next: ConnectionPhase,
        status_message: impl Into<String>,
    ) -> Result<(), DomainError> {
        if !self.phase.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }

        self.phase = next;
        self.status_message = status_message.into();
        if next != ConnectionPhase::AwaitingScan {
            self.credential_artifact = None;
        }
        Ok(())
    }

    /// 保存新下发的扫码凭证。
    ///
    /// 阶段发生变化时返回 `true`；已在等待扫码、仅替换旧凭证时返回 `false`。
    pub fn issue_credential(
        &mut self,
        artifact: impl Into<String>,
        status_message: impl Into<String>,
    ) -> Result<bool, DomainError> {
        let changed = match self.phase {
            ConnectionPhase::AwaitingScan => {
                self.status_message = status_message.into();
                false
            }
            _ => {
                self.transition(ConnectionPhase::AwaitingScan, status_message)?;
                true
            }
        };

        self.credential_artifact = Some(artifact.into());
        Ok(changed)
    }

    pub fn set_status_message(&mut self, status_message: impl Into<String>) {
        self.status_message = status_message.into();
    }

    pub fn set_retries_left(&mut self, retries_left: u32) {
        self.retries_left = retries_left;
    }
}
