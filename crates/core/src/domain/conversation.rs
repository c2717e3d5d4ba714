use chrono::{DateTime, Utc};

use super::DomainError;

/// 焦点比较所用的最小会话标识。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationIdentity {
    display_name: String,
    stable_id: Option<String>,
}

impl ConversationIdentity {
    pub fn new(
        display_name: impl Into<String>,
        stable_id: Option<String>,
    ) -> Result<Self, DomainError> {
        let display_name = display_name.into();
        let trimmed = display_name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyDisplayName);
        }

        let stable_id = stable_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(Self {
            display_name: trimmed.to_string(),
            stable_id,
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn stable_id(&self) -> Option<&str> {
        self.stable_id.as_deref()
    }

    /// 双方都有稳定 id 时按 id 比较，否则按显示名称比较。
    pub fn same_conversation(&self, other: &ConversationIdentity) -> bool {
        match (self.stable_id(), other.stable_id()) {
            (Some(left), Some(right)) => left == right,
            _ => self.display_name == other.display_name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusSource {
    Mutation,
    PeriodicHeartbeat,
    Manual,
    DomFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusedConversation {
    identity: ConversationIdentity,
    observed_at: DateTime<Utc>,
    source: FocusSource,
}

impl FocusedConversation {
    pub fn new(identity: ConversationIdentity, source: FocusSource) -> Self {
        Self::observed(identity, source, Utc::now())
    }

    pub fn observed(
        identity: ConversationIdentity,
        source: FocusSource,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            observed_at,
            source,
        }
    }

    pub fn identity(&self) -> &ConversationIdentity {
        &self.identity
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn source(&self) -> FocusSource {
        self.source
    }

    pub fn with_source(mut self, source: FocusSource) -> Self {
        self.source = source;
        self
    }
}
