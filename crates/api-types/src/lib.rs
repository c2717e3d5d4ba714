//! Shared wire types exchanged between the coordinator, page contexts and the panel.

use serde::{Deserialize, Serialize};

/// Cached session status as seen by every context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub ready: bool,
    pub message: String,
    pub credential_artifact_available: bool,
    pub phase: String,
}

impl StatusReport {
    /// Status reported before the first poll has completed.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            ready: false,
            message: "Initializing...".to_string(),
            credential_artifact_available: false,
            phase: "initializing".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ready: bool,
    pub status_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusSource {
    Mutation,
    PeriodicHeartbeat,
    Manual,
    DomFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSnapshot {
    pub identity: ConversationRef,
    pub source: FocusSource,
    /// Unix timestamp in milliseconds.
    pub observed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub body: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub sender_id: String,
    pub is_self: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
}

/// Coarse status transitions pushed to ready contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum StatusSignal {
    CredentialAvailable,
    SessionReady,
    StatusChanged { status: StatusReport },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestPayload {
    GetStatus,
    GetCredentialArtifact,
    GetFocus,
    Health,
    ListGroups,
    FetchMessages {
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_date: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<String>,
        #[serde(default)]
        unread_only: bool,
    },
    Summarize {
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_date: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<String>,
        #[serde(default)]
        unread_only: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instruction: Option<String>,
    },
    Ask {
        conversation_id: String,
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_date: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<String>,
        #[serde(default)]
        unread_only: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instruction: Option<String>,
    },
    SelectConversation {
        identity: ConversationRef,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseBody {
    Status {
        status: StatusReport,
    },
    CredentialArtifact {
        artifact: Option<String>,
    },
    Focus {
        focus: Option<FocusSnapshot>,
    },
    Health {
        health: HealthResponse,
    },
    Groups {
        groups: Vec<GroupSummary>,
    },
    Messages {
        messages: Vec<MessageRecord>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Text {
        text: String,
    },
    Ack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ChannelInvalidated,
    NotReady,
    NotFound,
    TransportUnavailable,
    Upstream,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseOutcome {
    Ok { body: ResponseBody },
    Err { error: ErrorBody },
}

impl ResponseOutcome {
    #[must_use]
    pub fn ok(body: ResponseBody) -> Self {
        Self::Ok { body }
    }

    #[must_use]
    pub fn err(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Err {
            error: ErrorBody::new(kind, message),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Messages exchanged between isolated contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextMessage {
    ReadyAnnounce {
        context_id: String,
    },
    ReadyAck {
        status: StatusReport,
    },
    FocusChanged {
        focus: FocusSnapshot,
    },
    StatusChanged {
        signal: StatusSignal,
    },
    Request {
        id: String,
        payload: RequestPayload,
    },
    Response {
        id: String,
        outcome: ResponseOutcome,
    },
    Timeout {
        id: String,
    },
}
