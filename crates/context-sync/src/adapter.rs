//! 领域类型与跨上下文传输类型之间的转换。

use convo_copilot_api_types as wire;
use convo_copilot_core::domain::{
    ChatInfo, ConversationIdentity, DomainError, FocusSource, FocusedConversation, MessageRecord,
};

use crate::session::SessionStatus;

pub fn status_report(status: &SessionStatus) -> wire::StatusReport {
    wire::StatusReport {
        ready: status.is_ready(),
        message: status.status_message.clone(),
        credential_artifact_available: status.credential_artifact_available,
        phase: status.phase.as_str().to_string(),
    }
}

pub fn focus_source(source: FocusSource) -> wire::FocusSource {
    match source {
        FocusSource::Mutation => wire::FocusSource::Mutation,
        FocusSource::PeriodicHeartbeat => wire::FocusSource::PeriodicHeartbeat,
        FocusSource::Manual => wire::FocusSource::Manual,
        FocusSource::DomFallback => wire::FocusSource::DomFallback,
    }
}

pub fn conversation_ref(identity: &ConversationIdentity) -> wire::ConversationRef {
    wire::ConversationRef {
        display_name: identity.display_name().to_string(),
        stable_id: identity.stable_id().map(str::to_string),
    }
}

pub fn conversation_identity(
    reference: &wire::ConversationRef,
) -> Result<ConversationIdentity, DomainError> {
    ConversationIdentity::new(reference.display_name.clone(), reference.stable_id.clone())
}

pub fn focus_snapshot(focus: &FocusedConversation) -> wire::FocusSnapshot {
    wire::FocusSnapshot {
        identity: conversation_ref(focus.identity()),
        source: focus_source(focus.source()),
        observed_at: focus.observed_at().timestamp_millis(),
    }
}

pub fn message_record(message: &MessageRecord) -> wire::MessageRecord {
    wire::MessageRecord {
        id: message.id.clone(),
        body: message.body.clone(),
        timestamp: message.timestamp.timestamp_millis(),
        sender_id: message.sender_id.clone(),
        is_self: message.is_self,
    }
}

pub fn group_summary(chat: &ChatInfo) -> wire::GroupSummary {
    wire::GroupSummary {
        id: chat.id.clone(),
        name: chat.display_name().to_string(),
    }
}
