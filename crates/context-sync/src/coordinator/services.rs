use std::sync::Arc;

use convo_copilot_api_types::{RequestPayload, ResponseBody, ResponseOutcome};
use convo_copilot_core::domain::WindowRequest;
use tracing::{info, warn};

use crate::adapter::{group_summary, message_record};
use crate::session::SessionLifecycleManager;
use crate::summarize::{SummaryRequest, Summarizer};
use crate::window::MessageWindowSelector;
use crate::{Result, SyncError};

const NO_MESSAGES: &str = "no messages found for the given criteria";

/// 需要访问后端会话或摘要服务的请求处理。
///
/// 返回值总是 `ResponseOutcome`，错误不会越过上下文边界抛出。
pub struct RequestServices {
    lifecycle: Arc<SessionLifecycleManager>,
    selector: MessageWindowSelector,
    summarizer: Arc<dyn Summarizer>,
}

impl RequestServices {
    pub fn new(
        lifecycle: Arc<SessionLifecycleManager>,
        selector: MessageWindowSelector,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            lifecycle,
            selector,
            summarizer,
        }
    }

    pub async fn handle(&self, payload: RequestPayload) -> ResponseOutcome {
        match self.dispatch(payload).await {
            Ok(body) => ResponseOutcome::ok(body),
            Err(err) => {
                warn!(error = %err, kind = ?err.kind(), "request failed");
                ResponseOutcome::Err {
                    error: err.to_error_body(),
                }
            }
        }
    }

    async fn dispatch(&self, payload: RequestPayload) -> Result<ResponseBody> {
        match payload {
            RequestPayload::GetCredentialArtifact => Ok(ResponseBody::CredentialArtifact {
                artifact: self.lifecycle.credential_artifact(),
            }),
            RequestPayload::ListGroups => {
                let groups = self
                    .lifecycle
                    .list_groups()
                    .await?
                    .iter()
                    .filter(|chat| chat.is_group)
                    .map(group_summary)
                    .collect();
                Ok(ResponseBody::Groups { groups })
            }
            RequestPayload::FetchMessages {
                conversation_id,
                count,
                start_date,
                end_date,
                unread_only,
            } => {
                let mut request = WindowRequest::new(conversation_id)
                    .with_dates(start_date.as_deref(), end_date.as_deref())
                    .unread_only(unread_only);
                request.requested_count = count;

                let selection = self.selector.select_window(&request).await?;
                Ok(ResponseBody::Messages {
                    messages: selection.messages.iter().map(message_record).collect(),
                    warnings: selection
                        .warnings
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                })
            }
            RequestPayload::Summarize {
                conversation_id,
                start_date,
                end_date,
                unread_only,
                instruction,
            } => {
                let text = self
                    .summarize(
                        conversation_id,
                        start_date,
                        end_date,
                        unread_only,
                        instruction,
                        None,
                    )
                    .await?;
                Ok(ResponseBody::Text { text })
            }
            RequestPayload::Ask {
                conversation_id,
                question,
                start_date,
                end_date,
                unread_only,
                instruction,
            } => {
                if question.trim().is_empty() {
                    return Err(SyncError::Unsupported("a question is required".to_string()));
                }
                let text = self
                    .summarize(
                        conversation_id,
                        start_date,
                        end_date,
                        unread_only,
                        instruction,
                        Some(question),
                    )
                    .await?;
                Ok(ResponseBody::Text { text })
            }
            RequestPayload::SelectConversation { .. } => Err(SyncError::Unsupported(
                "conversation selection is handled by the page context".to_string(),
            )),
            RequestPayload::GetStatus | RequestPayload::GetFocus | RequestPayload::Health => {
                Err(SyncError::Unsupported(
                    "cached queries are answered by the coordinator".to_string(),
                ))
            }
        }
    }

    #[tracing::instrument(skip(self, instruction, question))]
    async fn summarize(
        &self,
        conversation_id: String,
        start_date: Option<String>,
        end_date: Option<String>,
        unread_only: bool,
        instruction: Option<String>,
        question: Option<String>,
    ) -> Result<String> {
        let request = WindowRequest::new(conversation_id)
            .with_dates(start_date.as_deref(), end_date.as_deref())
            .unread_only(unread_only);
        let selection = self.selector.select_window(&request).await?;
        if selection.messages.is_empty() {
            return Err(SyncError::NotFound(NO_MESSAGES.to_string()));
        }

        let mut summary = SummaryRequest::new(selection.messages);
        summary.start_date = start_date;
        summary.end_date = end_date;
        summary.instruction = instruction.filter(|text| !text.trim().is_empty());
        summary.question = question;

        info!(
            messages = summary.messages.len(),
            question = summary.question.is_some(),
            "forwarding window to summarizer"
        );
        self.summarizer.summarize(summary).await
    }
}
