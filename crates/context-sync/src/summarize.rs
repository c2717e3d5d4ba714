//! 摘要与问答协作方。
//!
//! 输入为有序消息序列与可选的日期范围、自定义指令，输出为一段格式化文本。

use std::time::Duration;

use async_trait::async_trait;
use convo_copilot_core::domain::MessageRecord;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SummarizerConfig;
use crate::{Result, SyncError};

/// 一次摘要或问答请求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    /// 按时间升序排列的消息。
    pub messages: Vec<MessageRecord>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub instruction: Option<String>,
    /// 存在时为问答，否则为摘要。
    pub question: Option<String>,
}

impl SummaryRequest {
    /// 创建摘要请求，消息按时间戳升序排序。
    pub fn new(mut messages: Vec<MessageRecord>) -> Self {
        messages.sort_by_key(|message| message.timestamp);
        Self {
            messages,
            start_date: None,
            end_date: None,
            instruction: None,
            question: None,
        }
    }
}

/// 外部摘要服务抽象。
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: SummaryRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage<'a> {
    sender_id: &'a str,
    body: &'a str,
    timestamp: i64,
    is_self: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instruction: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    question: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    text: String,
}

/// 通过 HTTP 调用外部摘要服务。
pub struct HttpSummarizer {
    client: Client,
    endpoint: Option<String>,
}

impl HttpSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| SyncError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, request: SummaryRequest) -> Result<String> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| SyncError::Upstream("summarizer not configured".to_string()))?;

        let body = WireRequest {
            messages: request
                .messages
                .iter()
                .map(|message| WireMessage {
                    sender_id: &message.sender_id,
                    body: &message.body,
                    timestamp: message.timestamp.timestamp_millis(),
                    is_self: message.is_self,
                })
                .collect(),
            start_date: request.start_date.as_deref(),
            end_date: request.end_date.as_deref(),
            instruction: request.instruction.as_deref(),
            question: request.question.as_deref(),
        };

        info!(
            endpoint,
            messages = body.messages.len(),
            question = body.question.is_some(),
            "requesting summary"
        );

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| SyncError::Upstream(format!("summarizer request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(SyncError::Upstream(format!(
                "summarizer returned {status}: {detail}"
            )));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|err| SyncError::Upstream(format!("invalid summarizer response: {err}")))?;
        Ok(parsed.text)
    }
}
