use chrono::{DateTime, Utc};
use convo_copilot_core::domain::{ChatInfo, MessageRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::BackendEvent;

pub const METHOD_INITIALIZE: &str = "session/initialize";
pub const METHOD_LIST_GROUPS: &str = "chats/list_groups";
pub const METHOD_GET_CHAT: &str = "chats/get";
pub const METHOD_FETCH_MESSAGES: &str = "chats/fetch_messages";
pub const NOTIF_QR: &str = "session/qr";
pub const NOTIF_LOADING: &str = "session/loading";
pub const NOTIF_AUTHENTICATED: &str = "session/authenticated";
pub const NOTIF_AUTH_FAILURE: &str = "session/auth_failure";
pub const NOTIF_READY: &str = "session/ready";
pub const NOTIF_DISCONNECTED: &str = "session/disconnected";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    fn str_param(&self, key: &str) -> Option<&str> {
        self.params
            .as_ref()
            .and_then(|params| params.get(key))
            .and_then(Value::as_str)
    }

    /// 转换为生命周期事件；未知方法或缺少必需参数时返回 `None`。
    pub fn into_backend_event(self) -> Option<BackendEvent> {
        let event = match self.method.as_str() {
            NOTIF_QR => BackendEvent::CredentialIssued(self.str_param("qr")?.to_string()),
            NOTIF_LOADING => {
                let percent = self
                    .params
                    .as_ref()
                    .and_then(|params| params.get("percent"))
                    .and_then(|value| {
                        value
                            .as_u64()
                            .or_else(|| value.as_str().and_then(|raw| raw.parse().ok()))
                    })
                    .map_or(0, |percent| percent.min(100) as u8);
                BackendEvent::Loading {
                    percent,
                    message: self.str_param("message").unwrap_or_default().to_string(),
                }
            }
            NOTIF_AUTHENTICATED => BackendEvent::Authenticated,
            NOTIF_AUTH_FAILURE => BackendEvent::AuthFailure(
                self.str_param("message").unwrap_or("unknown").to_string(),
            ),
            NOTIF_READY => BackendEvent::Ready,
            NOTIF_DISCONNECTED => BackendEvent::Disconnected(
                self.str_param("reason").unwrap_or("unknown").to_string(),
            ),
            _ => return None,
        };
        Some(event)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub unread_count: Option<u32>,
}

impl From<ChatPayload> for ChatInfo {
    fn from(payload: ChatPayload) -> Self {
        Self {
            id: payload.id,
            name: payload.name,
            is_group: payload.is_group,
            unread_count: payload.unread_count,
        }
    }
}

/// 桥接进程上报的消息，`timestamp` 为 Unix 秒。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    #[serde(default)]
    pub body: String,
    pub timestamp: i64,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub from_me: bool,
}

impl MessagePayload {
    pub fn into_record(self) -> Option<MessageRecord> {
        let timestamp = DateTime::<Utc>::from_timestamp(self.timestamp, 0)?;
        Some(MessageRecord {
            id: self.id,
            body: self.body,
            timestamp,
            sender_id: self.author.unwrap_or(self.from),
            is_self: self.from_me,
        })
    }
}
