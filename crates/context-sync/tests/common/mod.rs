use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use context_sync::{
    AnchorId, BackendEvent, ConversationSurface, Result, SessionBackend, SummaryRequest,
    Summarizer, SyncError,
};
use convo_copilot_core::domain::{ChatInfo, HeaderSnapshot, MessageRecord};
use tokio::sync::mpsc;

#[derive(Default)]
struct ScriptState {
    init_events: Vec<BackendEvent>,
    failures_left: Option<u32>,
    emit_before_failure: bool,
    attempts: u32,
    events: Option<mpsc::Sender<BackendEvent>>,
    chats: HashMap<String, (ChatInfo, Vec<MessageRecord>)>,
    fetch_limits: Vec<u32>,
}

/// 按脚本推送生命周期事件的后端。
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
}

#[allow(dead_code)]
impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次初始化成功后依次推送的事件。
    pub fn with_init_events(self, events: Vec<BackendEvent>) -> Self {
        self.lock().init_events = events;
        self
    }

    /// 前 `count` 次初始化失败。
    pub fn failing(self, count: u32) -> Self {
        self.lock().failures_left = Some(count);
        self
    }

    /// 失败的初始化也先推送脚本事件。
    pub fn emitting_before_failure(self) -> Self {
        self.lock().emit_before_failure = true;
        self
    }

    pub fn always_failing(self) -> Self {
        self.lock().failures_left = Some(u32::MAX);
        self
    }

    pub fn with_chat(self, chat: ChatInfo, messages: Vec<MessageRecord>) -> Self {
        self.lock()
            .chats
            .insert(chat.id.clone(), (chat, messages));
        self
    }

    /// 模拟后端在初始化之后推送的事件。
    pub async fn push(&self, event: BackendEvent) {
        let sender = self.lock().events.clone();
        sender
            .expect("backend has not been initialized")
            .send(event)
            .await
            .expect("lifecycle manager should be listening");
    }

    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    pub fn fetch_limits(&self) -> Vec<u32> {
        self.lock().fetch_limits.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().expect("script state lock")
    }
}

#[async_trait]
impl SessionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn initialize(&self, events: mpsc::Sender<BackendEvent>) -> Result<()> {
        let (init_events, failing) = {
            let mut state = self.lock();
            state.attempts += 1;
            let failing = match state.failures_left.as_mut() {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            };
            if failing && !state.emit_before_failure {
                return Err(SyncError::TransportUnavailable(
                    "bridge exited during startup".to_string(),
                ));
            }
            state.events = Some(events.clone());
            (state.init_events.clone(), failing)
        };

        for event in init_events {
            events
                .send(event)
                .await
                .map_err(|err| SyncError::TransportUnavailable(err.to_string()))?;
        }
        if failing {
            return Err(SyncError::TransportUnavailable(
                "bridge exited during startup".to_string(),
            ));
        }
        Ok(())
    }

    async fn get_chat(&self, conversation_id: &str) -> Result<Option<ChatInfo>> {
        Ok(self
            .lock()
            .chats
            .get(conversation_id)
            .map(|(chat, _)| chat.clone()))
    }

    async fn fetch_messages(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        let mut state = self.lock();
        state.fetch_limits.push(limit);
        let messages = state
            .chats
            .get(conversation_id)
            .map(|(_, messages)| messages.clone())
            .unwrap_or_default();
        let skip = messages.len().saturating_sub(limit as usize);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn list_groups(&self) -> Result<Vec<ChatInfo>> {
        let mut chats: Vec<ChatInfo> = self
            .lock()
            .chats
            .values()
            .map(|(chat, _)| chat.clone())
            .collect();
        chats.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(chats)
    }
}

/// 可随时替换标题内容的页面。
#[derive(Clone, Default)]
pub struct FakeSurface {
    shown: Arc<Mutex<Option<(AnchorId, HeaderSnapshot)>>>,
}

#[allow(dead_code)]
impl FakeSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&self, anchor: AnchorId, header: HeaderSnapshot) {
        *self.shown.lock().expect("surface lock") = Some((anchor, header));
    }

    pub fn clear(&self) {
        *self.shown.lock().expect("surface lock") = None;
    }
}

impl ConversationSurface for FakeSurface {
    fn anchor(&self) -> Option<AnchorId> {
        self.shown
            .lock()
            .expect("surface lock")
            .as_ref()
            .map(|(anchor, _)| *anchor)
    }

    fn header(&self, anchor: AnchorId) -> Option<HeaderSnapshot> {
        self.shown
            .lock()
            .expect("surface lock")
            .as_ref()
            .filter(|(current, _)| *current == anchor)
            .map(|(_, header)| header.clone())
    }
}

/// 返回固定文本并记录收到的请求。
#[derive(Clone, Default)]
pub struct StaticSummarizer {
    text: String,
    requests: Arc<Mutex<Vec<SummaryRequest>>>,
}

#[allow(dead_code)]
impl StaticSummarizer {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<SummaryRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Summarizer for StaticSummarizer {
    async fn summarize(&self, request: SummaryRequest) -> Result<String> {
        self.requests.lock().expect("requests lock").push(request);
        Ok(self.text.clone())
    }
}
