use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use convo_copilot_core::domain::{ChatInfo, MessageRecord};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::process::{BridgeOutput, BridgeProcess, format_exit_status};
use super::protocol::{
    ChatPayload, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_FETCH_MESSAGES,
    METHOD_GET_CHAT, METHOD_INITIALIZE, METHOD_LIST_GROUPS, MessagePayload,
};
use crate::error::{Result, SyncError};
use crate::session::BackendEvent;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct BridgeClient {
    process: Arc<Mutex<BridgeProcess>>,
    next_id: AtomicU64,
    pending: PendingMap,
    established: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl BridgeClient {
    pub fn new(
        process: BridgeProcess,
        output: BridgeOutput,
        events: mpsc::Sender<BackendEvent>,
    ) -> Self {
        let process = Arc::new(Mutex::new(process));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let established = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(Self::read_loop(
            output,
            Arc::clone(&process),
            Arc::clone(&pending),
            Arc::clone(&established),
            events,
        ));

        Self {
            process,
            next_id: AtomicU64::new(1),
            pending,
            established,
            reader,
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        info!("initializing session bridge");
        self.request(METHOD_INITIALIZE, None).await?;
        self.established.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn list_groups(&self) -> Result<Vec<ChatInfo>> {
        let result = self.request(METHOD_LIST_GROUPS, None).await?;
        let chats: Vec<ChatPayload> = serde_json::from_value(result)?;
        Ok(chats.into_iter().map(ChatInfo::from).collect())
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatInfo>> {
        let result = self
            .request(METHOD_GET_CHAT, Some(json!({ "chatId": chat_id })))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let chat: ChatPayload = serde_json::from_value(result)?;
        Ok(Some(chat.into()))
    }

    pub async fn fetch_messages(&self, chat_id: &str, limit: u32) -> Result<Vec<MessageRecord>> {
        let result = self
            .request(
                METHOD_FETCH_MESSAGES,
                Some(json!({ "chatId": chat_id, "limit": limit })),
            )
            .await?;
        let messages: Vec<MessagePayload> = serde_json::from_value(result)?;

        Ok(messages
            .into_iter()
            .filter_map(|payload| {
                let id = payload.id.clone();
                let record = payload.into_record();
                if record.is_none() {
                    warn!(message_id = %id, "dropping message with out-of-range timestamp");
                }
                record
            })
            .collect())
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("shutting down session bridge client");
        self.reader.abort();
        let mut process = self.process.lock().await;
        process.kill().await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let payload = serde_json::to_string(&request)?;
        let (tx, rx) = oneshot::channel();

        self.pending.lock().await.insert(id, tx);

        let send_result = {
            let mut process = self.process.lock().await;
            process.send_line(&payload).await
        };

        if let Err(err) = send_result {
            self.pending.lock().await.remove(&id);
            return Err(SyncError::TransportUnavailable(format!(
                "failed to write {method} request to bridge: {err}"
            )));
        }

        let response = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(SyncError::TransportUnavailable(format!(
                    "bridge closed before responding to {method}: id={id}"
                )));
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(SyncError::RequestTimeout(format!(
                    "bridge did not answer {method} within {}s: id={id}",
                    REQUEST_TIMEOUT.as_secs()
                )));
            }
        };

        if let Some(error) = response.error {
            return Err(SyncError::Upstream(format!(
                "{method} failed: code={}, message={}",
                error.code, error.message
            )));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn read_loop(
        mut output: BridgeOutput,
        process: Arc<Mutex<BridgeProcess>>,
        pending: PendingMap,
        established: Arc<AtomicBool>,
        events: mpsc::Sender<BackendEvent>,
    ) {
        let reason = loop {
            let line = match output.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Self::exit_info(&process).await,
                Err(err) => {
                    warn!(error = %err, "failed to read session bridge output");
                    break format!("read error: {err}");
                }
            };

            if line.is_empty() {
                continue;
            }

            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&line) {
                Self::handle_response(&pending, response).await;
                continue;
            }

            if let Ok(notification) = serde_json::from_str::<JsonRpcNotification>(&line) {
                let method = notification.method.clone();
                match notification.into_backend_event() {
                    Some(event) => {
                        if events.send(event).await.is_err() {
                            debug!("lifecycle manager dropped, stopping bridge reader");
                            return;
                        }
                    }
                    None => debug!(method = %method, "ignoring unsupported bridge notification"),
                }
                continue;
            }

            warn!(line = %line, "received unrecognized bridge payload");
        };

        pending.lock().await.clear();
        // 初始化失败由重试循环处理，只有已建立的会话才上报掉线。
        if !established.load(Ordering::SeqCst) {
            debug!(reason = %reason, "bridge exited before initialization completed");
            return;
        }
        let _ = events
            .send(BackendEvent::Disconnected(format!(
                "bridge process terminated: {reason}"
            )))
            .await;
    }

    async fn exit_info(process: &Arc<Mutex<BridgeProcess>>) -> String {
        let mut process = process.lock().await;
        match process.try_wait() {
            Ok(Some(status)) => format!("process exited with {}", format_exit_status(status)),
            Ok(None) => "stdout closed but process is still running".to_string(),
            Err(err) => format!("failed to check process status: {err}"),
        }
    }

    async fn handle_response(pending: &PendingMap, response: JsonRpcResponse) {
        let response_id = response.id;
        let tx = pending.lock().await.remove(&response_id);

        match tx {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!(id = response_id, "request receiver dropped before response delivery");
                }
            }
            None => warn!(id = response_id, "received response for unknown request id"),
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
