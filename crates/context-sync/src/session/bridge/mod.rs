//! 外部消息客户端桥接后端。
//!
//! 桥接进程通过标准输入输出交换按行分隔的 JSON-RPC 2.0 消息，
//! 生命周期事件以通知形式推送。

use async_trait::async_trait;
use convo_copilot_core::domain::{ChatInfo, MessageRecord};
use tokio::sync::{RwLock, mpsc};
use tracing::info;

use crate::config::SessionConfig;
use crate::error::{Result, SyncError};
use crate::session::{BackendEvent, SessionBackend};
use client::BridgeClient;
use process::BridgeProcess;

pub mod client;
pub mod process;
pub mod protocol;

/// 以子进程方式运行的后端会话。
pub struct BridgeBackend {
    config: SessionConfig,
    client: RwLock<Option<BridgeClient>>,
}

impl BridgeBackend {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }
}

#[async_trait]
impl SessionBackend for BridgeBackend {
    fn name(&self) -> &str {
        &self.config.command
    }

    async fn initialize(&self, events: mpsc::Sender<BackendEvent>) -> Result<()> {
        let mut slot = self.client.write().await;
        if let Some(previous) = slot.take() {
            info!("replacing previous session bridge");
            let _ = previous.shutdown().await;
        }

        let env_vars: Vec<(String, String)> = self
            .config
            .env
            .iter()
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect();

        let (process, output) = BridgeProcess::spawn(
            &self.config.command,
            &self.config.args,
            self.config.working_dir.as_deref(),
            &env_vars,
        )
        .await?;

        let client = BridgeClient::new(process, output, events);
        client.initialize().await?;
        *slot = Some(client);
        Ok(())
    }

    async fn get_chat(&self, conversation_id: &str) -> Result<Option<ChatInfo>> {
        let client = self.client.read().await;
        connected(&client)?.get_chat(conversation_id).await
    }

    async fn fetch_messages(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        let client = self.client.read().await;
        connected(&client)?
            .fetch_messages(conversation_id, limit)
            .await
    }

    async fn list_groups(&self) -> Result<Vec<ChatInfo>> {
        let client = self.client.read().await;
        connected(&client)?.list_groups().await
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(client) = self.client.write().await.take() {
            client.shutdown().await?;
        }
        Ok(())
    }
}

fn connected(client: &Option<BridgeClient>) -> Result<&BridgeClient> {
    client
        .as_ref()
        .ok_or_else(|| SyncError::TransportUnavailable("session bridge not started".to_string()))
}
