use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::FixedOffset;
use convo_copilot_core::domain::WindowPolicy;
use serde::Deserialize;
type Result<T> = anyhow::Result<T>;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CopilotConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub focus: FocusConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl CopilotConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("failed to deserialize copilot config")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_enabled")]
    pub auto_reconnect: bool,
    #[serde(default = "default_bridge_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl SessionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            auto_reconnect: default_enabled(),
            command: default_bridge_command(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
    #[serde(default = "default_context_buffer_size")]
    pub context_buffer_size: usize,
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            event_buffer_size: default_event_buffer_size(),
            context_buffer_size: default_context_buffer_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FocusConfig {
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_anchor_poll_ms")]
    pub anchor_poll_ms: u64,
    #[serde(default = "default_enabled")]
    pub force_on_heartbeat: bool,
}

impl FocusConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn anchor_poll(&self) -> Duration {
        Duration::from_millis(self.anchor_poll_ms)
    }
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            anchor_poll_ms: default_anchor_poll_ms(),
            force_on_heartbeat: default_enabled(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub degraded_flag_path: Option<PathBuf>,
    #[serde(default = "default_announce_retry_ms")]
    pub announce_retry_ms: u64,
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn announce_retry(&self) -> Duration {
        Duration::from_millis(self.announce_retry_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            degraded_flag_path: None,
            announce_retry_ms: default_announce_retry_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowConfig {
    #[serde(default = "default_window_count")]
    pub default_count: u32,
    #[serde(default = "default_window_count")]
    pub date_pool_floor: u32,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl WindowConfig {
    pub fn policy(&self) -> Result<WindowPolicy> {
        let utc_offset = FixedOffset::east_opt(self.utc_offset_minutes * 60).with_context(|| {
            format!("utc_offset_minutes out of range: {}", self.utc_offset_minutes)
        })?;

        Ok(WindowPolicy {
            default_count: self.default_count,
            date_pool_floor: self.date_pool_floor,
            utc_offset,
        })
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            default_count: default_window_count(),
            date_pool_floor: default_window_count(),
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_summarizer_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_summarizer_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    10_000
}

fn default_bridge_command() -> String {
    "copilot-bridge".to_string()
}

fn default_poll_interval_ms() -> u64 {
    15_000
}

fn default_event_buffer_size() -> usize {
    1_000
}

fn default_context_buffer_size() -> usize {
    64
}

fn default_heartbeat_ms() -> u64 {
    5_000
}

fn default_anchor_poll_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_announce_retry_ms() -> u64 {
    1_000
}

fn default_window_count() -> u32 {
    1_000
}

fn default_summarizer_timeout_ms() -> u64 {
    120_000
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::CopilotConfig;

    #[test]
    fn test_parse_config() {
        let raw = r#"
[session]
max_retries = 5
retry_delay_ms = 2500
command = "node"
args = ["bridge/index.js"]

[[session.env]]
key = "BRIDGE_AUTH_DIR"
value = ".wwebjs_auth"

[coordinator]
poll_interval_ms = 3000

[focus]
force_on_heartbeat = false

[window]
utc_offset_minutes = 120

[summarizer]
endpoint = "http://127.0.0.1:8080/summaries"
"#;

        let config = CopilotConfig::from_str(raw).expect("config should parse");
        assert_eq!(config.session.max_retries, 5);
        assert_eq!(config.session.retry_delay_ms, 2500);
        assert!(config.session.auto_reconnect);
        assert_eq!(config.session.command, "node");
        assert_eq!(config.session.args, vec!["bridge/index.js"]);
        assert_eq!(config.session.env.len(), 1);
        assert_eq!(config.session.env[0].key, "BRIDGE_AUTH_DIR");

        assert_eq!(config.coordinator.poll_interval_ms, 3000);
        assert_eq!(config.coordinator.event_buffer_size, 1000);
        assert!(!config.focus.force_on_heartbeat);
        assert_eq!(config.focus.heartbeat_ms, 5000);

        let policy = config.window.policy().expect("policy");
        assert_eq!(policy.utc_offset.local_minus_utc(), 7200);
        assert_eq!(policy.default_count, 1000);
        assert_eq!(
            config.summarizer.endpoint.as_deref(),
            Some("http://127.0.0.1:8080/summaries")
        );
    }

    #[test]
    fn test_empty_config_uses_reference_timings() {
        let config = CopilotConfig::from_str("").expect("empty config should parse");

        assert_eq!(config.session.max_retries, 3);
        assert_eq!(config.session.retry_delay_ms, 10_000);
        assert_eq!(config.coordinator.poll_interval_ms, 15_000);
        assert_eq!(config.focus.heartbeat_ms, 5_000);
        assert_eq!(config.focus.anchor_poll_ms, 2_000);
        assert_eq!(config.relay.request_timeout_ms, 10_000);
        assert_eq!(config.window.date_pool_floor, 1_000);
        assert_eq!(config.server.bind, "127.0.0.1:3000");
        assert!(config.summarizer.endpoint.is_none());
    }

    #[test]
    fn test_out_of_range_offset_is_rejected() {
        let config = CopilotConfig::from_str("[window]\nutc_offset_minutes = 100000\n")
            .expect("config should parse");

        assert!(config.window.policy().is_err());
    }
}
