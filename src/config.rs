//! Layered configuration for the onboarding tracker.
//!
//! Settings are read from `.onboard/onboard.toml`, then overridden by
//! environment variables, then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [channel]
//! url = "wss://progress.example.com/ws/{job_id}"
//! reconnect_delay_secs = 3
//! connect_timeout_secs = 10
//! idle_timeout_secs = 60
//!
//! [supervisor]
//! poll_interval_ms = 1000
//! completion_threshold = 90
//! hard_timeout_secs = 300
//!
//! [api]
//! base_url = "https://api.example.com"
//! token = "..."
//! ```
//!
//! | Variable            | Overrides            |
//! |---------------------|----------------------|
//! | `ONBOARD_WS_URL`    | `channel.url`        |
//! | `ONBOARD_API_URL`   | `api.base_url`       |
//! | `ONBOARD_API_TOKEN` | `api.token`          |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::{
    ChannelSettings, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_RECONNECT_DELAY,
    MIN_RECONNECT_DELAY,
};
use crate::channel::transport::JOB_ID_PLACEHOLDER;
use crate::supervisor::{
    DEFAULT_COMPLETION_THRESHOLD, DEFAULT_HARD_TIMEOUT, DEFAULT_POLL_INTERVAL, SupervisorSettings,
};
use crate::tracker::TrackerSettings;

pub const ONBOARD_DIR: &str = ".onboard";
pub const CONFIG_FILE: &str = "onboard.toml";

pub const ENV_WS_URL: &str = "ONBOARD_WS_URL";
pub const ENV_API_URL: &str = "ONBOARD_API_URL";
pub const ENV_API_TOKEN: &str = "ONBOARD_API_TOKEN";

pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8765/ws/{job_id}";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8765";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSection {
    /// WebSocket URL template; `{job_id}` is replaced per subscription.
    #[serde(default = "default_ws_url")]
    pub url: String,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Handshake deadline per connection attempt.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// An open connection with no frames for this long is dropped.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_ws_url() -> String {
    DEFAULT_WS_URL.to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_secs()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            url: default_ws_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: u8,
    #[serde(default = "default_hard_timeout_secs")]
    pub hard_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_completion_threshold() -> u8 {
    DEFAULT_COMPLETION_THRESHOLD
}

fn default_hard_timeout_secs() -> u64 {
    DEFAULT_HARD_TIMEOUT.as_secs()
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            completion_threshold: default_completion_threshold(),
            hard_timeout_secs: default_hard_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            token: None,
        }
    }
}

/// The complete onboard.toml structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OnboardToml {
    #[serde(default)]
    pub channel: ChannelSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub api: ApiSection,
}

impl OnboardToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse onboard.toml")
    }

    /// Returns the default configuration if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize onboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(self.channel.url.starts_with("ws://") || self.channel.url.starts_with("wss://")) {
            warnings.push(format!(
                "channel.url '{}' should use ws:// or wss://",
                self.channel.url
            ));
        }
        if !self.channel.url.contains(JOB_ID_PLACEHOLDER) {
            warnings.push(format!(
                "channel.url has no {} placeholder; the job id will be appended",
                JOB_ID_PLACEHOLDER
            ));
        }
        if self.channel.reconnect_delay_secs == 0 {
            warnings.push(format!(
                "channel.reconnect_delay_secs is 0; clamped to {}ms",
                MIN_RECONNECT_DELAY.as_millis()
            ));
        }
        if self.channel.connect_timeout_secs == 0 || self.channel.idle_timeout_secs == 0 {
            warnings.push(
                "channel.connect_timeout_secs and idle_timeout_secs must be greater than 0; clamped to 1s"
                    .to_string(),
            );
        }
        if self.supervisor.poll_interval_ms == 0 {
            warnings.push("supervisor.poll_interval_ms must be greater than 0".to_string());
        }
        if self.supervisor.completion_threshold > 100 {
            warnings.push(format!(
                "supervisor.completion_threshold {} can never be reached; only the timeout will end the flow",
                self.supervisor.completion_threshold
            ));
        }
        if self.supervisor.hard_timeout_secs == 0 {
            warnings.push("supervisor.hard_timeout_secs is 0; every flow ends immediately".to_string());
        }

        warnings
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            channel: ChannelSettings {
                reconnect_delay: Duration::from_secs(self.channel.reconnect_delay_secs)
                    .max(MIN_RECONNECT_DELAY),
                connect_timeout: Duration::from_secs(self.channel.connect_timeout_secs.max(1)),
                idle_timeout: Duration::from_secs(self.channel.idle_timeout_secs.max(1)),
            },
            supervisor: SupervisorSettings {
                // A zero period would panic in tokio::time::interval.
                poll_interval: Duration::from_millis(self.supervisor.poll_interval_ms.max(1)),
                completion_threshold: self.supervisor.completion_threshold,
                hard_timeout: Duration::from_secs(self.supervisor.hard_timeout_secs),
            },
        }
    }
}

/// Effective configuration: file merged with environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct OnboardConfig {
    pub config_path: PathBuf,
    pub toml: OnboardToml,
    pub cli_ws_url: Option<String>,
    pub cli_api_url: Option<String>,
}

impl OnboardConfig {
    /// Load from `<project_dir>/.onboard/onboard.toml`, or from an explicit
    /// path when one is given.
    pub fn new(project_dir: &Path, config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(|| default_config_path(project_dir));
        let toml = OnboardToml::load_or_default(&config_path)?;
        Ok(Self {
            config_path,
            toml,
            cli_ws_url: None,
            cli_api_url: None,
        })
    }

    pub fn with_cli_args(
        project_dir: &Path,
        config_path: Option<PathBuf>,
        ws_url: Option<String>,
        api_url: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir, config_path)?;
        config.cli_ws_url = ws_url;
        config.cli_api_url = api_url;
        Ok(config)
    }

    /// Channel URL template (CLI → env → file).
    pub fn ws_url(&self) -> String {
        self.cli_ws_url
            .clone()
            .or_else(|| env_non_empty(ENV_WS_URL))
            .unwrap_or_else(|| self.toml.channel.url.clone())
    }

    /// Onboarding API base URL (CLI → env → file).
    pub fn api_url(&self) -> String {
        self.cli_api_url
            .clone()
            .or_else(|| env_non_empty(ENV_API_URL))
            .unwrap_or_else(|| self.toml.api.base_url.clone())
    }

    /// Bearer token (env → file).
    pub fn api_token(&self) -> Option<String> {
        env_non_empty(ENV_API_TOKEN).or_else(|| self.toml.api.token.clone())
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        self.toml.tracker_settings()
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

pub fn default_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(ONBOARD_DIR).join(CONFIG_FILE)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
