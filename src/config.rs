use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::pagination::OffsetAdvance;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "CONFIG_READ_ERROR",
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR",
            ConfigError::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    /// Per-module level overrides, e.g. `webhook: debug`.
    #[serde(default)]
    pub log_modules: BTreeMap<String, String>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub connectors: Vec<ConnectorEntry>,
}

fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    pub page_size: usize,
    #[serde(default)]
    pub offset_advance: OffsetAdvance,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 25,
            offset_advance: OffsetAdvance::PageSize,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhooksConfig {
    pub base_url: String,
    #[serde(default = "default_trim_chunk_size")]
    pub trim_chunk_size: usize,
}

fn default_trim_chunk_size() -> usize {
    crate::webhook::DEFAULT_CHUNK_SIZE
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/webhooks".to_string(),
            trim_chunk_size: default_trim_chunk_size(),
        }
    }
}

/// Reconnect and keepalive timing for push streams.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StreamConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Listen keys expire after an hour without a keepalive.
    pub session_refresh_secs: u64,
    pub ping_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            session_refresh_secs: 30 * 60,
            ping_secs: 3 * 60,
        }
    }
}

impl StreamConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms.max(1))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.initial_delay_ms).max(1))
    }

    pub fn session_refresh(&self) -> Duration {
        Duration::from_secs(self.session_refresh_secs.max(1))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_secs.max(1))
    }
}

/// One configured connector instance.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectorEntry {
    pub name: String,
    pub provider: String,
    /// Raw provider config, checked against the provider's schema.
    #[serde(default)]
    pub config: Value,
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if crate::logging::rotation(&self.rotation).is_none() {
            return Err(ConfigError::Invalid(format!("unknown log rotation {}", self.rotation)));
        }
        if self.engine.page_size == 0 {
            return Err(ConfigError::Invalid("engine.page_size must be positive".into()));
        }
        if self.webhooks.trim_chunk_size == 0 {
            return Err(ConfigError::Invalid("webhooks.trim_chunk_size must be positive".into()));
        }
        let mut names = std::collections::HashSet::new();
        for entry in &self.connectors {
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate connector name {}",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    pub fn connector(&self, name: &str) -> Option<&ConnectorEntry> {
        self.connectors.iter().find(|c| c.name == name)
    }

    /// Load for callers that only need a printable error.
    pub fn load_any(env: &str) -> anyhow::Result<Self> {
        Ok(Self::load(env)?)
    }
}
