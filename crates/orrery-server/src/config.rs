//! Server configuration, loaded from YAML.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use orrery_protocol::GalaxySettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Seconds between scheduler passes.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Delay the first pass to the next wall-clock minute.
    #[serde(default = "default_true")]
    pub align_to_minute: bool,

    /// Read-modify-write attempts for player actions before giving up.
    #[serde(default = "default_action_retries")]
    pub action_retries: u32,

    /// Buffered snapshots per connected account.
    #[serde(default = "default_push_capacity")]
    pub push_capacity: usize,

    /// Events retained for slow event-bus subscribers.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Ruleset for galaxies created by this server.
    #[serde(default)]
    pub galaxy_defaults: GalaxySettings,
}

fn default_tick_interval_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_action_retries() -> u32 {
    3
}
fn default_push_capacity() -> usize {
    16
}
fn default_event_capacity() -> usize {
    1024
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            align_to_minute: true,
            action_retries: default_action_retries(),
            push_capacity: default_push_capacity(),
            event_capacity: default_event_capacity(),
            log_format: default_log_format(),
            galaxy_defaults: GalaxySettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}
