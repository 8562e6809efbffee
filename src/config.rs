use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::conversation::FirstContact;
use crate::types::AllowedUpdate;

/// Upper bound the Bot API accepts for `getUpdates.limit`.
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// Falls back to the `BOT_TOKEN` environment variable when empty.
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Offset of the first `getUpdates` call.
    #[serde(default)]
    pub offset: i64,
    /// Update kinds to request; empty means the platform default.
    #[serde(default)]
    pub allowed_updates: Vec<AllowedUpdate>,
    /// Capacity of the raw updates channel.
    #[serde(default = "default_updates_capacity")]
    pub updates_capacity: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConversationConfig {
    #[serde(default)]
    pub first_contact: FirstContact,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_limit() -> u32 {
    100
}

fn default_timeout_secs() -> u32 {
    30
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_updates_capacity() -> usize {
    100
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            timeout_secs: default_timeout_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            offset: 0,
            allowed_updates: Vec::new(),
            updates_capacity: default_updates_capacity(),
        }
    }
}

impl PollingConfig {
    /// Pause between a failed fetch and the retry.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Replace out-of-range values with ones the platform accepts.
    fn normalize(&mut self) {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            self.limit = default_limit();
        }
        if self.updates_capacity == 0 {
            self.updates_capacity = default_updates_capacity();
        }
    }
}

impl Config {
    /// Build a config in code, e.g. for embedding the engine in another
    /// binary.
    pub fn with_token(bot_token: impl Into<String>) -> Self {
        Self {
            telegram: TelegramConfig {
                bot_token: bot_token.into(),
                api_url: default_api_url(),
            },
            polling: PollingConfig::default(),
            conversation: ConversationConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content, std::env::var("BOT_TOKEN").ok())
    }

    fn parse(content: &str, env_token: Option<String>) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse config file")?;

        if config.telegram.bot_token.trim().is_empty() {
            config.telegram.bot_token = env_token.unwrap_or_default();
        }
        if config.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("No bot token: set [telegram] bot_token or BOT_TOKEN");
        }

        config.polling.normalize();
        Ok(config)
    }
}
