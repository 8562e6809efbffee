use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use teloxide::prelude::*;
use tracing::debug;

use crate::api::{ApiError, RemoteApi};
use crate::config::{PollingConfig, TelegramConfig, MAX_LIMIT};
use crate::types::{AllowedUpdate, Update};

/// Headroom on top of the long-poll timeout so the HTTP client never gives
/// up before the platform answers.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(15);

/// Response envelope shared by every Bot API method.
#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

/// Bot API client. `getUpdates` goes through teloxide; methods called by
/// name are plain JSON POSTs on the same HTTP client.
pub struct TelegramApi {
    bot: Bot,
    client: reqwest::Client,
    api_url: String,
    token: String,
    allowed_updates: Vec<AllowedUpdate>,
}

impl TelegramApi {
    pub fn new(telegram: &TelegramConfig, polling: &PollingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(polling.timeout_secs as u64) + CLIENT_TIMEOUT_MARGIN)
            .build()
            .context("Failed to build HTTP client")?;

        let api_url = telegram.api_url.trim_end_matches('/').to_string();
        let url = reqwest::Url::parse(&api_url)
            .with_context(|| format!("Invalid Bot API url: {}", api_url))?;
        let bot = Bot::with_client(telegram.bot_token.clone(), client.clone()).set_api_url(url);

        Ok(Self {
            bot,
            client,
            api_url,
            token: telegram.bot_token.clone(),
            allowed_updates: polling.allowed_updates.clone(),
        })
    }

    fn method_url(&self, name: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, name)
    }

    async fn call(&self, name: &str, params: &Value) -> Result<Value, ApiError> {
        // The URL embeds the token, so only the method name is logged.
        debug!("Calling Bot API method {}", name);

        let response = self
            .client
            .post(self.method_url(name))
            .json(params)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        parse_envelope(status, &body)
    }
}

#[async_trait]
impl RemoteApi for TelegramApi {
    async fn fetch_updates(
        &self,
        offset: i64,
        limit: u32,
        timeout_secs: u32,
    ) -> Result<Vec<Update>, ApiError> {
        // Update ids fit in an i32 on the wire.
        let offset = i32::try_from(offset).unwrap_or(i32::MAX);
        let limit = u8::try_from(limit.min(MAX_LIMIT)).unwrap_or(u8::MAX);

        let mut request = self
            .bot
            .get_updates()
            .offset(offset)
            .limit(limit)
            .timeout(timeout_secs);
        if !self.allowed_updates.is_empty() {
            request = request.allowed_updates(self.allowed_updates.clone());
        }

        Ok(request.await?)
    }

    async fn invoke_method(&self, name: &str, params: Value) -> Result<Value, ApiError> {
        self.call(name, &params).await
    }
}

/// Unwrap the `{ok, result}` envelope, turning `ok: false` into a platform
/// error.
fn parse_envelope(status: u16, body: &[u8]) -> Result<Value, ApiError> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    if envelope.ok {
        return Ok(envelope.result.unwrap_or(Value::Null));
    }
    Err(ApiError::Platform {
        code: envelope.error_code.unwrap_or(status as i64),
        description: envelope
            .description
            .unwrap_or_else(|| "no description".to_string()),
    })
}
