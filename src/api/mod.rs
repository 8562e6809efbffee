pub mod telegram;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::types::Update;

pub use telegram::TelegramApi;

/// Failure talking to the remote platform. Every variant is treated as
/// transient by the poller.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bot API request failed: {0}")]
    Request(#[from] teloxide::RequestError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("platform error {code}: {description}")]
    Platform { code: i64, description: String },
}

/// The two call shapes the engine needs from the platform.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Long-poll for updates with `update_id >= offset`, waiting at most
    /// `timeout_secs` for the first one.
    async fn fetch_updates(
        &self,
        offset: i64,
        limit: u32,
        timeout_secs: u32,
    ) -> Result<Vec<Update>, ApiError>;

    /// Call an arbitrary method by name and return its raw `result`.
    async fn invoke_method(&self, name: &str, params: Value) -> Result<Value, ApiError>;
}
