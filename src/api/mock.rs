//! Scripted in-memory `RemoteApi` for tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::{ApiError, RemoteApi};
use crate::types::Update;

/// Answers `fetch_updates` from a queue of scripted results, then blocks
/// forever. Records every call.
#[derive(Default)]
pub struct MockApi {
    script: Mutex<VecDeque<Result<Vec<Update>, ApiError>>>,
    fetches: Mutex<Vec<i64>>,
    calls: Mutex<Vec<(String, Value)>>,
    failing: Mutex<HashSet<String>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, updates: Vec<Update>) {
        self.script.lock().unwrap().push_back(Ok(updates));
    }

    pub fn push_error(&self, error: ApiError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Make every call to `method` fail with a platform error.
    pub fn fail_method(&self, method: &str) {
        self.failing.lock().unwrap().insert(method.to_string());
    }

    /// Offsets passed to each `fetch_updates` call, in order.
    pub fn fetch_offsets(&self) -> Vec<i64> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Texts of `sendMessage` calls addressed to `chat_id`.
    pub fn sent_texts(&self, chat_id: i64) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(method, params)| method == "sendMessage" && params["chat_id"] == chat_id)
            .filter_map(|(_, params)| params["text"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn fetch_updates(
        &self,
        offset: i64,
        _limit: u32,
        _timeout_secs: u32,
    ) -> Result<Vec<Update>, ApiError> {
        self.fetches.lock().unwrap().push(offset);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn invoke_method(&self, name: &str, params: Value) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push((name.to_string(), params));
        if self.failing.lock().unwrap().contains(name) {
            return Err(ApiError::Platform {
                code: 400,
                description: format!("Bad Request: {} failed", name),
            });
        }
        Ok(json!(true))
    }
}

pub fn text_update(update_id: i64, chat_id: i64, text: &str) -> Update {
    serde_json::from_str(&json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id,
            "date": 1_700_000_000,
            "chat": { "id": chat_id, "type": "private", "first_name": "Test" },
            "from": { "id": chat_id, "is_bot": false, "first_name": "Test" },
            "text": text
        }
    }).to_string())
    .expect("text update fixture")
}

/// An update whose payload is readable but names no chat.
pub fn unknown_update(update_id: i64) -> Update {
    serde_json::from_str(&json!({
        "update_id": update_id,
        "inline_query": {
            "id": "q",
            "from": { "id": 1, "is_bot": false, "first_name": "Test" },
            "query": "",
            "offset": ""
        }
    }).to_string())
    .expect("inline query fixture")
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
