use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, RemoteApi};
use crate::config::PollingConfig;
use crate::dispatcher::Dispatcher;
use crate::types::{Update, UpdateExt};

/// Where fetched batches go.
pub enum Handoff {
    /// Queue onto the dispatcher without waiting for handling.
    Dispatcher(Dispatcher),
    /// Forward raw updates to a bounded channel; a full channel pauses
    /// polling until the consumer catches up.
    Channel(mpsc::Sender<Update>),
}

/// Sequential long-polling loop. Owns the offset; only one fetch is ever
/// in flight.
pub struct Poller {
    api: Arc<dyn RemoteApi>,
    handoff: Handoff,
    offset: i64,
    limit: u32,
    timeout_secs: u32,
    retry_delay: Duration,
    closed: bool,
}

impl Poller {
    pub fn new(api: Arc<dyn RemoteApi>, handoff: Handoff, config: &PollingConfig) -> Self {
        Self {
            api,
            handoff,
            offset: config.offset,
            limit: config.limit,
            timeout_secs: config.timeout_secs,
            retry_delay: config.retry_delay(),
            closed: false,
        }
    }

    /// Lowest update id not yet fetched.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Fetch one batch and hand it off. Returns how many updates were
    /// handed off; on error the offset is unchanged.
    pub async fn poll_once(&mut self) -> Result<usize, ApiError> {
        let updates = self
            .api
            .fetch_updates(self.offset, self.limit, self.timeout_secs)
            .await?;
        Ok(self.deliver(updates, &CancellationToken::new()).await)
    }

    /// Hand off the fresh part of a batch and move the offset past every
    /// update that was handed off.
    async fn deliver(&mut self, updates: Vec<Update>, cancel: &CancellationToken) -> usize {
        let offset = self.offset;
        let fresh: Vec<Update> = updates
            .into_iter()
            .filter(|update| update.update_id() >= offset)
            .collect();

        if !fresh.is_empty() {
            debug!("Fetched {} update(s) at offset {}", fresh.len(), offset);
        }

        let mut next = None;
        let mut count = 0;
        match &self.handoff {
            Handoff::Dispatcher(dispatcher) => {
                next = fresh.iter().map(|update| update.update_id() + 1).max();
                count = fresh.len();
                dispatcher.submit_batch(fresh);
            }
            Handoff::Channel(tx) => {
                for update in fresh {
                    let id = update.update_id();
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!("Stopped while the updates channel was full");
                            break;
                        }
                        sent = tx.send(update) => sent,
                    };
                    if sent.is_err() {
                        info!("Updates channel closed by receiver");
                        self.closed = true;
                        break;
                    }
                    next = next.max(Some(id + 1));
                    count += 1;
                }
            }
        }

        if let Some(next) = next {
            self.offset = self.offset.max(next);
        }
        count
    }

    /// Poll until `cancel` fires. A cancelled fetch or retry sleep is
    /// abandoned; a batch that already arrived is always handed off first.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!("Polling started at offset {}", self.offset);

        while !self.closed && !cancel.is_cancelled() {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.api.fetch_updates(self.offset, self.limit, self.timeout_secs) => result,
            };

            match fetched {
                Ok(updates) => {
                    self.deliver(updates, &cancel).await;
                }
                Err(e) => {
                    warn!(
                        "Failed to fetch updates at offset {}: {}. Retrying in {:?}",
                        self.offset, e, self.retry_delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        info!("Polling stopped at offset {}", self.offset);
    }
}
