//! [`QueueAccessor`] backed by AWS SQS.

use crate::queue::{
    AccessError, DeleteEntry, DeleteOutcome, InFlightMessage, OutboundMessage, QueueAccessor,
    QueueRef, SendOutcome,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sqs as sqs;
use sqs::error::DisplayErrorContext;
use sqs::types::{DeleteMessageBatchRequestEntry, SendMessageBatchRequestEntry};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// SQS accepts at most 10 entries per receive, send batch and delete batch.
pub const MAX_BATCH: usize = 10;

/// How messages are received from the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveSettings {
    /// Seconds a received message stays hidden from other consumers.
    /// Rejected messages reappear on the source after this.
    pub visibility_timeout: i32,
    /// Long-poll wait in seconds. Zero means short polling.
    pub wait_time: i32,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self {
            visibility_timeout: 30,
            wait_time: 0,
        }
    }
}

/// Client for moving messages between SQS queues.
///
/// # Example
///
/// ```no_run
/// use qmove::{QueueAccessor, QueueRef, SqsQueue};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
/// let sqs = SqsQueue::from_config(config);
///
/// let dlq = QueueRef::new("orders-dlq", "us-east-1");
/// if sqs.exists(&dlq).await? {
///     let messages = sqs.receive(&dlq, 10).await?;
///     println!("received {}", messages.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct SqsQueue {
    client: sqs::Client,
    settings: ReceiveSettings,
    urls: RwLock<HashMap<QueueRef, String>>,
}

impl SqsQueue {
    /// Creates an SqsQueue from a pre-built AWS SDK config, so the caller
    /// decides credentials, region and endpoint (e.g. LocalStack).
    pub fn from_config(config: SdkConfig) -> Self {
        Self {
            client: sqs::Client::new(&config),
            settings: ReceiveSettings::default(),
            urls: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: ReceiveSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Resolves the URL of `queue`, or `None` if SQS says it does not exist.
    pub async fn queue_url(&self, queue: &QueueRef) -> anyhow::Result<Option<String>> {
        if let Some(url) = self.cached_url(queue).await {
            return Ok(Some(url));
        }

        let output = match self
            .client
            .get_queue_url()
            .queue_name(queue.name())
            .send()
            .await
        {
            Ok(output) => output,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_queue_does_not_exist()) =>
            {
                return Ok(None);
            }
            Err(e) => {
                return Err(anyhow!(
                    "failed to look up queue {queue}: {}",
                    DisplayErrorContext(&e)
                ));
            }
        };

        let Some(url) = output.queue_url else {
            return Ok(None);
        };

        self.urls
            .write()
            .await
            .insert(queue.clone(), url.clone());

        Ok(Some(url))
    }

    async fn cached_url(&self, queue: &QueueRef) -> Option<String> {
        self.urls.read().await.get(queue).cloned()
    }

    async fn require_url(&self, queue: &QueueRef) -> anyhow::Result<String> {
        self.queue_url(queue)
            .await?
            .ok_or_else(|| anyhow!("queue {queue} does not exist"))
    }

    async fn send_chunk(&self, url: &str, chunk: &[OutboundMessage]) -> Vec<SendOutcome> {
        let mut outcomes = Vec::with_capacity(chunk.len());
        let mut entries = Vec::with_capacity(chunk.len());
        let mut ids = Vec::with_capacity(chunk.len());

        for message in chunk {
            let entry = BatchId::new(message.id.as_str()).and_then(|id| {
                SendMessageBatchRequestEntry::builder()
                    .id(id.as_ref())
                    .message_body(message.body.as_str())
                    .build()
                    .map_err(|e| e.to_string())
            });

            match entry {
                Ok(entry) => {
                    entries.push(entry);
                    ids.push(message.id.clone());
                }
                Err(e) => {
                    log::warn!("not sending message {}: {e}", message.id);
                    outcomes.push(SendOutcome::rejected(message.id.clone()));
                }
            }
        }

        if entries.is_empty() {
            return outcomes;
        }

        match self
            .client
            .send_message_batch()
            .queue_url(url)
            .set_entries(Some(entries))
            .send()
            .await
        {
            Ok(output) => {
                for ok in output.successful() {
                    outcomes.push(SendOutcome::accepted(ok.id()));
                }
                for failed in output.failed() {
                    log::warn!(
                        "message {} was rejected: {} {}",
                        failed.id(),
                        failed.code(),
                        failed.message().unwrap_or_default()
                    );
                    outcomes.push(SendOutcome::rejected(failed.id()));
                }
            }
            Err(e) => {
                log::warn!(
                    "send batch of {} to {url} failed: {}",
                    ids.len(),
                    DisplayErrorContext(&e)
                );
                outcomes.extend(ids.into_iter().map(|id| SendOutcome::rejected(id)));
            }
        }

        outcomes
    }

    async fn delete_chunk(&self, url: &str, chunk: &[DeleteEntry]) -> Vec<DeleteOutcome> {
        let entries: Result<Vec<_>, _> = chunk
            .iter()
            .map(|entry| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(entry.id.as_str())
                    .receipt_handle(entry.receipt_token.as_str())
                    .build()
            })
            .collect();

        let not_deleted = || -> Vec<DeleteOutcome> {
            chunk
                .iter()
                .map(|entry| DeleteOutcome {
                    id: entry.id.clone(),
                    deleted: false,
                })
                .collect()
        };

        let entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("failed to build delete entries: {e}");
                return not_deleted();
            }
        };

        match self
            .client
            .delete_message_batch()
            .queue_url(url)
            .set_entries(Some(entries))
            .send()
            .await
        {
            Ok(output) => {
                let mut outcomes: Vec<DeleteOutcome> = output
                    .successful()
                    .iter()
                    .map(|ok| DeleteOutcome {
                        id: ok.id().to_string(),
                        deleted: true,
                    })
                    .collect();
                for failed in output.failed() {
                    log::warn!(
                        "delete of message {} failed: {} {}",
                        failed.id(),
                        failed.code(),
                        failed.message().unwrap_or_default()
                    );
                    outcomes.push(DeleteOutcome {
                        id: failed.id().to_string(),
                        deleted: false,
                    });
                }
                outcomes
            }
            Err(e) => {
                log::warn!(
                    "delete batch of {} on {url} failed: {}",
                    chunk.len(),
                    DisplayErrorContext(&e)
                );
                not_deleted()
            }
        }
    }
}

/// Converts an AWS SDK message, skipping messages that are missing an id,
/// a body or a receipt handle.
fn in_flight(message: sqs::types::Message) -> Option<InFlightMessage> {
    match (message.message_id, message.body, message.receipt_handle) {
        (Some(id), Some(body), Some(receipt_token)) => Some(InFlightMessage {
            id,
            body,
            receipt_token,
        }),
        (id, _, _) => {
            log::warn!("skipping incomplete message {}", id.as_deref().unwrap_or("<no id>"));
            None
        }
    }
}

#[async_trait]
impl QueueAccessor for SqsQueue {
    async fn exists(&self, queue: &QueueRef) -> Result<bool, AccessError> {
        Ok(self.queue_url(queue).await?.is_some())
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        max: usize,
    ) -> Result<Vec<InFlightMessage>, AccessError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let url = self.require_url(queue).await?;
        let output = self
            .client
            .receive_message()
            .queue_url(url)
            .max_number_of_messages(max.min(MAX_BATCH) as i32)
            .visibility_timeout(self.settings.visibility_timeout)
            .wait_time_seconds(self.settings.wait_time)
            .send()
            .await
            .context("failed to receive messages")?;

        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(in_flight)
            .collect())
    }

    async fn send_batch(
        &self,
        queue: &QueueRef,
        messages: &[OutboundMessage],
    ) -> Result<Vec<SendOutcome>, AccessError> {
        let url = self.require_url(queue).await?;

        let mut outcomes = Vec::with_capacity(messages.len());
        for chunk in messages.chunks(MAX_BATCH) {
            outcomes.extend(self.send_chunk(&url, chunk).await);
        }

        Ok(outcomes)
    }

    async fn delete_batch(
        &self,
        queue: &QueueRef,
        entries: &[DeleteEntry],
    ) -> Result<Vec<DeleteOutcome>, AccessError> {
        let url = self.require_url(queue).await?;

        let mut outcomes = Vec::with_capacity(entries.len());
        for chunk in entries.chunks(MAX_BATCH) {
            outcomes.extend(self.delete_chunk(&url, chunk).await);
        }

        Ok(outcomes)
    }
}

/// An id that SQS accepts for a batch entry.
#[derive(Debug, Clone)]
pub struct BatchId(String);

impl BatchId {
    pub fn new<S: Into<String>>(id: S) -> Result<Self, String> {
        let id_str = id.into();
        if id_str.is_empty() {
            return Err("Batch ID cannot be empty".to_string());
        }
        if id_str.len() > 80 {
            return Err(format!(
                "Batch ID exceeds maximum length: {} > 80 characters",
                id_str.len()
            ));
        }
        for c in id_str.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
                return Err(format!(
                    "Invalid character in Batch ID: '{}'. Allowed: alphanumeric, '-', '_'",
                    c
                ));
            }
        }
        Ok(Self(id_str))
    }
}

impl AsRef<str> for BatchId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
