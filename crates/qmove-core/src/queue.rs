//! The queue access contract the migration is written against.
//!
//! Everything network-facing hides behind [`QueueAccessor`], so the
//! orchestrator can be driven by SQS in production and by
//! [`InMemoryQueues`](crate::memory::InMemoryQueues) in tests.

use async_trait::async_trait;
use std::fmt;

/// Identifies a queue by name and the region it lives in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct QueueRef {
    name: String,
    region: String,
}

impl QueueRef {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl fmt::Display for QueueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.region)
    }
}

/// A message that has been received but not yet deleted.
///
/// The `receipt_token` only proves ownership of this particular delivery.
/// Once the visibility window elapses the message can be received again
/// under a new token and this one stops working.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InFlightMessage {
    pub id: String,
    pub body: String,
    pub receipt_token: String,
}

/// An entry of a send batch. The id is echoed back in the matching
/// [`SendOutcome`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub id: String,
    pub body: String,
}

impl From<&InFlightMessage> for OutboundMessage {
    fn from(message: &InFlightMessage) -> Self {
        Self {
            id: message.id.clone(),
            body: message.body.clone(),
        }
    }
}

/// Whether the destination accepted one entry of a send batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendOutcome {
    pub id: String,
    pub accepted: bool,
}

impl SendOutcome {
    pub fn accepted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            accepted: true,
        }
    }

    pub fn rejected(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            accepted: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteEntry {
    pub id: String,
    pub receipt_token: String,
}

/// Whether one entry of a delete batch was confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub id: String,
    pub deleted: bool,
}

/// A failed call against a queue. Partial batch failures are not errors,
/// they come back as per-entry outcomes.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct AccessError(#[from] anyhow::Error);

impl AccessError {
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self(anyhow::Error::msg(message))
    }
}

/// Minimal queue capability consumed by the migration.
///
/// Implementations must be safe to call repeatedly: `exists`, `receive`
/// and `delete_batch` may be retried by the caller. Deleting a message
/// that is already gone, or using an expired receipt token, reports
/// `deleted: false` for that entry rather than failing the call.
#[async_trait]
pub trait QueueAccessor: Send + Sync {
    async fn exists(&self, queue: &QueueRef) -> Result<bool, AccessError>;

    /// Receives between 0 and `max` messages. An empty result means no
    /// message is visible right now.
    async fn receive(&self, queue: &QueueRef, max: usize)
        -> Result<Vec<InFlightMessage>, AccessError>;

    /// Sends every entry and reports one outcome per entry, keyed by the
    /// entry id.
    async fn send_batch(
        &self,
        queue: &QueueRef,
        messages: &[OutboundMessage],
    ) -> Result<Vec<SendOutcome>, AccessError>;

    async fn delete_batch(
        &self,
        queue: &QueueRef,
        entries: &[DeleteEntry],
    ) -> Result<Vec<DeleteOutcome>, AccessError>;
}

#[async_trait]
impl<A: QueueAccessor + ?Sized> QueueAccessor for &A {
    async fn exists(&self, queue: &QueueRef) -> Result<bool, AccessError> {
        (**self).exists(queue).await
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        max: usize,
    ) -> Result<Vec<InFlightMessage>, AccessError> {
        (**self).receive(queue, max).await
    }

    async fn send_batch(
        &self,
        queue: &QueueRef,
        messages: &[OutboundMessage],
    ) -> Result<Vec<SendOutcome>, AccessError> {
        (**self).send_batch(queue, messages).await
    }

    async fn delete_batch(
        &self,
        queue: &QueueRef,
        entries: &[DeleteEntry],
    ) -> Result<Vec<DeleteOutcome>, AccessError> {
        (**self).delete_batch(queue, entries).await
    }
}

#[async_trait]
impl<A: QueueAccessor + ?Sized> QueueAccessor for std::sync::Arc<A> {
    async fn exists(&self, queue: &QueueRef) -> Result<bool, AccessError> {
        (**self).exists(queue).await
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        max: usize,
    ) -> Result<Vec<InFlightMessage>, AccessError> {
        (**self).receive(queue, max).await
    }

    async fn send_batch(
        &self,
        queue: &QueueRef,
        messages: &[OutboundMessage],
    ) -> Result<Vec<SendOutcome>, AccessError> {
        (**self).send_batch(queue, messages).await
    }

    async fn delete_batch(
        &self,
        queue: &QueueRef,
        entries: &[DeleteEntry],
    ) -> Result<Vec<DeleteOutcome>, AccessError> {
        (**self).delete_batch(queue, entries).await
    }
}
