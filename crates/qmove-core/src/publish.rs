//! Publishing messages by type to queues registered up front.

use crate::queue::{AccessError, OutboundMessage, QueueAccessor, QueueRef, SendOutcome};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("no queue registered for message type '{0}'")]
    NotRegistered(String),
    #[error("destination returned no outcome for the published message")]
    NoOutcome,
    #[error(transparent)]
    Access(#[from] AccessError),
}

/// Sends messages to the queue registered for their type. Publishing a
/// type that was never registered is refused before any queue is touched.
pub struct Publisher<A> {
    accessor: A,
    routes: HashMap<String, QueueRef>,
}

impl<A: QueueAccessor> Publisher<A> {
    pub fn new(accessor: A) -> Self {
        Self {
            accessor,
            routes: HashMap::new(),
        }
    }

    /// Routes `message_type` to `queue`, replacing any earlier route.
    pub fn register(&mut self, message_type: impl Into<String>, queue: QueueRef) {
        self.routes.insert(message_type.into(), queue);
    }

    pub fn is_registered(&self, message_type: &str) -> bool {
        self.routes.contains_key(message_type)
    }

    pub async fn publish(
        &self,
        message_type: &str,
        body: impl Into<String>,
    ) -> Result<SendOutcome, PublishError> {
        let queue = self
            .routes
            .get(message_type)
            .ok_or_else(|| PublishError::NotRegistered(message_type.to_string()))?;

        let message = OutboundMessage {
            id: uuid::Uuid::new_v4().simple().to_string(),
            body: body.into(),
        };

        let outcomes = self
            .accessor
            .send_batch(queue, std::slice::from_ref(&message))
            .await?;

        let outcome = outcomes
            .into_iter()
            .find(|o| o.id == message.id)
            .ok_or(PublishError::NoOutcome)?;

        log::debug!(
            "published {message_type} to {queue} (accepted: {})",
            outcome.accepted
        );

        Ok(outcome)
    }
}
