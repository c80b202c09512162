//! Moves messages from a source queue to a destination queue.
//!
//! A run checks that both queues exist, drains up to the requested number
//! of messages from the source, forwards them to the destination in one
//! send batch and deletes from the source only what the destination
//! accepted. Anything rejected stays in flight on the source and becomes
//! receivable again once its visibility window elapses, so a later run
//! picks it up.

use crate::queue::{
    AccessError, DeleteEntry, InFlightMessage, OutboundMessage, QueueAccessor, QueueRef,
    SendOutcome,
};
use crate::reconcile::{classify, ReconcileError, Reconciliation};
use crate::retry::RetryPolicy;
use backoff::backoff::Backoff;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationRequest {
    pub source: QueueRef,
    pub destination: QueueRef,
    pub target_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueRole {
    Source,
    Destination,
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueRole::Source => write!(f, "source"),
            QueueRole::Destination => write!(f, "destination"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingQueue {
    pub role: QueueRole,
    pub queue: QueueRef,
}

/// Why the drain phase stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcome {
    /// The requested number of messages was received.
    TargetMet,
    /// The source stopped returning messages before the target was met.
    SourceExhausted,
    /// The receive-call or wall-clock cap was reached before the target.
    Capped,
    /// A receive kept failing after retries; whatever was received so far
    /// is still forwarded.
    Interrupted,
}

/// Summary of one run. `moved <= accepted <= received <= requested`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct MigrationResult {
    pub requested: usize,
    pub received: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Messages accepted by the destination whose delete from the source
    /// was confirmed.
    pub moved: usize,
    pub drain: DrainOutcome,
}

impl MigrationResult {
    fn nothing(requested: usize, drain: DrainOutcome) -> Self {
        Self {
            requested,
            received: 0,
            accepted: 0,
            rejected: 0,
            moved: 0,
            drain,
        }
    }

    /// Accepted messages still present on the source because their delete
    /// was not confirmed. They will be delivered to the destination again
    /// by a later run.
    pub fn undeleted(&self) -> usize {
        self.accepted - self.moved
    }

    pub fn is_complete(&self) -> bool {
        self.moved == self.requested
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("{}", describe_missing(.0))]
    QueueNotFound(Vec<MissingQueue>),
    #[error("could not check whether {role} queue {queue} exists")]
    ExistenceCheck {
        role: QueueRole,
        queue: QueueRef,
        #[source]
        source: AccessError,
    },
    #[error("send result could not be reconciled, nothing was deleted")]
    Reconciliation(#[from] ReconcileError),
    #[error("cancelled after receiving {received} messages, nothing was sent")]
    Cancelled { received: usize },
}

fn describe_missing(missing: &[MissingQueue]) -> String {
    missing
        .iter()
        .map(|m| format!("{} queue {} does not exist", m.role, m.queue))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Knobs for a run. The defaults stop at the first empty receive.
#[derive(Clone, Debug)]
pub struct MigrationOptions {
    pub retry: RetryPolicy,
    /// Consecutive empty receives that count as an exhausted source.
    pub empty_receives_before_stop: u32,
    pub max_receive_calls: Option<u32>,
    pub drain_timeout: Option<Duration>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            empty_receives_before_stop: 1,
            max_receive_calls: None,
            drain_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Messages received so far, unique by id. A message redelivered during
/// the drain keeps its slot but takes the newer receipt token, since the
/// older one no longer deletes anything.
#[derive(Default)]
struct Accumulator {
    messages: Vec<InFlightMessage>,
    index: HashMap<String, usize>,
}

impl Accumulator {
    fn len(&self) -> usize {
        self.messages.len()
    }

    fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn add(&mut self, message: InFlightMessage) {
        match self.index.get(&message.id) {
            Some(&slot) => {
                log::debug!("message {} was redelivered, refreshing its receipt", message.id);
                self.messages[slot].receipt_token = message.receipt_token;
            }
            None => {
                self.index.insert(message.id.clone(), self.messages.len());
                self.messages.push(message);
            }
        }
    }

    fn receipt(&self, id: &str) -> Option<&str> {
        self.index
            .get(id)
            .map(|&slot| self.messages[slot].receipt_token.as_str())
    }
}

enum Drain {
    Finished(DrainOutcome),
    Cancelled,
}

/// Drives migrations through an injected [`QueueAccessor`].
pub struct Migrator<A> {
    accessor: A,
    options: MigrationOptions,
}

impl<A: QueueAccessor> Migrator<A> {
    pub fn new(accessor: A) -> Self {
        Self::with_options(accessor, MigrationOptions::default())
    }

    pub fn with_options(accessor: A, options: MigrationOptions) -> Self {
        Self { accessor, options }
    }

    pub fn accessor(&self) -> &A {
        &self.accessor
    }

    /// Runs one migration.
    ///
    /// # Errors
    ///
    /// - [`MigrationError::QueueNotFound`] / [`MigrationError::ExistenceCheck`]
    ///   before anything is received.
    /// - [`MigrationError::Cancelled`] if `cancel` fires before the send.
    ///   Received messages are left to reappear on the source.
    /// - [`MigrationError::Reconciliation`] if the send result does not
    ///   match the batch. Nothing is deleted.
    ///
    /// Rejected sends and unconfirmed deletes are not errors; they show up
    /// in the returned counts.
    pub async fn migrate(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> Result<MigrationResult, MigrationError> {
        self.check_existence(request).await?;

        if request.target_count == 0 {
            return Ok(MigrationResult::nothing(0, DrainOutcome::TargetMet));
        }

        let mut drained = Accumulator::default();
        let drain = match self.drain(request, &mut drained, cancel).await {
            Drain::Finished(outcome) => outcome,
            Drain::Cancelled => {
                return Err(MigrationError::Cancelled {
                    received: drained.len(),
                })
            }
        };
        log::info!(
            "received {} of {} messages from {} ({:?})",
            drained.len(),
            request.target_count,
            request.source,
            drain
        );

        if drained.is_empty() {
            return Ok(MigrationResult::nothing(request.target_count, drain));
        }

        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled {
                received: drained.len(),
            });
        }

        let outbound: Vec<OutboundMessage> = drained.messages.iter().map(Into::into).collect();
        let outcomes = self.forward(&request.destination, &outbound).await;
        let reconciliation = classify(&outbound, &outcomes)?;
        let delete_set = delete_set(&drained, &reconciliation)?;

        if !reconciliation.rejected.is_empty() {
            log::warn!(
                "{} messages were rejected by {} and stay on {}",
                reconciliation.rejected.len(),
                request.destination,
                request.source
            );
        }

        let moved = self.delete(&request.source, &delete_set).await;

        Ok(MigrationResult {
            requested: request.target_count,
            received: drained.len(),
            accepted: reconciliation.accepted.len(),
            rejected: reconciliation.rejected.len(),
            moved,
            drain,
        })
    }

    async fn check_existence(&self, request: &MigrationRequest) -> Result<(), MigrationError> {
        let (source, destination) = tokio::join!(
            self.queue_exists(QueueRole::Source, &request.source),
            self.queue_exists(QueueRole::Destination, &request.destination),
        );

        let missing: Vec<MissingQueue> = [source?, destination?].into_iter().flatten().collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::QueueNotFound(missing))
        }
    }

    async fn queue_exists(
        &self,
        role: QueueRole,
        queue: &QueueRef,
    ) -> Result<Option<MissingQueue>, MigrationError> {
        let exists = self
            .options
            .retry
            .run("exists", || self.accessor.exists(queue))
            .await
            .map_err(|source| MigrationError::ExistenceCheck {
                role,
                queue: queue.clone(),
                source,
            })?;

        Ok((!exists).then(|| MissingQueue {
            role,
            queue: queue.clone(),
        }))
    }

    async fn drain(
        &self,
        request: &MigrationRequest,
        drained: &mut Accumulator,
        cancel: &CancellationToken,
    ) -> Drain {
        let started = Instant::now();
        let mut calls = 0u32;
        let mut empty_streak = 0u32;

        loop {
            if drained.len() >= request.target_count {
                return Drain::Finished(DrainOutcome::TargetMet);
            }

            if cancel.is_cancelled() {
                return Drain::Cancelled;
            }

            if self.options.max_receive_calls.is_some_and(|max| calls >= max)
                || self
                    .options
                    .drain_timeout
                    .is_some_and(|limit| started.elapsed() >= limit)
            {
                log::warn!(
                    "stopped draining {} after {} receives with {} of {} messages",
                    request.source,
                    calls,
                    drained.len(),
                    request.target_count
                );
                return Drain::Finished(DrainOutcome::Capped);
            }

            let remaining = request.target_count - drained.len();
            calls += 1;

            let batch = match self
                .options
                .retry
                .run("receive", || self.accessor.receive(&request.source, remaining))
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    log::warn!("giving up receiving from {}: {e}", request.source);
                    return Drain::Finished(DrainOutcome::Interrupted);
                }
            };

            if batch.is_empty() {
                empty_streak += 1;
                if empty_streak >= self.options.empty_receives_before_stop.max(1) {
                    return Drain::Finished(DrainOutcome::SourceExhausted);
                }
                continue;
            }
            empty_streak = 0;

            if batch.len() > remaining {
                // the extras stay in flight and reappear on the source
                log::warn!(
                    "receive returned {} messages when at most {} were asked for",
                    batch.len(),
                    remaining
                );
            }

            for message in batch.into_iter().take(remaining) {
                drained.add(message);
            }
        }
    }

    /// One send attempt. A failed send means nothing was accepted.
    async fn forward(
        &self,
        destination: &QueueRef,
        outbound: &[OutboundMessage],
    ) -> Vec<SendOutcome> {
        match self.accessor.send_batch(destination, outbound).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                log::warn!(
                    "sending {} messages to {destination} failed, treating all as rejected: {e}",
                    outbound.len()
                );
                outbound
                    .iter()
                    .map(|m| SendOutcome::rejected(m.id.clone()))
                    .collect()
            }
        }
    }

    /// Deletes the accepted messages and returns how many deletes were
    /// confirmed.
    /// Deletes `entries` from the source and returns how many deletes were
    /// confirmed. Entries the source did not confirm, whether the whole
    /// request failed or only some of its entries, are re-issued until the
    /// retry policy runs out of attempts.
    async fn delete(&self, source: &QueueRef, entries: &[DeleteEntry]) -> usize {
        if entries.is_empty() {
            return 0;
        }

        let retry = &self.options.retry;
        let attempts = retry.attempts();
        let mut schedule = retry.schedule();
        let mut pending = entries.to_vec();
        let mut confirmed = 0;

        for attempt in 1..=attempts {
            match self.accessor.delete_batch(source, &pending).await {
                Ok(outcomes) => {
                    let deleted: HashSet<&str> = outcomes
                        .iter()
                        .filter(|o| o.deleted)
                        .map(|o| o.id.as_str())
                        .collect();
                    let before = pending.len();
                    pending.retain(|entry| !deleted.contains(entry.id.as_str()));
                    confirmed += before - pending.len();
                }
                Err(e) => {
                    log::warn!(
                        "delete of {} messages from {source} failed (attempt {attempt}/{attempts}): {e}",
                        pending.len()
                    );
                }
            }

            if pending.is_empty() || attempt == attempts {
                break;
            }

            let delay = schedule.next_backoff().unwrap_or(retry.max_backoff);
            log::warn!(
                "{} messages not yet deleted from {source}, retrying in {delay:?}",
                pending.len()
            );
            tokio::time::sleep(delay).await;
        }

        if !pending.is_empty() {
            log::error!(
                "{} accepted messages were not deleted from {source} and will be delivered again",
                pending.len()
            );
        }

        confirmed
    }
}

/// Pairs every accepted id with the receipt token it was received under.
fn delete_set(
    drained: &Accumulator,
    reconciliation: &Reconciliation,
) -> Result<Vec<DeleteEntry>, ReconcileError> {
    reconciliation
        .accepted
        .iter()
        .map(|id| {
            let token = drained
                .receipt(id)
                .ok_or_else(|| ReconcileError::MissingReceipt(id.clone()))?;
            Ok(DeleteEntry {
                id: id.clone(),
                receipt_token: token.to_string(),
            })
        })
        .collect()
}
