//! An in-memory [`QueueAccessor`] with SQS-like visibility semantics.
//!
//! Received messages are hidden until they are deleted or until
//! [`InMemoryQueues::expire_visibility`] is called, at which point they
//! become receivable again and their old receipt tokens stop working.
//! Faults can be injected to exercise partial failures.

use crate::queue::{
    AccessError, DeleteEntry, DeleteOutcome, InFlightMessage, OutboundMessage, QueueAccessor,
    QueueRef, SendOutcome,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// A call made against the in-memory queues, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Exists(String),
    Receive(String, usize),
    Send(String, Vec<String>),
    Delete(String, Vec<String>),
}

#[derive(Clone, Debug)]
struct Stored {
    id: String,
    body: String,
}

#[derive(Default)]
struct SimQueue {
    visible: VecDeque<Stored>,
    /// keyed by receipt token
    in_flight: HashMap<String, Stored>,
    /// messages never become invisible after a receive
    zero_visibility: bool,
}

impl SimQueue {
    fn expire(&mut self) {
        let mut returning: Vec<Stored> = self.in_flight.drain().map(|(_, m)| m).collect();
        returning.sort_by(|a, b| a.id.cmp(&b.id));
        for message in returning.into_iter().rev() {
            self.visible.push_front(message);
        }
    }
}

#[derive(Default)]
struct Faults {
    fail_exists: u32,
    fail_receives: u32,
    fail_sends: bool,
    fail_deletes: u32,
    unconfirmed_deletes: u32,
    unconfirmed_once: HashSet<String>,
    reject_ids: HashSet<String>,
    omit_outcomes: HashSet<String>,
    extra_outcome: Option<String>,
    receive_limit: Option<usize>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, SimQueue>,
    faults: Faults,
    calls: Vec<Call>,
}

/// Named in-memory queues shared behind a lock.
#[derive(Default)]
pub struct InMemoryQueues {
    state: Mutex<State>,
}

impl InMemoryQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create_queue(&self, name: &str) {
        self.lock().queues.entry(name.to_string()).or_default();
    }

    /// Adds a message with a generated id and returns the id.
    pub fn push(&self, queue: &str, body: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.push_with_id(queue, &id, body);
        id
    }

    /// Adds a message with a caller-chosen id, creating the queue if needed.
    pub fn push_with_id(&self, queue: &str, id: &str, body: &str) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .visible
            .push_back(Stored {
                id: id.to_string(),
                body: body.to_string(),
            });
    }

    /// Returns every in-flight message of `queue` to the visible set.
    pub fn expire_visibility(&self, queue: &str) {
        if let Some(q) = self.lock().queues.get_mut(queue) {
            q.expire();
        }
    }

    /// Makes every receive on `queue` redeliver messages still in flight.
    pub fn set_zero_visibility(&self, queue: &str) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .zero_visibility = true;
    }

    /// Ids of the messages currently visible in `queue`, front first.
    pub fn visible_ids(&self, queue: &str) -> Vec<String> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.visible.iter().map(|m| m.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn bodies(&self, queue: &str) -> Vec<String> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.visible.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Visible plus in-flight messages.
    pub fn len(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.visible.len() + q.in_flight.len())
            .unwrap_or(0)
    }

    pub fn in_flight_len(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.in_flight.len())
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn fail_next_exists(&self, times: u32) {
        self.lock().faults.fail_exists = times;
    }

    pub fn fail_next_receives(&self, times: u32) {
        self.lock().faults.fail_receives = times;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.lock().faults.fail_sends = fail;
    }

    pub fn fail_next_deletes(&self, times: u32) {
        self.lock().faults.fail_deletes = times;
    }

    /// The next `times` deletes succeed as calls but confirm no entry, the
    /// way a batch whose request failed is reported entry by entry.
    pub fn leave_next_deletes_unconfirmed(&self, times: u32) {
        self.lock().faults.unconfirmed_deletes = times;
    }

    /// The next delete that includes this id does not confirm it.
    pub fn leave_delete_unconfirmed_once(&self, id: &str) {
        self.lock().faults.unconfirmed_once.insert(id.to_string());
    }

    /// The destination rejects the entry with this id.
    pub fn reject_on_send(&self, id: &str) {
        self.lock().faults.reject_ids.insert(id.to_string());
    }

    /// Undoes [`reject_on_send`](Self::reject_on_send).
    pub fn accept_on_send(&self, id: &str) {
        self.lock().faults.reject_ids.remove(id);
    }

    /// The send result leaves out the outcome for this id.
    pub fn omit_outcome(&self, id: &str) {
        self.lock().faults.omit_outcomes.insert(id.to_string());
    }

    /// The send result reports an accepted outcome for an id that was never sent.
    pub fn report_extra_outcome(&self, id: &str) {
        self.lock().faults.extra_outcome = Some(id.to_string());
    }

    /// Caps how many messages a single receive returns.
    pub fn limit_receive(&self, max: usize) {
        self.lock().faults.receive_limit = Some(max);
    }
}

fn missing(queue: &QueueRef) -> AccessError {
    AccessError::msg(format!("queue {queue} does not exist"))
}

#[async_trait]
impl QueueAccessor for InMemoryQueues {
    async fn exists(&self, queue: &QueueRef) -> Result<bool, AccessError> {
        let mut state = self.lock();
        state.calls.push(Call::Exists(queue.name().to_string()));

        if state.faults.fail_exists > 0 {
            state.faults.fail_exists -= 1;
            return Err(AccessError::msg("injected exists failure"));
        }

        Ok(state.queues.contains_key(queue.name()))
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        max: usize,
    ) -> Result<Vec<InFlightMessage>, AccessError> {
        let mut state = self.lock();
        state.calls.push(Call::Receive(queue.name().to_string(), max));

        if state.faults.fail_receives > 0 {
            state.faults.fail_receives -= 1;
            return Err(AccessError::msg("injected receive failure"));
        }

        let limit = state.faults.receive_limit.map_or(max, |l| l.min(max));
        let q = state.queues.get_mut(queue.name()).ok_or_else(|| missing(queue))?;
        if q.zero_visibility {
            q.expire();
        }

        let mut received = Vec::new();
        while received.len() < limit {
            let Some(message) = q.visible.pop_front() else {
                break;
            };
            let token = uuid::Uuid::new_v4().to_string();
            received.push(InFlightMessage {
                id: message.id.clone(),
                body: message.body.clone(),
                receipt_token: token.clone(),
            });
            q.in_flight.insert(token, message);
        }

        Ok(received)
    }

    async fn send_batch(
        &self,
        queue: &QueueRef,
        messages: &[OutboundMessage],
    ) -> Result<Vec<SendOutcome>, AccessError> {
        let mut state = self.lock();
        state.calls.push(Call::Send(
            queue.name().to_string(),
            messages.iter().map(|m| m.id.clone()).collect(),
        ));

        if state.faults.fail_sends {
            return Err(AccessError::msg("injected send failure"));
        }

        let State { queues, faults, .. } = &mut *state;
        let q = queues.get_mut(queue.name()).ok_or_else(|| missing(queue))?;

        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            let accepted = !faults.reject_ids.contains(&message.id);
            if accepted {
                // the destination assigns its own id, like SQS does
                q.visible.push_back(Stored {
                    id: uuid::Uuid::new_v4().to_string(),
                    body: message.body.clone(),
                });
            }
            if !faults.omit_outcomes.contains(&message.id) {
                outcomes.push(SendOutcome {
                    id: message.id.clone(),
                    accepted,
                });
            }
        }

        if let Some(extra) = &faults.extra_outcome {
            outcomes.push(SendOutcome::accepted(extra.clone()));
        }

        Ok(outcomes)
    }

    async fn delete_batch(
        &self,
        queue: &QueueRef,
        entries: &[DeleteEntry],
    ) -> Result<Vec<DeleteOutcome>, AccessError> {
        let mut state = self.lock();
        state.calls.push(Call::Delete(
            queue.name().to_string(),
            entries.iter().map(|e| e.id.clone()).collect(),
        ));

        if state.faults.fail_deletes > 0 {
            state.faults.fail_deletes -= 1;
            return Err(AccessError::msg("injected delete failure"));
        }

        if state.faults.unconfirmed_deletes > 0 {
            state.faults.unconfirmed_deletes -= 1;
            return Ok(entries
                .iter()
                .map(|entry| DeleteOutcome {
                    id: entry.id.clone(),
                    deleted: false,
                })
                .collect());
        }

        let State { queues, faults, .. } = &mut *state;
        let q = queues.get_mut(queue.name()).ok_or_else(|| missing(queue))?;

        Ok(entries
            .iter()
            .map(|entry| {
                let deleted = !faults.unconfirmed_once.remove(&entry.id)
                    && q.in_flight
                        .get(&entry.receipt_token)
                        .is_some_and(|stored| stored.id == entry.id);
                if deleted {
                    q.in_flight.remove(&entry.receipt_token);
                }
                DeleteOutcome {
                    id: entry.id.clone(),
                    deleted,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(name: &str) -> QueueRef {
        QueueRef::new(name, "us-east-1")
    }

    #[tokio::test]
    async fn receive_hides_until_expired() {
        let queues = InMemoryQueues::new();
        queues.push_with_id("src", "a", "hello");

        let first = queues.receive(&queue("src"), 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(queues.receive(&queue("src"), 10).await.unwrap().is_empty());

        queues.expire_visibility("src");
        let again = queues.receive(&queue("src"), 10).await.unwrap();
        assert_eq!(again[0].id, "a");
        assert_ne!(again[0].receipt_token, first[0].receipt_token);
    }

    #[tokio::test]
    async fn stale_token_does_not_delete() {
        let queues = InMemoryQueues::new();
        queues.push_with_id("src", "a", "hello");

        let first = queues.receive(&queue("src"), 1).await.unwrap();
        queues.expire_visibility("src");
        let _second = queues.receive(&queue("src"), 1).await.unwrap();

        let outcome = queues
            .delete_batch(
                &queue("src"),
                &[DeleteEntry {
                    id: "a".into(),
                    receipt_token: first[0].receipt_token.clone(),
                }],
            )
            .await
            .unwrap();

        assert!(!outcome[0].deleted);
        assert_eq!(queues.len("src"), 1);
    }

    #[tokio::test]
    async fn rejected_entries_are_not_stored() {
        let queues = InMemoryQueues::new();
        queues.create_queue("dst");
        queues.reject_on_send("y");

        let outcomes = queues
            .send_batch(
                &queue("dst"),
                &[
                    OutboundMessage {
                        id: "x".into(),
                        body: "1".into(),
                    },
                    OutboundMessage {
                        id: "y".into(),
                        body: "2".into(),
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            outcomes,
            vec![SendOutcome::accepted("x"), SendOutcome::rejected("y")]
        );
        assert_eq!(queues.bodies("dst"), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn exists_reports_missing_queue() {
        let queues = InMemoryQueues::new();
        queues.create_queue("present");

        assert!(queues.exists(&queue("present")).await.unwrap());
        assert!(!queues.exists(&queue("absent")).await.unwrap());
    }
}
