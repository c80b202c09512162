//! Splits the result of a send batch into accepted and rejected ids.

use crate::queue::{OutboundMessage, SendOutcome};
use std::collections::{BTreeSet, HashMap};

/// Accepted and rejected ids of one send batch. Every sent id lands in
/// exactly one of the two sets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub accepted: BTreeSet<String>,
    pub rejected: BTreeSet<String>,
}

/// The destination reported something that does not line up with what
/// was sent. Nothing may be deleted when this happens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("outcome reported for id '{0}' which was never sent")]
    UnknownId(String),
    #[error("more than one outcome reported for id '{0}'")]
    DuplicateOutcome(String),
    #[error("no outcome reported for sent id '{0}'")]
    MissingOutcome(String),
    #[error("accepted id '{0}' has no receipt token")]
    MissingReceipt(String),
}

/// Classifies `outcomes` against the batch that produced them.
///
/// # Errors
///
/// Fails if an outcome names an id that was not sent, if an id has more
/// than one outcome, or if a sent id has no outcome at all.
pub fn classify(
    sent: &[OutboundMessage],
    outcomes: &[SendOutcome],
) -> Result<Reconciliation, ReconcileError> {
    let mut seen: HashMap<&str, bool> = sent.iter().map(|m| (m.id.as_str(), false)).collect();
    let mut result = Reconciliation::default();

    for outcome in outcomes {
        let Some(reported) = seen.get_mut(outcome.id.as_str()) else {
            return Err(ReconcileError::UnknownId(outcome.id.clone()));
        };

        if *reported {
            return Err(ReconcileError::DuplicateOutcome(outcome.id.clone()));
        }
        *reported = true;

        if outcome.accepted {
            result.accepted.insert(outcome.id.clone());
        } else {
            result.rejected.insert(outcome.id.clone());
        }
    }

    // report the first missing id in send order so the error is stable
    if let Some(missing) = sent.iter().find(|m| !seen[m.id.as_str()]) {
        return Err(ReconcileError::MissingOutcome(missing.id.clone()));
    }

    Ok(result)
}
