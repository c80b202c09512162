//! # qmove-core
//!
//! Core library for moving messages from one AWS SQS queue to another,
//! typically redriving a dead letter queue back to its source.
//!
//! A move receives up to a requested number of messages from the source,
//! forwards them to the destination and deletes from the source only the
//! messages the destination accepted. Delivery is at-least-once: a message
//! is never deleted before the destination confirmed it, so failures can
//! duplicate a message but not lose it.
//!
//! ## Features
//!
//! - **Migration**: [`Migrator`] drives the move through any [`QueueAccessor`]
//! - **SQS**: [`SqsQueue`] implements the accessor on top of `aws-sdk-sqs`
//! - **In-memory queues**: [`memory::InMemoryQueues`] for tests and dry runs
//! - **Publishing**: [`Publisher`] refuses message types with no registered queue
//!
//! ## Example
//!
//! ```no_run
//! use qmove::{MigrationRequest, Migrator, QueueRef, SqsQueue};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
//! let migrator = Migrator::new(SqsQueue::from_config(config));
//!
//! let request = MigrationRequest {
//!     source: QueueRef::new("orders-dlq", "us-east-1"),
//!     destination: QueueRef::new("orders", "us-east-1"),
//!     target_count: 25,
//! };
//!
//! let result = migrator.migrate(&request, &CancellationToken::new()).await?;
//! println!("moved {} messages", result.moved);
//! # Ok(())
//! # }
//! ```

pub mod memory;
mod migrate;
mod publish;
mod queue;
mod reconcile;
mod retry;
mod sqs;

#[cfg(test)]
mod test_utils;

pub use migrate::*;
pub use publish::*;
pub use queue::*;
pub use reconcile::*;
pub use retry::*;
pub use sqs::*;
