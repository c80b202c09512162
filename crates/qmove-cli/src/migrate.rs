use crate::config::{self, Endpoint};
use anyhow::Context;
use qmove::{
    DrainOutcome, MigrationOptions, MigrationRequest, MigrationResult, Migrator, QueueRef,
    ReceiveSettings, RetryPolicy, SqsQueue,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, clap::Args)]
pub struct MoveArgs {
    /// Name of the queue to take messages from
    #[arg(long)]
    source: String,

    /// Name of the queue to send messages to
    #[arg(long)]
    destination: String,

    /// AWS region of both queues (defaults to the environment's region)
    #[arg(long)]
    region: Option<String>,

    /// Maximum number of messages to move
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    count: u64,

    /// Seconds a received message stays hidden; rejected messages reappear after this
    #[arg(long, default_value_t = 30)]
    visibility_timeout: i32,

    /// Long-poll wait per receive, in seconds
    #[arg(long, default_value_t = 0)]
    wait_time: i32,

    /// Consecutive empty receives before the source counts as drained
    #[arg(long, default_value_t = 1)]
    empty_receives: u32,

    /// Stop draining after this many receive calls
    #[arg(long)]
    max_receive_calls: Option<u32>,

    /// Stop draining after this many seconds
    #[arg(long, default_value_t = 300)]
    drain_timeout: u64,

    /// Attempts for existence checks, receives and deletes
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    /// Print the result as JSON
    #[arg(long, action)]
    json: bool,
}

impl MoveArgs {
    fn options(&self) -> MigrationOptions {
        MigrationOptions {
            retry: RetryPolicy {
                max_attempts: self.attempts,
                ..RetryPolicy::default()
            },
            empty_receives_before_stop: self.empty_receives,
            max_receive_calls: self.max_receive_calls,
            drain_timeout: Some(Duration::from_secs(self.drain_timeout)),
        }
    }

    pub async fn run(self, endpoint: &Endpoint) -> anyhow::Result<()> {
        let config = config::load(self.region.as_deref(), endpoint).await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .context("no AWS region configured")?;

        let request = MigrationRequest {
            source: QueueRef::new(&self.source, &region),
            destination: QueueRef::new(&self.destination, &region),
            target_count: usize::try_from(self.count).context("count is too large")?,
        };

        if !self.json {
            println!(
                "Moving {} messages from {} to {} in {}.",
                self.count, self.source, self.destination, region
            );
        }

        let sqs = SqsQueue::from_config(config).with_settings(ReceiveSettings {
            visibility_timeout: self.visibility_timeout,
            wait_time: self.wait_time,
        });
        let migrator = Migrator::with_options(sqs, self.options());

        let cancel = CancellationToken::new();
        let h_ctrl_c = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("interrupted, stopping before the next step");
                    cancel.cancel();
                }
            }
        });

        let result = migrator.migrate(&request, &cancel).await;
        h_ctrl_c.abort();
        let result = result?;

        if self.json {
            println!("{}", serde_json::to_string(&result)?);
        } else {
            print!("{}", report(&result, &self.source, &self.destination, &region));
        }

        Ok(())
    }
}

fn report(result: &MigrationResult, source: &str, destination: &str, region: &str) -> String {
    let mut out = format!(
        "Moved {} messages from {} to {} in {}.\n",
        result.moved, source, destination, region
    );

    match result.drain {
        DrainOutcome::TargetMet => {}
        DrainOutcome::SourceExhausted => out.push_str(&format!(
            "{} ran out of messages after {} of {}.\n",
            source, result.received, result.requested
        )),
        DrainOutcome::Capped => out.push_str(&format!(
            "Stopped draining {} at its limit after {} of {}.\n",
            source, result.received, result.requested
        )),
        DrainOutcome::Interrupted => out.push_str(&format!(
            "Receiving from {} failed after {} of {}.\n",
            source, result.received, result.requested
        )),
    }

    if result.rejected > 0 {
        out.push_str(&format!(
            "{} messages were rejected by {} and will reappear on {}.\n",
            result.rejected, destination, source
        ));
    }

    if result.undeleted() > 0 {
        out.push_str(&format!(
            "{} messages reached {} but are still on {} and will be moved again.\n",
            result.undeleted(),
            destination,
            source
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(moved: usize, rejected: usize, drain: DrainOutcome) -> MigrationResult {
        MigrationResult {
            requested: 5,
            received: moved + rejected,
            accepted: moved,
            rejected,
            moved,
            drain,
        }
    }

    #[test]
    fn report_for_complete_move() {
        assert_eq!(
            report(&result(5, 0, DrainOutcome::TargetMet), "dlq", "main", "us-east-1"),
            "Moved 5 messages from dlq to main in us-east-1.\n"
        );
    }

    #[test]
    fn report_mentions_early_stop_and_rejections() {
        let text = report(
            &result(1, 1, DrainOutcome::SourceExhausted),
            "dlq",
            "main",
            "us-east-1",
        );

        assert!(text.starts_with("Moved 1 messages from dlq to main in us-east-1.\n"));
        assert!(text.contains("dlq ran out of messages after 2 of 5."));
        assert!(text.contains("1 messages were rejected by main and will reappear on dlq."));
    }
}
