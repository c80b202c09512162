use anyhow::Context;
use serde_json::Value;
use std::process::Command;

pub const ENDPOINT: &str = "http://localhost:4566";

/// Creates the queue in LocalStack (or gets the existing one) through the
/// aws CLI and purges anything left over from earlier runs.
pub fn create_or_get_queue_url(queue_name: &str) -> String {
    let output = Command::new("aws")
        .args([
            "--endpoint-url",
            ENDPOINT,
            "sqs",
            "create-queue",
            "--queue-name",
            queue_name,
            "--output",
            "json",
        ])
        .output()
        .with_context(|| "AWS CLI failed".to_string())
        .unwrap();

    // aws cli returns 200 even if queue exists → same JSON
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!("AWS CLI failed: {stderr}");
    }

    let json: Value = serde_json::from_slice(&output.stdout)
        .with_context(|| "Failed to parse JSON response".to_string())
        .unwrap();

    let queue_url = json["QueueUrl"]
        .as_str()
        .with_context(|| "QueueUrl not found in response".to_string())
        .unwrap()
        .to_string();

    let _ = Command::new("aws")
        .args([
            "--endpoint-url",
            ENDPOINT,
            "sqs",
            "purge-queue",
            "--queue-url",
            &queue_url,
        ])
        .output();

    queue_url
}

pub async fn local_aws_config() -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .credentials_provider(aws_sdk_sqs::config::Credentials::new(
            "test", "test", None, None, "static",
        ))
        .endpoint_url(ENDPOINT)
        .region("us-east-1")
        .load()
        .await
}

/// Sends `count` messages straight through the SDK, in batches of 10.
pub async fn seed(config: &aws_config::SdkConfig, queue_url: &str, count: usize) {
    let client = aws_sdk_sqs::Client::new(config);

    for batch in (0..count).collect::<Vec<_>>().chunks(10) {
        let entries: Vec<aws_sdk_sqs::types::SendMessageBatchRequestEntry> = batch
            .iter()
            .map(|i| {
                aws_sdk_sqs::types::SendMessageBatchRequestEntry::builder()
                    .id(format!("msg_{}", i))
                    .message_body(format!("Test message {}", i))
                    .build()
                    .unwrap()
            })
            .collect();

        client
            .send_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .unwrap();
    }
}
