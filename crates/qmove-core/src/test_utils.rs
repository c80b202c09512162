use crate::queue::QueueRef;
use crate::sqs::SqsQueue;
use aws_sdk_sqs::config::Credentials;
use testcontainers::ContainerAsync;
use testcontainers_modules::{
    localstack::LocalStack,
    testcontainers::{runners::AsyncRunner, Image, ImageExt, TestcontainersError},
};
use tokio::sync::{Mutex, OnceCell};

pub const REGION: &str = "us-east-1";

pub fn local_config(endpoint_url: &str, region: Option<&'static str>) -> aws_config::ConfigLoader {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .endpoint_url(endpoint_url)
        .region(region.unwrap_or(REGION))
        .credentials_provider(Credentials::new("test", "test", None, None, "static"))
}

pub async fn localstack() -> Result<(String, ContainerAsync<LocalStack>), TestcontainersError> {
    let request = LocalStack::default()
        .with_tag("latest")
        .with_env_var("SERVICES", "sqs")
        .with_env_var("SKIP_SSL_CERT_DOWNLOAD", "1");
    let container = request.start().await?;

    let host_ip = container.get_host().await?;
    let host_port = container.get_host_port_ipv4(4566).await?;
    let endpoint_url = format!("http://{host_ip}:{host_port}");

    Ok((endpoint_url, container))
}

pub async fn create_test_queue<I: Image>(
    container: &ContainerAsync<I>,
    name: &str,
) -> Result<(), TestcontainersError> {
    let create_queue_command = testcontainers::core::ExecCommand::new([
        "awslocal",
        "sqs",
        "create-queue",
        "--queue-name",
        name,
    ])
    .with_container_ready_conditions(vec![testcontainers::core::WaitFor::message_on_stdout(
        "AWS sqs.CreateQueue => 200",
    )]);

    container.exec(create_queue_command).await?;

    Ok(())
}

// Shared LocalStack container across all tests, started on first use
static SHARED_CONTAINER: OnceCell<Mutex<(String, ContainerAsync<LocalStack>)>> =
    OnceCell::const_new();

pub async fn get_shared_container() -> &'static Mutex<(String, ContainerAsync<LocalStack>)> {
    SHARED_CONTAINER
        .get_or_init(|| async {
            let (endpoint_url, container) = localstack().await.unwrap();
            Mutex::new((endpoint_url, container))
        })
        .await
}

/// Generate a unique queue name for testing, using a UUID suffix.
pub fn unique_queue_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Creates a fresh queue in the shared container and returns an
/// [`SqsQueue`] pointed at LocalStack, the queue, and the config used.
pub async fn setup(name: &str) -> (SqsQueue, QueueRef, aws_config::SdkConfig) {
    let queue_name = unique_queue_name(name);

    let endpoint_url = {
        let guard = get_shared_container().await.lock().await;
        create_test_queue(&guard.1, &queue_name).await.unwrap();
        guard.0.clone()
    };

    let config = local_config(&endpoint_url, None).load().await;
    let sqs = SqsQueue::from_config(config.clone());
    let queue = QueueRef::new(queue_name, REGION);

    // LocalStack may need a moment before the queue resolves
    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while sqs.queue_url(&queue).await.ok().flatten().is_none() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("Timeout waiting for queue to be available");

    (sqs, queue, config)
}
