use aws_config::{meta::region::RegionProviderChain, Region, SdkConfig};

/// Where SQS lives: real AWS, or LocalStack with static test credentials.
#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    pub local: bool,
    pub url: Option<String>,
}

pub const LOCALSTACK_URL: &str = "http://localhost:4566";

impl Endpoint {
    fn url(&self) -> Option<&str> {
        match (&self.url, self.local) {
            (Some(url), _) => Some(url.as_str()),
            (None, true) => Some(LOCALSTACK_URL),
            (None, false) => None,
        }
    }
}

/// Loads the AWS config for `region`, falling back to the default region
/// provider chain when no region is given.
pub async fn load(region: Option<&str>, endpoint: &Endpoint) -> SdkConfig {
    let region = RegionProviderChain::first_try(region.map(|r| Region::new(r.to_string())))
        .or_default_provider()
        .or_else(Region::from_static("us-east-1"));

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if endpoint.local {
        loader = loader.credentials_provider(aws_sdk_sqs::config::Credentials::new(
            "test", "test", None, None, "static",
        ));
    }

    if let Some(url) = endpoint.url() {
        log::debug!("using SQS endpoint {url}");
        loader = loader.endpoint_url(url);
    }

    loader.load().await
}
