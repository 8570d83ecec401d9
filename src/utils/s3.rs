use aws_config::{BehaviorVersion, Region};

use crate::Result;

/// Region used when none is configured. S3-compatible services such as the
/// Cloud Storage XML API and R2 accept it.
pub const DEFAULT_REGION: &str = "auto";

pub fn create_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            crate::keepsake_error!(StoreError {
                description: format!("Failed to create Tokio runtime for S3 operations: {err}"),
            })
        })
}

/// Builds a client with static credentials only; environment and profile
/// credentials are never consulted.
pub fn build_s3_client(
    runtime: &tokio::runtime::Runtime,
    endpoint: Option<&str>,
    region: Option<&str>,
    credentials: aws_sdk_s3::config::Credentials,
) -> aws_sdk_s3::Client {
    let region = region.unwrap_or(DEFAULT_REGION).to_string();
    let config = runtime.block_on(async {
        aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .load()
            .await
    });

    let mut builder = aws_sdk_s3::config::Builder::from(&config);

    if let Some(endpoint) = endpoint {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }

    aws_sdk_s3::Client::from_conf(builder.build())
}
