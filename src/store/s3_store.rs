use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::Deserialize;
use zeroize::Zeroizing;

use super::{key_with_prefix, normalize_prefix, validate_key, ObjectStore};
use crate::{
    keepsake_error,
    utils::s3::{build_s3_client, create_runtime},
    Result, ResultExt,
};

type S3Client = aws_sdk_s3::Client;
type S3ByteStream = aws_sdk_s3::primitives::ByteStream;

/// Static access keys as stored in the credential file.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl StaticCredentials {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| {
            keepsake_error!(InvalidParameter {
                description: format!("Invalid object store credentials: {e}"),
            })
        })
    }

    fn into_sdk(self) -> aws_sdk_s3::config::Credentials {
        aws_sdk_s3::config::Credentials::new(
            self.access_key_id,
            self.secret_access_key,
            self.session_token,
            None,
            "keepsake",
        )
    }
}

struct S3Connection {
    runtime: tokio::runtime::Runtime,
    client: S3Client,
}

/// An S3-compatible bucket. The client is built from the credential file on
/// the first store call.
pub struct S3Store {
    bucket: String,
    prefix: Option<String>,
    endpoint: Option<String>,
    region: Option<String>,
    credentials_path: PathBuf,
    connection: Option<S3Connection>,
}

impl S3Store {
    pub fn new(
        bucket: String,
        prefix: Option<&str>,
        endpoint: Option<String>,
        region: Option<String>,
        credentials_path: PathBuf,
    ) -> Self {
        Self {
            bucket,
            prefix: normalize_prefix(prefix),
            endpoint,
            region,
            credentials_path,
            connection: None,
        }
    }

    #[cfg(test)]
    fn with_client(client: S3Client, bucket: &str, prefix: Option<&str>) -> Result<Self> {
        let mut store = Self::new(bucket.to_string(), prefix, None, None, PathBuf::new());
        store.connection = Some(S3Connection {
            runtime: create_runtime()?,
            client,
        });
        Ok(store)
    }

    fn connect(&mut self) -> Result<&S3Connection> {
        if self.connection.is_none() {
            let raw = Zeroizing::new(fs::read(&self.credentials_path).context(format!(
                "Reading object store credentials {} failed",
                self.credentials_path.display()
            ))?);
            let credentials = StaticCredentials::from_json(&raw)?;
            info!(
                "Connecting to bucket {} (endpoint: {})",
                self.bucket,
                self.endpoint.as_deref().unwrap_or("default")
            );
            let runtime = create_runtime()?;
            let client = build_s3_client(
                &runtime,
                self.endpoint.as_deref(),
                self.region.as_deref(),
                credentials.into_sdk(),
            );
            self.connection = Some(S3Connection { runtime, client });
        }
        self.connection.as_ref().ok_or_else(|| {
            keepsake_error!(StoreError {
                description: "S3 connection is unavailable".to_string(),
            })
        })
    }

    fn full_key(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        Ok(key_with_prefix(&self.prefix, key))
    }
}

impl ObjectStore for S3Store {
    fn upload_file(&mut self, local: &Path, key: &str) -> Result<()> {
        let full_key = self.full_key(key)?;
        let data = fs::read(local).context(format!("Reading {} failed", local.display()))?;
        let bucket = self.bucket.clone();
        let conn = self.connect()?;
        debug!("Uploading {} to s3://{bucket}/{full_key}", local.display());
        conn.runtime.block_on(async {
            conn.client
                .put_object()
                .bucket(&bucket)
                .key(&full_key)
                .body(S3ByteStream::from(data))
                .send()
                .await
                .map_err(|err| {
                    keepsake_error!(StoreError {
                        description: format!("Failed to upload object {full_key}: {err}"),
                    })
                })
        })?;
        Ok(())
    }

    fn download_file(&mut self, key: &str, local: &Path) -> Result<()> {
        let full_key = self.full_key(key)?;
        let bucket = self.bucket.clone();
        let conn = self.connect()?;
        debug!("Fetching s3://{bucket}/{full_key}");
        let data = conn.runtime.block_on(async {
            let output = conn
                .client
                .get_object()
                .bucket(&bucket)
                .key(&full_key)
                .send()
                .await
                .map_err(|err| {
                    keepsake_error!(StoreError {
                        description: format!("Failed to fetch object {full_key}: {err}"),
                    })
                })?;
            let bytes = output.body.collect().await.map_err(|err| {
                keepsake_error!(StoreError {
                    description: format!("Failed to read object body: {err}"),
                })
            })?;
            Ok::<_, crate::KeepsakeError>(bytes.to_vec())
        })?;
        fs::write(local, data).context(format!("Writing {} failed", local.display()))?;
        Ok(())
    }

    fn list_objects(&mut self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = key_with_prefix(&self.prefix, prefix);
        let store_prefix = self.prefix.clone().unwrap_or_default();
        let bucket = self.bucket.clone();
        let conn = self.connect()?;
        let mut keys = conn.runtime.block_on(async {
            let mut keys = Vec::new();
            let mut continuation: Option<String> = None;
            loop {
                let output = conn
                    .client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&full_prefix)
                    .set_continuation_token(continuation.take())
                    .send()
                    .await
                    .map_err(|err| {
                        keepsake_error!(StoreError {
                            description: format!("Failed to list objects under {full_prefix}: {err}"),
                        })
                    })?;
                keys.extend(
                    output
                        .contents()
                        .iter()
                        .filter_map(|object| object.key())
                        .filter_map(|key| key.strip_prefix(store_prefix.as_str()))
                        .map(str::to_string),
                );
                match output.next_continuation_token() {
                    Some(token) if output.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string())
                    }
                    _ => break,
                }
            }
            Ok::<_, crate::KeepsakeError>(keys)
        })?;
        keys.sort();
        Ok(keys)
    }
}
