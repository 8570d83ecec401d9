use std::{
    fs,
    path::{Path, PathBuf},
};

use futures::TryStreamExt;
use log::{debug, info};
use object_store::{
    gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder},
    path::Path as ObjectPath,
    ObjectMeta, ObjectStore as _, PutPayload,
};
use serde::Deserialize;
use zeroize::Zeroizing;

use super::{key_with_prefix, normalize_prefix, validate_key, ObjectStore};
use crate::{config::SecretString, keepsake_error, utils::s3::create_runtime, Result, ResultExt};

/// The parts of a Google service account key checked before it is used.
#[derive(Debug, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub kind: String,
    pub client_email: String,
    pub private_key: SecretString,
}

impl ServiceAccountKey {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let key: ServiceAccountKey = serde_json::from_slice(data).map_err(|e| {
            keepsake_error!(InvalidParameter {
                description: format!("Invalid service account key: {e}"),
            })
        })?;
        if key.kind != "service_account" {
            return Err(keepsake_error!(InvalidParameter {
                description: format!(
                    "Invalid service account key: type is '{}', expected 'service_account'",
                    key.kind
                ),
            }));
        }
        Ok(key)
    }
}

struct GcsConnection {
    runtime: tokio::runtime::Runtime,
    client: GoogleCloudStorage,
}

/// A Cloud Storage bucket reached through the JSON API with a service account
/// key file. The client is built on the first store call.
pub struct GcsStore {
    bucket: String,
    prefix: Option<String>,
    credentials_path: PathBuf,
    connection: Option<GcsConnection>,
}

impl GcsStore {
    pub fn new(bucket: String, prefix: Option<&str>, credentials_path: PathBuf) -> Self {
        Self {
            bucket,
            prefix: normalize_prefix(prefix),
            credentials_path,
            connection: None,
        }
    }

    fn connect(&mut self) -> Result<&GcsConnection> {
        if self.connection.is_none() {
            let raw = Zeroizing::new(fs::read(&self.credentials_path).context(format!(
                "Reading object store credentials {} failed",
                self.credentials_path.display()
            ))?);
            let key = ServiceAccountKey::from_json(&raw)?;
            info!("Connecting to gs://{} as {}", self.bucket, key.client_email);
            let client = GoogleCloudStorageBuilder::new()
                .with_bucket_name(&self.bucket)
                .with_service_account_path(self.credentials_path.display().to_string())
                .build()
                .map_err(|err| {
                    keepsake_error!(StoreError {
                        description: format!("Failed to set up Cloud Storage client: {err}"),
                    })
                })?;
            self.connection = Some(GcsConnection {
                runtime: create_runtime()?,
                client,
            });
        }
        self.connection.as_ref().ok_or_else(|| {
            keepsake_error!(StoreError {
                description: "Cloud Storage connection is unavailable".to_string(),
            })
        })
    }

    fn object_path(&self, key: &str) -> Result<ObjectPath> {
        validate_key(key)?;
        Ok(ObjectPath::from(key_with_prefix(&self.prefix, key).as_str()))
    }
}

impl ObjectStore for GcsStore {
    fn upload_file(&mut self, local: &Path, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        let data = fs::read(local).context(format!("Reading {} failed", local.display()))?;
        let bucket = self.bucket.clone();
        let conn = self.connect()?;
        debug!("Uploading {} to gs://{bucket}/{path}", local.display());
        conn.runtime
            .block_on(conn.client.put(&path, PutPayload::from(data)))
            .map_err(|err| {
                keepsake_error!(StoreError {
                    description: format!("Failed to upload object {path}: {err}"),
                })
            })?;
        Ok(())
    }

    fn download_file(&mut self, key: &str, local: &Path) -> Result<()> {
        let path = self.object_path(key)?;
        let conn = self.connect()?;
        debug!("Fetching {path}");
        let data = conn
            .runtime
            .block_on(async {
                let result = conn.client.get(&path).await?;
                result.bytes().await
            })
            .map_err(|err| {
                keepsake_error!(StoreError {
                    description: format!("Failed to fetch object {path}: {err}"),
                })
            })?;
        fs::write(local, &data).context(format!("Writing {} failed", local.display()))?;
        Ok(())
    }

    fn list_objects(&mut self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = key_with_prefix(&self.prefix, prefix);
        let store_prefix = self.prefix.clone().unwrap_or_default();
        let listed_under = ObjectPath::from(full_prefix.as_str());
        let conn = self.connect()?;
        let objects: Vec<ObjectMeta> = conn
            .runtime
            .block_on(conn.client.list(Some(&listed_under)).try_collect())
            .map_err(|err| {
                keepsake_error!(StoreError {
                    description: format!("Failed to list objects under {full_prefix}: {err}"),
                })
            })?;
        let mut keys: Vec<String> = objects
            .iter()
            .map(|meta| meta.location.to_string())
            .filter(|location| location.starts_with(full_prefix.as_str()))
            .filter_map(|location| location.strip_prefix(store_prefix.as_str()).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
