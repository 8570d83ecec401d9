//! Uploads the encrypted artifacts of a run to a namespaced, timestamped
//! remote path.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use log::{error, info};

use crate::{
    config::{DestinationConfig, ExposeSecret, GcpCredentials},
    keepsake_error,
    store::{
        FileSystemStore, GcsStore, ObjectStore, S3Store, ServiceAccountKey, StaticCredentials,
    },
    utils::fs::{list_files, write_private_file},
    Result,
};

/// Cloud Storage endpoint speaking the S3 XML API, used with HMAC keys.
pub const GCS_ENDPOINT: &str = "https://storage.googleapis.com";
pub const ENCRYPTED_SUFFIX: &str = ".gpg";

/// Local time at which a run started, `%Y%m%d-%H%M%S`. Captured once and
/// shared by every artifact of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTimestamp(String);

impl RunTimestamp {
    pub const FORMAT: &'static str = "%Y%m%d-%H%M%S";

    pub fn now() -> Self {
        Self(chrono::Local::now().format(Self::FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunTimestamp {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct BackupDestination {
    store: Box<dyn ObjectStore>,
    backup_dir: PathBuf,
    timestamp: RunTimestamp,
}

impl BackupDestination {
    pub fn new(store: Box<dyn ObjectStore>, backup_dir: PathBuf, timestamp: RunTimestamp) -> Self {
        Self {
            store,
            backup_dir,
            timestamp,
        }
    }

    /// Builds the configured store. Remote credentials are decoded into an
    /// owner-read-only file in `conf_dir`; nothing connects until the first
    /// store call. A gcp destination with `gcp_svc_key` talks to the JSON API
    /// with that service account file.
    pub fn from_config(
        config: &DestinationConfig,
        conf_dir: &Path,
        backup_dir: PathBuf,
        timestamp: RunTimestamp,
    ) -> Result<Self> {
        let store: Box<dyn ObjectStore> = match config {
            DestinationConfig::Gcp(conf) => match conf.credentials()? {
                GcpCredentials::ServiceAccount(key) => {
                    let credentials_path = conf_dir.join("gcp_svc_credentials.json");
                    ServiceAccountKey::from_json(key.expose_secret())?;
                    write_private_file(&credentials_path, key.expose_secret())?;
                    Box::new(GcsStore::new(
                        conf.bucket_name.clone(),
                        conf.prefix.as_deref(),
                        credentials_path,
                    ))
                }
                GcpCredentials::Hmac(key) => {
                    let credentials_path = conf_dir.join("gcp_hmac_credentials.json");
                    prepare_credentials(&credentials_path, key.expose_secret())?;
                    Box::new(S3Store::new(
                        conf.bucket_name.clone(),
                        conf.prefix.as_deref(),
                        Some(GCS_ENDPOINT.to_string()),
                        None,
                        credentials_path,
                    ))
                }
            },
            DestinationConfig::S3(conf) => {
                let credentials_path = conf_dir.join("s3_credentials.json");
                prepare_credentials(&credentials_path, conf.credentials.expose_secret())?;
                Box::new(S3Store::new(
                    conf.bucket.clone(),
                    conf.prefix.as_deref(),
                    conf.endpoint.clone(),
                    conf.region.clone(),
                    credentials_path,
                ))
            }
            DestinationConfig::Filesystem(conf) => {
                Box::new(FileSystemStore::new(conf.path.clone()))
            }
        };
        Ok(Self::new(store, backup_dir, timestamp))
    }

    pub fn timestamp(&self) -> &RunTimestamp {
        &self.timestamp
    }

    /// Remote key of `file_name` for this run.
    pub fn remote_key(&self, collection: &str, file_name: &str) -> String {
        format!("{collection}/{}/{file_name}", self.timestamp)
    }

    /// Uploads every `*.gpg` file in the backup directory to
    /// `{collection}/{timestamp}/{file}`, in name order. The first failure
    /// stops the run. Returns the uploaded keys.
    pub fn upload_backup(&mut self, collection: &str) -> Result<Vec<String>> {
        let artifacts: Vec<PathBuf> = list_files(&self.backup_dir)?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(ENCRYPTED_SUFFIX))
            })
            .collect();

        if artifacts.is_empty() {
            return Err(keepsake_error!(UploadError {
                artifact: self.backup_dir.display().to_string(),
                description: "no encrypted artifacts to upload".to_string(),
            }));
        }

        let mut uploaded = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            let file_name = artifact
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let key = self.remote_key(collection, &file_name);
            if let Err(e) = self.store.upload_file(artifact, &key) {
                error!("Upload of {file_name} failed: {e}");
                return Err(keepsake_error!(UploadError {
                    artifact: file_name,
                    description: e.to_string(),
                }));
            }
            info!("Uploaded {file_name} to {key}");
            uploaded.push(key);
        }
        Ok(uploaded)
    }

    /// Restores the object `name` into `target`.
    pub fn download_file(&mut self, name: &str, target: &Path) -> Result<()> {
        self.store.download_file(name, target)?;
        info!("Downloaded {name} to {}", target.display());
        Ok(())
    }

    /// Keys stored for `collection`, across all runs.
    pub fn list_backups(&mut self, collection: &str) -> Result<Vec<String>> {
        self.store.list_objects(&format!("{collection}/"))
    }
}

fn prepare_credentials(path: &Path, payload: &[u8]) -> Result<()> {
    StaticCredentials::from_json(payload)?;
    write_private_file(path, payload)
}
