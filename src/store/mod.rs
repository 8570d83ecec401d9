use std::path::Path;

use crate::{keepsake_error, Result};

/// Abstraction over a backend that stores uploaded backup artifacts.
///
/// Keys are `/`-separated object paths relative to the store's root or
/// prefix.
pub trait ObjectStore {
    /// Upload the local file at `local` under `key`.
    fn upload_file(&mut self, local: &Path, key: &str) -> Result<()>;
    /// Download the object `key` into the local file `local`.
    fn download_file(&mut self, key: &str, local: &Path) -> Result<()>;
    /// List the keys starting with `prefix`, sorted.
    fn list_objects(&mut self, prefix: &str) -> Result<Vec<String>>;
}

mod fs_store;
mod gcs_store;
mod s3_store;

pub use fs_store::FileSystemStore;
pub use gcs_store::{GcsStore, ServiceAccountKey};
pub use s3_store::{S3Store, StaticCredentials};

#[cfg(test)]
pub(crate) mod mem_store;

/// Rejects keys that are empty, absolute, or contain `.`/`..` segments.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(keepsake_error!(InvalidParameter {
            description: format!("Invalid object key '{key}'"),
        }));
    }
    Ok(())
}

/// Normalizes a configured prefix to `prefix/`, or `None` when blank.
pub(crate) fn normalize_prefix(prefix: Option<&str>) -> Option<String> {
    prefix.and_then(|p| {
        let p = p.trim_matches('/');
        if p.is_empty() {
            None
        } else {
            Some(format!("{p}/"))
        }
    })
}

pub(crate) fn key_with_prefix(prefix: &Option<String>, name: &str) -> String {
    if let Some(prefix) = prefix {
        format!("{prefix}{name}")
    } else {
        name.to_string()
    }
}
