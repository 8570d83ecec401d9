use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use walkdir::WalkDir;

use super::{validate_key, ObjectStore};
use crate::{Result, ResultExt};

/// Stores objects as files below `base_path`; key segments become
/// directories.
pub struct FileSystemStore {
    base_path: PathBuf,
}

impl FileSystemStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }
}

impl ObjectStore for FileSystemStore {
    fn upload_file(&mut self, local: &Path, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Creating {} failed", parent.display()))?;
        }
        debug!("Copying {} to {}", local.display(), path.display());
        fs::copy(local, &path).context(format!(
            "Copying {} to {} failed",
            local.display(),
            path.display()
        ))?;
        Ok(())
    }

    fn download_file(&mut self, key: &str, local: &Path) -> Result<()> {
        let path = self.object_path(key)?;
        fs::copy(&path, local).context(format!(
            "Copying {} to {} failed",
            path.display(),
            local.display()
        ))?;
        Ok(())
    }

    fn list_objects(&mut self, prefix: &str) -> Result<Vec<String>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }
        let mut objects = Vec::new();
        for entry in WalkDir::new(&self.base_path).min_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.base_path) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                objects.push(key);
            }
        }
        objects.sort();
        Ok(objects)
    }
}
