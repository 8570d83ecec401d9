use std::{fs, path::PathBuf};

use super::backup_failed;
use crate::Result;

pub const FIXTURE_FILE_NAME: &str = "backup.json";

const FIXTURE: &[u8] = include_bytes!("fixtures/backup.json");

/// Drops a fixed file into the backup directory.
pub struct TestSource {
    backup_dir: PathBuf,
}

impl TestSource {
    pub fn new(backup_dir: PathBuf) -> Self {
        Self { backup_dir }
    }

    pub fn backup_dir(&self) -> &PathBuf {
        &self.backup_dir
    }

    pub fn create_backup(&self) -> Result<()> {
        let target = self.backup_dir.join(FIXTURE_FILE_NAME);
        fs::write(&target, FIXTURE)
            .map_err(backup_failed(format!("Writing {}", target.display())))
    }
}
