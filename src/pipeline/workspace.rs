use std::path::{Path, PathBuf};

use log::debug;

use crate::{
    utils::{
        fs::{cleanup_dir, create_private_dir},
        UmaskGuard,
    },
    Result,
};

pub const CONF_DIR_NAME: &str = ".conf";
pub const GNUPG_DIR_NAME: &str = "gnupg";

/// The scratch directory (with its credential subdirectory) and the
/// directory of artifacts pending upload.
#[derive(Debug, Clone)]
pub struct Workspace {
    work_dir: PathBuf,
    conf_dir: PathBuf,
    backup_dir: PathBuf,
}

impl Workspace {
    pub fn new(work_dir: PathBuf, backup_dir: PathBuf) -> Self {
        let conf_dir = work_dir.join(CONF_DIR_NAME);
        Self {
            work_dir,
            conf_dir,
            backup_dir,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn gnupg_dir(&self) -> PathBuf {
        self.conf_dir.join(GNUPG_DIR_NAME)
    }

    /// Creates the directories, owner-only, and keeps the umask private
    /// while doing so.
    pub fn prepare(&self) -> Result<()> {
        let _umask = UmaskGuard::private();
        for dir in [&self.work_dir, &self.conf_dir, &self.backup_dir] {
            create_private_dir(dir)?;
        }
        debug!(
            "Workspace ready: {} / {}",
            self.work_dir.display(),
            self.backup_dir.display()
        );
        Ok(())
    }

    /// Empties the scratch directory except `.conf`, and the backup
    /// directory. Both sweeps run even if the first fails.
    pub fn cleanup(&self) -> Result<()> {
        let work = cleanup_dir(&self.work_dir, &[CONF_DIR_NAME]);
        let backup = cleanup_dir(&self.backup_dir, &[]);
        work.and(backup)
    }

    /// Removes every credential file.
    pub fn purge_credentials(&self) -> Result<()> {
        cleanup_dir(&self.conf_dir, &[])
    }
}
