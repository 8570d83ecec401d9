use std::path::PathBuf;

use clap::Args;

use crate::pipeline::Workspace;

pub const DEFAULT_KEY_MANAGEMENT_FILE: &str = "sops.yaml";
pub const DEFAULT_CONFIG_FILE: &str = "keepsake.yaml";

#[derive(Args, Debug, Clone)]
/// Common command-line arguments used in most of the binaries.
pub struct CommonArgs {
    /// Directory holding the key-management file and the encrypted
    /// configuration document.
    #[arg(short = 'm', long = "mount", default_value = ".mnt")]
    pub mount_dir: PathBuf,

    /// Key-management file. Defaults to `sops.yaml` in the mount directory.
    #[arg(short = 'k', long = "key-management")]
    pub key_management: Option<PathBuf>,

    /// Encrypted configuration document. Defaults to `keepsake.yaml` in the
    /// mount directory.
    #[arg(short = 'f', long = "config")]
    pub config: Option<PathBuf>,

    /// Scratch directory; credentials live in its `.conf` subdirectory.
    #[arg(short = 'w', long = "work-dir", default_value = ".workdir")]
    pub work_dir: PathBuf,

    /// Directory collecting artifacts before upload.
    #[arg(short = 'b', long = "backup-dir", default_value = ".backup")]
    pub backup_dir: PathBuf,
}

impl CommonArgs {
    pub fn key_management_file(&self) -> PathBuf {
        self.key_management
            .clone()
            .unwrap_or_else(|| self.mount_dir.join(DEFAULT_KEY_MANAGEMENT_FILE))
    }

    pub fn config_file(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.mount_dir.join(DEFAULT_CONFIG_FILE))
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.work_dir.clone(), self.backup_dir.clone())
    }
}
