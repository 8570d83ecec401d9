//! Producers that fill the backup directory.
//!
//! Each variant runs once per pipeline run and never retries. Failures of the
//! external tools surface as `SourceBackupError` with the tool's diagnostic.

mod dav;
mod fixture;
mod vaultwarden;

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use log::info;

use crate::{
    config::SourceConfig,
    keepsake_error,
    utils::{Invocation, ToolOutput, ToolRunner},
    KeepsakeError, Result,
};

pub use dav::{DavSource, VDIRSYNCER_CONFIG_FILE};
pub use fixture::{TestSource, FIXTURE_FILE_NAME};
pub use vaultwarden::VaultwardenSource;

pub enum BackupSource {
    Dav(DavSource),
    Vaultwarden(VaultwardenSource),
    Test(TestSource),
}

impl BackupSource {
    pub fn from_config(config: &SourceConfig, work_dir: &Path, backup_dir: &Path) -> Self {
        match config {
            SourceConfig::Dav(conf) => BackupSource::Dav(DavSource::new(
                conf.clone(),
                work_dir.to_path_buf(),
                backup_dir.to_path_buf(),
            )),
            SourceConfig::Vaultwarden(conf) => BackupSource::Vaultwarden(VaultwardenSource::new(
                conf.clone(),
                backup_dir.to_path_buf(),
            )),
            SourceConfig::Test => BackupSource::Test(TestSource::new(backup_dir.to_path_buf())),
        }
    }

    /// Name under which this source's artifacts are stored remotely.
    pub fn collection_name(&self) -> &'static str {
        match self {
            BackupSource::Dav(_) => "dav",
            BackupSource::Vaultwarden(_) => "vaultwarden",
            BackupSource::Test(_) => "test",
        }
    }

    /// Populates the backup directory.
    pub fn create_backup(&self, runner: &dyn ToolRunner) -> Result<()> {
        info!("Creating {} backup", self.collection_name());
        match self {
            BackupSource::Dav(source) => source.create_backup(runner),
            BackupSource::Vaultwarden(source) => source.create_backup(runner),
            BackupSource::Test(source) => source.create_backup(),
        }
    }

    pub fn backup_dir(&self) -> &PathBuf {
        match self {
            BackupSource::Dav(source) => source.backup_dir(),
            BackupSource::Vaultwarden(source) => source.backup_dir(),
            BackupSource::Test(source) => source.backup_dir(),
        }
    }
}

/// Maps a local failure during `action` to a `SourceBackupError` carrying its
/// text.
pub(crate) fn backup_failed<E: Display>(action: String) -> impl FnOnce(E) -> KeepsakeError {
    move |e| {
        keepsake_error!(SourceBackupError {
            description: format!("{action}: {e}"),
        })
    }
}

/// Runs `invocation` and turns a spawn failure or non-zero exit into a
/// `SourceBackupError` describing `action`.
pub(crate) fn run_checked(
    runner: &dyn ToolRunner,
    invocation: &Invocation,
    action: &str,
) -> Result<ToolOutput> {
    let output = runner.run(invocation).map_err(|e| {
        keepsake_error!(SourceBackupError {
            description: format!("{action}: {e}"),
        })
    })?;
    if !output.success() {
        return Err(keepsake_error!(SourceBackupError {
            description: format!(
                "{action}: `{}` failed with {}: {}",
                invocation.command_line(),
                output.status_text(),
                output.stderr_text()
            ),
        }));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::process::testing::{failed, ScriptedRunner};

    #[test]
    fn test_collection_names_follow_config() {
        let source = BackupSource::from_config(
            &SourceConfig::Test,
            Path::new("/tmp/work"),
            Path::new("/tmp/backup"),
        );
        assert_eq!(source.collection_name(), "test");
        assert_eq!(source.backup_dir(), &PathBuf::from("/tmp/backup"));
    }

    #[test]
    fn test_run_checked_carries_diagnostic() {
        let runner = ScriptedRunner::queued(vec![failed(1, "You are not logged in.")]);
        let err = run_checked(&runner, &Invocation::new("bw", ["lock"]), "Locking vault")
            .unwrap_err();
        assert_eq!(
            format!("{err}").split(" (at ").next().unwrap(),
            "Source backup error: Locking vault: `bw lock` failed with exit code 1: You are not logged in."
        );
    }
}
