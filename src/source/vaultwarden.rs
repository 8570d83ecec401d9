use std::path::PathBuf;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use zeroize::Zeroizing;

use super::run_checked;
use crate::{
    config::{ExposeSecret, VaultwardenConfig},
    convert::{self, VaultFolder, VaultItem, DATABASE_FILE_NAME},
    keepsake_error,
    utils::{Invocation, ToolRunner},
    Result,
};

const BW_PROGRAM: &str = "bw";

/// Exports a Bitwarden-compatible vault twice: as a KDBX database rebuilt
/// from the item list, and as the CLI's own zip export.
pub struct VaultwardenSource {
    config: VaultwardenConfig,
    backup_dir: PathBuf,
}

/// Locks and logs out of the CLI when dropped.
struct LoginGuard<'a> {
    runner: &'a dyn ToolRunner,
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        for action in ["lock", "logout"] {
            match self.runner.run(&Invocation::new(BW_PROGRAM, [action])) {
                Ok(output) if output.success() => debug!("bw {action} done"),
                Ok(output) => warn!(
                    "bw {action} failed with {}: {}",
                    output.status_text(),
                    output.stderr_text()
                ),
                Err(e) => warn!("bw {action} failed: {e}"),
            }
        }
    }
}

impl VaultwardenSource {
    pub fn new(config: VaultwardenConfig, backup_dir: PathBuf) -> Self {
        Self { config, backup_dir }
    }

    pub fn backup_dir(&self) -> &PathBuf {
        &self.backup_dir
    }

    pub fn create_backup(&self, runner: &dyn ToolRunner) -> Result<()> {
        run_checked(
            runner,
            &Invocation::new(BW_PROGRAM, ["config", "server", self.config.url.as_str()]),
            "Configuring vault server",
        )?;

        let _login = LoginGuard { runner };
        run_checked(
            runner,
            &Invocation::new(BW_PROGRAM, ["login", "--apikey"])
                .env("BW_CLIENTID", self.config.client_id.as_str())
                .env("BW_CLIENTSECRET", self.config.client_secret.expose_secret()),
            "Logging into vault",
        )?;

        let password = self.config.password.expose_secret();
        let session = unlock(runner, password)?;
        self.export(runner, password, &session)
    }

    fn export(&self, runner: &dyn ToolRunner, password: &str, session: &str) -> Result<()> {
        let folders: Vec<VaultFolder> = list(runner, session, "folders")?;
        let items: Vec<VaultItem> = list(runner, session, "items")?;
        info!("Fetched {} folders and {} items", folders.len(), items.len());

        convert::convert(
            &folders,
            &items,
            password,
            &self.backup_dir.join(DATABASE_FILE_NAME),
        )?;

        let output_dir = format!("{}/", self.backup_dir.display());
        run_checked(
            runner,
            &Invocation::new(
                BW_PROGRAM,
                ["export", "--format", "zip", "--output", output_dir.as_str()],
            )
            .env("BW_SESSION", session),
            "Exporting vault",
        )?;
        Ok(())
    }
}

fn unlock(runner: &dyn ToolRunner, password: &str) -> Result<Zeroizing<String>> {
    let output = run_checked(
        runner,
        &Invocation::new(BW_PROGRAM, ["unlock", "--passwordenv", "BWPW"]).env("BWPW", password),
        "Unlocking vault",
    )?;
    let stdout = Zeroizing::new(output.stdout_text());
    parse_session(&stdout).ok_or_else(|| {
        keepsake_error!(SourceBackupError {
            description: "Unlocking vault: no session token in bw output".to_string(),
        })
    })
}

fn list<T: DeserializeOwned>(runner: &dyn ToolRunner, session: &str, object: &str) -> Result<Vec<T>> {
    let output = run_checked(
        runner,
        &Invocation::new(BW_PROGRAM, ["list", object]).env("BW_SESSION", session),
        &format!("Listing vault {object}"),
    )?;
    serde_json::from_slice(&output.stdout).map_err(|e| {
        keepsake_error!(SourceBackupError {
            description: format!("Listing vault {object}: unexpected bw output: {e}"),
        })
    })
}

/// Extracts the token from the `export BW_SESSION="..."` hint `bw unlock`
/// prints.
fn parse_session(stdout: &str) -> Option<Zeroizing<String>> {
    let start = stdout.find("BW_SESSION=\"")? + "BW_SESSION=\"".len();
    let len = stdout[start..].find('"')?;
    let token = &stdout[start..start + len];
    (!token.is_empty()).then(|| Zeroizing::new(token.to_string()))
}
