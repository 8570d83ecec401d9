//! Sequences one backup run: configuration, source, archive, encryption,
//! upload and cleanup.

mod archive;
mod workspace;

use std::{fmt, path::Path, rc::Rc};

use log::{error, info, warn};

use crate::{
    config::{BackupConfig, KeyManagementConfig},
    destination::{BackupDestination, RunTimestamp},
    encrypt::FileEncryptor,
    keepsake_error,
    key_management::LayeredDecryptor,
    source::BackupSource,
    store::ObjectStore,
    utils::{security::warn_if_loose_permissions, ToolRunner},
    OperatorKey, Result,
};

pub use archive::{archive_size, archive_subdirs, zip_directory};
pub use workspace::{Workspace, CONF_DIR_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    ConfigLoaded,
    SourceReady,
    BackedUp,
    Archived,
    Encrypted,
    Uploaded,
    CleanedUp,
    Aborted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupReport {
    pub collection: &'static str,
    pub timestamp: RunTimestamp,
    pub uploaded: Vec<String>,
}

pub struct Orchestrator {
    runner: Rc<dyn ToolRunner>,
    workspace: Workspace,
    timestamp: RunTimestamp,
    config: Option<BackupConfig>,
    state: PipelineState,
    needs_cleanup: bool,
    store_override: Option<Box<dyn ObjectStore>>,
}

impl Orchestrator {
    pub fn new(runner: Rc<dyn ToolRunner>, workspace: Workspace) -> Self {
        Self {
            runner,
            workspace,
            timestamp: RunTimestamp::now(),
            config: None,
            state: PipelineState::Init,
            needs_cleanup: false,
            store_override: None,
        }
    }

    /// Uploads to `store` instead of the store the configuration names.
    pub fn with_store(mut self, store: Box<dyn ObjectStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    /// Starts from an already decrypted configuration.
    pub fn with_config(
        runner: Rc<dyn ToolRunner>,
        workspace: Workspace,
        config: BackupConfig,
    ) -> Result<Self> {
        let mut orchestrator = Self::new(runner, workspace);
        orchestrator.workspace.prepare()?;
        orchestrator.workspace.purge_credentials()?;
        config.validate()?;
        orchestrator.config = Some(config);
        orchestrator.state = PipelineState::ConfigLoaded;
        Ok(orchestrator)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn timestamp(&self) -> &RunTimestamp {
        &self.timestamp
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn config(&self) -> Option<&BackupConfig> {
        self.config.as_ref()
    }

    /// Runs both decryption stages: reads the key-management file, the
    /// operator key it points to, and decrypts `config_file`.
    pub fn load_config(&mut self, key_management_file: &Path, config_file: &Path) -> Result<()> {
        self.expect_state(PipelineState::Init)?;
        let result = self.decrypt_config(key_management_file, config_file);
        match result {
            Ok(config) => {
                self.config = Some(config);
                self.state = PipelineState::ConfigLoaded;
                Ok(())
            }
            Err(e) => {
                self.state = PipelineState::Aborted;
                if let Err(purge) = self.workspace.purge_credentials() {
                    warn!("Failed to purge credentials: {purge}");
                }
                Err(e)
            }
        }
    }

    fn decrypt_config(&self, key_management_file: &Path, config_file: &Path) -> Result<BackupConfig> {
        self.workspace.prepare()?;
        self.workspace.purge_credentials()?;
        let key_management = KeyManagementConfig::load(key_management_file)?;
        warn_if_loose_permissions(&key_management.secret_path);
        let key = OperatorKey::load(&key_management.secret_path)?;
        info!(
            "Decrypting {} with {} key management",
            config_file.display(),
            key_management.provider.name()
        );
        LayeredDecryptor::new(self.runner.as_ref(), self.workspace.conf_dir()).decrypt(
            &key,
            &key_management,
            config_file,
        )
    }

    /// Runs backup, archive, encrypt and upload, then cleans the workspace
    /// whatever the outcome.
    pub fn backup(&mut self) -> Result<BackupReport> {
        let result = self.run_stages();
        let cleanup = if self.needs_cleanup {
            self.cleanup()
        } else {
            Ok(())
        };

        match (result, cleanup) {
            (Ok(report), Ok(())) => {
                self.state = PipelineState::CleanedUp;
                info!(
                    "Backup {} finished: {} artifacts uploaded",
                    report.timestamp,
                    report.uploaded.len()
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => {
                error!("Cleanup failed: {e}");
                self.state = PipelineState::Aborted;
                Err(e)
            }
            (Err(e), cleanup) => {
                error!("Backup aborted in state {}: {e}", self.state);
                if let Err(cleanup_err) = cleanup {
                    error!("Cleanup after failure also failed: {cleanup_err}");
                }
                self.state = PipelineState::Aborted;
                Err(e)
            }
        }
    }

    fn run_stages(&mut self) -> Result<BackupReport> {
        self.expect_state(PipelineState::ConfigLoaded)?;
        let config = self.config.take().ok_or_else(|| {
            keepsake_error!(InvalidParameter {
                description: "configuration not loaded".to_string(),
            })
        })?;
        let result = self.run_with(&config);
        self.config = Some(config);
        result
    }

    fn run_with(&mut self, config: &BackupConfig) -> Result<BackupReport> {
        let runner = Rc::clone(&self.runner);
        let runner = runner.as_ref();

        // Leftovers of an interrupted run must not be uploaded with this one.
        self.needs_cleanup = true;
        self.workspace.cleanup()?;

        let source = BackupSource::from_config(
            &config.src,
            self.workspace.work_dir(),
            self.workspace.backup_dir(),
        );
        let mut destination = match self.store_override.take() {
            Some(store) => BackupDestination::new(
                store,
                self.workspace.backup_dir().to_path_buf(),
                self.timestamp.clone(),
            ),
            None => BackupDestination::from_config(
                &config.dst,
                self.workspace.conf_dir(),
                self.workspace.backup_dir().to_path_buf(),
                self.timestamp.clone(),
            )?,
        };
        let encryptor = FileEncryptor::new(runner, self.workspace.gnupg_dir(), &config.gpg)?;
        self.advance(PipelineState::SourceReady);

        source.create_backup(runner)?;
        self.advance(PipelineState::BackedUp);

        for archive in archive_subdirs(self.workspace.backup_dir())? {
            info!(
                "Archived {} ({} bytes)",
                archive.display(),
                archive_size(&archive)
            );
        }
        self.advance(PipelineState::Archived);

        let encrypted = encryptor.encrypt_dir(self.workspace.backup_dir())?;
        info!("Encrypted {} artifacts", encrypted.len());
        self.advance(PipelineState::Encrypted);

        let collection = source.collection_name();
        let uploaded = destination.upload_backup(collection)?;
        self.advance(PipelineState::Uploaded);

        Ok(BackupReport {
            collection,
            timestamp: self.timestamp.clone(),
            uploaded,
        })
    }

    fn cleanup(&mut self) -> Result<()> {
        self.needs_cleanup = false;
        self.workspace.cleanup()
    }

    fn advance(&mut self, next: PipelineState) {
        info!("Pipeline state: {} -> {next}", self.state);
        self.state = next;
    }

    fn expect_state(&self, expected: PipelineState) -> Result<()> {
        if self.state != expected {
            return Err(keepsake_error!(InvalidParameter {
                description: format!(
                    "pipeline is in state {}, expected {expected}",
                    self.state
                ),
            }));
        }
        Ok(())
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.needs_cleanup {
            if let Err(e) = self.cleanup() {
                error!("Cleanup on drop failed: {e}");
            }
        }
        if self.state != PipelineState::Init {
            if let Err(e) = self.workspace.purge_credentials() {
                error!("Purging credentials failed: {e}");
            }
        }
    }
}
