//! Two-stage decryption of the backup configuration.
//!
//! Stage one opens a sealed provider secret with the operator key. Stage two
//! hands that secret and the key-management reference to `sops`, which
//! decrypts the configuration document through the provider's KMS.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as b64_engine, Engine};
use log::{debug, error, info};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::{
    config::{BackupConfig, GcpKmsConfig, KeyManagementConfig, ProviderConfig},
    keepsake_error,
    utils::{
        fs::{write_private_file, PrivateFile},
        Invocation, ToolRunner,
    },
    OperatorKey, Result, ResultExt,
};

pub const SOPS_PROGRAM: &str = "sops";
pub const SOPS_CONFIG_FILE: &str = ".sops.yaml";
pub const GCP_CREDENTIALS_FILE: &str = "gcp_kms_credentials.json";

/// Stage one: opens a token sealed with the operator key.
pub fn decrypt_operator_secret(key: &OperatorKey, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>> {
    key.open(ciphertext)
        .context("Failed to decrypt provider secret with the operator key")
}

#[derive(Serialize)]
struct SopsConfig<'a> {
    creation_rules: Vec<SopsCreationRule<'a>>,
}

#[derive(Serialize)]
struct SopsCreationRule<'a> {
    gcp_kms: &'a str,
}

/// Runs both decryption stages. Credential files live in `conf_dir` only for
/// as long as the `sops` call needs them.
pub struct LayeredDecryptor<'a> {
    runner: &'a dyn ToolRunner,
    conf_dir: PathBuf,
}

impl<'a> LayeredDecryptor<'a> {
    pub fn new(runner: &'a dyn ToolRunner, conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            conf_dir: conf_dir.into(),
        }
    }

    /// Opens the provider secret named by `key_management` with `key`, then
    /// decrypts `document` with it.
    pub fn decrypt(
        &self,
        key: &OperatorKey,
        key_management: &KeyManagementConfig,
        document: &Path,
    ) -> Result<BackupConfig> {
        let provider_secret = match &key_management.provider {
            ProviderConfig::Gcp(conf) => decrypt_operator_secret(key, &conf.sealed_svc_key)?,
            ProviderConfig::Aws(_) => {
                return Err(keepsake_error!(UnsupportedProvider {
                    provider: "aws".to_string(),
                }))
            }
        };
        self.decrypt_config(&provider_secret, key_management, document)
    }

    /// Stage two. `provider_secret` is the base64 encoded credential the
    /// provider needs to reach its KMS.
    pub fn decrypt_config(
        &self,
        provider_secret: &[u8],
        key_management: &KeyManagementConfig,
        document: &Path,
    ) -> Result<BackupConfig> {
        match &key_management.provider {
            ProviderConfig::Gcp(conf) => self.decrypt_with_gcp(provider_secret, conf, document),
            ProviderConfig::Aws(_) => Err(keepsake_error!(UnsupportedProvider {
                provider: "aws".to_string(),
            })),
        }
    }

    fn decrypt_with_gcp(
        &self,
        provider_secret: &[u8],
        conf: &GcpKmsConfig,
        document: &Path,
    ) -> Result<BackupConfig> {
        verify_gcp_kms_reference(document, &conf.kms_id)?;

        let svc_key = Zeroizing::new(b64_engine.decode(trim_ascii(provider_secret)).map_err(
            |e| {
                keepsake_error!(DecryptionError {
                    description: format!("Provider secret is not valid base64: {e}"),
                })
            },
        )?);

        let sops_config = self.conf_dir.join(SOPS_CONFIG_FILE);
        let rules = SopsConfig {
            creation_rules: vec![SopsCreationRule {
                gcp_kms: &conf.kms_id,
            }],
        };
        write_private_file(&sops_config, serde_yaml::to_string(&rules)?.as_bytes())?;

        let credentials = PrivateFile::create(self.conf_dir.join(GCP_CREDENTIALS_FILE), &svc_key)?;
        debug!("Wrote KMS credentials to {}", credentials.path().display());

        let invocation = Invocation::new(
            SOPS_PROGRAM,
            [
                "--config".to_string(),
                sops_config.display().to_string(),
                "--decrypt".to_string(),
                "--output-type".to_string(),
                "yaml".to_string(),
                document.display().to_string(),
            ],
        )
        .env(
            "GOOGLE_APPLICATION_CREDENTIALS",
            credentials.path().display().to_string(),
        );

        let output = self.runner.run(&invocation);
        drop(credentials);
        let output = output?;

        if !output.success() {
            let msg = format!(
                "sops failed to decrypt {} ({}): {}",
                document.display(),
                output.status_text(),
                output.stderr_text()
            );
            error!("{msg}");
            return Err(keepsake_error!(DecryptionError { description: msg }));
        }

        let plaintext = Zeroizing::new(output.stdout);
        let config = BackupConfig::from_yaml(&plaintext)?;
        info!(
            "Decrypted configuration {} (source: {})",
            document.display(),
            config.collection_name()
        );
        Ok(config)
    }
}

/// Refuses documents that were not encrypted with the configured KMS key, so
/// a correct operator key alone never unlocks a document.
fn verify_gcp_kms_reference(document: &Path, kms_id: &str) -> Result<()> {
    let raw = std::fs::read(document)
        .context(format!("Reading encrypted configuration {} failed", document.display()))?;
    let parsed: serde_yaml::Value = serde_yaml::from_slice(&raw)?;

    let resource_ids: Vec<&str> = parsed
        .get("sops")
        .and_then(|sops| sops.get("gcp_kms"))
        .and_then(|keys| keys.as_sequence())
        .map(|keys| {
            keys.iter()
                .filter_map(|key| key.get("resource_id").and_then(|id| id.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if resource_ids.iter().any(|id| id.trim() == kms_id.trim()) {
        return Ok(());
    }

    Err(keepsake_error!(DecryptionError {
        description: format!(
            "{} is not encrypted with KMS key {kms_id} (found: [{}])",
            document.display(),
            resource_ids.join(", ")
        ),
    }))
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
