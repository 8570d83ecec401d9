//! The decrypted backup configuration document and the plaintext
//! key-management file that unlocks it.
//!
//! Both documents are YAML. Variant sections carry a `type` tag and a `conf`
//! body; the tag is matched first and the body is then validated strictly
//! against that variant's schema.

use std::path::Path;

use serde::Deserialize;
use serde_with::{base64::Base64, serde_as};

use crate::{keepsake_error, Result, ResultExt};

pub mod destination;
pub mod key_management;
mod secret;
pub mod source;

pub use destination::{
    DestinationConfig, FilesystemDestinationConfig, GcpCredentials, GcpDestinationConfig,
    S3DestinationConfig,
};
pub use key_management::{AwsKmsConfig, GcpKmsConfig, KeyManagementConfig, ProviderConfig};
pub(crate) use secret::{base64_secret, optional_base64_secret};
pub use secret::{ExposeSecret, SecretBytes, SecretString};
pub use source::{DavConfig, SourceConfig, VaultwardenConfig};

/// The second-stage configuration document, only ever held in memory.
#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    pub src: SourceConfig,
    pub dst: DestinationConfig,
    /// Recipient public key (ASCII armored or binary), base64 encoded.
    #[serde_as(as = "Base64")]
    pub gpg: Vec<u8>,
}

impl BackupConfig {
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        let config: BackupConfig = serde_yaml::from_slice(data).map_err(|e| {
            keepsake_error!(InvalidParameter {
                description: format!("Failed to parse backup configuration: {e}"),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gpg.is_empty() {
            return Err(keepsake_error!(InvalidParameter {
                description: "gpg recipient key must not be empty".to_string(),
            }));
        }
        self.src.validate()?;
        self.dst.validate()
    }

    /// Logical name of this backup's data family, used as the remote prefix.
    pub fn collection_name(&self) -> &'static str {
        self.src.type_name()
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(keepsake_error!(InvalidParameter {
            description: format!("{field} must not be empty"),
        }));
    }
    Ok(())
}

pub(crate) fn read_config_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).context(format!("Reading {} failed", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPG_B64: &str = "LS0tLS1CRUdJTiBQR1AgUFVCTElDIEtFWSBCTE9DSy0tLS0t";

    #[test]
    fn test_parse_full_document() {
        let yaml = format!(
            r#"
src:
  type: vaultwarden
  conf:
    vw_url: https://vault.example.com
    vw_client_id: user.1234
    vw_client_secret: client-secret
    vw_password: master-password
dst:
  type: gcp
  conf:
    gcp_bucket_name: backups
    gcp_hmac_key: eyJhY2Nlc3Nfa2V5X2lkIjoiR09PRyJ9
gpg: {GPG_B64}
"#
        );
        let config = BackupConfig::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(config.collection_name(), "vaultwarden");
        assert!(config.gpg.starts_with(b"-----BEGIN PGP"));
        match &config.src {
            SourceConfig::Vaultwarden(vw) => {
                assert_eq!(vw.url, "https://vault.example.com");
                assert_eq!(vw.password.expose_secret(), "master-password");
            }
            other => panic!("unexpected source {other:?}"),
        }
        assert!(matches!(config.dst, DestinationConfig::Gcp(_)));
    }

    #[test]
    fn test_test_source_without_conf() {
        let yaml = format!(
            r#"
src:
  type: test
dst:
  type: filesystem
  conf:
    path: /var/backups
gpg: {GPG_B64}
"#
        );
        let config = BackupConfig::from_yaml(yaml.as_bytes()).unwrap();
        assert!(matches!(config.src, SourceConfig::Test));
        assert_eq!(config.collection_name(), "test");
    }

    #[test]
    fn test_unknown_source_type_is_fatal() {
        let yaml = format!(
            r#"
src:
  type: ldap
  conf: {{}}
dst:
  type: filesystem
  conf:
    path: /var/backups
gpg: {GPG_B64}
"#
        );
        let err = BackupConfig::from_yaml(yaml.as_bytes()).unwrap_err();
        let rendered = format!("{err}");
        assert!(rendered.contains("unknown variant `ldap`"), "{rendered}");
    }

    #[test]
    fn test_unknown_destination_type_is_fatal() {
        let yaml = format!(
            r#"
src:
  type: test
dst:
  type: dropbox
  conf: {{}}
gpg: {GPG_B64}
"#
        );
        assert!(BackupConfig::from_yaml(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_field_in_variant_is_fatal() {
        let yaml = format!(
            r#"
src:
  type: test
dst:
  type: filesystem
  conf:
    path: /var/backups
    compression: zstd
gpg: {GPG_B64}
"#
        );
        let err = BackupConfig::from_yaml(yaml.as_bytes()).unwrap_err();
        assert!(format!("{err}").contains("unknown field `compression`"));
    }

    #[test]
    fn test_empty_gpg_key_rejected() {
        let yaml = r#"
src:
  type: test
dst:
  type: filesystem
  conf:
    path: /var/backups
gpg: ""
"#;
        let err = BackupConfig::from_yaml(yaml.as_bytes()).unwrap_err();
        assert!(format!("{err}").contains("gpg recipient key must not be empty"));
    }

    #[test]
    fn test_debug_never_prints_secrets() {
        let yaml = format!(
            r#"
src:
  type: dav
  conf:
    caldav_url: https://dav.example.com/cal
    caldav_username: alice
    caldav_password: cal-secret
    carddav_url: https://dav.example.com/card
    carddav_username: alice
    carddav_password: card-secret
dst:
  type: filesystem
  conf:
    path: /var/backups
gpg: {GPG_B64}
"#
        );
        let config = BackupConfig::from_yaml(yaml.as_bytes()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("cal-secret"));
        assert!(!rendered.contains("card-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
