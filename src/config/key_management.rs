use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use super::read_config_file;
use crate::{keepsake_error, utils::security::warn_if_loose_permissions, Result};

/// The plaintext key-management file stored next to the encrypted
/// configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyManagementConfig {
    /// Local file holding the operator key.
    pub secret_path: PathBuf,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    Gcp(GcpKmsConfig),
    Aws(AwsKmsConfig),
}

impl ProviderConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Gcp(_) => "gcp",
            ProviderConfig::Aws(_) => "aws",
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GcpKmsConfig {
    /// Resource id of the Cloud KMS key the document was encrypted with.
    #[serde(rename = "gcp_kms_id")]
    pub kms_id: String,
    /// Service account key JSON, base64 encoded, then sealed with the
    /// operator key.
    #[serde(rename = "gcp_svc_key")]
    pub sealed_svc_key: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AwsKmsConfig {
    pub kms_arn: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawKeyManagementConfig {
    #[serde(rename = "type")]
    provider: String,
    secret_path: PathBuf,
    conf: serde_yaml::Value,
}

impl KeyManagementConfig {
    pub fn load(path: &Path) -> Result<Self> {
        warn_if_loose_permissions(path);
        let data = read_config_file(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        let raw: RawKeyManagementConfig = serde_yaml::from_slice(data).map_err(|e| {
            keepsake_error!(InvalidParameter {
                description: format!("Failed to parse key management file: {e}"),
            })
        })?;
        debug!("Key management provider: {}", raw.provider);

        let provider = match raw.provider.as_str() {
            "gcp" => ProviderConfig::Gcp(parse_conf(&raw.provider, raw.conf)?),
            "aws" => ProviderConfig::Aws(parse_conf(&raw.provider, raw.conf)?),
            other => {
                return Err(keepsake_error!(InvalidParameter {
                    description: format!(
                        "Unknown key management provider '{other}', expected one of: gcp, aws"
                    ),
                }))
            }
        };

        Ok(Self {
            secret_path: raw.secret_path,
            provider,
        })
    }
}

fn parse_conf<T: serde::de::DeserializeOwned>(provider: &str, conf: serde_yaml::Value) -> Result<T> {
    serde_yaml::from_value(conf).map_err(|e| {
        keepsake_error!(InvalidParameter {
            description: format!("Invalid '{provider}' key management conf: {e}"),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gcp() {
        let config = KeyManagementConfig::from_yaml(
            br#"
type: gcp
secret_path: /run/secrets/operator.key
conf:
  gcp_kms_id: projects/p/locations/global/keyRings/r/cryptoKeys/k
  gcp_svc_key: c2VhbGVk
"#,
        )
        .unwrap();
        assert_eq!(config.secret_path, PathBuf::from("/run/secrets/operator.key"));
        assert_eq!(
            config.provider,
            ProviderConfig::Gcp(GcpKmsConfig {
                kms_id: "projects/p/locations/global/keyRings/r/cryptoKeys/k".to_string(),
                sealed_svc_key: "c2VhbGVk".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_aws_declared() {
        let config = KeyManagementConfig::from_yaml(
            br#"
type: aws
secret_path: /run/secrets/operator.key
conf:
  kms_arn: arn:aws:kms:eu-west-1:111122223333:key/abc
"#,
        )
        .unwrap();
        assert_eq!(config.provider.name(), "aws");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = KeyManagementConfig::from_yaml(
            br#"
type: azure
secret_path: /k
conf: {}
"#,
        )
        .unwrap_err();
        assert!(format!("{err}").contains("Unknown key management provider 'azure'"));
    }

    #[test]
    fn test_provider_conf_is_validated_strictly() {
        let err = KeyManagementConfig::from_yaml(
            br#"
type: gcp
secret_path: /k
conf:
  gcp_kms_id: projects/p/locations/global/keyRings/r/cryptoKeys/k
"#,
        )
        .unwrap_err();
        let rendered = format!("{err}");
        assert!(rendered.contains("Invalid 'gcp' key management conf"), "{rendered}");
        assert!(rendered.contains("gcp_svc_key"), "{rendered}");
    }
}
