use std::path::PathBuf;

use serde::Deserialize;

use super::{base64_secret, optional_base64_secret, require_non_empty, ExposeSecret, SecretBytes};
use crate::{keepsake_error, Result};

/// Where encrypted artifacts are uploaded.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "conf", rename_all = "snake_case")]
pub enum DestinationConfig {
    /// Google Cloud Storage.
    Gcp(GcpDestinationConfig),
    /// Any S3-compatible bucket.
    S3(S3DestinationConfig),
    /// A local or mounted directory.
    Filesystem(FilesystemDestinationConfig),
}

impl DestinationConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            DestinationConfig::Gcp(conf) => {
                require_non_empty("dst.conf.gcp_bucket_name", &conf.bucket_name)?;
                match conf.credentials()? {
                    GcpCredentials::ServiceAccount(key) => {
                        require_credentials("dst.conf.gcp_svc_key", key)
                    }
                    GcpCredentials::Hmac(key) => require_credentials("dst.conf.gcp_hmac_key", key),
                }
            }
            DestinationConfig::S3(conf) => {
                require_non_empty("dst.conf.bucket", &conf.bucket)?;
                require_credentials("dst.conf.credentials", &conf.credentials)
            }
            DestinationConfig::Filesystem(conf) => {
                if conf.path.as_os_str().is_empty() {
                    return Err(keepsake_error!(InvalidParameter {
                        description: "dst.conf.path must not be empty".to_string(),
                    }));
                }
                Ok(())
            }
        }
    }
}

fn require_credentials(field: &str, credentials: &SecretBytes) -> Result<()> {
    if credentials.expose_secret().is_empty() {
        return Err(keepsake_error!(InvalidParameter {
            description: format!("{field} must not be empty"),
        }));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcpDestinationConfig {
    #[serde(rename = "gcp_bucket_name")]
    pub bucket_name: String,
    /// Base64 of a service account key file.
    #[serde(
        rename = "gcp_svc_key",
        default,
        deserialize_with = "optional_base64_secret"
    )]
    pub svc_key: Option<SecretBytes>,
    /// Base64 of a JSON object holding a Cloud Storage HMAC key pair
    /// (`access_key_id`, `secret_access_key`), used through the XML API.
    #[serde(
        rename = "gcp_hmac_key",
        default,
        deserialize_with = "optional_base64_secret"
    )]
    pub hmac_key: Option<SecretBytes>,
    #[serde(default)]
    pub prefix: Option<String>,
}

/// The credential a gcp destination authenticates with.
pub enum GcpCredentials<'a> {
    ServiceAccount(&'a SecretBytes),
    Hmac(&'a SecretBytes),
}

impl GcpDestinationConfig {
    /// Exactly one of `gcp_svc_key` and `gcp_hmac_key` must be set.
    pub fn credentials(&self) -> Result<GcpCredentials<'_>> {
        match (&self.svc_key, &self.hmac_key) {
            (Some(key), None) => Ok(GcpCredentials::ServiceAccount(key)),
            (None, Some(key)) => Ok(GcpCredentials::Hmac(key)),
            (Some(_), Some(_)) => Err(keepsake_error!(InvalidParameter {
                description: "dst.conf.gcp_svc_key and dst.conf.gcp_hmac_key are exclusive"
                    .to_string(),
            })),
            (None, None) => Err(keepsake_error!(InvalidParameter {
                description: "dst.conf.gcp_svc_key is required".to_string(),
            })),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3DestinationConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Base64 of a JSON object with `access_key_id`, `secret_access_key` and
    /// an optional `session_token`.
    #[serde(deserialize_with = "base64_secret")]
    pub credentials: SecretBytes,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FilesystemDestinationConfig {
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_with_defaults() {
        let conf: DestinationConfig = serde_yaml::from_str(
            r#"
type: s3
conf:
  bucket: backups
  credentials: e30=
"#,
        )
        .unwrap();
        match conf {
            DestinationConfig::S3(s3) => {
                assert_eq!(s3.bucket, "backups");
                assert_eq!(s3.prefix, None);
                assert_eq!(s3.endpoint, None);
                assert_eq!(s3.credentials.expose_secret(), b"{}");
                assert!(format!("{s3:?}").contains("REDACTED"));
            }
            other => panic!("unexpected destination {other:?}"),
        }
    }

    #[test]
    fn test_parse_gcp_service_account() {
        let conf: DestinationConfig = serde_yaml::from_str(
            r#"
type: gcp
conf:
  gcp_bucket_name: backups
  gcp_svc_key: eyJ0eXBlIjoic2VydmljZV9hY2NvdW50In0=
  prefix: nightly
"#,
        )
        .unwrap();
        conf.validate().unwrap();
        let DestinationConfig::Gcp(gcp) = conf else {
            panic!("expected a gcp destination");
        };
        assert_eq!(gcp.bucket_name, "backups");
        assert_eq!(gcp.prefix.as_deref(), Some("nightly"));
        match gcp.credentials().unwrap() {
            GcpCredentials::ServiceAccount(key) => {
                assert_eq!(key.expose_secret(), br#"{"type":"service_account"}"#)
            }
            GcpCredentials::Hmac(_) => panic!("expected a service account key"),
        }
    }

    #[test]
    fn test_gcp_credentials_exclusive_and_required() {
        let both: DestinationConfig = serde_yaml::from_str(
            r#"
type: gcp
conf:
  gcp_bucket_name: backups
  gcp_svc_key: e30=
  gcp_hmac_key: e30=
"#,
        )
        .unwrap();
        let err = both.validate().unwrap_err();
        assert!(format!("{err}").contains("are exclusive"));

        let neither: DestinationConfig = serde_yaml::from_str(
            r#"
type: gcp
conf:
  gcp_bucket_name: backups
"#,
        )
        .unwrap();
        let err = neither.validate().unwrap_err();
        assert!(format!("{err}").contains("dst.conf.gcp_svc_key is required"));
    }

    #[test]
    fn test_gcp_requires_bucket() {
        let conf: DestinationConfig = serde_yaml::from_str(
            r#"
type: gcp
conf:
  gcp_bucket_name: ""
  gcp_hmac_key: e30=
"#,
        )
        .unwrap();
        let err = conf.validate().unwrap_err();
        assert!(format!("{err}").contains("dst.conf.gcp_bucket_name must not be empty"));
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let conf: DestinationConfig = serde_yaml::from_str(
            r#"
type: s3
conf:
  bucket: backups
  credentials: ""
"#,
        )
        .unwrap();
        assert!(conf.validate().is_err());
    }
}
