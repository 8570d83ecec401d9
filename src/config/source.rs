use serde::Deserialize;

use super::{require_non_empty, ExposeSecret, SecretString};
use crate::Result;

/// Which producer fills the backup directory.
///
/// The `type` tag is read first and `conf` is then parsed strictly against
/// that source's schema. `conf` may be omitted, null or empty for `test`.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawSourceConfig")]
pub enum SourceConfig {
    /// CalDAV/CardDAV mirror through vdirsyncer.
    Dav(DavConfig),
    /// Bitwarden-compatible vault export through the `bw` CLI.
    Vaultwarden(VaultwardenConfig),
    /// Fixed fixture file, for exercising the pipeline.
    Test,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSourceConfig {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    conf: serde_yaml::Value,
}

impl TryFrom<RawSourceConfig> for SourceConfig {
    type Error = String;

    fn try_from(raw: RawSourceConfig) -> std::result::Result<Self, Self::Error> {
        match raw.kind.as_str() {
            "dav" => serde_yaml::from_value(raw.conf)
                .map(SourceConfig::Dav)
                .map_err(|e| format!("invalid dav conf: {e}")),
            "vaultwarden" => serde_yaml::from_value(raw.conf)
                .map(SourceConfig::Vaultwarden)
                .map_err(|e| format!("invalid vaultwarden conf: {e}")),
            "test" => match raw.conf {
                serde_yaml::Value::Null => Ok(SourceConfig::Test),
                serde_yaml::Value::Mapping(map) if map.is_empty() => Ok(SourceConfig::Test),
                _ => Err("the test source takes no conf".to_string()),
            },
            other => Err(format!(
                "unknown variant `{other}`, expected one of `dav`, `vaultwarden`, `test`"
            )),
        }
    }
}

impl SourceConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceConfig::Dav(_) => "dav",
            SourceConfig::Vaultwarden(_) => "vaultwarden",
            SourceConfig::Test => "test",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            SourceConfig::Dav(conf) => {
                require_non_empty("src.conf.caldav_url", &conf.caldav_url)?;
                require_non_empty("src.conf.carddav_url", &conf.carddav_url)
            }
            SourceConfig::Vaultwarden(conf) => {
                require_non_empty("src.conf.vw_url", &conf.url)?;
                require_non_empty("src.conf.vw_client_id", &conf.client_id)?;
                require_non_empty("src.conf.vw_password", conf.password.expose_secret())
            }
            SourceConfig::Test => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DavConfig {
    pub caldav_url: String,
    pub caldav_username: String,
    pub caldav_password: SecretString,
    pub carddav_url: String,
    pub carddav_username: String,
    pub carddav_password: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultwardenConfig {
    #[serde(rename = "vw_url")]
    pub url: String,
    #[serde(rename = "vw_client_id")]
    pub client_id: String,
    #[serde(rename = "vw_client_secret")]
    pub client_secret: SecretString,
    /// Master password. Also protects the generated password database.
    #[serde(rename = "vw_password")]
    pub password: SecretString,
}
